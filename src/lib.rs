pub mod cache;
pub mod config;
pub mod error;
pub mod execution;
pub mod generation;
pub mod parser;
pub mod pipeline;
pub mod query_spec;
pub mod registry;
pub mod retrieval;
pub mod validator;
pub mod visualization;

pub use config::EngineConfig;
pub use error::{ErrorKind, Nl2SqlError, Result};
pub use pipeline::{Invocation, Nl2SqlPipeline, QueryRequest, QueryResponse};
pub use query_spec::{ComparisonMode, QuerySpec, RankOrder, TimeRange};
pub use registry::{Registry, SharedRegistry};
