//! Context Retrieval
//!
//! Grounding for SQL generation: schema descriptions, metric definitions and
//! worked examples fetched by similarity search.

pub mod corpus;
pub mod embedder;
pub mod service;
pub mod vector_store;

pub use embedder::{Embedder, HashingEmbedder, OpenAiEmbedder};
pub use service::ContextRetrievalService;
pub use vector_store::{Document, Embedding, InMemoryVectorStore};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const SCHEMA_COLLECTION: &str = "schema";
pub const METRIC_COLLECTION: &str = "metric_definitions";
pub const EXAMPLE_COLLECTION: &str = "examples";

/// Equality filters over document metadata
pub type MetadataFilter = HashMap<String, String>;

/// One ranked search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub text: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Snippet {
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|v| v.as_str())
    }
}

/// Per-request grounding, discarded after generation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievedContext {
    pub schema_snippets: Vec<Snippet>,
    pub metric_definitions: Vec<Snippet>,
    pub examples: Vec<Snippet>,
    /// Backend unavailable or slow; generation falls back to registry data
    pub degraded: bool,
}

impl RetrievedContext {
    pub fn degraded() -> Self {
        Self {
            degraded: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.schema_snippets.is_empty() && self.metric_definitions.is_empty() && self.examples.is_empty()
    }
}

/// Outbound similarity-search interface
#[async_trait]
pub trait SimilaritySearch: Send + Sync {
    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        filters: &MetadataFilter,
        top_k: usize,
    ) -> Result<Vec<Snippet>>;
}
