//! Query Execution
//!
//! Runs validator-accepted SQL against the relational store under a bounded
//! pool, a per-statement timeout and a cancellation signal.

pub mod cancel;
pub mod postgres;
pub mod result;

pub use cancel::{cancellation_pair, CancellationHandle, CancellationSignal};
pub use postgres::PostgresExecutor;
pub use result::{QueryResult, ResultRow};

use crate::error::Result;
use crate::validator::AcceptedSql;
use async_trait::async_trait;

/// Relational-store executor. Accepts only SQL that passed the validator.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Errors: `PoolExhausted` when no connection could be acquired,
    /// `ExecutionTimeout`, `ExecutionFailure` or `Cancelled` otherwise.
    async fn execute(&self, sql: &AcceptedSql, cancel: CancellationSignal) -> Result<QueryResult>;

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
