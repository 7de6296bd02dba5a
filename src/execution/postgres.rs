//! PostgreSQL Executor
//!
//! sqlx pool sized and timed out independently of the retrieval client.
//! Every pooled session is read-only and carries a server-side
//! `statement_timeout`; the client side enforces the same bound with
//! `tokio::time::timeout` so a stalled network cannot outlive it.
//! An interrupted statement is cancelled server-side with
//! `pg_cancel_backend` from a second pooled session before its own
//! connection is closed.

use super::{CancellationSignal, QueryExecutor, QueryResult, ResultRow};
use crate::config::EngineConfig;
use crate::error::{Nl2SqlError, Result};
use crate::generation::SqlValue;
use crate::validator::AcceptedSql;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Connection, Executor, Row};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// SQLSTATE raised when `statement_timeout` cancels a query
const QUERY_CANCELED: &str = "57014";

const CANCEL_BACKEND: &str = "SELECT pg_cancel_backend($1)";

pub struct PostgresExecutor {
    pool: PgPool,
    statement_timeout: Duration,
    acquire_timeout: Duration,
}

enum Outcome {
    Rows(std::result::Result<Vec<PgRow>, sqlx::Error>),
    TimedOut,
    Cancelled,
}

impl PostgresExecutor {
    /// Build the pool. Connections are opened lazily on first acquire.
    pub fn connect_lazy(config: &EngineConfig) -> Result<Self> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| Nl2SqlError::Config("database_url is not set".to_string()))?;
        let statement_timeout_ms = config.statement_timeout_ms;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .after_connect(move |conn, _meta| {
                let set_timeout = format!("SET statement_timeout = {}", statement_timeout_ms);
                Box::pin(async move {
                    conn.execute(set_timeout.as_str()).await?;
                    conn.execute("SET default_transaction_read_only = on").await?;
                    Ok(())
                })
            })
            .connect_lazy(url)?;

        Ok(Self {
            pool,
            statement_timeout: config.statement_timeout(),
            acquire_timeout: config.acquire_timeout(),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Ask the server to stop the statement running on `pid`. Best effort:
    /// returns false when no second session could be had in time.
    pub async fn cancel_backend(&self, pid: i32) -> bool {
        let cancel = sqlx::query_scalar::<_, bool>(CANCEL_BACKEND)
            .bind(pid)
            .fetch_one(&self.pool);
        match tokio::time::timeout(self.acquire_timeout, cancel).await {
            Ok(Ok(signalled)) => signalled,
            Ok(Err(e)) => {
                debug!(pid, error = %e, "pg_cancel_backend failed");
                false
            }
            Err(_) => {
                debug!(pid, "pg_cancel_backend timed out");
                false
            }
        }
    }
}

#[async_trait]
impl QueryExecutor for PostgresExecutor {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn execute(&self, sql: &AcceptedSql, mut cancel: CancellationSignal) -> Result<QueryResult> {
        if cancel.is_cancelled() {
            return Err(Nl2SqlError::Cancelled);
        }
        let start = Instant::now();

        let mut conn = self.pool.acquire().await.map_err(|e| {
            warn!(error = %e, "Could not acquire a database connection");
            Nl2SqlError::PoolExhausted(e.to_string())
        })?;

        let backend_pid = sqlx::query_scalar::<_, i32>("SELECT pg_backend_pid()")
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| map_query_error(e, self.statement_timeout.as_millis() as u64))?;

        let mut query = sqlx::query(sql.statement());
        for param in sql.parameters() {
            query = match &param.value {
                SqlValue::Text(s) => query.bind(s.clone()),
                SqlValue::Date(d) => query.bind(*d),
                SqlValue::Int(i) => query.bind(*i),
            };
        }

        let outcome = {
            let fetch = tokio::time::timeout(self.statement_timeout, query.fetch_all(&mut *conn));
            tokio::select! {
                res = fetch => match res {
                    Ok(rows) => Outcome::Rows(rows),
                    Err(_) => Outcome::TimedOut,
                },
                _ = cancel.cancelled() => Outcome::Cancelled,
            }
        };

        let timeout_ms = self.statement_timeout.as_millis() as u64;
        let interrupted = match outcome {
            Outcome::Rows(Ok(rows)) => Ok(rows),
            Outcome::Rows(Err(e)) => return Err(map_query_error(e, timeout_ms)),
            Outcome::TimedOut => Err(Nl2SqlError::ExecutionTimeout(timeout_ms)),
            Outcome::Cancelled => Err(Nl2SqlError::Cancelled),
        };
        let rows = match interrupted {
            Ok(rows) => rows,
            Err(e) => {
                let signalled = self.cancel_backend(backend_pid).await;
                debug!(pid = backend_pid, signalled, "Interrupted statement");
                if let Err(close_err) = conn.detach().close().await {
                    debug!(error = %close_err, "Error closing interrupted connection");
                }
                return Err(e);
            }
        };

        let rows = rows.iter().map(decode_row).collect::<Result<Vec<_>>>()?;
        let elapsed = start.elapsed().as_millis() as u64;
        debug!(rows = rows.len(), elapsed_ms = elapsed, "Statement executed");

        Ok(QueryResult::new(rows, self.name(), elapsed))
    }

    async fn health_check(&self) -> Result<bool> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }
}

fn map_query_error(e: sqlx::Error, timeout_ms: u64) -> Nl2SqlError {
    match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(QUERY_CANCELED) => {
            Nl2SqlError::ExecutionTimeout(timeout_ms)
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => Nl2SqlError::PoolExhausted(e.to_string()),
        _ => Nl2SqlError::ExecutionFailure(e.to_string()),
    }
}

fn decode_row(row: &PgRow) -> Result<ResultRow> {
    let decode_err = |e: sqlx::Error| Nl2SqlError::ExecutionFailure(format!("Unexpected row shape: {}", e));
    Ok(ResultRow {
        bank: row.try_get::<String, _>("bank").map_err(decode_err)?,
        period: row.try_get::<NaiveDate, _>("period").map_err(decode_err)?,
        segment: row.try_get::<Option<String>, _>("segment").ok().flatten(),
        value: row.try_get::<Option<f64>, _>("value").map_err(decode_err)?,
    })
}
