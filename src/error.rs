use crate::validator::RejectionReason;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Nl2SqlError {
    #[error("Ambiguous query: {0}")]
    AmbiguousQuery(String),

    #[error("Unsupported metric '{requested}'")]
    UnsupportedMetric {
        requested: String,
        supported: Vec<String>,
    },

    #[error("Unsupported bank '{requested}'")]
    UnsupportedBank {
        requested: String,
        supported: Vec<String>,
    },

    #[error("Validation rejected: {0}")]
    ValidationRejected(RejectionReason),

    #[error("Execution timed out after {0} ms")]
    ExecutionTimeout(u64),

    #[error("Execution error: {0}")]
    ExecutionFailure(String),

    #[error("Connection pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Caller-facing error tag. Never carries SQL or internal identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    AmbiguousQuery,
    UnsupportedMetric,
    UnsupportedBank,
    ValidationRejected,
    ExecutionTimeout,
    ExecutionFailure,
    PoolExhausted,
    Cancelled,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::AmbiguousQuery => "AmbiguousQuery",
            ErrorKind::UnsupportedMetric => "UnsupportedMetric",
            ErrorKind::UnsupportedBank => "UnsupportedBank",
            ErrorKind::ValidationRejected => "ValidationRejected",
            ErrorKind::ExecutionTimeout => "ExecutionTimeout",
            ErrorKind::ExecutionFailure => "ExecutionFailure",
            ErrorKind::PoolExhausted => "PoolExhausted",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Internal => "Internal",
        };
        write!(f, "{}", name)
    }
}

impl Nl2SqlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Nl2SqlError::AmbiguousQuery(_) => ErrorKind::AmbiguousQuery,
            Nl2SqlError::UnsupportedMetric { .. } => ErrorKind::UnsupportedMetric,
            Nl2SqlError::UnsupportedBank { .. } => ErrorKind::UnsupportedBank,
            Nl2SqlError::ValidationRejected(_) => ErrorKind::ValidationRejected,
            Nl2SqlError::ExecutionTimeout(_) => ErrorKind::ExecutionTimeout,
            Nl2SqlError::ExecutionFailure(_) | Nl2SqlError::Database(_) => {
                ErrorKind::ExecutionFailure
            }
            Nl2SqlError::PoolExhausted(_) => ErrorKind::PoolExhausted,
            Nl2SqlError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Internal,
        }
    }

    /// Only execution-stage failures qualify for the single regenerate-and-retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Nl2SqlError::ExecutionTimeout(_)
                | Nl2SqlError::ExecutionFailure(_)
                | Nl2SqlError::Database(_)
        )
    }

    /// Message that is safe to hand back to the caller.
    pub fn public_message(&self) -> String {
        match self {
            Nl2SqlError::AmbiguousQuery(msg) => msg.clone(),
            Nl2SqlError::UnsupportedMetric { requested, supported } => format!(
                "La métrica '{}' no está soportada. Métricas disponibles: {}",
                requested,
                supported.join(", ")
            ),
            Nl2SqlError::UnsupportedBank { requested, supported } => format!(
                "El banco '{}' no está soportado. Bancos disponibles: {}",
                requested,
                supported.join(", ")
            ),
            Nl2SqlError::ValidationRejected(_) => {
                "La consulta no pudo procesarse de forma segura.".to_string()
            }
            Nl2SqlError::ExecutionTimeout(_) => {
                "La consulta tardó demasiado en ejecutarse. Intenta acotar el periodo.".to_string()
            }
            Nl2SqlError::PoolExhausted(_) => {
                "El servicio de datos está saturado. Intenta de nuevo en unos momentos.".to_string()
            }
            Nl2SqlError::Cancelled => "La consulta fue cancelada.".to_string(),
            _ => "No fue posible completar la consulta.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Nl2SqlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_execution_errors_are_retryable() {
        assert!(Nl2SqlError::ExecutionTimeout(10_000).is_retryable());
        assert!(Nl2SqlError::ExecutionFailure("boom".to_string()).is_retryable());
        assert!(!Nl2SqlError::PoolExhausted("no conn".to_string()).is_retryable());
        assert!(!Nl2SqlError::ValidationRejected(RejectionReason::MultipleStatements).is_retryable());
        assert!(!Nl2SqlError::Cancelled.is_retryable());
    }

    #[test]
    fn test_public_message_hides_internals() {
        let err = Nl2SqlError::ExecutionFailure("relation \"monthly_kpis\" does not exist".to_string());
        assert!(!err.public_message().contains("monthly_kpis"));
        assert_eq!(err.kind(), ErrorKind::ExecutionFailure);
    }
}
