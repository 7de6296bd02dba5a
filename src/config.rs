//! Engine Configuration
//!
//! Settings for the relational pool, the retrieval client and the pipeline.
//! Loaded from environment variables (after `.env`), from a JSON file, or
//! built in code.

use crate::error::{Nl2SqlError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Connection string for the relational store; required only to execute
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
    pub statement_timeout_ms: u64,
    /// Per-search timeout for the similarity backend, independent of the pool
    pub retrieval_timeout_ms: u64,
    pub retrieval_top_k: usize,
    pub min_relevance: f32,
    /// LIMIT for rankings that did not ask for an explicit top N
    pub default_ranking_limit: u32,
    /// 0 disables the result cache
    pub cache_ttl_secs: u64,
    /// Registry exported by the ETL loader; the built-in registry otherwise
    pub registry_path: Option<PathBuf>,
    pub embedding_api_key: Option<String>,
    pub embedding_base_url: String,
    pub embedding_model: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            acquire_timeout_ms: 2_000,
            statement_timeout_ms: 10_000,
            retrieval_timeout_ms: 1_500,
            retrieval_top_k: 5,
            min_relevance: 0.25,
            default_ranking_limit: 10,
            cache_ttl_secs: 0,
            registry_path: None,
            embedding_api_key: None,
            embedding_base_url: "https://api.openai.com/v1".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by whatever is set in the process environment
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        config.database_url = env_string("NL2SQL_DATABASE_URL").or_else(|| env_string("DATABASE_URL"));
        if let Some(v) = env_parse("NL2SQL_DB_MAX_CONNECTIONS")? {
            config.max_connections = v;
        }
        if let Some(v) = env_parse("NL2SQL_DB_ACQUIRE_TIMEOUT_MS")? {
            config.acquire_timeout_ms = v;
        }
        if let Some(v) = env_parse("NL2SQL_STATEMENT_TIMEOUT_MS")? {
            config.statement_timeout_ms = v;
        }
        if let Some(v) = env_parse("NL2SQL_RETRIEVAL_TIMEOUT_MS")? {
            config.retrieval_timeout_ms = v;
        }
        if let Some(v) = env_parse("NL2SQL_RETRIEVAL_TOP_K")? {
            config.retrieval_top_k = v;
        }
        if let Some(v) = env_parse("NL2SQL_MIN_RELEVANCE")? {
            config.min_relevance = v;
        }
        if let Some(v) = env_parse("NL2SQL_DEFAULT_RANKING_LIMIT")? {
            config.default_ranking_limit = v;
        }
        if let Some(v) = env_parse("NL2SQL_CACHE_TTL_SECS")? {
            config.cache_ttl_secs = v;
        }
        config.registry_path = env_string("NL2SQL_REGISTRY_PATH").map(PathBuf::from);
        config.embedding_api_key = env_string("OPENAI_API_KEY");
        if let Some(url) = env_string("OPENAI_BASE_URL") {
            config.embedding_base_url = url;
        }
        if let Some(model) = env_string("NL2SQL_EMBEDDING_MODEL") {
            config.embedding_model = model;
        }

        config.validate()?;
        Ok(config)
    }

    /// JSON file; missing keys fall back to defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Nl2SqlError::Config("max_connections must be at least 1".to_string()));
        }
        if self.statement_timeout_ms == 0 {
            return Err(Nl2SqlError::Config("statement_timeout_ms must be positive".to_string()));
        }
        if self.retrieval_top_k == 0 {
            return Err(Nl2SqlError::Config("retrieval_top_k must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.min_relevance) {
            return Err(Nl2SqlError::Config(format!(
                "min_relevance must be within [0, 1], got {}",
                self.min_relevance
            )));
        }
        if self.default_ranking_limit == 0 {
            return Err(Nl2SqlError::Config("default_ranking_limit must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }

    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieval_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl_secs > 0).then(|| Duration::from_secs(self.cache_ttl_secs))
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Nl2SqlError::Config(format!("{} has an invalid value '{}'", key, raw))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.statement_timeout(), Duration::from_secs(10));
        assert!(config.cache_ttl().is_none());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"max_connections": 4, "cache_ttl_secs": 300}"#).unwrap();
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.retrieval_top_k, 5);
        assert_eq!(config.cache_ttl(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_rejects_out_of_range_relevance() {
        let config = EngineConfig {
            min_relevance: 1.5,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(Nl2SqlError::Config(_))));
    }
}
