//! Context Retrieval Service
//!
//! Fans three read-only searches out concurrently, each under its own
//! timeout, and joins whatever came back. Backend trouble never fails the
//! request: the affected lists come back empty and `degraded` is set.

use super::{
    Embedder, MetadataFilter, RetrievedContext, SimilaritySearch, Snippet, EXAMPLE_COLLECTION,
    METRIC_COLLECTION, SCHEMA_COLLECTION,
};
use crate::config::EngineConfig;
use crate::error::{Nl2SqlError, Result};
use crate::query_spec::QuerySpec;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct ContextRetrievalService {
    search: Arc<dyn SimilaritySearch>,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
    min_relevance: f32,
    timeout: Duration,
}

impl ContextRetrievalService {
    pub fn new(search: Arc<dyn SimilaritySearch>, embedder: Arc<dyn Embedder>, config: &EngineConfig) -> Self {
        Self {
            search,
            embedder,
            top_k: config.retrieval_top_k,
            min_relevance: config.min_relevance,
            timeout: config.retrieval_timeout(),
        }
    }

    pub async fn retrieve(&self, spec: &QuerySpec, query_text: &str) -> RetrievedContext {
        let query_vector = match tokio::time::timeout(self.timeout, self.embedder.embed(query_text)).await {
            Ok(Ok(vector)) => vector,
            Ok(Err(e)) => {
                warn!(error = %e, "Query embedding failed, continuing without retrieved context");
                return RetrievedContext::degraded();
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Query embedding timed out");
                return RetrievedContext::degraded();
            }
        };

        let schema_filter = MetadataFilter::new();
        let mut metric_filter = MetadataFilter::new();
        let mut example_filter = MetadataFilter::new();
        if let Some(metric) = &spec.metric {
            metric_filter.insert("metric".to_string(), metric.clone());
        }
        example_filter.insert("mode".to_string(), spec.comparison_mode.as_str().to_string());

        let (schema, metrics, examples) = tokio::join!(
            self.search_one(SCHEMA_COLLECTION, &query_vector, &schema_filter),
            self.search_one(METRIC_COLLECTION, &query_vector, &metric_filter),
            self.search_one(EXAMPLE_COLLECTION, &query_vector, &example_filter),
        );

        let mut context = RetrievedContext::default();
        for (result, slot) in [
            (schema, &mut context.schema_snippets),
            (metrics, &mut context.metric_definitions),
            (examples, &mut context.examples),
        ] {
            match result {
                Ok(snippets) => *slot = snippets,
                Err(_) => context.degraded = true,
            }
        }

        debug!(
            schema = context.schema_snippets.len(),
            metrics = context.metric_definitions.len(),
            examples = context.examples.len(),
            degraded = context.degraded,
            "Retrieved context"
        );
        context
    }

    async fn search_one(&self, collection: &str, vector: &[f32], filters: &MetadataFilter) -> Result<Vec<Snippet>> {
        let result = tokio::time::timeout(
            self.timeout,
            self.search.search(collection, vector, filters, self.top_k),
        )
        .await
        .map_err(|_| Nl2SqlError::Retrieval(format!("search in '{}' timed out", collection)))
        .and_then(|r| r);

        match result {
            Ok(hits) => Ok(self.rank(hits)),
            Err(e) => {
                warn!(collection, error = %e, "Similarity search unavailable");
                Err(e)
            }
        }
    }

    /// Drop below-threshold hits and cap at top-K; never backfill
    fn rank(&self, mut hits: Vec<Snippet>) -> Vec<Snippet> {
        hits.retain(|h| h.score >= self.min_relevance);
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(self.top_k);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_spec::{ComparisonMode, RankOrder, TimeRange};
    use crate::registry::Registry;
    use crate::retrieval::corpus::seed_store;
    use crate::retrieval::{HashingEmbedder, InMemoryVectorStore};
    use async_trait::async_trait;

    struct Unavailable;

    #[async_trait]
    impl SimilaritySearch for Unavailable {
        async fn search(&self, _: &str, _: &[f32], _: &MetadataFilter, _: usize) -> Result<Vec<Snippet>> {
            Err(Nl2SqlError::Retrieval("connection refused".to_string()))
        }
    }

    struct Slow;

    #[async_trait]
    impl SimilaritySearch for Slow {
        async fn search(&self, _: &str, _: &[f32], _: &MetadataFilter, _: usize) -> Result<Vec<Snippet>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    fn spec() -> QuerySpec {
        QuerySpec {
            metric: Some("IMOR".to_string()),
            banks: vec!["INVEX".to_string()],
            time_range: TimeRange::year(2024).unwrap(),
            dimension_filters: vec![],
            comparison_mode: ComparisonMode::Single,
            top_n: None,
            rank_order: RankOrder::Descending,
        }
    }

    #[tokio::test]
    async fn test_retrieval_scopes_metric_definitions() {
        let registry = Registry::builtin();
        let embedder = Arc::new(HashingEmbedder::default());
        let store = Arc::new(InMemoryVectorStore::new(embedder.dimension()));
        seed_store(&store, embedder.as_ref(), &registry).await.unwrap();

        let config = EngineConfig {
            min_relevance: 0.0,
            ..EngineConfig::default()
        };
        let service = ContextRetrievalService::new(store, embedder, &config);
        let context = service.retrieve(&spec(), "IMOR de INVEX en 2024").await;

        assert!(!context.degraded);
        assert!(!context.metric_definitions.is_empty());
        assert!(context.metric_definitions.iter().all(|s| s.meta("metric") == Some("IMOR")));
        assert!(context.examples.iter().all(|s| s.meta("mode") == Some("single")));
        assert!(context.schema_snippets.len() <= config.retrieval_top_k);
    }

    #[tokio::test]
    async fn test_high_threshold_drops_everything() {
        let registry = Registry::builtin();
        let embedder = Arc::new(HashingEmbedder::default());
        let store = Arc::new(InMemoryVectorStore::new(embedder.dimension()));
        seed_store(&store, embedder.as_ref(), &registry).await.unwrap();

        let config = EngineConfig {
            min_relevance: 0.999,
            ..EngineConfig::default()
        };
        let context = ContextRetrievalService::new(store, embedder, &config)
            .retrieve(&spec(), "IMOR de INVEX en 2024")
            .await;
        assert!(context.is_empty());
        assert!(!context.degraded);
    }

    #[tokio::test]
    async fn test_unavailable_backend_degrades() {
        let service = ContextRetrievalService::new(
            Arc::new(Unavailable),
            Arc::new(HashingEmbedder::default()),
            &EngineConfig::default(),
        );
        let context = service.retrieve(&spec(), "IMOR de INVEX").await;
        assert!(context.degraded);
        assert!(context.is_empty());
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let config = EngineConfig {
            retrieval_timeout_ms: 20,
            ..EngineConfig::default()
        };
        let service = ContextRetrievalService::new(Arc::new(Slow), Arc::new(HashingEmbedder::default()), &config);
        let context = service.retrieve(&spec(), "IMOR de INVEX").await;
        assert!(context.degraded);
    }
}
