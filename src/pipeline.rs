//! NL2SQL Pipeline
//!
//! One stateless request/response cycle:
//! screen → parse → retrieve → generate → validate → execute → transform.
//! Every stage can end the request with a clarification or a typed error;
//! validation always precedes execution and cache writes.

use crate::cache::ResultCache;
use crate::config::EngineConfig;
use crate::error::{ErrorKind, Nl2SqlError, Result};
use crate::execution::{CancellationSignal, PostgresExecutor, QueryExecutor, QueryResult};
use crate::generation::{SqlGenerationService, SqlGenerator};
use crate::parser::temporal::TemporalAnchor;
use crate::parser::{ParseContext, ParseOutcome, QuerySpecParser};
use crate::query_spec::QuerySpec;
use crate::registry::{Registry, SharedRegistry};
use crate::retrieval::corpus::seed_store;
use crate::retrieval::{
    ContextRetrievalService, Embedder, HashingEmbedder, InMemoryVectorStore, OpenAiEmbedder, RetrievedContext,
};
use crate::validator::{screen_input, AcceptedSql, RejectionReason, SqlValidator, ValidationVerdict};
use crate::visualization::{Series, TransformOptions, VisualizationTransformer};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

const AUDIT: &str = "nl2sql::audit";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query_text: String,
    /// Prior turn's spec for follow-up questions, supplied by the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_context: Option<QuerySpec>,
}

impl QueryRequest {
    pub fn new(query_text: &str) -> Self {
        Self {
            query_text: query_text.to_string(),
            conversation_context: None,
        }
    }

    pub fn with_context(mut self, spec: QuerySpec) -> Self {
        self.conversation_context = Some(spec);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub series: Vec<Series>,
    pub sql_debug_id: String,
    pub metric: String,
    pub unit: String,
    pub no_data: bool,
    /// Generation ran without retrieved context
    pub degraded: bool,
    /// Resolved spec, for the caller to send back as `conversation_context`
    pub query_spec: QuerySpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationResponse {
    pub requires_clarification: bool,
    pub message: String,
    pub options: Vec<String>,
    pub sql_debug_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_kind: ErrorKind,
    /// Never contains SQL or internal identifiers
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    pub sql_debug_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryResponse {
    Success(SuccessResponse),
    Clarification(ClarificationResponse),
    Error(ErrorResponse),
}

impl QueryResponse {
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            QueryResponse::Error(e) => Some(e.error_kind),
            _ => None,
        }
    }

    pub fn debug_id(&self) -> &str {
        match self {
            QueryResponse::Success(r) => &r.sql_debug_id,
            QueryResponse::Clarification(r) => &r.sql_debug_id,
            QueryResponse::Error(r) => &r.sql_debug_id,
        }
    }
}

/// Per-invocation inputs: the parse instant and the cancellation signal
#[derive(Debug, Clone)]
pub struct Invocation {
    pub anchor: TemporalAnchor,
    pub cancel: CancellationSignal,
}

impl Invocation {
    pub fn new(today: NaiveDate, latest_period: Option<NaiveDate>) -> Self {
        Self {
            anchor: TemporalAnchor::new(today, latest_period),
            cancel: CancellationSignal::never(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationSignal) -> Self {
        self.cancel = cancel;
        self
    }
}

enum Stage {
    Done(SuccessResponse),
    Clarify { message: String, options: Vec<String> },
}

pub struct Nl2SqlPipeline {
    registry: Arc<SharedRegistry>,
    retrieval: ContextRetrievalService,
    generator: Arc<dyn SqlGenerator>,
    executor: Arc<dyn QueryExecutor>,
    cache: Option<ResultCache>,
    transformer: VisualizationTransformer,
}

impl Nl2SqlPipeline {
    pub fn new(
        registry: Arc<SharedRegistry>,
        retrieval: ContextRetrievalService,
        executor: Arc<dyn QueryExecutor>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            registry,
            retrieval,
            generator: Arc::new(SqlGenerationService::new(config.default_ranking_limit)),
            executor,
            cache: config.cache_ttl().map(ResultCache::new),
            transformer: VisualizationTransformer::default(),
        }
    }

    /// Wire up registry, retrieval corpus and the Postgres executor from config
    pub async fn bootstrap(config: &EngineConfig) -> Result<Self> {
        let registry = match &config.registry_path {
            Some(path) => Registry::from_json_file(path)?,
            None => Registry::builtin(),
        };

        let embedder: Arc<dyn Embedder> = match &config.embedding_api_key {
            Some(key) => Arc::new(OpenAiEmbedder::new(
                key.clone(),
                config.embedding_base_url.clone(),
                config.embedding_model.clone(),
                config.retrieval_timeout(),
            )?),
            None => {
                info!("No embedding API key configured, using the offline hashing embedder");
                Arc::new(HashingEmbedder::default())
            }
        };

        let store = Arc::new(InMemoryVectorStore::new(embedder.dimension()));
        if let Err(e) = seed_store(&store, embedder.as_ref(), &registry).await {
            warn!(error = %e, "Could not seed the retrieval corpus, retrieval will run degraded");
        }

        let retrieval = ContextRetrievalService::new(store, embedder, config);
        let executor = Arc::new(PostgresExecutor::connect_lazy(config)?);

        Ok(Self::new(
            Arc::new(SharedRegistry::new(registry)),
            retrieval,
            executor,
            config,
        ))
    }

    pub fn with_generator(mut self, generator: Arc<dyn SqlGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_transform_options(mut self, options: TransformOptions) -> Self {
        self.transformer = VisualizationTransformer::new(options);
        self
    }

    pub fn registry(&self) -> &Arc<SharedRegistry> {
        &self.registry
    }

    /// Live result cache entries; 0 when the cache is disabled
    pub fn cached_results(&self) -> usize {
        self.cache.as_ref().map(|c| c.len()).unwrap_or(0)
    }

    pub async fn handle(&self, request: QueryRequest, invocation: Invocation) -> QueryResponse {
        let debug_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        info!(debug_id = %debug_id, "Handling query");

        let response = match self.run(&request, &invocation, &debug_id).await {
            Ok(Stage::Done(success)) => QueryResponse::Success(success),
            Ok(Stage::Clarify { message, options }) => QueryResponse::Clarification(ClarificationResponse {
                requires_clarification: true,
                message,
                options,
                sql_debug_id: debug_id.clone(),
            }),
            Err(e) => {
                warn!(debug_id = %debug_id, kind = %e.kind(), error = %e, "Query failed");
                let options = match &e {
                    Nl2SqlError::UnsupportedMetric { supported, .. }
                    | Nl2SqlError::UnsupportedBank { supported, .. } => supported.clone(),
                    _ => Vec::new(),
                };
                QueryResponse::Error(ErrorResponse {
                    error_kind: e.kind(),
                    message: e.public_message(),
                    options,
                    sql_debug_id: debug_id.clone(),
                })
            }
        };

        info!(
            debug_id = %debug_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            outcome = match &response {
                QueryResponse::Success(_) => "success",
                QueryResponse::Clarification(_) => "clarification",
                QueryResponse::Error(_) => "error",
            },
            "Query finished"
        );
        response
    }

    async fn run(&self, request: &QueryRequest, invocation: &Invocation, debug_id: &str) -> Result<Stage> {
        if let Some(reason) = screen_input(&request.query_text) {
            warn!(
                target: AUDIT,
                debug_id = %debug_id,
                reason = %reason,
                input = %request.query_text,
                "Input rejected before parsing"
            );
            return Err(Nl2SqlError::ValidationRejected(reason));
        }

        // One registry snapshot for the whole request
        let registry = self.registry.snapshot();

        let parser = QuerySpecParser::new(Arc::clone(&registry));
        let parse_ctx = ParseContext {
            anchor: invocation.anchor.clone(),
            prior: request.conversation_context.clone(),
        };
        let parsed = match parser.parse(&request.query_text, &parse_ctx)? {
            ParseOutcome::Resolved(parsed) => parsed,
            ParseOutcome::Clarification(req) => {
                debug!(debug_id = %debug_id, reason = %req.reason, "Clarification requested");
                return Ok(Stage::Clarify {
                    message: req.reason,
                    options: req.options,
                });
            }
        };
        let spec = parsed.spec;
        debug!(debug_id = %debug_id, spec = %spec.cache_key(), confidence = ?parsed.confidence, "Parsed query spec");

        let context = self.retrieval.retrieve(&spec, &request.query_text).await;
        if context.degraded {
            warn!(debug_id = %debug_id, "Retrieval degraded, generating from registry only");
        }

        let cached = self.cache.as_ref().and_then(|c| c.get(&spec));
        let result = match cached {
            Some(result) => {
                debug!(debug_id = %debug_id, "Result cache hit");
                result
            }
            None => {
                let (accepted, result) = self
                    .execute_with_retry(&registry, &spec, &context, invocation, debug_id)
                    .await?;
                if let Some(cache) = &self.cache {
                    cache.insert(&spec, &accepted, result.clone());
                }
                result
            }
        };

        let chart = self.transformer.transform(&registry, &spec, &result)?;
        Ok(Stage::Done(SuccessResponse {
            series: chart.series,
            sql_debug_id: debug_id.to_string(),
            metric: chart.metric,
            unit: chart.unit,
            no_data: chart.no_data,
            degraded: context.degraded,
            query_spec: spec,
        }))
    }

    /// Generate and validate, regenerating once after a rejection
    fn generate_validated(
        &self,
        registry: &Registry,
        spec: &QuerySpec,
        context: &RetrievedContext,
        debug_id: &str,
    ) -> Result<AcceptedSql> {
        let validator = SqlValidator::new(&registry.schema);
        let mut prior: Option<RejectionReason> = None;

        for attempt in 1..=2u32 {
            let candidate = self.generator.generate(registry, spec, context, prior.as_ref())?;
            match validator.validate(&candidate) {
                ValidationVerdict::Accepted(accepted) => {
                    debug!(debug_id = %debug_id, attempt, "SQL accepted");
                    return Ok(accepted);
                }
                ValidationVerdict::Rejected(reason) => {
                    warn!(
                        target: AUDIT,
                        debug_id = %debug_id,
                        attempt,
                        reason = %reason,
                        sql = %candidate.statement,
                        "Generated SQL rejected by validator"
                    );
                    prior = Some(reason);
                }
            }
        }

        Err(Nl2SqlError::ValidationRejected(
            prior.unwrap_or(RejectionReason::NotASelect),
        ))
    }

    /// Execute; a timeout or execution failure gets exactly one
    /// regenerate-revalidate-execute retry. Pool exhaustion is terminal.
    async fn execute_with_retry(
        &self,
        registry: &Registry,
        spec: &QuerySpec,
        context: &RetrievedContext,
        invocation: &Invocation,
        debug_id: &str,
    ) -> Result<(AcceptedSql, QueryResult)> {
        let accepted = self.generate_validated(registry, spec, context, debug_id)?;

        match self.executor.execute(&accepted, invocation.cancel.clone()).await {
            Ok(result) => Ok((accepted, result)),
            Err(e) if e.is_retryable() => {
                warn!(
                    target: AUDIT,
                    debug_id = %debug_id,
                    error = %e,
                    sql = %accepted.statement(),
                    "Execution failed, regenerating once"
                );
                // The retry grounds on registry identifiers only
                let retry = self.generate_validated(registry, spec, &RetrievedContext::degraded(), debug_id)?;
                let result = self.executor.execute(&retry, invocation.cancel.clone()).await?;
                Ok((retry, result))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserializes_without_context() {
        let req: QueryRequest = serde_json::from_str(r#"{"query_text": "IMOR de INVEX en 2024"}"#).unwrap();
        assert_eq!(req, QueryRequest::new("IMOR de INVEX en 2024"));
    }

    #[test]
    fn test_error_response_shape() {
        let response = QueryResponse::Error(ErrorResponse {
            error_kind: ErrorKind::UnsupportedMetric,
            message: "La métrica 'ROE' no está soportada.".to_string(),
            options: vec!["IMOR".to_string()],
            sql_debug_id: "abc".to_string(),
        });
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["error_kind"], "UnsupportedMetric");
        assert_eq!(json["options"][0], "IMOR");
        assert!(json.get("series").is_none());
    }

    #[test]
    fn test_clarification_shape() {
        let response = QueryResponse::Clarification(ClarificationResponse {
            requires_clarification: true,
            message: "¿Qué métrica?".to_string(),
            options: vec!["IMOR de INVEX en 2024".to_string()],
            sql_debug_id: "abc".to_string(),
        });
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["requires_clarification"], true);
        assert_eq!(response.debug_id(), "abc");
    }
}
