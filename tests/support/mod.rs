//! Shared fixtures: seeded retrieval, an in-process executor double that
//! evaluates the bound parameters of accepted SQL against fixture rows.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use nl2sql_engine::error::{Nl2SqlError, Result};
use nl2sql_engine::execution::{CancellationSignal, QueryExecutor, QueryResult, ResultRow};
use nl2sql_engine::generation::SqlValue;
use nl2sql_engine::retrieval::corpus::seed_store;
use nl2sql_engine::retrieval::{ContextRetrievalService, Embedder, HashingEmbedder, InMemoryVectorStore};
use nl2sql_engine::validator::AcceptedSql;
use nl2sql_engine::{ComparisonMode, EngineConfig, Invocation, Nl2SqlPipeline, Registry, SharedRegistry};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn month(y: i32, m: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, 1).unwrap()
}

/// 2023-2024 monthly values for four banks and the system; AZTECA has no rows
pub fn fixture_rows() -> Vec<ResultRow> {
    let mut rows = Vec::new();
    for year in [2023, 2024] {
        for m in 1..=12u32 {
            let bump = m as f64 * 0.0005;
            rows.push(ResultRow::new("INVEX", month(year, m), Some(0.030 + bump)));
            rows.push(ResultRow::new("SYSTEM", month(year, m), Some(0.021 + bump)));
            rows.push(ResultRow::new("BBVA", month(year, m), Some(0.015 + bump)));
            rows.push(ResultRow::new("BANORTE", month(year, m), Some(0.012 + bump)));
            for (segment, base) in [("automotriz", 0.010), ("consumo", 0.045)] {
                rows.push(ResultRow::new("BBVA", month(year, m), Some(base + bump)).with_segment(segment));
            }
        }
    }
    rows
}

/// How the double behaves on the next executions
pub enum Behavior {
    Fail(Nl2SqlError),
    WaitForCancel,
}

pub struct FixtureExecutor {
    rows: Vec<ResultRow>,
    behaviors: Mutex<VecDeque<Behavior>>,
    calls: AtomicUsize,
    executed: Mutex<Vec<AcceptedSql>>,
}

impl FixtureExecutor {
    pub fn new(rows: Vec<ResultRow>) -> Self {
        Self {
            rows,
            behaviors: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fixture() -> Self {
        Self::new(fixture_rows())
    }

    pub fn then(self, behavior: Behavior) -> Self {
        self.behaviors.lock().unwrap().push_back(behavior);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<AcceptedSql> {
        self.executed.lock().unwrap().clone()
    }

    fn evaluate(&self, sql: &AcceptedSql) -> Vec<ResultRow> {
        let registry = Registry::builtin();
        let mut dates = Vec::new();
        let mut banks = HashSet::new();
        let mut segments = HashSet::new();
        let mut limit = None;

        for param in sql.parameters() {
            match &param.value {
                SqlValue::Date(d) => dates.push(*d),
                SqlValue::Int(i) => limit = Some(*i as usize),
                SqlValue::Text(t) if registry.filter(t).is_some() => {
                    segments.insert(t.clone());
                }
                SqlValue::Text(t) => {
                    banks.insert(t.clone());
                }
            }
        }
        let (start, end) = (dates[0], dates[1]);
        let excluded = sql.statement().contains("<>");

        let selected = self.rows.iter().filter(|r| {
            let bank_ok = if excluded {
                !banks.contains(&r.bank)
            } else {
                banks.contains(&r.bank)
            };
            let segment_ok = if segments.is_empty() {
                r.segment.is_none()
            } else {
                r.segment.as_ref().map(|s| segments.contains(s)).unwrap_or(false)
            };
            bank_ok && segment_ok && r.period >= start && r.period <= end
        });

        if sql.candidate().comparison_mode != ComparisonMode::Ranking {
            let mut rows: Vec<ResultRow> = selected.cloned().collect();
            rows.sort_by(|a, b| (&a.bank, &a.segment, a.period).cmp(&(&b.bank, &b.segment, b.period)));
            return rows;
        }

        let mut groups: BTreeMap<String, (NaiveDate, Vec<f64>)> = BTreeMap::new();
        for row in selected {
            let entry = groups.entry(row.bank.clone()).or_insert((row.period, Vec::new()));
            entry.0 = entry.0.max(row.period);
            if let Some(v) = row.value {
                entry.1.push(v);
            }
        }
        let descending = sql.statement().contains("DESC");
        let mut ranked: Vec<ResultRow> = groups
            .into_iter()
            .map(|(bank, (period, values))| {
                let avg = (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64);
                ResultRow::new(&bank, period, avg)
            })
            .collect();
        ranked.sort_by(|a, b| {
            let cmp = a.value.partial_cmp(&b.value).unwrap();
            if descending {
                cmp.reverse()
            } else {
                cmp
            }
        });
        ranked.truncate(limit.unwrap_or(usize::MAX));
        ranked
    }
}

#[async_trait]
impl QueryExecutor for FixtureExecutor {
    fn name(&self) -> &'static str {
        "fixture"
    }

    async fn execute(&self, sql: &AcceptedSql, mut cancel: CancellationSignal) -> Result<QueryResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().unwrap().push(sql.clone());

        let behavior = self.behaviors.lock().unwrap().pop_front();
        match behavior {
            Some(Behavior::Fail(e)) => return Err(e),
            Some(Behavior::WaitForCancel) => {
                cancel.cancelled().await;
                return Err(Nl2SqlError::Cancelled);
            }
            None => {}
        }

        Ok(QueryResult::new(self.evaluate(sql), self.name(), 1))
    }
}

pub fn invocation() -> Invocation {
    Invocation::new(month(2025, 3), Some(month(2025, 2)))
}

pub async fn retrieval(config: &EngineConfig) -> ContextRetrievalService {
    let registry = Registry::builtin();
    let embedder = Arc::new(HashingEmbedder::default());
    let store = Arc::new(InMemoryVectorStore::new(embedder.dimension()));
    seed_store(&store, embedder.as_ref(), &registry).await.unwrap();
    ContextRetrievalService::new(store, embedder, config)
}

pub async fn pipeline_with(executor: Arc<FixtureExecutor>, config: EngineConfig) -> Nl2SqlPipeline {
    let retrieval = retrieval(&config).await;
    Nl2SqlPipeline::new(
        Arc::new(SharedRegistry::new(Registry::builtin())),
        retrieval,
        executor,
        &config,
    )
}

pub async fn pipeline(executor: Arc<FixtureExecutor>) -> Nl2SqlPipeline {
    pipeline_with(executor, EngineConfig::default()).await
}
