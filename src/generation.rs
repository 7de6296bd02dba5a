//! SQL Generation
//!
//! Builds a parameterised candidate statement from a [`QuerySpec`] using one
//! template per comparison mode. Identifiers come from the registry (or a
//! whitelisted column named by retrieved context); every literal is bound as
//! a `$n` parameter.

use crate::error::{Nl2SqlError, Result};
use crate::query_spec::{ComparisonMode, QuerySpec};
use crate::registry::{MetricDefinition, Registry, TableSchema};
use crate::retrieval::RetrievedContext;
use crate::validator::RejectionReason;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Value bound to a placeholder
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SqlValue {
    Text(String),
    Date(NaiveDate),
    Int(i64),
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Text(s) => write!(f, "{}", s),
            SqlValue::Date(d) => write!(f, "{}", d),
            SqlValue::Int(i) => write!(f, "{}", i),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundParameter {
    /// Placeholder as written in the statement (`$1`)
    pub name: String,
    pub value: SqlValue,
}

/// Generated statement; never persisted, never returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSql {
    pub statement: String,
    /// Ordered by placeholder position
    pub parameters: Vec<BoundParameter>,
    pub referenced_tables: Vec<String>,
    pub referenced_columns: Vec<String>,
    pub comparison_mode: ComparisonMode,
    pub top_n: Option<u32>,
    /// 1 for the first generation, 2 for the regeneration after a rejection
    pub attempt: u32,
}

impl CandidateSql {
    pub fn parameter(&self, name: &str) -> Option<&SqlValue> {
        self.parameters.iter().find(|p| p.name == name).map(|p| &p.value)
    }
}

/// Generation strategy. The validator gate applies to every implementation.
pub trait SqlGenerator: Send + Sync {
    fn generate(
        &self,
        registry: &Registry,
        spec: &QuerySpec,
        context: &RetrievedContext,
        prior_rejection: Option<&RejectionReason>,
    ) -> Result<CandidateSql>;
}

/// Deterministic template-based generator
pub struct SqlGenerationService {
    default_ranking_limit: u32,
}

impl SqlGenerationService {
    pub fn new(default_ranking_limit: u32) -> Self {
        Self {
            default_ranking_limit: default_ranking_limit.max(1),
        }
    }
}

impl Default for SqlGenerationService {
    fn default() -> Self {
        Self::new(10)
    }
}

/// Hands out `$n` placeholders in order
#[derive(Default)]
struct Binder {
    parameters: Vec<BoundParameter>,
}

impl Binder {
    fn bind(&mut self, value: SqlValue) -> String {
        let name = format!("${}", self.parameters.len() + 1);
        self.parameters.push(BoundParameter {
            name: name.clone(),
            value,
        });
        name
    }

    fn bind_list<I: IntoIterator<Item = SqlValue>>(&mut self, values: I) -> String {
        values.into_iter().map(|v| self.bind(v)).collect::<Vec<_>>().join(", ")
    }
}

impl SqlGenerator for SqlGenerationService {
    fn generate(
        &self,
        registry: &Registry,
        spec: &QuerySpec,
        context: &RetrievedContext,
        prior_rejection: Option<&RejectionReason>,
    ) -> Result<CandidateSql> {
        if !spec.is_executable() {
            return Err(Nl2SqlError::Generation(
                "Query spec is missing a metric or a bank".to_string(),
            ));
        }
        let code = spec.metric.as_deref().unwrap_or_default();
        let metric = registry
            .metric(code)
            .ok_or_else(|| Nl2SqlError::Generation(format!("Metric '{}' is not registered", code)))?;

        let default_table = if spec.dimension_filters.is_empty() {
            registry.schema.primary()
        } else {
            registry.schema.segments()
        };

        let (table, column) = if prior_rejection.is_some() {
            debug!(reason = ?prior_rejection, "Regenerating from registry identifiers only");
            let table = default_table
                .ok_or_else(|| Nl2SqlError::Generation("No whitelisted table for this query".to_string()))?;
            (table, metric.column.clone())
        } else {
            let table = context_table(context, registry, spec, metric)
                .or(default_table)
                .ok_or_else(|| Nl2SqlError::Generation("No whitelisted table for this query".to_string()))?;
            let column = context_column(context, metric, table).unwrap_or_else(|| metric.column.clone());
            (table, column)
        };

        let mut binder = Binder::default();
        let (statement, mut columns) = match spec.comparison_mode {
            ComparisonMode::Single | ComparisonMode::Compare => {
                series_statement(spec, table, &column, &mut binder)?
            }
            ComparisonMode::Ranking => {
                let system = registry.system_bank().map(|b| b.id.clone());
                let limit = spec.top_n.unwrap_or(self.default_ranking_limit);
                ranking_statement(spec, table, &column, system, limit, &mut binder)?
            }
        };
        columns.sort();
        columns.dedup();

        Ok(CandidateSql {
            statement,
            parameters: binder.parameters,
            referenced_tables: vec![table.name.clone()],
            referenced_columns: columns,
            comparison_mode: spec.comparison_mode,
            top_n: spec.top_n,
            attempt: if prior_rejection.is_some() { 2 } else { 1 },
        })
    }
}

/// Table named by a matching worked example, then by the schema snippets in
/// rank order. Only whitelisted tables with the metric column and the right
/// segment granularity qualify.
fn context_table<'r>(
    context: &RetrievedContext,
    registry: &'r Registry,
    spec: &QuerySpec,
    metric: &MetricDefinition,
) -> Option<&'r TableSchema> {
    let mode = spec.comparison_mode.as_str();
    let needs_segment = !spec.dimension_filters.is_empty();

    let from_examples = context
        .examples
        .iter()
        .filter(|s| s.meta("metric") == Some(metric.code.as_str()) && s.meta("mode") == Some(mode))
        .filter_map(|s| s.meta("table"));
    let from_schema = context.schema_snippets.iter().filter_map(|s| s.meta("table"));

    from_examples
        .chain(from_schema)
        .filter_map(|name| registry.schema.table(name))
        .find(|t| t.has_column(&metric.column) && t.segment_column.is_some() == needs_segment)
}

/// Column named by the best metric-definition snippet, if the target table has it
fn context_column(context: &RetrievedContext, metric: &MetricDefinition, table: &TableSchema) -> Option<String> {
    context
        .metric_definitions
        .iter()
        .filter(|s| s.meta("metric") == Some(metric.code.as_str()))
        .filter_map(|s| s.meta("column"))
        .find(|c| table.has_column(c))
        .map(|c| c.to_string())
}

fn segment_column(table: &TableSchema, spec: &QuerySpec) -> Result<Option<String>> {
    if spec.dimension_filters.is_empty() {
        return Ok(None);
    }
    table
        .segment_column
        .clone()
        .map(Some)
        .ok_or_else(|| Nl2SqlError::Generation(format!("Table '{}' has no segment column", table.name)))
}

fn series_statement(
    spec: &QuerySpec,
    table: &TableSchema,
    column: &str,
    binder: &mut Binder,
) -> Result<(String, Vec<String>)> {
    let bank = &table.bank_column;
    let time = &table.time_column;
    let segment = segment_column(table, spec)?;

    let bank_predicate = if spec.comparison_mode == ComparisonMode::Single && spec.banks.len() == 1 {
        format!("{} = {}", bank, binder.bind(SqlValue::Text(spec.banks[0].clone())))
    } else {
        let list = binder.bind_list(spec.banks.iter().cloned().map(SqlValue::Text));
        format!("{} IN ({})", bank, list)
    };

    let mut select = vec![format!("{} AS bank", bank), format!("{} AS period", time)];
    let mut predicates = vec![bank_predicate];
    let mut order = vec![bank.clone()];
    let mut columns = vec![bank.clone(), time.clone(), column.to_string()];

    if let Some(seg) = &segment {
        select.push(format!("{} AS segment", seg));
        let list = binder.bind_list(spec.dimension_filters.iter().cloned().map(SqlValue::Text));
        predicates.push(format!("{} IN ({})", seg, list));
        order.push(seg.clone());
        columns.push(seg.clone());
    }
    select.push(format!("{} AS value", column));
    order.push(time.clone());

    let start = binder.bind(SqlValue::Date(spec.time_range.start_date));
    let end = binder.bind(SqlValue::Date(spec.time_range.end_date));
    predicates.push(format!("{} BETWEEN {} AND {}", time, start, end));

    let statement = format!(
        "SELECT {} FROM {} WHERE {} ORDER BY {}",
        select.join(", "),
        table.name,
        predicates.join(" AND "),
        order.join(", ")
    );
    Ok((statement, columns))
}

/// One row per bank: the window average, sorted and limited
fn ranking_statement(
    spec: &QuerySpec,
    table: &TableSchema,
    column: &str,
    system_bank: Option<String>,
    limit: u32,
    binder: &mut Binder,
) -> Result<(String, Vec<String>)> {
    let bank = &table.bank_column;
    let time = &table.time_column;
    let segment = segment_column(table, spec)?;
    let mut columns = vec![bank.clone(), time.clone(), column.to_string()];

    let start = binder.bind(SqlValue::Date(spec.time_range.start_date));
    let end = binder.bind(SqlValue::Date(spec.time_range.end_date));
    let mut predicates = vec![format!("{} BETWEEN {} AND {}", time, start, end)];

    if !spec.banks.is_empty() {
        let list = binder.bind_list(spec.banks.iter().cloned().map(SqlValue::Text));
        predicates.push(format!("{} IN ({})", bank, list));
    } else if let Some(system) = system_bank {
        // The market aggregate is not a participant in a leaderboard
        predicates.push(format!("{} <> {}", bank, binder.bind(SqlValue::Text(system))));
    }

    if let Some(seg) = &segment {
        let list = binder.bind_list(spec.dimension_filters.iter().cloned().map(SqlValue::Text));
        predicates.push(format!("{} IN ({})", seg, list));
        columns.push(seg.clone());
    }

    let limit = binder.bind(SqlValue::Int(limit as i64));
    let statement = format!(
        "SELECT {bank} AS bank, MAX({time}) AS period, AVG({column}) AS value FROM {table} WHERE {predicates} GROUP BY {bank} ORDER BY AVG({column}) {order} NULLS LAST, {bank} LIMIT {limit}",
        table = table.name,
        predicates = predicates.join(" AND "),
        order = spec.rank_order.as_sql(),
    );
    Ok((statement, columns))
}
