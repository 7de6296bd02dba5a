//! Visualization Transformer
//!
//! Reshapes result rows into named series of chronologically ordered points.
//! This is the only place display units are applied.

use crate::error::{Nl2SqlError, Result};
use crate::execution::{QueryResult, ResultRow};
use crate::query_spec::{period_label, ComparisonMode, QuerySpec, RankOrder};
use crate::registry::{MetricDefinition, Registry};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformOptions {
    /// Emit a `null` point for every month in range without data
    pub dense: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// `YYYY-MM`
    pub period: String,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub label: String,
    pub bank: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
    /// Position in a ranking, 1-based
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    pub points: Vec<Point>,
}

impl Series {
    pub fn has_data(&self) -> bool {
        self.points.iter().any(|p| p.value.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    pub metric: String,
    pub metric_name: String,
    /// Display unit label (`%`, `MXN mm`)
    pub unit: String,
    pub series: Vec<Series>,
    /// No series carries a single value for this selection
    pub no_data: bool,
}

#[derive(Debug, Clone, Default)]
pub struct VisualizationTransformer {
    options: TransformOptions,
}

impl VisualizationTransformer {
    pub fn new(options: TransformOptions) -> Self {
        Self { options }
    }

    pub fn transform(&self, registry: &Registry, spec: &QuerySpec, result: &QueryResult) -> Result<ChartData> {
        let code = spec.metric.as_deref().unwrap_or_default();
        let metric = registry
            .metric(code)
            .ok_or_else(|| Nl2SqlError::Registry(format!("Metric '{}' is not registered", code)))?;

        flag_out_of_range(metric, &result.rows);

        let series = match spec.comparison_mode {
            ComparisonMode::Ranking => self.ranking_series(registry, spec, metric, &result.rows),
            ComparisonMode::Single | ComparisonMode::Compare => {
                self.time_series(registry, spec, metric, &result.rows)
            }
        };
        let no_data = !series.iter().any(|s| s.has_data());

        Ok(ChartData {
            metric: metric.code.clone(),
            metric_name: metric.display_name.clone(),
            unit: metric.unit.display_label().to_string(),
            series,
            no_data,
        })
    }

    /// One series per requested bank, in request order, split per segment
    /// when more than one segment was requested
    fn time_series(
        &self,
        registry: &Registry,
        spec: &QuerySpec,
        metric: &MetricDefinition,
        rows: &[ResultRow],
    ) -> Vec<Series> {
        let split = spec.dimension_filters.len() > 1;
        let keys: Vec<(&String, Option<&String>)> = if split {
            spec.banks
                .iter()
                .cartesian_product(spec.dimension_filters.iter())
                .map(|(b, s)| (b, Some(s)))
                .collect()
        } else {
            spec.banks.iter().map(|b| (b, spec.dimension_filters.first())).collect()
        };

        keys.into_iter()
            .map(|(bank, segment)| {
                let mut matching: Vec<&ResultRow> = rows
                    .iter()
                    .filter(|r| r.bank.eq_ignore_ascii_case(bank))
                    .filter(|r| !split || r.segment.as_deref() == segment.map(|s| s.as_str()))
                    .collect();
                matching.sort_by_key(|r| r.period);
                matching.dedup_by_key(|r| r.period);

                let points = if self.options.dense {
                    spec.time_range
                        .months()
                        .into_iter()
                        .map(|month| Point {
                            period: period_label(month),
                            value: matching
                                .iter()
                                .find(|r| r.period == month)
                                .and_then(|r| r.value)
                                .map(|v| metric.unit.to_display(v)),
                        })
                        .collect()
                } else {
                    matching
                        .iter()
                        .filter_map(|r| {
                            r.value.map(|v| Point {
                                period: period_label(r.period),
                                value: Some(metric.unit.to_display(v)),
                            })
                        })
                        .collect()
                };

                let display = registry
                    .bank(bank)
                    .map(|b| b.display_name.clone())
                    .unwrap_or_else(|| bank.clone());
                let segment_label = segment.map(|s| {
                    registry
                        .filter(s)
                        .map(|f| f.display_name.clone())
                        .unwrap_or_else(|| s.clone())
                });

                Series {
                    name: match (split, segment) {
                        (true, Some(s)) => format!("{} / {}", bank, s),
                        _ => bank.clone(),
                    },
                    label: match segment_label {
                        Some(s) => format!("{} ({})", display, s),
                        None => display,
                    },
                    bank: bank.clone(),
                    segment: segment.cloned(),
                    rank: None,
                    points,
                }
            })
            .collect()
    }

    /// One single-point series per ranked bank
    fn ranking_series(
        &self,
        registry: &Registry,
        spec: &QuerySpec,
        metric: &MetricDefinition,
        rows: &[ResultRow],
    ) -> Vec<Series> {
        let mut ranked: Vec<&ResultRow> = rows.iter().collect();
        ranked.sort_by(|a, b| rank_cmp(a, b, spec.rank_order));
        ranked.dedup_by(|a, b| a.bank == b.bank);
        if let Some(n) = spec.top_n {
            ranked.truncate(n as usize);
        }

        ranked
            .into_iter()
            .enumerate()
            .map(|(i, row)| Series {
                name: row.bank.clone(),
                label: registry
                    .bank(&row.bank)
                    .map(|b| b.display_name.clone())
                    .unwrap_or_else(|| row.bank.clone()),
                bank: row.bank.clone(),
                segment: None,
                rank: Some(i as u32 + 1),
                points: vec![Point {
                    period: period_label(row.period),
                    value: row.value.map(|v| metric.unit.to_display(v)),
                }],
            })
            .collect()
    }
}

/// Ranking order with NULL values last and ties broken by bank id
fn rank_cmp(a: &ResultRow, b: &ResultRow, order: RankOrder) -> Ordering {
    let by_value = match (a.value, b.value) {
        (Some(x), Some(y)) => {
            let cmp = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
            match order {
                RankOrder::Ascending => cmp,
                RankOrder::Descending => cmp.reverse(),
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_value.then_with(|| a.bank.cmp(&b.bank))
}

/// Out-of-range values are a data-quality issue upstream; they pass through unchanged
fn flag_out_of_range(metric: &MetricDefinition, rows: &[ResultRow]) {
    let Some(range) = metric.valid_range else {
        return;
    };
    let outside = rows
        .iter()
        .filter(|r| r.value.map(|v| !range.contains(v)).unwrap_or(false))
        .count();
    if outside > 0 {
        warn!(
            metric = %metric.code,
            rows = outside,
            min = range.min,
            max = range.max,
            "Values outside the registered range"
        );
    }
}
