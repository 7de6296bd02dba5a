//! Query Result - rows returned by an executor

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One `(bank, period, value)` row plus the segment when the query split by segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub bank: String,
    pub period: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
    /// Stored units; NULL in the store stays `None`
    pub value: Option<f64>,
}

impl ResultRow {
    pub fn new(bank: &str, period: NaiveDate, value: Option<f64>) -> Self {
        Self {
            bank: bank.to_string(),
            period,
            segment: None,
            value,
        }
    }

    pub fn with_segment(mut self, segment: &str) -> Self {
        self.segment = Some(segment.to_string());
        self
    }
}

/// Rows from one execution; discarded after transformation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub rows: Vec<ResultRow>,

    /// Execution time in milliseconds
    pub execution_time_ms: u64,

    /// Engine that executed the query
    pub engine_name: String,
}

impl QueryResult {
    pub fn new(rows: Vec<ResultRow>, engine_name: &str, execution_time_ms: u64) -> Self {
        Self {
            rows,
            execution_time_ms,
            engine_name: engine_name.to_string(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// No rows is a valid outcome ("no data for this selection")
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
