//! Query Spec
//!
//! Structured representation of a parsed analytical question.

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How many series the result has and how they are ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMode {
    /// One series for one bank
    Single,
    /// One series per requested bank
    Compare,
    /// Sorted leaderboard, one entry per bank
    Ranking,
}

impl ComparisonMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonMode::Single => "single",
            ComparisonMode::Compare => "compare",
            ComparisonMode::Ranking => "ranking",
        }
    }
}

impl fmt::Display for ComparisonMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankOrder {
    Ascending,
    #[default]
    Descending,
}

impl RankOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            RankOrder::Ascending => "ASC",
            RankOrder::Descending => "DESC",
        }
    }
}

/// Inclusive range of monthly periods. Both bounds are first-of-month dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl TimeRange {
    /// Build a range, snapping both ends to month starts and ordering them
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        let (a, b) = (month_start(start), month_start(end));
        if a <= b {
            Self { start_date: a, end_date: b }
        } else {
            Self { start_date: b, end_date: a }
        }
    }

    pub fn year(year: i32) -> Option<Self> {
        Some(Self::new(
            NaiveDate::from_ymd_opt(year, 1, 1)?,
            NaiveDate::from_ymd_opt(year, 12, 1)?,
        ))
    }

    pub fn years(from: i32, to: i32) -> Option<Self> {
        Some(Self::new(
            NaiveDate::from_ymd_opt(from.min(to), 1, 1)?,
            NaiveDate::from_ymd_opt(from.max(to), 12, 1)?,
        ))
    }

    pub fn quarter(year: i32, quarter: u32) -> Option<Self> {
        if !(1..=4).contains(&quarter) {
            return None;
        }
        let first_month = (quarter - 1) * 3 + 1;
        Some(Self::new(
            NaiveDate::from_ymd_opt(year, first_month, 1)?,
            NaiveDate::from_ymd_opt(year, first_month + 2, 1)?,
        ))
    }

    pub fn month(year: i32, month: u32) -> Option<Self> {
        let date = NaiveDate::from_ymd_opt(year, month, 1)?;
        Some(Self::new(date, date))
    }

    /// The `months` calendar months ending at (and including) `end`
    pub fn trailing(end: NaiveDate, months: u32) -> Self {
        let end = month_start(end);
        let start = shift_months(end, -(months.max(1) as i32 - 1));
        Self::new(start, end)
    }

    /// Every month in the range, in chronological order
    pub fn months(&self) -> Vec<NaiveDate> {
        let mut out = Vec::new();
        let mut current = self.start_date;
        while current <= self.end_date {
            out.push(current);
            let next = shift_months(current, 1);
            if next == current {
                break;
            }
            current = next;
        }
        out
    }

    pub fn month_count(&self) -> usize {
        let span = (self.end_date.year() - self.start_date.year()) * 12
            + self.end_date.month() as i32
            - self.start_date.month() as i32;
        (span + 1).max(0) as usize
    }

    pub fn contains(&self, period: NaiveDate) -> bool {
        let period = month_start(period);
        period >= self.start_date && period <= self.end_date
    }
}

/// Parsed intent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Canonical metric code, `None` if unrecognised
    pub metric: Option<String>,
    /// Canonical bank ids in the order the user mentioned them
    #[serde(default)]
    pub banks: Vec<String>,
    pub time_range: TimeRange,
    /// Canonical segment filter ids
    #[serde(default)]
    pub dimension_filters: Vec<String>,
    pub comparison_mode: ComparisonMode,
    #[serde(default)]
    pub top_n: Option<u32>,
    #[serde(default)]
    pub rank_order: RankOrder,
}

impl QuerySpec {
    /// A spec may reach SQL generation only with a metric and at least one
    /// bank, except rankings which span every bank.
    pub fn is_executable(&self) -> bool {
        self.metric.is_some()
            && (!self.banks.is_empty() || self.comparison_mode == ComparisonMode::Ranking)
    }

    /// Canonical key for the result cache and for log correlation
    pub fn cache_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Move a first-of-month date by `delta` months; saturates on calendar overflow
pub fn shift_months(date: NaiveDate, delta: i32) -> NaiveDate {
    let shifted = if delta >= 0 {
        date.checked_add_months(Months::new(delta as u32))
    } else {
        date.checked_sub_months(Months::new(delta.unsigned_abs()))
    };
    shifted.unwrap_or(date)
}

/// `YYYY-MM` label used for chart periods
pub fn period_label(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_year_has_twelve_months() {
        let range = TimeRange::year(2024).unwrap();
        assert_eq!(range.month_count(), 12);
        assert_eq!(range.months().len(), 12);
        assert_eq!(range.start_date, ymd(2024, 1, 1));
        assert_eq!(range.end_date, ymd(2024, 12, 1));
    }

    #[test]
    fn test_trailing_crosses_year_boundary() {
        let range = TimeRange::trailing(ymd(2025, 2, 17), 3);
        assert_eq!(range.start_date, ymd(2024, 12, 1));
        assert_eq!(range.end_date, ymd(2025, 2, 1));
        assert_eq!(range.month_count(), 3);
    }

    #[test]
    fn test_quarter_bounds() {
        let q3 = TimeRange::quarter(2023, 3).unwrap();
        assert_eq!(q3.start_date, ymd(2023, 7, 1));
        assert_eq!(q3.end_date, ymd(2023, 9, 1));
        assert!(TimeRange::quarter(2023, 5).is_none());
    }

    #[test]
    fn test_executable_requires_metric_and_bank_unless_ranking() {
        let mut spec = QuerySpec {
            metric: Some("IMOR".to_string()),
            banks: vec![],
            time_range: TimeRange::year(2024).unwrap(),
            dimension_filters: vec![],
            comparison_mode: ComparisonMode::Single,
            top_n: None,
            rank_order: RankOrder::Descending,
        };
        assert!(!spec.is_executable());
        spec.comparison_mode = ComparisonMode::Ranking;
        assert!(spec.is_executable());
        spec.metric = None;
        assert!(!spec.is_executable());
    }
}
