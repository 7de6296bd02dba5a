//! Metric Definitions
//!
//! Describes how each supported metric is stored and how it is displayed.

use serde::{Deserialize, Serialize};

/// Storage unit of a metric column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricUnit {
    /// Stored as a fraction (0.025 means 2.5%)
    Ratio,
    /// Stored already as a percentage
    Percent,
    /// Amounts in millions of pesos
    MxnMillions,
}

impl MetricUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricUnit::Ratio => "ratio",
            MetricUnit::Percent => "percent",
            MetricUnit::MxnMillions => "mxn_millions",
        }
    }

    /// Unit label shown next to chart values
    pub fn display_label(&self) -> &'static str {
        match self {
            MetricUnit::Ratio | MetricUnit::Percent => "%",
            MetricUnit::MxnMillions => "MXN mm",
        }
    }

    /// Convert a stored value into its display unit
    pub fn to_display(&self, stored: f64) -> f64 {
        match self {
            MetricUnit::Ratio => stored * 100.0,
            MetricUnit::Percent | MetricUnit::MxnMillions => stored,
        }
    }
}

/// Expected range of stored values, used to describe the metric to retrieval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Metric definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// Canonical code (e.g. `IMOR`)
    pub code: String,
    pub display_name: String,
    pub description: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Column holding the metric in the bank-level and segment tables
    pub column: String,
    pub unit: MetricUnit,
    #[serde(default)]
    pub valid_range: Option<ValueRange>,
    /// Whether the metric is published per credit segment
    #[serde(default)]
    pub segmented: bool,
    /// Risk metrics rank "best" from the lowest value
    #[serde(default)]
    pub higher_is_worse: bool,
}

impl MetricDefinition {
    pub fn new(
        code: &str,
        display_name: &str,
        description: &str,
        column: &str,
        unit: MetricUnit,
    ) -> Self {
        Self {
            code: code.to_string(),
            display_name: display_name.to_string(),
            description: description.to_string(),
            aliases: Vec::new(),
            column: column.to_string(),
            unit,
            valid_range: None,
            segmented: false,
            higher_is_worse: false,
        }
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.valid_range = Some(ValueRange { min, max });
        self
    }

    pub fn segmented(mut self) -> Self {
        self.segmented = true;
        self
    }

    pub fn higher_is_worse(mut self) -> Self {
        self.higher_is_worse = true;
        self
    }

    pub fn surface_forms(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.code.as_str())
            .chain(std::iter::once(self.display_name.as_str()))
            .chain(self.aliases.iter().map(|a| a.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_displays_as_percentage() {
        assert!((MetricUnit::Ratio.to_display(0.025) - 2.5).abs() < 1e-9);
        assert_eq!(MetricUnit::Percent.to_display(14.2), 14.2);
        assert_eq!(MetricUnit::MxnMillions.display_label(), "MXN mm");
    }
}
