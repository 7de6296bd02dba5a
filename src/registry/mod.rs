//! Metric / Bank Registry
//!
//! Read-only lookup tables mapping user-typed aliases to canonical bank and
//! metric identifiers, the segment filter vocabulary and the schema whitelist.
//! Refreshed out-of-band by the ETL loader through [`SharedRegistry::replace`].

pub mod bank;
pub mod builtin;
pub mod metric;
pub mod schema;

pub use bank::BankDefinition;
pub use metric::{MetricDefinition, MetricUnit, ValueRange};
pub use schema::{ColumnSchema, FilterDefinition, SchemaWhitelist, TableSchema};

use crate::error::{Nl2SqlError, Result};
use crate::parser::text::normalize;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    /// Declaration order matters: alias ties resolve to the earliest entry
    pub banks: Vec<BankDefinition>,
    pub metrics: Vec<MetricDefinition>,
    #[serde(default)]
    pub filters: Vec<FilterDefinition>,
    /// Financial terms users ask for that the store does not publish (ROE, ROA...)
    #[serde(default)]
    pub unsupported_terms: Vec<String>,
    pub schema: SchemaWhitelist,
}

impl Registry {
    /// Load a registry exported by the ETL collaborator
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let registry: Registry = serde_json::from_str(&raw)?;
        registry.validate()?;
        Ok(registry)
    }

    /// Check internal consistency: unique ids and metric columns present in the whitelist
    pub fn validate(&self) -> Result<()> {
        let primary = self.schema.primary().ok_or_else(|| {
            Nl2SqlError::Registry(format!(
                "Primary table '{}' is not in the schema whitelist",
                self.schema.primary_table
            ))
        })?;

        let mut seen = HashSet::new();
        for bank in &self.banks {
            if !seen.insert(bank.id.to_uppercase()) {
                return Err(Nl2SqlError::Registry(format!("Duplicate bank id '{}'", bank.id)));
            }
        }

        seen.clear();
        for metric in &self.metrics {
            if !seen.insert(metric.code.to_uppercase()) {
                return Err(Nl2SqlError::Registry(format!(
                    "Duplicate metric code '{}'",
                    metric.code
                )));
            }
            if !primary.has_column(&metric.column) {
                return Err(Nl2SqlError::Registry(format!(
                    "Metric '{}' maps to column '{}' which is not whitelisted in '{}'",
                    metric.code, metric.column, primary.name
                )));
            }
            if metric.segmented {
                let segments = self.schema.segments().ok_or_else(|| {
                    Nl2SqlError::Registry(format!(
                        "Metric '{}' is segmented but no segment table is whitelisted",
                        metric.code
                    ))
                })?;
                if !segments.has_column(&metric.column) {
                    return Err(Nl2SqlError::Registry(format!(
                        "Segmented metric '{}' has no column '{}' in '{}'",
                        metric.code, metric.column, segments.name
                    )));
                }
            }
        }

        if !self.filters.is_empty() && self.schema.segments().is_none() {
            return Err(Nl2SqlError::Registry(
                "Segment filters declared without a segment table".to_string(),
            ));
        }

        Ok(())
    }

    pub fn bank(&self, id: &str) -> Option<&BankDefinition> {
        self.banks.iter().find(|b| b.id.eq_ignore_ascii_case(id))
    }

    pub fn metric(&self, code: &str) -> Option<&MetricDefinition> {
        self.metrics.iter().find(|m| m.code.eq_ignore_ascii_case(code))
    }

    pub fn filter(&self, id: &str) -> Option<&FilterDefinition> {
        self.filters.iter().find(|f| f.id.eq_ignore_ascii_case(id))
    }

    /// The whole-market aggregate, if registered
    pub fn system_bank(&self) -> Option<&BankDefinition> {
        self.banks.iter().find(|b| b.aggregate)
    }

    /// `resolve_alias` for banks: case-, accent- and whitespace-insensitive
    pub fn resolve_bank_alias(&self, text: &str) -> Option<&BankDefinition> {
        let needle = normalize(text);
        if needle.is_empty() {
            return None;
        }
        self.banks
            .iter()
            .find(|b| b.surface_forms().any(|form| normalize(form) == needle))
    }

    /// `resolve_alias` for metrics
    pub fn resolve_metric_alias(&self, text: &str) -> Option<&MetricDefinition> {
        let needle = normalize(text);
        if needle.is_empty() {
            return None;
        }
        self.metrics
            .iter()
            .find(|m| m.surface_forms().any(|form| normalize(form) == needle))
    }

    pub fn resolve_filter_alias(&self, text: &str) -> Option<&FilterDefinition> {
        let needle = normalize(text);
        if needle.is_empty() {
            return None;
        }
        self.filters
            .iter()
            .find(|f| f.surface_forms().any(|form| normalize(form) == needle))
    }

    pub fn supported_metric_codes(&self) -> Vec<String> {
        self.metrics.iter().map(|m| m.code.clone()).collect()
    }

    pub fn supported_bank_ids(&self) -> Vec<String> {
        self.banks.iter().map(|b| b.id.clone()).collect()
    }
}

/// Read-mostly handle shared by concurrent pipeline invocations.
///
/// Each request takes one snapshot up front so a refresh never changes the
/// registry underneath an in-flight request.
pub struct SharedRegistry {
    inner: RwLock<Arc<Registry>>,
}

impl SharedRegistry {
    pub fn new(registry: Registry) -> Self {
        Self {
            inner: RwLock::new(Arc::new(registry)),
        }
    }

    pub fn snapshot(&self) -> Arc<Registry> {
        let guard = self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Swap in a freshly loaded registry
    pub fn replace(&self, registry: Registry) -> Result<()> {
        registry.validate()?;
        let mut guard = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(registry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bank_alias_is_case_and_whitespace_insensitive() {
        let registry = Registry::builtin();
        for input in ["INVEX", "invex", "  Invex  ", "Banco   INVEX"] {
            let bank = registry.resolve_bank_alias(input).expect("alias should resolve");
            assert_eq!(bank.id, "INVEX");
        }
        assert!(registry.resolve_bank_alias("banco fantasma").is_none());
    }

    #[test]
    fn test_system_aliases() {
        let registry = Registry::builtin();
        assert_eq!(registry.resolve_bank_alias("Sistema").map(|b| b.id.as_str()), Some("SYSTEM"));
        assert!(registry.system_bank().map(|b| b.aggregate).unwrap_or(false));
    }

    #[test]
    fn test_metric_alias_resolution() {
        let registry = Registry::builtin();
        assert_eq!(
            registry.resolve_metric_alias("Índice de Morosidad").map(|m| m.code.as_str()),
            Some("IMOR")
        );
        assert!(registry.resolve_metric_alias("roe").is_none());
    }

    #[test]
    fn test_builtin_registry_is_consistent() {
        assert!(Registry::builtin().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_metric_column() {
        let mut registry = Registry::builtin();
        registry.metrics[0].column = "not_a_column".to_string();
        assert!(matches!(registry.validate(), Err(Nl2SqlError::Registry(_))));
    }

    #[test]
    fn test_shared_registry_replace() {
        let shared = SharedRegistry::new(Registry::builtin());
        let before = shared.snapshot();

        let mut refreshed = Registry::builtin();
        refreshed.banks.retain(|b| b.id != "AZTECA");
        shared.replace(refreshed).unwrap();

        assert!(before.bank("AZTECA").is_some());
        assert!(shared.snapshot().bank("AZTECA").is_none());
    }
}
