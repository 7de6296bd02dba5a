//! Bank Definitions
//!
//! Canonical bank identifiers and the aliases users type for them.

use serde::{Deserialize, Serialize};

/// A bank (or the whole-market aggregate) known to the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankDefinition {
    /// Canonical identifier as stored in the relational store (e.g. `INVEX`)
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Synthetic whole-market rollup rather than a single institution
    #[serde(default)]
    pub aggregate: bool,
}

impl BankDefinition {
    pub fn new(id: &str, display_name: &str, aliases: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            aggregate: false,
        }
    }

    pub fn aggregate(mut self) -> Self {
        self.aggregate = true;
        self
    }

    /// Every surface form that should resolve to this bank: id, display name, aliases
    pub fn surface_forms(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.id.as_str())
            .chain(std::iter::once(self.display_name.as_str()))
            .chain(self.aliases.iter().map(|a| a.as_str()))
    }
}
