//! Schema Whitelist
//!
//! The only tables and columns generated SQL may reference, plus the
//! dimension-filter vocabulary that maps onto the segment column.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub description: String,
}

impl ColumnSchema {
    pub fn new(name: &str, data_type: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub columns: Vec<ColumnSchema>,
    /// Monthly period column every query must bound
    pub time_column: String,
    pub bank_column: String,
    #[serde(default)]
    pub segment_column: Option<String>,
}

impl TableSchema {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.name.eq_ignore_ascii_case(column))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaWhitelist {
    pub tables: Vec<TableSchema>,
    /// Bank-level monthly table
    pub primary_table: String,
    /// Per-segment monthly table, if the store publishes one
    #[serde(default)]
    pub segment_table: Option<String>,
}

impl SchemaWhitelist {
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn primary(&self) -> Option<&TableSchema> {
        self.table(&self.primary_table)
    }

    pub fn segments(&self) -> Option<&TableSchema> {
        self.segment_table.as_deref().and_then(|name| self.table(name))
    }

    pub fn is_known_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }
}

/// Sector / segment filter value (e.g. `automotriz`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterDefinition {
    /// Value stored in the segment column
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl FilterDefinition {
    pub fn new(id: &str, display_name: &str, aliases: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn surface_forms(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.id.as_str())
            .chain(std::iter::once(self.display_name.as_str()))
            .chain(self.aliases.iter().map(|a| a.as_str()))
    }
}
