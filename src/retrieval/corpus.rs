//! Retrieval Corpus
//!
//! Derives the schema, metric-definition and worked-example documents from a
//! registry so a fresh vector store can be bootstrapped without the ingestion
//! collaborator.

use super::{Document, Embedder, InMemoryVectorStore, EXAMPLE_COLLECTION, METRIC_COLLECTION, SCHEMA_COLLECTION};
use crate::error::Result;
use crate::registry::{MetricDefinition, Registry};
use std::collections::HashMap;
use tracing::info;

/// Un-embedded corpus entry
#[derive(Debug, Clone, PartialEq)]
pub struct SeedDocument {
    pub collection: &'static str,
    pub id: String,
    pub text: String,
    pub metadata: HashMap<String, String>,
}

fn meta(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

pub fn seed_documents(registry: &Registry) -> Vec<SeedDocument> {
    let mut docs = Vec::new();

    for table in &registry.schema.tables {
        let columns: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        docs.push(SeedDocument {
            collection: SCHEMA_COLLECTION,
            id: format!("table:{}", table.name),
            text: format!(
                "Tabla {}: {}. Columnas: {}. Columna de tiempo: {}",
                table.name,
                table.description,
                columns.join(", "),
                table.time_column
            ),
            metadata: meta(&[("kind", "table"), ("table", &table.name)]),
        });

        for column in &table.columns {
            docs.push(SeedDocument {
                collection: SCHEMA_COLLECTION,
                id: format!("column:{}:{}", table.name, column.name),
                text: format!(
                    "Columna {}.{} ({}): {}",
                    table.name, column.name, column.data_type, column.description
                ),
                metadata: meta(&[("kind", "column"), ("table", &table.name), ("column", &column.name)]),
            });
        }
    }

    for metric in &registry.metrics {
        docs.push(metric_document(metric));
        docs.extend(example_documents(registry, metric));
    }

    docs
}

fn metric_document(metric: &MetricDefinition) -> SeedDocument {
    let range = metric
        .valid_range
        .map(|r| format!("{} a {}", r.min, r.max))
        .unwrap_or_else(|| "sin rango".to_string());
    SeedDocument {
        collection: METRIC_COLLECTION,
        id: format!("metric:{}", metric.code),
        text: format!(
            "{} ({}): {}. Sinónimos: {}. Columna {}, unidad {}, rango válido {}",
            metric.code,
            metric.display_name,
            metric.description,
            metric.aliases.join(", "),
            metric.column,
            metric.unit.as_str(),
            range
        ),
        metadata: meta(&[
            ("metric", &metric.code),
            ("column", &metric.column),
            ("unit", metric.unit.as_str()),
        ]),
    }
}

/// One worked example per comparison mode, phrased the way users ask
fn example_documents(registry: &Registry, metric: &MetricDefinition) -> Vec<SeedDocument> {
    let Some(primary) = registry.schema.primary() else {
        return Vec::new();
    };
    let (table, bank, time) = (&primary.name, &primary.bank_column, &primary.time_column);
    let col = &metric.column;
    let name = metric.display_name.to_lowercase();

    let examples = [
        (
            "single",
            format!("{} de INVEX en 2024", metric.code),
            format!(
                "SELECT {bank} AS bank, {time} AS period, {col} AS value FROM {table} WHERE {bank} = $1 AND {time} BETWEEN $2 AND $3 ORDER BY bank, period"
            ),
        ),
        (
            "compare",
            format!("Compara {} de BBVA vs Sistema en los últimos 6 meses", name),
            format!(
                "SELECT {bank} AS bank, {time} AS period, {col} AS value FROM {table} WHERE {bank} IN ($1, $2) AND {time} BETWEEN $3 AND $4 ORDER BY bank, period"
            ),
        ),
        (
            "ranking",
            format!("Top 5 bancos por {} en 2023", name),
            format!(
                "SELECT {bank} AS bank, MAX({time}) AS period, AVG({col}) AS value FROM {table} WHERE {time} BETWEEN $1 AND $2 AND {bank} <> $3 GROUP BY {bank} ORDER BY value DESC LIMIT $4"
            ),
        ),
    ];

    examples
        .into_iter()
        .map(|(mode, question, sql)| SeedDocument {
            collection: EXAMPLE_COLLECTION,
            id: format!("example:{}:{}", metric.code, mode),
            text: format!("Pregunta: {}\nSQL: {}", question, sql),
            metadata: meta(&[("metric", &metric.code), ("mode", mode), ("table", table)]),
        })
        .collect()
}

/// Embed every seed document into `store`; returns how many were indexed
pub async fn seed_store(
    store: &InMemoryVectorStore,
    embedder: &dyn Embedder,
    registry: &Registry,
) -> Result<usize> {
    let docs = seed_documents(registry);
    let total = docs.len();

    for seed in docs {
        let embedding = embedder.embed(&seed.text).await?;
        store.add_document(
            seed.collection,
            Document {
                id: seed.id,
                text: seed.text,
                metadata: seed.metadata,
                embedding,
            },
        )?;
    }

    info!(documents = total, "Seeded retrieval corpus");
    Ok(total)
}
