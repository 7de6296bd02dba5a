//! Vector Store
//!
//! In-memory similarity search over named collections. Linear cosine scan;
//! the corpus is a few hundred documents derived from the registry.

use super::{MetadataFilter, SimilaritySearch, Snippet};
use crate::error::{Nl2SqlError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::warn;

/// Vector embedding (simple f32 vector)
pub type Embedding = Vec<f32>;

/// Document in the vector store
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub metadata: HashMap<String, String>,
    pub embedding: Embedding,
}

impl Document {
    fn matches(&self, filters: &MetadataFilter) -> bool {
        filters
            .iter()
            .all(|(key, value)| self.metadata.get(key).map(|v| v == value).unwrap_or(false))
    }
}

pub struct InMemoryVectorStore {
    dimension: usize,
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl InMemoryVectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            collections: RwLock::new(HashMap::new()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Add a document; a document with the same id in the collection is replaced
    pub fn add_document(&self, collection: &str, document: Document) -> Result<()> {
        if document.embedding.len() != self.dimension {
            warn!(
                id = %document.id,
                got = document.embedding.len(),
                expected = self.dimension,
                "Embedding dimension mismatch, document not indexed"
            );
            return Err(Nl2SqlError::Retrieval(format!(
                "Embedding dimension {} doesn't match store dimension {}",
                document.embedding.len(),
                self.dimension
            )));
        }

        let mut collections = self.collections.write().unwrap_or_else(|p| p.into_inner());
        let docs = collections.entry(collection.to_string()).or_default();
        docs.retain(|d| d.id != document.id);
        docs.push(document);
        Ok(())
    }

    pub fn len(&self, collection: &str) -> usize {
        let collections = self.collections.read().unwrap_or_else(|p| p.into_inner());
        collections.get(collection).map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        let collections = self.collections.read().unwrap_or_else(|p| p.into_inner());
        collections.values().all(|d| d.is_empty())
    }
}

#[async_trait]
impl SimilaritySearch for InMemoryVectorStore {
    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        filters: &MetadataFilter,
        top_k: usize,
    ) -> Result<Vec<Snippet>> {
        if query_vector.len() != self.dimension {
            return Err(Nl2SqlError::Retrieval(format!(
                "Query embedding dimension {} doesn't match store dimension {}",
                query_vector.len(),
                self.dimension
            )));
        }

        let collections = self.collections.read().unwrap_or_else(|p| p.into_inner());
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut results: Vec<Snippet> = docs
            .iter()
            .filter(|doc| doc.matches(filters))
            .map(|doc| Snippet {
                text: doc.text.clone(),
                score: cosine_similarity(query_vector, &doc.embedding),
                metadata: doc.metadata.clone(),
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);
        Ok(results)
    }
}

/// Compute cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, embedding: Vec<f32>, metric: &str) -> Document {
        Document {
            id: id.to_string(),
            text: format!("doc {}", id),
            metadata: HashMap::from([("metric".to_string(), metric.to_string())]),
            embedding,
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert_eq!(cosine_similarity(&[1.0, 0.0, 0.0], &[1.0, 0.0, 0.0]), 1.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_search_ranks_and_filters() {
        let store = InMemoryVectorStore::new(2);
        store.add_document("metrics", doc("a", vec![1.0, 0.0], "IMOR")).unwrap();
        store.add_document("metrics", doc("b", vec![0.7, 0.7], "IMOR")).unwrap();
        store.add_document("metrics", doc("c", vec![1.0, 0.1], "ICAP")).unwrap();

        let all = store.search("metrics", &[1.0, 0.0], &MetadataFilter::new(), 10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].text, "doc a");

        let filter = MetadataFilter::from([("metric".to_string(), "IMOR".to_string())]);
        let imor = store.search("metrics", &[1.0, 0.0], &filter, 1).await.unwrap();
        assert_eq!(imor.len(), 1);
        assert_eq!(imor[0].text, "doc a");

        assert!(store.search("missing", &[1.0, 0.0], &filter, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let store = InMemoryVectorStore::new(3);
        assert!(store.add_document("schema", doc("a", vec![1.0], "IMOR")).is_err());
        assert!(store.search("schema", &[1.0], &MetadataFilter::new(), 5).await.is_err());
        assert!(store.is_empty());
    }
}
