use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::embeddings::Embedder;
use crate::error::Result;
use crate::models::RetrievedSnippet;

#[cfg(test)]
use mockall::automock;

/// Read-only similarity search over some external corpus.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Snippets relevant to `query`, best match first. May be empty.
    async fn search(&self, query: &str) -> Result<Vec<RetrievedSnippet>>;
}

/// Retriever used when retrieval is switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetrieval;

#[async_trait]
impl Retriever for NoRetrieval {
    async fn search(&self, _query: &str) -> Result<Vec<RetrievedSnippet>> {
        Ok(Vec::new())
    }
}

struct IndexedItem {
    id: String,
    text: String,
    metadata: HashMap<String, String>,
    embedding: Vec<f32>,
}

/// In-memory cosine-similarity index.
pub struct VectorIndex<E: Embedder> {
    embedder: E,
    items: RwLock<Vec<IndexedItem>>,
    top_k: usize,
    score_threshold: Option<f32>,
}

impl<E: Embedder> VectorIndex<E> {
    pub fn new(embedder: E, top_k: usize, score_threshold: Option<f32>) -> Self {
        Self {
            embedder,
            items: RwLock::new(Vec::new()),
            top_k,
            score_threshold,
        }
    }

    pub async fn add_item(
        &self,
        id: impl Into<String>,
        text: impl Into<String>,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        let text = text.into();
        let embedding = self.embedder.embed(&text).await?;
        let id = id.into();
        debug!(%id, dims = embedding.len(), "Indexed item");
        self.items.write().await.push(IndexedItem {
            id,
            text,
            metadata,
            embedding,
        });
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl<E: Embedder> Retriever for VectorIndex<E> {
    async fn search(&self, query: &str) -> Result<Vec<RetrievedSnippet>> {
        let query_embedding = self.embedder.embed(query).await?;
        let items = self.items.read().await;

        let mut scored: Vec<(f32, &IndexedItem)> = items
            .iter()
            .map(|item| (cosine_similarity(&query_embedding, &item.embedding), item))
            .filter(|(score, _)| self.score_threshold.is_none_or(|t| *score >= t))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(self.top_k);

        info!(
            "Vector search returned {} of {} items{}",
            scored.len(),
            items.len(),
            if let Some(threshold) = self.score_threshold {
                format!(" (threshold: {threshold})")
            } else {
                "".to_string()
            }
        );

        Ok(scored
            .into_iter()
            .map(|(score, item)| {
                let mut metadata = item.metadata.clone();
                metadata.insert("id".to_string(), item.id.clone());
                RetrievedSnippet {
                    text: item.text.clone(),
                    score,
                    metadata,
                }
            })
            .collect())
    }
}

/// Cosine similarity; 0.0 for mismatched or zero-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;

    // Maps text onto three keyword axes.
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let text = text.to_lowercase();
            if text.contains("fail") {
                return Err(ChatError::Retrieval("embedder offline".to_string()));
            }
            Ok(vec![
                text.matches("serum").count() as f32,
                text.matches("cleanser").count() as f32,
                text.matches("sunscreen").count() as f32,
            ])
        }
    }

    async fn seeded_index(top_k: usize, threshold: Option<f32>) -> VectorIndex<KeywordEmbedder> {
        let index = VectorIndex::new(KeywordEmbedder, top_k, threshold);
        index
            .add_item("id1", "Hydrating serum", HashMap::new())
            .await
            .unwrap();
        index
            .add_item("id2", "Foaming cleanser", HashMap::new())
            .await
            .unwrap();
        index
            .add_item("id3", "Mineral sunscreen with serum", HashMap::new())
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let index = seeded_index(3, None).await;
        assert_eq!(index.len().await, 3);

        let results = index.search("which serum?").await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].text, "Hydrating serum");
        assert_eq!(results[0].metadata.get("id").map(String::as_str), Some("id1"));
        assert_eq!(results[1].text, "Mineral sunscreen with serum");
        assert!(results[0].score >= results[1].score);
        assert!(results[1].score >= results[2].score);
    }

    #[tokio::test]
    async fn test_search_applies_top_k_and_threshold() {
        let index = seeded_index(1, None).await;
        assert_eq!(index.search("serum").await.unwrap().len(), 1);

        let index = seeded_index(3, Some(0.5)).await;
        let results = index.search("serum").await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.score >= 0.5));
    }

    #[tokio::test]
    async fn test_embedder_failure_surfaces_as_retrieval_error() {
        let index = seeded_index(3, None).await;
        let err = index.search("this will fail").await.unwrap_err();
        assert!(matches!(err, ChatError::Retrieval(_)));
    }

    #[tokio::test]
    async fn test_no_retrieval_is_empty() {
        assert!(NoRetrieval.search("anything").await.unwrap().is_empty());
    }

    #[test]
    fn test_cosine_similarity_edges() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }
}
