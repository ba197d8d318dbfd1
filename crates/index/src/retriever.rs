use anyhow::Result;
use ingest::Chunk;
use std::sync::Arc;
use tracing::debug;

use crate::embeddings::Embedder;
use crate::store::VectorStore;

pub const DEFAULT_K: usize = 4;

/// Top-k similarity search over a loaded store
#[derive(Clone)]
pub struct Retriever {
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    k: usize,
}

impl Retriever {
    pub fn new(store: Arc<VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            k: DEFAULT_K,
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k.max(1);
        self
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<Chunk>> {
        let hits = self.retrieve_with_scores(query).await?;
        Ok(hits.into_iter().map(|(chunk, _)| chunk).collect())
    }

    pub async fn retrieve_with_scores(&self, query: &str) -> Result<Vec<(Chunk, f32)>> {
        let hits = self.store
            .similarity_search_with_score(self.embedder.as_ref(), query, self.k)
            .await?;
        debug!(k = self.k, hits = hits.len(), "Retrieved chunks");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{LetterEmbedder, sample_store};

    #[tokio::test]
    async fn test_default_k_is_four() {
        let retriever = Retriever::new(Arc::new(sample_store().await), Arc::new(LetterEmbedder));
        assert_eq!(retriever.k(), 4);
        assert_eq!(retriever.retrieve("abc").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_with_k_limits_results() {
        let retriever = Retriever::new(Arc::new(sample_store().await), Arc::new(LetterEmbedder))
            .with_k(1);

        let chunks = retriever.retrieve("cc").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "ccc");
    }
}
