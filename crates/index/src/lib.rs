pub mod embeddings;
pub mod retriever;
pub mod store;

pub use embeddings::{ApiStatusError, DEFAULT_EMBEDDING_MODEL, Embedder, EmbeddingClient, is_transient};
pub use retriever::{DEFAULT_K, Retriever};
pub use store::VectorStore;

#[derive(Debug, serde::Serialize)]
pub struct IndexStats {
    pub chunks: usize,
    pub dimension: usize,
}

impl From<&VectorStore> for IndexStats {
    fn from(store: &VectorStore) -> Self {
        Self {
            chunks: store.len(),
            dimension: store.dimension(),
        }
    }
}
