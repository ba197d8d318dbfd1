use anyhow::{Context, Result};
use hnsw_rs::prelude::*;
use ingest::Chunk;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tokio::fs;
use tracing::info;

use crate::embeddings::Embedder;

pub const INDEX_FILE: &str = "index.json";
pub const DOCSTORE_FILE: &str = "docstore.json";
const GRAPH_BASENAME: &str = "index";

const MAX_NB_CONNECTION: usize = 16;
const MAX_LAYER: usize = 16;
const EF_CONSTRUCTION: usize = 200;
const EF_SEARCH: usize = 64;

/// Contents of `index.json`: what built the dumped graph and where it lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Manifest {
    embedding_model: String,
    dimension: usize,
    rows: usize,
    /// Basename of the `.hnsw.graph` / `.hnsw.data` pair
    basename: String,
}

/// HNSW graph over L2 distance plus the chunks it was built from.
/// Graph point ids are docstore rows.
pub struct VectorStore {
    index: Hnsw<'static, f32, DistL2>,
    embedding_model: String,
    dimension: usize,
    docstore: Vec<Chunk>,
}

impl fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorStore")
            .field("embedding_model", &self.embedding_model)
            .field("dimension", &self.dimension)
            .field("chunks", &self.docstore.len())
            .finish()
    }
}

fn new_graph(capacity: usize) -> Hnsw<'static, f32, DistL2> {
    Hnsw::new(MAX_NB_CONNECTION, capacity.max(1), MAX_LAYER, EF_CONSTRUCTION, DistL2 {})
}

/// Common width of `vectors`, checked against `expected` when the store already has one
fn check_dimensions(vectors: &[Vec<f32>], expected: Option<usize>) -> Result<usize> {
    let dimension = match expected.or_else(|| vectors.first().map(Vec::len)) {
        Some(0) => anyhow::bail!("Cannot index an empty embedding"),
        Some(d) => d,
        None => return Ok(0),
    };

    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        anyhow::bail!(
            "Embedding dimension mismatch: got {}, index has {}",
            bad.len(),
            dimension
        );
    }
    Ok(dimension)
}

impl VectorStore {
    pub async fn from_chunks(embedder: &dyn Embedder, chunks: Vec<Chunk>) -> Result<Self> {
        if chunks.is_empty() {
            anyhow::bail!("No chunks to index");
        }

        let mut store = Self {
            index: new_graph(chunks.len()),
            embedding_model: embedder.model_name().to_string(),
            dimension: 0,
            docstore: Vec::new(),
        };
        store.add(embedder, chunks).await?;
        Ok(store)
    }

    pub async fn add(&mut self, embedder: &dyn Embedder, chunks: Vec<Chunk>) -> Result<()> {
        self.ensure_embedder(embedder)?;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder
            .embed_documents(&texts)
            .await
            .context("Failed to generate embeddings")?;

        self.insert(chunks, vectors)
    }

    fn insert(&mut self, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<()> {
        if chunks.len() != vectors.len() {
            anyhow::bail!(
                "Got {} embeddings for {} chunks",
                vectors.len(),
                chunks.len()
            );
        }

        // Validate everything before mutating
        let expected = (self.dimension > 0).then_some(self.dimension);
        let dimension = check_dimensions(&vectors, expected)?;

        let first_row = self.docstore.len();
        for (offset, vector) in vectors.iter().enumerate() {
            self.index.insert((vector.as_slice(), first_row + offset));
        }

        self.dimension = dimension;
        self.docstore.extend(chunks);
        Ok(())
    }

    /// Queries must be embedded by the model that built the store
    pub fn ensure_embedder(&self, embedder: &dyn Embedder) -> Result<()> {
        if embedder.model_name() != self.embedding_model {
            anyhow::bail!(
                "Vector store was built with embedding model {} but queries use {} (rebuild the store)",
                self.embedding_model,
                embedder.model_name()
            );
        }
        Ok(())
    }

    pub async fn similarity_search_with_score(
        &self,
        embedder: &dyn Embedder,
        query: &str,
        k: usize,
    ) -> Result<Vec<(Chunk, f32)>> {
        self.ensure_embedder(embedder)?;
        let vector = embedder
            .embed_query(query)
            .await
            .context("Failed to embed query")?;
        self.similarity_search_by_vector(&vector, k)
    }

    /// Up to `k` chunks with their squared L2 distance, nearest first
    pub fn similarity_search_by_vector(&self, vector: &[f32], k: usize) -> Result<Vec<(Chunk, f32)>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if vector.len() != self.dimension {
            anyhow::bail!(
                "Query dimension mismatch: got {}, index has {}",
                vector.len(),
                self.dimension
            );
        }

        let k = k.min(self.len());
        let mut neighbours = self.index.search(vector, k, EF_SEARCH.max(k));

        // Ties keep insertion order
        neighbours.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.d_id.cmp(&b.d_id)));

        neighbours
            .into_iter()
            .map(|n| {
                let chunk = self.docstore
                    .get(n.d_id)
                    .with_context(|| format!("Vector index returned unknown row {}", n.d_id))?;
                Ok((chunk.clone(), n.distance * n.distance))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.docstore.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docstore.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.docstore
    }

    /// True only when both store files are present
    pub fn exists(dir: &Path) -> bool {
        dir.join(INDEX_FILE).is_file() && dir.join(DOCSTORE_FILE).is_file()
    }

    pub async fn save_local(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {:?}", dir))?;

        let basename = self.index
            .file_dump(dir, GRAPH_BASENAME)
            .map_err(|e| anyhow::anyhow!("Failed to dump vector index to {}: {}", dir.display(), e))?;

        let manifest = Manifest {
            embedding_model: self.embedding_model.clone(),
            dimension: self.dimension,
            rows: self.len(),
            basename,
        };
        fs::write(dir.join(INDEX_FILE), serde_json::to_vec_pretty(&manifest)?)
            .await
            .context("Failed to write vector index manifest")?;

        let docstore_json = serde_json::to_vec_pretty(&self.docstore)?;
        fs::write(dir.join(DOCSTORE_FILE), docstore_json)
            .await
            .context("Failed to write docstore")?;

        info!(
            dir = %dir.display(),
            chunks = self.len(),
            dimension = self.dimension,
            model = %self.embedding_model,
            "Saved vector store"
        );
        Ok(())
    }

    pub async fn load_local(dir: &Path) -> Result<Self> {
        if !Self::exists(dir) {
            anyhow::bail!(
                "Vector store not found at {}. Please ensure it's created and populated (run make_vectorstore first).",
                dir.display()
            );
        }

        let manifest_json = fs::read(dir.join(INDEX_FILE))
            .await
            .context("Failed to read vector index manifest")?;
        let manifest: Manifest =
            serde_json::from_slice(&manifest_json).context("Failed to parse vector index manifest")?;

        let docstore_json = fs::read(dir.join(DOCSTORE_FILE))
            .await
            .context("Failed to read docstore")?;
        let docstore: Vec<Chunk> =
            serde_json::from_slice(&docstore_json).context("Failed to parse docstore")?;

        if manifest.rows != docstore.len() {
            anyhow::bail!(
                "Vector index has {} rows but docstore has {} chunks",
                manifest.rows,
                docstore.len()
            );
        }

        // The reloaded graph borrows its loader for as long as the store lives
        let io: &'static mut HnswIo = Box::leak(Box::new(HnswIo::new(dir, &manifest.basename)));
        let index: Hnsw<'static, f32, DistL2> = io
            .load_hnsw::<f32, DistL2>()
            .map_err(|e| anyhow::anyhow!("Failed to load vector index from {}: {}", dir.display(), e))?;

        if index.get_nb_point() != manifest.rows {
            anyhow::bail!(
                "Vector index has {} points but its manifest lists {} rows",
                index.get_nb_point(),
                manifest.rows
            );
        }

        info!(
            dir = %dir.display(),
            chunks = docstore.len(),
            dimension = manifest.dimension,
            model = %manifest.embedding_model,
            "Loaded vector store"
        );
        Ok(Self {
            index,
            embedding_model: manifest.embedding_model,
            dimension: manifest.dimension,
            docstore,
        })
    }
}
