pub mod chunk;
pub mod directory;
pub mod document;
pub mod loader;
pub mod splitter;

pub use chunk::Chunk;
pub use directory::{DirectoryLoader, LoadReport};
pub use document::{Document, Metadata};
pub use loader::{DEFAULT_PATTERNS, FilePattern, LoaderKind, load_file};
pub use splitter::{RecursiveCharacterSplitter, SplitterConfig};

use anyhow::Result;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

/// Generate a stable document ID from file path
pub fn generate_doc_id(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

/// Load and split a single file
pub async fn ingest_file(
    file_path: &Path,
    splitter: &RecursiveCharacterSplitter,
) -> Result<Vec<Chunk>> {
    let docs = load_file(file_path).await?;
    Ok(splitter.split_documents(&docs))
}

/// Load every supported file under `dir_path` and split the documents
pub async fn ingest_directory(
    dir_path: &Path,
    splitter: &RecursiveCharacterSplitter,
) -> Result<(Vec<Chunk>, LoadReport)> {
    let (docs, report) = DirectoryLoader::new(dir_path).load_with_report().await?;
    let chunks = splitter.split_documents(&docs);

    info!(
        documents = docs.len(),
        chunks = chunks.len(),
        chunk_size = splitter.chunk_size(),
        chunk_overlap = splitter.chunk_overlap(),
        "Split documents"
    );

    Ok((chunks, report))
}
