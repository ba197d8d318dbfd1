use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::document::Document;
use crate::loader::{self, DEFAULT_PATTERNS, FilePattern};

/// Loads every supported file under a root directory, one pattern at a time.
pub struct DirectoryLoader {
    root: PathBuf,
    patterns: Vec<FilePattern>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct LoadReport {
    /// (glob, documents loaded) for each pattern that succeeded
    pub loaded: Vec<(String, usize)>,
    /// (glob, error) for each pattern that failed
    pub failed: Vec<(String, String)>,
}

impl LoadReport {
    pub fn total_documents(&self) -> usize {
        self.loaded.iter().map(|(_, n)| n).sum()
    }
}

impl DirectoryLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            patterns: DEFAULT_PATTERNS.to_vec(),
        }
    }

    pub fn with_patterns(mut self, patterns: Vec<FilePattern>) -> Self {
        self.patterns = patterns;
        self
    }

    pub async fn load(&self) -> Result<Vec<Document>> {
        let (docs, _) = self.load_with_report().await?;
        Ok(docs)
    }

    /// A failing file fails its whole pattern; other patterns still load.
    pub async fn load_with_report(&self) -> Result<(Vec<Document>, LoadReport)> {
        if !self.root.is_dir() {
            anyhow::bail!("Document directory not found: {}", self.root.display());
        }

        let mut docs = Vec::new();
        let mut report = LoadReport::default();

        for pattern in &self.patterns {
            match self.load_pattern(pattern).await {
                Ok(loaded) => {
                    info!(pattern = pattern.glob, documents = loaded.len(), "Loaded documents");
                    report.loaded.push((pattern.glob.to_string(), loaded.len()));
                    docs.extend(loaded);
                }
                Err(e) => {
                    warn!(pattern = pattern.glob, error = %e, "Error loading files");
                    report.failed.push((pattern.glob.to_string(), format!("{:#}", e)));
                }
            }
        }

        Ok((docs, report))
    }

    async fn load_pattern(&self, pattern: &FilePattern) -> Result<Vec<Document>> {
        let files = self.matching_files(pattern.extension);
        debug!(pattern = pattern.glob, files = files.len(), "Matched files");

        let mut tasks = JoinSet::new();
        for path in files {
            let kind = pattern.kind;
            tasks.spawn(async move {
                let docs = loader::load_with(kind, &path).await;
                (path, docs)
            });
        }

        let mut per_file = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (path, docs) = joined.context("Loader task panicked")?;
            per_file.push((path, docs?));
        }

        // Completion order is arbitrary
        per_file.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(per_file.into_iter().flat_map(|(_, docs)| docs).collect())
    }

    fn matching_files(&self, extension: &str) -> Vec<PathBuf> {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| has_extension(e.path(), extension))
            .map(|e| e.into_path())
            .collect()
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(extension)
}
