use anyhow::{Context, Result};
use index::{Embedder, EmbeddingClient, Retriever, VectorStore};
use ingest::RecursiveCharacterSplitter;
use query::{ChatClient, ChatModel, SUPPORTED_MODELS};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::retry::{RetryPolicy, RetryingChat, RetryingEmbedder};

pub fn build_embedder(config: &AppConfig) -> Result<Arc<dyn Embedder>> {
    let batch_size = config.openai.embedding_batch_size;
    let client = EmbeddingClient::new(
        config.openai.base_url.clone(),
        config.require_api_key()?.to_string(),
        config.openai.embedding_model.clone(),
    )
    .with_batch_size(batch_size);

    Ok(Arc::new(RetryingEmbedder::new(
        Arc::new(client),
        RetryPolicy::from_config(&config.retry),
        batch_size,
    )))
}

pub fn build_chat(config: &AppConfig, model: &str) -> Result<Arc<dyn ChatModel>> {
    let mut client = ChatClient::new(
        config.openai.base_url.clone(),
        config.require_api_key()?.to_string(),
        model.to_string(),
    );
    if let Some(temperature) = config.openai.chat_temperature {
        client = client.with_temperature(temperature);
    }

    Ok(Arc::new(RetryingChat::new(
        Arc::new(client),
        RetryPolicy::from_config(&config.retry),
    )))
}

/// One client per selectable model, including the configured default
pub fn build_models(config: &AppConfig) -> Result<HashMap<String, Arc<dyn ChatModel>>> {
    let mut models = HashMap::new();
    let names = SUPPORTED_MODELS
        .iter()
        .copied()
        .chain(std::iter::once(config.openai.chat_model.as_str()));

    for name in names {
        if !models.contains_key(name) {
            models.insert(name.to_string(), build_chat(config, name)?);
        }
    }
    Ok(models)
}

/// Load the saved store; fails when the indexer has not run yet or the
/// configured embedder does not match the one that built it
pub async fn load_retriever(config: &AppConfig, embedder: Arc<dyn Embedder>) -> Result<Retriever> {
    let store = VectorStore::load_local(&config.vectorstore_dir).await?;
    store.ensure_embedder(embedder.as_ref())?;

    let dimension = embedder
        .get_dimension()
        .await
        .context("Failed to sample embedding dimension")?;
    if dimension != store.dimension() {
        anyhow::bail!(
            "Embedder returns {}-dimensional vectors but the store holds {}-dimensional ones",
            dimension,
            store.dimension()
        );
    }

    Ok(Retriever::new(Arc::new(store), embedder).with_k(config.retriever_k))
}

/// Reuse the store at `out_dir` unless `rebuild` is set; otherwise load,
/// split and embed `docs_dir` and save the result
pub async fn build_or_load_store(
    docs_dir: &Path,
    out_dir: &Path,
    splitter: &RecursiveCharacterSplitter,
    embedder: &dyn Embedder,
    rebuild: bool,
) -> Result<VectorStore> {
    if !docs_dir.is_dir() {
        anyhow::bail!("Document directory does not exist: {}", docs_dir.display());
    }

    if VectorStore::exists(out_dir) && !rebuild {
        info!(dir = %out_dir.display(), "Vector store already exists, loading it (use --rebuild to recreate)");
        let store = VectorStore::load_local(out_dir).await?;
        store.ensure_embedder(embedder)?;
        return Ok(store);
    }

    let (chunks, report) = ingest::ingest_directory(docs_dir, splitter).await?;
    for (pattern, count) in &report.loaded {
        info!(pattern = %pattern, documents = count, "Loaded documents");
    }
    for (pattern, error) in &report.failed {
        warn!(pattern = %pattern, error = %error, "Skipped files");
    }

    let store = VectorStore::from_chunks(embedder, chunks).await?;
    store.save_local(out_dir).await?;
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> AppConfig {
        AppConfig::from_lookup(|key| match key {
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            "CHAT_MODEL" => Some("gpt-4o-mini".to_string()),
            _ => None,
        })
        .unwrap()
    }

    /// Two-dimensional vectors; counts how many texts it embedded
    struct CountingEmbedder {
        name: &'static str,
        embedded: AtomicUsize,
    }

    impl CountingEmbedder {
        fn new(name: &'static str) -> Self {
            Self { name, embedded: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }

        fn model_name(&self) -> &str {
            self.name
        }
    }

    fn docs_dir(root: &Path) -> std::path::PathBuf {
        let docs = root.join("kysely");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join("intro.md"), "# Kysely\n\nA type-safe SQL query builder.").unwrap();
        std::fs::write(docs.join("notes.txt"), "Migrations live in their own folder.").unwrap();
        docs
    }

    fn splitter() -> RecursiveCharacterSplitter {
        RecursiveCharacterSplitter::with_sizes(1000, 200).unwrap()
    }

    #[test]
    fn test_models_include_configured_default() {
        let models = build_models(&config()).unwrap();

        assert_eq!(models.len(), 3);
        assert_eq!(models["gpt-4-turbo"].model_name(), "gpt-4-turbo");
        assert!(models.contains_key("gpt-4o-mini"));
    }

    #[test]
    fn test_clients_need_an_api_key() {
        let config = AppConfig::default();
        assert!(build_embedder(&config).is_err());
        assert!(build_chat(&config, "gpt-3.5-turbo").is_err());
    }

    #[test]
    fn test_embedder_reports_configured_model() {
        let mut config = config();
        config.openai.embedding_model = "text-embedding-3-small".to_string();
        assert_eq!(build_embedder(&config).unwrap().model_name(), "text-embedding-3-small");
    }

    #[tokio::test]
    async fn test_missing_store_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        config.vectorstore_dir = dir.path().join("missing");

        let embedder = build_embedder(&config).unwrap();
        let err = match load_retriever(&config, embedder).await {
            Ok(_) => panic!("store should be missing"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("make_vectorstore"));
    }

    #[tokio::test]
    async fn test_missing_docs_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = CountingEmbedder::new("counting");

        let result = build_or_load_store(
            &dir.path().join("nope"),
            &dir.path().join("store"),
            &splitter(),
            &embedder,
            false,
        )
        .await;

        let err = result.err().map(|e| e.to_string()).unwrap_or_default();
        assert!(err.contains("Document directory does not exist"));
        assert_eq!(embedder.embedded.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_existing_store_is_reused_unless_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let docs = docs_dir(dir.path());
        let out = dir.path().join("vectorstore");
        let embedder = CountingEmbedder::new("counting");

        let built = build_or_load_store(&docs, &out, &splitter(), &embedder, false).await.unwrap();
        assert_eq!(built.len(), 2);
        assert!(VectorStore::exists(&out));
        assert_eq!(embedder.embedded.load(Ordering::SeqCst), 2);

        let reused = build_or_load_store(&docs, &out, &splitter(), &embedder, false).await.unwrap();
        assert_eq!(reused.len(), 2);
        assert_eq!(embedder.embedded.load(Ordering::SeqCst), 2);

        std::fs::write(docs.join("joins.md"), "Joins are typed too.").unwrap();
        let rebuilt = build_or_load_store(&docs, &out, &splitter(), &embedder, true).await.unwrap();
        assert_eq!(rebuilt.len(), 3);
        assert_eq!(embedder.embedded.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_retriever_loads_store_built_by_same_model() {
        let dir = tempfile::tempdir().unwrap();
        let docs = docs_dir(dir.path());
        let mut config = config();
        config.vectorstore_dir = dir.path().join("vectorstore");
        config.retriever_k = 1;

        let embedder = CountingEmbedder::new("counting");
        build_or_load_store(&docs, &config.vectorstore_dir, &splitter(), &embedder, false)
            .await
            .unwrap();

        let retriever = match load_retriever(&config, Arc::new(CountingEmbedder::new("counting"))).await {
            Ok(retriever) => retriever,
            Err(e) => panic!("store should load: {e:#}"),
        };
        assert_eq!(retriever.k(), 1);
        assert_eq!(retriever.store().len(), 2);

        let other = load_retriever(&config, Arc::new(CountingEmbedder::new("other"))).await;
        assert!(other.is_err());
    }
}
