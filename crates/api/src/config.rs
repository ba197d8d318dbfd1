use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub openai: OpenAiConfig,
    pub vectorstore_dir: PathBuf,
    pub docs_dir: PathBuf,
    pub bind_addr: String,
    pub retriever_k: usize,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(skip_serializing, default)]
    pub api_key: String,
    pub base_url: String,
    pub embedding_model: String,
    pub embedding_batch_size: usize,
    pub chat_model: String,
    pub chat_temperature: Option<f32>,
}

// Keep the key out of logs
impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("base_url", &self.base_url)
            .field("embedding_model", &self.embedding_model)
            .field("embedding_batch_size", &self.embedding_batch_size)
            .field("chat_model", &self.chat_model)
            .field("chat_temperature", &self.chat_temperature)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai: OpenAiConfig {
                api_key: String::new(),
                base_url: "https://api.openai.com/v1".to_string(),
                embedding_model: index::DEFAULT_EMBEDDING_MODEL.to_string(),
                embedding_batch_size: index::embeddings::DEFAULT_BATCH_SIZE,
                chat_model: query::DEFAULT_CHAT_MODEL.to_string(),
                chat_temperature: None,
            },
            vectorstore_dir: PathBuf::from("./vectorstore_faiss"),
            docs_dir: PathBuf::from("./kysely"),
            bind_addr: "0.0.0.0:3000".to_string(),
            retriever_k: index::DEFAULT_K,
            retry: RetryConfig {
                max_retries: 3,
                initial_backoff_ms: 1000,
                max_backoff_ms: 10000,
            },
            cache: CacheConfig {
                enabled: true,
                max_entries: 10000,
            },
        }
    }
}

impl AppConfig {
    /// Read the process environment (call `dotenv` first to pick up `.env`)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("OPENAI_API_KEY") {
            config.openai.api_key = v;
        }
        if let Some(v) = get("OPENAI_BASE_URL") {
            config.openai.base_url = v;
        }
        if let Some(v) = get("EMBEDDING_MODEL") {
            config.openai.embedding_model = v;
        }
        if let Some(v) = get("EMBEDDING_BATCH_SIZE") {
            config.openai.embedding_batch_size = parse("EMBEDDING_BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("CHAT_MODEL") {
            config.openai.chat_model = v;
        }
        if let Some(v) = get("CHAT_TEMPERATURE") {
            config.openai.chat_temperature = Some(parse("CHAT_TEMPERATURE", &v)?);
        }
        if let Some(v) = get("VECTORSTORE_DIR") {
            config.vectorstore_dir = PathBuf::from(v);
        }
        if let Some(v) = get("DOCS_DIR") {
            config.docs_dir = PathBuf::from(v);
        }
        if let Some(v) = get("BIND_ADDR") {
            config.bind_addr = v;
        }
        if let Some(v) = get("RETRIEVER_K") {
            config.retriever_k = parse("RETRIEVER_K", &v)?;
        }
        if let Some(v) = get("RETRY_MAX_RETRIES") {
            config.retry.max_retries = parse("RETRY_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("RETRY_INITIAL_BACKOFF_MS") {
            config.retry.initial_backoff_ms = parse("RETRY_INITIAL_BACKOFF_MS", &v)?;
        }
        if let Some(v) = get("RETRY_MAX_BACKOFF_MS") {
            config.retry.max_backoff_ms = parse("RETRY_MAX_BACKOFF_MS", &v)?;
        }
        if let Some(v) = get("CACHE_ENABLED") {
            config.cache.enabled = parse("CACHE_ENABLED", &v)?;
        }
        if let Some(v) = get("CACHE_MAX_ENTRIES") {
            config.cache.max_entries = parse("CACHE_MAX_ENTRIES", &v)?;
        }

        if config.retriever_k == 0 {
            anyhow::bail!("RETRIEVER_K must be at least 1");
        }
        if config.openai.embedding_batch_size == 0 {
            anyhow::bail!("EMBEDDING_BATCH_SIZE must be at least 1");
        }

        Ok(config)
    }

    pub fn require_api_key(&self) -> Result<&str> {
        if self.openai.api_key.is_empty() {
            anyhow::bail!("OPENAI_API_KEY is not set (add it to the environment or a .env file)");
        }
        Ok(&self.openai.api_key)
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {}: {:?}", key, value))
}
