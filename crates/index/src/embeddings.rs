use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Turns text into vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_documents(&[text.to_string()]).await?;
        vectors.pop().context("Embedding response was empty")
    }

    /// Name of the embedding model; a store only answers queries embedded by the same one
    fn model_name(&self) -> &str;

    /// Get embedding dimension
    async fn get_dimension(&self) -> Result<usize> {
        let test_embedding = self.embed_query("test").await?;
        Ok(test_embedding.len())
    }
}

/// Non-success HTTP status from a model endpoint
#[derive(Debug, thiserror::Error)]
#[error("{operation} failed: {status} {body}")]
pub struct ApiStatusError {
    pub operation: &'static str,
    pub status: StatusCode,
    pub body: String,
}

impl ApiStatusError {
    pub fn new(operation: &'static str, status: u16, body: impl Into<String>) -> Self {
        Self {
            operation,
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body: body.into(),
        }
    }

    pub async fn from_response(operation: &'static str, response: reqwest::Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Self { operation, status, body }
    }
}

/// Rate limits, server errors and connection failures; anything else fails the same way again
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(status) = cause.downcast_ref::<ApiStatusError>() {
            return status.status == StatusCode::TOO_MANY_REQUESTS || status.status.is_server_error();
        }
        if let Some(http) = cause.downcast_ref::<reqwest::Error>() {
            return http.is_timeout() || http.is_connect();
        }
        false
    })
}

/// Client for an OpenAI-compatible `/embeddings` endpoint
#[derive(Clone)]
pub struct EmbeddingClient {
    base_url: String,
    api_key: String,
    model: String,
    batch_size: usize,
    client: reqwest::Client,
}

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            batch_size: DEFAULT_BATCH_SIZE,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = EmbeddingRequest {
            model: &self.model,
            input: batch,
        };

        let response = self.client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send embedding request")?;

        if !response.status().is_success() {
            return Err(ApiStatusError::from_response("Embedding request", response).await.into());
        }

        let embedding_response: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;

        order_embeddings(embedding_response, batch.len())
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());

        for (i, batch) in texts.chunks(self.batch_size).enumerate() {
            debug!(batch = i, inputs = batch.len(), model = %self.model, "Embedding batch");
            vectors.extend(self.embed_batch(batch).await?);
        }

        Ok(vectors)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// The API may return items out of order; `index` is authoritative.
fn order_embeddings(response: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>> {
    if response.data.len() != expected {
        anyhow::bail!(
            "Embedding response has {} vectors, expected {}",
            response.data.len(),
            expected
        );
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for item in response.data {
        let slot = slots
            .get_mut(item.index)
            .with_context(|| format!("Embedding index {} out of range", item.index))?;
        *slot = Some(item.embedding);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, v)| v.with_context(|| format!("Missing embedding for input {}", i)))
        .collect()
}
