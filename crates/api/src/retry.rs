use anyhow::Result;
use async_trait::async_trait;
use index::{Embedder, is_transient};
use query::ChatModel;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::RetryConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, config.initial_backoff_ms, config.max_backoff_ms)
    }

    /// Retry a future with exponential backoff; errors rejected by
    /// `should_retry` are returned at once
    pub async fn retry_when<F, Fut, T, E, P>(
        &self,
        operation_name: &str,
        should_retry: P,
        mut f: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        let mut backoff = self.initial_backoff;

        loop {
            match f().await {
                Ok(result) => {
                    if attempt > 0 {
                        info!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(result);
                }
                Err(e) => {
                    if !should_retry(&e) {
                        warn!(operation = operation_name, error = %e, "Operation failed, not retryable");
                        return Err(e);
                    }

                    attempt += 1;
                    if attempt > self.max_retries {
                        warn!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %e,
                            "Operation failed after max retries"
                        );
                        return Err(e);
                    }

                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Operation failed, retrying"
                    );

                    sleep(backoff).await;

                    backoff = std::cmp::min(backoff * 2, self.max_backoff);
                }
            }
        }
    }
}

/// Chat model wrapper that retries failed completions
pub struct RetryingChat {
    inner: Arc<dyn ChatModel>,
    policy: RetryPolicy,
}

impl RetryingChat {
    pub fn new(inner: Arc<dyn ChatModel>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ChatModel for RetryingChat {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.policy
            .retry_when("chat_completion", is_transient, || self.inner.generate(prompt))
            .await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Embedder wrapper that sends inputs in batches and retries each failed batch on its own
pub struct RetryingEmbedder {
    inner: Arc<dyn Embedder>,
    policy: RetryPolicy,
    batch_size: usize,
}

impl RetryingEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, policy: RetryPolicy, batch_size: usize) -> Self {
        Self {
            inner,
            policy,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl Embedder for RetryingEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embedded = self.policy
                .retry_when("embed_documents", is_transient, || self.inner.embed_documents(batch))
                .await?;
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.policy
            .retry_when("embed_query", is_transient, || self.inner.embed_query(text))
            .await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use index::ApiStatusError;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyModel {
        failures_left: AtomicUsize,
        calls: AtomicUsize,
        status: u16,
    }

    impl FlakyModel {
        fn new(failures: usize) -> Self {
            Self::failing_with(failures, 429)
        }

        fn failing_with(failures: usize, status: u16) -> Self {
            Self {
                failures_left: AtomicUsize::new(failures),
                calls: AtomicUsize::new(0),
                status,
            }
        }
    }

    #[async_trait]
    impl ChatModel for FlakyModel {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(ApiStatusError::new("Chat completion", self.status, "slow down").into());
            }
            Ok("ok".to_string())
        }

        fn model_name(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_recovers_within_budget() {
        let model = Arc::new(FlakyModel::new(2));
        let chat = RetryingChat::new(model.clone(), RetryPolicy::new(3, 1, 5));

        assert_eq!(chat.generate("hi").await.unwrap(), "ok");
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
        assert_eq!(chat.model_name(), "flaky");
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let model = Arc::new(FlakyModel::new(10));
        let chat = RetryingChat::new(model.clone(), RetryPolicy::new(2, 1, 5));

        let err = chat.generate("hi").await.unwrap_err();
        assert!(err.to_string().contains("429"));
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let model = Arc::new(FlakyModel::failing_with(1, 401));
        let chat = RetryingChat::new(model.clone(), RetryPolicy::new(3, 1, 5));

        let err = chat.generate("hi").await.unwrap_err();
        assert!(err.to_string().contains("401"));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    /// Records every batch it is asked for; the batch holding `fail_on` gets one 429
    struct RateLimitedEmbedder {
        batches: Mutex<Vec<usize>>,
        fail_on: String,
        failed: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for RateLimitedEmbedder {
        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.batches.lock().unwrap().push(texts.len());
            if texts.contains(&self.fail_on) && self.failed.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(ApiStatusError::new("Embedding request", 429, "rate limited").into());
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }

        fn model_name(&self) -> &str {
            "rate-limited"
        }
    }

    #[tokio::test]
    async fn test_embedding_retries_only_the_failed_batch() {
        let texts: Vec<String> = (0..10).map(|i| "x".repeat(i + 1)).collect();
        let inner = Arc::new(RateLimitedEmbedder {
            batches: Mutex::new(Vec::new()),
            fail_on: texts[9].clone(),
            failed: AtomicUsize::new(0),
        });
        let embedder = RetryingEmbedder::new(inner.clone(), RetryPolicy::new(3, 1, 5), 2);

        let vectors = embedder.embed_documents(&texts).await.unwrap();

        assert_eq!(vectors.len(), 10);
        assert_eq!(vectors[9], vec![10.0]);
        assert_eq!(*inner.batches.lock().unwrap(), vec![2, 2, 2, 2, 2, 2]);
        assert_eq!(embedder.model_name(), "rate-limited");
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_capped() {
        let policy = RetryPolicy::new(4, 100, 250);
        let start = tokio::time::Instant::now();

        let result: Result<(), String> = policy
            .retry_when("always_fails", |_: &String| true, || async { Err("boom".to_string()) })
            .await;

        assert!(result.is_err());
        // 100 + 200 + 250 + 250
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(800));
        assert!(elapsed < Duration::from_millis(900));
    }
}
