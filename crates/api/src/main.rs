use anyhow::{Context, Result};
use api::cache::Cache;
use api::metrics::Metrics;
use api::server::{AppState, router};
use api::{AppConfig, pipeline, telemetry};
use query::RagChain;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    telemetry::init_tracing();

    let config = AppConfig::from_env()?;
    info!(?config, "Starting query service");

    // Fails fast when the store has not been built
    let embedder = pipeline::build_embedder(&config)?;
    let retriever = pipeline::load_retriever(&config, embedder).await?;

    let models = pipeline::build_models(&config)?;
    let default_model = config.openai.chat_model.clone();
    let default_llm = models
        .get(&default_model)
        .cloned()
        .context("Default chat model missing from model table")?;

    let state = Arc::new(AppState {
        chain: RagChain::new(retriever, default_llm),
        models,
        default_model,
        cache: config.cache.enabled.then(|| Cache::new(config.cache.max_entries)),
        metrics: Metrics::new(),
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;

    info!("Server listening on http://{}", config.bind_addr);

    axum::serve(listener, router(state)).await?;
    Ok(())
}
