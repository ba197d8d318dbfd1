use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::{get, post},
};
use index::IndexStats;
use query::{ChatModel, RagChain, SourceRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::cache::{Cache, CacheStats};
use crate::error::ApiError;
use crate::metrics::{Metrics, MetricsSnapshot, TimedOperation};

pub struct AppState {
    pub chain: RagChain,
    pub models: HashMap<String, Arc<dyn ChatModel>>,
    pub default_model: String,
    pub cache: Option<Cache>,
    pub metrics: Arc<Metrics>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    chunks: usize,
    dimension: usize,
}

#[derive(Serialize)]
struct ModelsResponse {
    models: Vec<String>,
    default: String,
}

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    model: Option<String>,
}

#[derive(Serialize)]
struct AskResponse {
    request_id: Uuid,
    answer: String,
    sources: Vec<SourceRef>,
    model: String,
    cached: bool,
    elapsed_ms: u64,
}

#[derive(Serialize)]
struct StatsResponse {
    metrics: MetricsSnapshot,
    cache: Option<CacheStats>,
    index: IndexStats,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/models", get(list_models))
        .route("/ask", post(ask))
        .route("/stats", get(get_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let stats = IndexStats::from(state.chain.retriever().store());
    Json(HealthResponse {
        status: "ok",
        chunks: stats.chunks,
        dimension: stats.dimension,
    })
}

async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    let mut models: Vec<String> = state.models.keys().cloned().collect();
    models.sort();
    Json(ModelsResponse {
        models,
        default: state.default_model.clone(),
    })
}

async fn ask(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, ApiError> {
    let timer = TimedOperation::start();
    let result = match payload {
        Ok(Json(req)) => answer_question(&state, &req).await,
        Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())),
    };
    state.metrics.record_request(result.is_ok());

    let (answer, model, cached) = result?;
    let elapsed = timer.elapsed();
    if !cached {
        state.metrics.record_query(elapsed);
    }

    let request_id = Uuid::new_v4();
    info!(%request_id, model = %model, cached, elapsed_ms = elapsed.as_millis() as u64, "Answered /ask");

    Ok(Json(AskResponse {
        request_id,
        answer: answer.answer,
        sources: answer.sources,
        model,
        cached,
        elapsed_ms: elapsed.as_millis() as u64,
    }))
}

async fn answer_question(
    state: &AppState,
    req: &AskRequest,
) -> Result<(query::Answer, String, bool), ApiError> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(ApiError::BadRequest("question must not be empty".to_string()));
    }

    let model_name = req.model.clone().unwrap_or_else(|| state.default_model.clone());
    let llm = state
        .models
        .get(&model_name)
        .ok_or_else(|| ApiError::BadRequest(format!("unsupported model: {}", model_name)))?;

    if let Some(cached) = state.cache.as_ref().and_then(|c| c.get_answer(&model_name, question)) {
        state.metrics.record_cache_hit();
        return Ok((cached, model_name, true));
    }

    let answer = state
        .chain
        .answer_with(llm.as_ref(), question)
        .await
        .map_err(ApiError::upstream)?;

    if let Some(cache) = &state.cache {
        cache.set_answer(&model_name, question, answer.clone());
    }

    Ok((answer, model_name, false))
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        metrics: state.metrics.snapshot(),
        cache: state.cache.as_ref().map(|c| c.stats()),
        index: IndexStats::from(state.chain.retriever().store()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use index::{Embedder, Retriever, VectorStore};
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    struct LengthEmbedder;

    #[async_trait]
    impl Embedder for LengthEmbedder {
        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }

        fn model_name(&self) -> &str {
            "length"
        }
    }

    struct CannedModel {
        name: &'static str,
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ChatModel for CannedModel {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("Chat completion failed: 500 Internal Server Error");
            }
            Ok(format!("answer from {}", self.name))
        }

        fn model_name(&self) -> &str {
            self.name
        }
    }

    fn model(name: &'static str, fail: bool) -> Arc<CannedModel> {
        Arc::new(CannedModel { name, calls: AtomicUsize::new(0), fail })
    }

    async fn state(models: Vec<Arc<CannedModel>>) -> Arc<AppState> {
        let docs = vec![
            ingest::Document::new("Kysely is a query builder".into(), "kysely/intro.md"),
            ingest::Document::new("Migrations".into(), "kysely/migrations.md"),
        ];
        let chunks = ingest::RecursiveCharacterSplitter::with_sizes(1000, 200)
            .unwrap()
            .split_documents(&docs);
        let store = VectorStore::from_chunks(&LengthEmbedder, chunks).await.unwrap();
        let retriever = Retriever::new(Arc::new(store), Arc::new(LengthEmbedder));

        let default: Arc<dyn ChatModel> = models[0].clone();
        let mut by_name: HashMap<String, Arc<dyn ChatModel>> = HashMap::new();
        for m in &models {
            by_name.insert(m.name.to_string(), m.clone());
        }

        Arc::new(AppState {
            chain: RagChain::new(retriever, default),
            models: by_name,
            default_model: models[0].name.to_string(),
            cache: Some(Cache::new(100)),
            metrics: Metrics::new(),
        })
    }

    async fn call(state: Arc<AppState>, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn post_ask(body: Value) -> Request<Body> {
        Request::post("/ask")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_store_size() {
        let state = state(vec![model("gpt-3.5-turbo", false)]).await;
        let (status, body) = call(state, Request::get("/health").body(Body::empty()).unwrap()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok", "chunks": 2, "dimension": 1}));
    }

    #[tokio::test]
    async fn test_models_are_listed() {
        let state = state(vec![model("gpt-3.5-turbo", false), model("gpt-4-turbo", false)]).await;
        let (_, body) = call(state, Request::get("/models").body(Body::empty()).unwrap()).await;

        assert_eq!(body["models"], json!(["gpt-3.5-turbo", "gpt-4-turbo"]));
        assert_eq!(body["default"], "gpt-3.5-turbo");
    }

    #[tokio::test]
    async fn test_ask_uses_default_then_cache() {
        let default = model("gpt-3.5-turbo", false);
        let state = state(vec![default.clone()]).await;

        let (status, body) = call(state.clone(), post_ask(json!({"question": "What is Kysely?"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["answer"], "answer from gpt-3.5-turbo");
        assert_eq!(body["model"], "gpt-3.5-turbo");
        assert_eq!(body["cached"], false);
        assert_eq!(body["sources"].as_array().unwrap().len(), 2);

        let (_, body) = call(state.clone(), post_ask(json!({"question": "What is Kysely?"}))).await;
        assert_eq!(body["cached"], true);
        assert_eq!(default.calls.load(Ordering::SeqCst), 1);

        let (_, stats) = call(state, Request::get("/stats").body(Body::empty()).unwrap()).await;
        assert_eq!(stats["metrics"]["total_requests"], 2);
        assert_eq!(stats["metrics"]["cache_hits"], 1);
        assert_eq!(stats["cache"]["answers_cached"], 1);
    }

    #[tokio::test]
    async fn test_ask_with_selected_model() {
        let gpt4 = model("gpt-4-turbo", false);
        let state = state(vec![model("gpt-3.5-turbo", false), gpt4.clone()]).await;

        let (_, body) = call(state, post_ask(json!({"question": "joins?", "model": "gpt-4-turbo"}))).await;
        assert_eq!(body["answer"], "answer from gpt-4-turbo");
        assert_eq!(gpt4.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let state = state(vec![model("gpt-3.5-turbo", false)]).await;

        let (status, body) = call(state.clone(), post_ask(json!({"question": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "question must not be empty");

        let (status, body) = call(state.clone(), post_ask(json!({"question": "q", "model": "gpt-2"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unsupported model: gpt-2");

        assert_eq!(state.metrics.snapshot().failed_requests, 2);
    }

    #[tokio::test]
    async fn test_malformed_body_is_a_json_bad_request() {
        let state = state(vec![model("gpt-3.5-turbo", false)]).await;

        let (status, body) = call(state.clone(), post_ask(json!({"model": "gpt-3.5-turbo"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("missing field `question`"));

        let request = Request::post("/ask")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = call(state.clone(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        assert_eq!(state.metrics.snapshot().failed_requests, 2);
    }

    #[tokio::test]
    async fn test_upstream_failure_is_bad_gateway() {
        let state = state(vec![model("gpt-3.5-turbo", true)]).await;

        let (status, body) = call(state.clone(), post_ask(json!({"question": "q"}))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains("500 Internal Server Error"));
        assert_eq!(state.cache.as_ref().unwrap().stats().answers_cached, 0);
    }
}
