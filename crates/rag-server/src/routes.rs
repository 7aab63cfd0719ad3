//! Route definitions.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{self, AppState};
use crate::middleware::request_id;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/ping", get(handlers::ping))
        .route("/api/ingest", post(handlers::ingest))
        .route("/api/search", get(handlers::search))
        .route("/api/qa", get(handlers::qa))
        .route("/api/chat", get(handlers::chat))
        .route("/api/chat/stream", get(handlers::chat_stream))
        .route("/api/stats", get(handlers::stats))
        .layer(middleware::from_fn(request_id))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use futures::stream;
    use serde_json::Value;
    use tower::ServiceExt;
    use ulid::Ulid;

    use rag_core::{
        CompletionClient, CompletionRequest, CompletionResponse, DenseMatch, Embedder,
        EmbeddingProviderKind, FragmentStream, HybridMatch, RagConfig, RagError, Result, Store,
        TokenUsage,
    };
    use rag_embed::HashingEmbedder;
    use rag_store::SqliteStore;

    use crate::middleware::REQUEST_ID_HEADER;
    use crate::service::RagService;

    /// Completion capability with a fixed behaviour per test.
    enum StubClient {
        Reply,
        RateLimited,
        Fragments(Vec<Result<String>>),
    }

    #[async_trait]
    impl CompletionClient for StubClient {
        async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
            match self {
                StubClient::RateLimited => Err(RagError::provider_rate_limited("429")),
                _ => Ok(CompletionResponse {
                    content: "Hi!".to_string(),
                    model: request.model.clone(),
                    usage: Some(TokenUsage {
                        prompt_tokens: Some(4),
                        completion_tokens: Some(2),
                        total_tokens: Some(6),
                    }),
                }),
            }
        }

        async fn complete_stream(&self, _: &CompletionRequest) -> Result<FragmentStream> {
            match self {
                StubClient::Fragments(items) => {
                    let items: Vec<Result<String>> = items
                        .iter()
                        .map(|item| match item {
                            Ok(text) => Ok(text.clone()),
                            Err(e) => Err(RagError::provider_connectivity(e.to_string())),
                        })
                        .collect();
                    Ok(Box::pin(stream::iter(items)))
                }
                StubClient::RateLimited => Err(RagError::provider_rate_limited("429")),
                StubClient::Reply => Ok(Box::pin(stream::empty())),
            }
        }
    }

    struct DownStore;

    #[async_trait]
    impl Store for DownStore {
        async fn insert(&self, _: &str, _: &[f32]) -> Result<Ulid> {
            Err(RagError::store_unavailable("disk gone"))
        }

        async fn query_dense(&self, _: &[f32], _: u32) -> Result<Vec<DenseMatch>> {
            Err(RagError::store_unavailable("disk gone"))
        }

        async fn query_hybrid(&self, _: &[f32], _: &str, _: u32) -> Result<Vec<HybridMatch>> {
            Err(RagError::store_unavailable("disk gone"))
        }

        async fn count(&self) -> Result<u64> {
            Err(RagError::store_unavailable("disk gone"))
        }
    }

    fn config() -> RagConfig {
        let mut config = RagConfig::default();
        config.embedding.provider = EmbeddingProviderKind::Hashing;
        config.llm.max_retries = 0;
        config
    }

    fn app_with(store: Arc<dyn Store>, client: StubClient) -> Router {
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(256).unwrap());
        let service =
            RagService::from_parts(&config(), store, embedder, None, Arc::new(client)).unwrap();
        create_router(AppState {
            service: Arc::new(service),
        })
    }

    fn app(client: StubClient) -> Router {
        app_with(Arc::new(SqliteStore::open_memory().unwrap()), client)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn test_ping_sets_request_id() {
        let response = app(StubClient::Reply)
            .oneshot(get_request("/ping"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let id = response.headers()[REQUEST_ID_HEADER].to_str().unwrap();
        assert!(id.parse::<Ulid>().is_ok());

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(json(&body)["pong"], true);
    }

    #[tokio::test]
    async fn test_short_query_rejected() {
        let (status, body) = send(app(StubClient::Reply), get_request("/api/search?query=a")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["error"]["kind"], "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn test_missing_query_rejected_as_json() {
        let (status, body) = send(app(StubClient::Reply), get_request("/api/qa")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["error"]["kind"], "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn test_ingest_then_stats_and_search() {
        let app = app(StubClient::Reply);

        let request = Request::builder()
            .method("POST")
            .uri("/api/ingest")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"text": "Water boils at 100C."}"#))
            .unwrap();
        let (status, body) = send(app.clone(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["status"], "ok");
        assert_eq!(json(&body)["chunks"], 1);

        let (_, body) = send(app.clone(), get_request("/api/stats")).await;
        assert_eq!(json(&body)["documents"], 1);

        let (status, body) = send(app, get_request("/api/search?query=water&top_k=2")).await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["results"][0]["content"], "Water boils at 100C.");
        assert_eq!(body["results"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_qa_response_shape() {
        let (status, body) =
            send(app(StubClient::Reply), get_request("/api/qa?query=hello")).await;

        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["query"], "hello");
        assert_eq!(body["answer"], "Hi!");
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["prompt_tokens"], 4);
        assert!(body["context_used"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chat_rate_limited_is_429() {
        let (status, body) =
            send(app(StubClient::RateLimited), get_request("/api/chat?prompt=hi")).await;

        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(json(&body)["error"]["kind"], "PROVIDER_RATE_LIMITED");
    }

    #[tokio::test]
    async fn test_chat_prompt_bounds() {
        let long = "a".repeat(2001);
        let (status, _) = send(
            app(StubClient::Reply),
            get_request(&format!("/api/chat?prompt={}", long)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(app(StubClient::Reply), get_request("/api/chat?prompt=")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(app(StubClient::Reply), get_request("/api/chat?prompt=hi")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["reply"], "Hi!");
        assert_eq!(json(&body)["completion_tokens"], 2);
    }

    #[tokio::test]
    async fn test_stream_body_is_exact_concatenation() {
        let client = StubClient::Fragments(vec![Ok("Hel".to_string()), Ok("lo".to_string())]);
        let response = app(client)
            .oneshot(get_request("/api/chat/stream?prompt=Say%20hi"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"Hello");
    }

    #[tokio::test]
    async fn test_stream_error_ends_body_without_payload() {
        let client = StubClient::Fragments(vec![
            Ok("partial".to_string()),
            Err(RagError::provider_connectivity("reset")),
            Ok("never".to_string()),
        ]);
        let (status, body) = send(app(client), get_request("/api/chat/stream?prompt=hi")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"partial");
    }

    #[tokio::test]
    async fn test_stream_failure_before_first_fragment() {
        let (status, body) =
            send(app(StubClient::RateLimited), get_request("/api/chat/stream?prompt=hi")).await;

        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(json(&body)["error"]["kind"], "PROVIDER_RATE_LIMITED");
    }

    #[tokio::test]
    async fn test_store_failure_is_503() {
        let (status, body) = send(
            app_with(Arc::new(DownStore), StubClient::Reply),
            get_request("/api/stats"),
        )
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json(&body)["error"]["kind"], "STORE_UNAVAILABLE");
    }
}
