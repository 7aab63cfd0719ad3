//! HTTP request handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{future, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use rag_core::RankedResult;

use crate::error::ApiError;
use crate::service::RagService;

/// Minimum query length for retrieval endpoints, in characters.
const MIN_QUERY_CHARS: usize = 2;

/// Maximum chat prompt length, in characters.
const MAX_PROMPT_CHARS: usize = 2000;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RagService>,
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub query: String,
    pub top_k: Option<usize>,
    pub rerank: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct QaParams {
    pub query: String,
    pub top_k: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ChatParams {
    pub prompt: String,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<RankedResult>,
}

#[derive(Debug, Serialize)]
pub struct QaResponse {
    pub query: String,
    pub answer: String,
    pub context_used: Vec<RankedResult>,
    pub model: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub latency_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub model: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub latency_ms: u64,
}

fn check_query(query: &str) -> Result<(), ApiError> {
    if query.chars().count() < MIN_QUERY_CHARS {
        return Err(ApiError::bad_request(format!(
            "query must be at least {} characters",
            MIN_QUERY_CHARS
        )));
    }
    Ok(())
}

fn check_prompt(prompt: &str, max: Option<usize>) -> Result<(), ApiError> {
    let len = prompt.chars().count();
    if len == 0 {
        return Err(ApiError::bad_request("prompt must not be empty"));
    }
    if let Some(max) = max {
        if len > max {
            return Err(ApiError::bad_request(format!(
                "prompt must be at most {} characters, got {}",
                max, len
            )));
        }
    }
    Ok(())
}

pub async fn root() -> Json<Value> {
    Json(json!({ "message": "rag-qa is up" }))
}

pub async fn ping() -> Json<Value> {
    Json(json!({ "pong": true }))
}

/// Ingest one document.
pub async fn ingest(
    State(state): State<AppState>,
    body: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let report = state.service.ingest(&request.text).await?;

    Ok(Json(json!({
        "status": "ok",
        "message": "Document ingested",
        "chunks": report.chunks,
    })))
}

/// Ranked passages for a query.
pub async fn search(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::bad_request(e.body_text()))?;
    check_query(&params.query)?;

    debug!("Search request: query={}, top_k={:?}", params.query, params.top_k);

    let rerank = params
        .rerank
        .unwrap_or_else(|| state.service.rerank_by_default());
    let results = state
        .service
        .search(&params.query, params.top_k, rerank)
        .await?;

    Ok(Json(SearchResponse {
        query: params.query,
        results,
    }))
}

/// Grounded question answering.
pub async fn qa(
    State(state): State<AppState>,
    params: Result<Query<QaParams>, QueryRejection>,
) -> Result<Json<QaResponse>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::bad_request(e.body_text()))?;
    check_query(&params.query)?;

    let outcome = state.service.answer(&params.query, params.top_k).await?;
    let usage = outcome.answer.token_usage.unwrap_or_default();

    Ok(Json(QaResponse {
        query: params.query,
        answer: outcome.answer.reply,
        context_used: outcome.context,
        model: outcome.answer.model_id,
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        latency_ms: outcome.answer.latency_ms,
    }))
}

/// Single-turn chat without retrieval.
pub async fn chat(
    State(state): State<AppState>,
    params: Result<Query<ChatParams>, QueryRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::bad_request(e.body_text()))?;
    check_prompt(&params.prompt, Some(MAX_PROMPT_CHARS))?;

    let answer = state.service.chat(&params.prompt).await?;
    let usage = answer.token_usage.unwrap_or_default();

    Ok(Json(ChatResponse {
        reply: answer.reply,
        model: answer.model_id,
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        latency_ms: answer.latency_ms,
    }))
}

/// Streamed single-turn chat as `text/plain`.
///
/// Failures before the first fragment produce a normal error response.
/// Later failures end the body early; nothing is appended to it.
pub async fn chat_stream(
    State(state): State<AppState>,
    params: Result<Query<ChatParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::bad_request(e.body_text()))?;
    check_prompt(&params.prompt, None)?;

    let fragments = state.service.chat_stream(&params.prompt).await?;

    let body = fragments.scan((), |_, item| {
        future::ready(match item {
            Ok(text) => Some(Ok::<_, Infallible>(text)),
            Err(e) => {
                warn!("Stream ended early: {}", e);
                None
            }
        })
    });

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(body),
    )
        .into_response())
}

/// Store statistics.
pub async fn stats(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let documents = state.service.document_count().await?;
    Ok(Json(json!({ "documents": documents })))
}
