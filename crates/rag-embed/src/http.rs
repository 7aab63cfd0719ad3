//! HTTP embedding provider for OpenAI-compatible APIs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use rag_core::{Embedder, EmbeddingConfig, RagError, Result};

use crate::l2_normalize;

/// Embedder backed by an OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbedder {
    client: Client,
    url: String,
    model: String,
    dimension: usize,
    timeout: Duration,
    batch_size: usize,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
    encoding_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl HttpEmbedder {
    /// Create an embedder from the embedding section of the configuration.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        info!(
            "Initializing HTTP embedder: endpoint={}, model={}",
            config.endpoint, config.model
        );

        let mut headers = HeaderMap::new();
        match &config.api_key {
            Some(key) => {
                let value = HeaderValue::from_str(&format!("Bearer {}", key))
                    .map_err(|e| RagError::config(format!("Invalid API key format: {}", e)))?;
                headers.insert(AUTHORIZATION, value);
            }
            None => warn!("No API key configured for {}", config.endpoint),
        }

        if config.batch_size == 0 {
            return Err(RagError::config("embedding batch_size must be at least 1"));
        }

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| RagError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}/embeddings", config.endpoint.trim_end_matches('/')),
            model: config.model.clone(),
            dimension: config.dimension,
            timeout: Duration::from_secs(config.timeout_secs),
            batch_size: config.batch_size,
        })
    }

    async fn request_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            // Only text-embedding-3-* models accept a requested dimension
            dimensions: self
                .model
                .contains("text-embedding-3")
                .then_some(self.dimension),
            encoding_format: "float",
        };

        debug!("Sending embedding request for {} texts", texts.len());

        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RagError::embedding(format!("Failed to parse response: {}", e)))?;

        if let Some(usage) = &parsed.usage {
            debug!(total_tokens = usage.total_tokens, "Embedding request complete");
        }

        if parsed.data.len() != texts.len() {
            return Err(RagError::embedding(format!(
                "Expected {} embeddings, provider returned {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);

        Ok(data.into_iter().map(|d| l2_normalize(d.embedding)).collect())
    }
}

/// Map a transport failure to the provider taxonomy.
fn classify_transport(e: reqwest::Error) -> RagError {
    if e.is_timeout() {
        RagError::provider_timeout(format!("Embedding request timed out: {}", e))
    } else {
        RagError::provider_connectivity(format!("Embedding request failed: {}", e))
    }
}

/// Map a non-success HTTP status to the provider taxonomy.
fn classify_status(status: StatusCode, body: &str) -> RagError {
    let detail = serde_json::from_str::<ErrorResponse>(body)
        .map(|r| r.error.message)
        .unwrap_or_else(|_| body.to_string());
    let message = format!("Embedding API error ({}): {}", status, detail);

    match status {
        StatusCode::TOO_MANY_REQUESTS => RagError::provider_rate_limited(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            RagError::provider_timeout(message)
        }
        s if s.is_client_error() => RagError::provider_invalid_request(message),
        _ => RagError::provider_connectivity(message),
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.request_embeddings(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::embedding("No embedding returned"))
    }

    /// Requests are split into `batch_size` slices, sent in order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            embeddings.extend(self.request_embeddings(batch).await?);
        }
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
