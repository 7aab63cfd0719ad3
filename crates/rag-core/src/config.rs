//! Configuration types for the pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{RagError, Result};
use crate::traits::ChunkConfig;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Embedding provider configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Chunking configuration.
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Retrieval configuration.
    #[serde(default)]
    pub search: SearchConfig,

    /// Reranker configuration.
    #[serde(default)]
    pub rerank: RerankConfig,

    /// Completion provider configuration.
    #[serde(default)]
    pub llm: LlmConfig,

    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u32,

    /// Timeout for a single store query in milliseconds.
    #[serde(default = "default_query_timeout")]
    pub query_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            busy_timeout_ms: default_busy_timeout(),
            query_timeout_ms: default_query_timeout(),
        }
    }
}

/// Which embedding provider to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// OpenAI-compatible HTTP API.
    Http,
    /// Local feature-hashing embedder, no network.
    Hashing,
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: EmbeddingProviderKind,

    /// Base URL of the OpenAI-compatible API.
    #[serde(default = "default_api_base")]
    pub endpoint: String,

    /// Embedding model name.
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// API key; falls back to `OPENAI_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Embedding dimension.
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds.
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum number of texts sent in one embeddings request.
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            endpoint: default_api_base(),
            model: default_embedding_model(),
            api_key: None,
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            batch_size: default_embedding_batch_size(),
        }
    }
}

/// Chunking strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Fixed character windows with exact overlap.
    Window,
    /// Separator-aware splitting with carried-over overlap.
    Recursive,
}

/// Chunking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared by consecutive chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default = "default_chunk_strategy")]
    pub strategy: ChunkStrategy,
}

impl ChunkingConfig {
    pub fn chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            strategy: default_chunk_strategy(),
        }
    }
}

/// Retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default number of results.
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Maximum number of results.
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    /// Each store leg fetches `top_k * candidate_multiplier` rows.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    /// Weight of the normalized lexical score in the fused score.
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            candidate_multiplier: default_candidate_multiplier(),
            keyword_weight: default_keyword_weight(),
        }
    }
}

/// Cross-encoder reranker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    /// Rerank retrieval results before answering.
    #[serde(default)]
    pub enabled: bool,

    /// Path to the ONNX cross-encoder model.
    #[serde(default = "default_rerank_model_path")]
    pub model_path: PathBuf,

    /// Path to the model's tokenizer.json.
    #[serde(default = "default_rerank_tokenizer_path")]
    pub tokenizer_path: PathBuf,

    /// Number of passages kept after reranking.
    #[serde(default = "default_rerank_top_k")]
    pub top_k: usize,

    /// Maximum tokens per (query, passage) pair.
    #[serde(default = "default_rerank_max_length")]
    pub max_length: usize,

    /// Timeout for one scoring batch in seconds.
    #[serde(default = "default_rerank_timeout")]
    pub timeout_secs: u64,

    /// Number of threads for CPU inference.
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model_path: default_rerank_model_path(),
            tokenizer_path: default_rerank_tokenizer_path(),
            top_k: default_rerank_top_k(),
            max_length: default_rerank_max_length(),
            timeout_secs: default_rerank_timeout(),
            num_threads: default_num_threads(),
        }
    }
}

/// Completion provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the OpenAI-compatible API.
    #[serde(default = "default_api_base")]
    pub endpoint: String,

    /// Completion model name.
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// API key; falls back to `OPENAI_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Timeout for a non-streaming completion in seconds.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Timeout for a whole streamed completion in seconds.
    #[serde(default = "default_stream_timeout")]
    pub stream_timeout_secs: u64,

    /// Additional attempts after the first failed one.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay in milliseconds, doubled per attempt.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Upper bound on the context characters sent to the model.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,

    /// Grounding instruction sent as the system turn.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_api_base(),
            model: default_llm_model(),
            api_key: None,
            timeout_secs: default_llm_timeout(),
            stream_timeout_secs: default_stream_timeout(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base(),
            max_context_chars: default_max_context_chars(),
            system_prompt: default_system_prompt(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Allow cross-origin requests from anywhere.
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
        }
    }
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_busy_timeout() -> u32 {
    30000
}

fn default_query_timeout() -> u64 {
    10000
}

fn default_embedding_provider() -> EmbeddingProviderKind {
    EmbeddingProviderKind::Http
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimension() -> usize {
    1536
}

fn default_embedding_timeout() -> u64 {
    20
}

fn default_embedding_batch_size() -> usize {
    256
}

fn default_chunk_size() -> usize {
    500
}

fn default_chunk_overlap() -> usize {
    50
}

fn default_chunk_strategy() -> ChunkStrategy {
    ChunkStrategy::Window
}

fn default_top_k() -> usize {
    3
}

fn default_max_top_k() -> usize {
    50
}

fn default_candidate_multiplier() -> usize {
    3
}

fn default_keyword_weight() -> f32 {
    1.0
}

fn default_rerank_top_k() -> usize {
    5
}

fn default_rerank_max_length() -> usize {
    512
}

fn default_rerank_timeout() -> u64 {
    30
}

fn default_num_threads() -> usize {
    4
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout() -> u64 {
    20
}

fn default_stream_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_base() -> u64 {
    800
}

fn default_max_context_chars() -> usize {
    8000
}

fn default_system_prompt() -> String {
    "Answer using only the supplied context.".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rag-qa")
}

fn default_database_path() -> PathBuf {
    data_dir().join("rag.db")
}

fn default_rerank_model_path() -> PathBuf {
    data_dir().join("models").join("bge-reranker").join("model.onnx")
}

fn default_rerank_tokenizer_path() -> PathBuf {
    data_dir()
        .join("models")
        .join("bge-reranker")
        .join("tokenizer.json")
}

impl RagConfig {
    /// Load configuration from file.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| RagError::config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from default paths.
    pub fn load_default() -> Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("rag-qa").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("rag-qa.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        // Return defaults
        Ok(Self::default())
    }

    /// Apply environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_env_from<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = var("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
            if self.embedding.api_key.is_none() {
                self.embedding.api_key = Some(key.clone());
            }
            if self.llm.api_key.is_none() {
                self.llm.api_key = Some(key);
            }
        }
        if let Some(path) = var("RAG_DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(addr) = var("RAG_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        self.chunking
            .chunk_config()
            .validate()
            .map_err(|e| RagError::config(e.to_string()))?;

        let weight = self.search.keyword_weight;
        if !weight.is_finite() || weight < 0.0 {
            return Err(RagError::config(format!(
                "keyword_weight must be finite and non-negative, got {}",
                weight
            )));
        }
        if self.embedding.batch_size == 0 {
            return Err(RagError::config("embedding batch_size must be at least 1"));
        }
        if self.search.candidate_multiplier == 0 {
            return Err(RagError::config("candidate_multiplier must be at least 1"));
        }
        if self.search.default_top_k > self.search.max_top_k {
            return Err(RagError::config(format!(
                "default_top_k ({}) exceeds max_top_k ({})",
                self.search.default_top_k, self.search.max_top_k
            )));
        }
        Ok(())
    }
}
