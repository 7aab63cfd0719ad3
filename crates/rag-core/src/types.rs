//! Core domain types for the pipeline.

use std::pin::Pin;
use std::time::Duration;

use futures::Stream;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::Result;

/// A stored passage with its embedding.
///
/// Created once at ingestion time and never mutated afterwards. The lexical
/// index over `content` is derived and maintained by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier (ULID).
    pub id: Ulid,

    /// Passage text.
    pub content: String,

    /// Blake3 hash of `content`.
    #[serde(with = "serde_hash")]
    pub content_hash: [u8; 32],

    /// Dense embedding of `content`.
    pub embedding: Vec<f32>,

    /// Creation timestamp (Unix millis).
    pub created_at: u64,
}

impl Document {
    /// Create a new document.
    pub fn new(content: &str, embedding: Vec<f32>) -> Self {
        let created_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        Self {
            id: Ulid::new(),
            content: content.to_string(),
            content_hash: content_hash(content),
            embedding,
            created_at,
        }
    }
}

/// Blake3 hash of a passage, used for deduplication.
pub fn content_hash(content: &str) -> [u8; 32] {
    *blake3::hash(content.as_bytes()).as_bytes()
}

/// A chunk produced by a chunker, before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkData {
    /// Chunk text.
    pub content: String,

    /// Offset of the first character in the source (in chars).
    pub start_char: usize,

    /// Offset one past the last character in the source (in chars).
    pub end_char: usize,
}

impl ChunkData {
    /// Length in characters.
    pub fn char_len(&self) -> usize {
        self.end_char - self.start_char
    }
}

/// A row returned by the dense leg of a store query.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatch {
    pub id: Ulid,
    pub content: String,
    /// Cosine distance to the query embedding (lower is better).
    pub distance: f32,
}

/// A row returned by the lexical leg of a store query.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridMatch {
    pub id: Ulid,
    pub content: String,
    /// Cosine distance to the query embedding (lower is better).
    pub distance: f32,
    /// Lexical relevance (higher is better, always positive for a match).
    pub lexical_score: f32,
}

/// A retrieval candidate, transient per query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub id: Ulid,
    pub content: String,
    /// Raw cosine distance (lower is better).
    pub dense_score: f32,
    /// Raw lexical score; `None` when the document did not match lexically.
    pub lexical_score: Option<f32>,
    /// Fused score (lower is better).
    pub fused_score: f32,
}

/// The unit returned by retrieval and reranking.
///
/// Sequences of these are always ordered by `score` descending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub content: String,
    /// Relevance score (higher is better).
    pub score: f32,
}

impl RankedResult {
    pub fn new(content: impl Into<String>, score: f32) -> Self {
        Self {
            content: content.into(),
            score,
        }
    }
}

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single prompt message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A request to the completion capability.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model identifier.
    pub model: String,

    /// Prompt messages in order.
    pub messages: Vec<ChatMessage>,

    /// Timeout for the whole call.
    pub timeout: Duration,

    /// Whether the response is delivered incrementally.
    pub stream: bool,
}

/// Token accounting reported by the provider, when it reports any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

/// A complete, non-streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    /// Generated text.
    pub content: String,

    /// Model that actually served the call.
    pub model: String,

    /// Token usage, absent when the provider omits it.
    pub usage: Option<TokenUsage>,
}

/// A synthesized answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub reply: String,
    pub model_id: String,
    pub token_usage: Option<TokenUsage>,
    pub latency_ms: u64,
}

/// Lazy, finite, non-restartable sequence of generated text fragments.
///
/// The stream ends when the upstream signals completion. Dropping it
/// abandons the upstream call.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Outcome of ingesting one source text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Number of chunks written.
    pub chunks: usize,

    /// Identifiers of the written documents, in chunk order.
    pub document_ids: Vec<Ulid>,
}

/// Hex (de)serialization for content hashes.
mod serde_hash {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        hex::encode(value).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let hex = String::deserialize(deserializer)?;
        let bytes = hex::decode(&hex).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("invalid hash length"))
    }
}
