//! Core traits defining the interfaces between components.
//!
//! Every external capability (storage, embedding, cross-encoder scoring,
//! completion) is a trait object handed to components at construction time.

use async_trait::async_trait;
use ulid::Ulid;

use crate::error::{RagError, Result};
use crate::types::{ChunkData, CompletionRequest, CompletionResponse, DenseMatch, FragmentStream, HybridMatch};

/// Document store capability.
///
/// Append-only: documents are inserted and never updated. Must support
/// concurrent reads interleaved with inserts.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a passage with its embedding, returning its identifier.
    async fn insert(&self, content: &str, embedding: &[f32]) -> Result<Ulid>;

    /// Nearest neighbours by cosine distance, ascending, ties by insertion order.
    async fn query_dense(&self, embedding: &[f32], k: u32) -> Result<Vec<DenseMatch>>;

    /// Lexical matches for `query_text`, ordered by lexical score descending,
    /// each carrying its cosine distance to `embedding`.
    async fn query_hybrid(
        &self,
        embedding: &[f32],
        query_text: &str,
        k: u32,
    ) -> Result<Vec<HybridMatch>>;

    /// Number of stored documents.
    async fn count(&self) -> Result<u64>;
}

/// Embedding provider capability.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts, preserving order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;
}

/// Cross-encoder style pairwise relevance scorer.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    /// Score every (query, passage) pair in one batch, higher is more relevant.
    ///
    /// Returns exactly one score per passage, in input order.
    async fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>>;
}

/// Language-model completion capability.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Run a completion to the end and return the whole response.
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse>;

    /// Start a completion and return its fragments as they arrive.
    ///
    /// Errors before the first fragment are returned directly; errors after
    /// that appear as an `Err` item and end the stream.
    async fn complete_stream(&self, request: &CompletionRequest) -> Result<FragmentStream>;
}

/// Chunking configuration, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Maximum characters per chunk.
    pub chunk_size: usize,

    /// Characters shared by consecutive chunks.
    pub chunk_overlap: usize,
}

impl ChunkConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        let config = Self {
            chunk_size,
            chunk_overlap,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check `0 < chunk_size` and `chunk_overlap < chunk_size`.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::chunking("chunk_size must be positive"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::chunking(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

/// Chunking strategy trait.
pub trait Chunker: Send + Sync {
    /// Split text into chunks according to `config`.
    fn chunk(&self, content: &str, config: &ChunkConfig) -> Result<Vec<ChunkData>>;
}
