//! rag-embed - Embedding providers and cross-encoder scoring
//!
//! This crate provides the text-to-vector capability used by ingestion and
//! retrieval, and the pairwise relevance scorer used by reranking.
//!
//! # Providers
//!
//! - [`HttpEmbedder`]: OpenAI-compatible `/embeddings` endpoint
//! - [`HashingEmbedder`]: deterministic feature hashing, no network
//! - [`CrossEncoderScorer`]: ONNX cross-encoder over (query, passage) pairs

mod cross_encoder;
mod hashing;
mod http;

pub use cross_encoder::CrossEncoderScorer;
pub use hashing::HashingEmbedder;
pub use http::HttpEmbedder;

// Re-export the capability traits for convenience
pub use rag_core::{Embedder, RelevanceScorer};

/// L2 normalize a vector in place; zero vectors are left untouched.
pub(crate) fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}
