//! rag-query - Hybrid retrieval and ranking
//!
//! This crate turns a query into an ordered list of passages: a dense
//! nearest-neighbour leg and a lexical leg run concurrently against the
//! store, their scores are fused into one ranking, and a cross-encoder can
//! optionally rerank the result.
//!
//! # Fusion
//!
//! Over the candidate pool, cosine distance is min-max normalized and the
//! lexical score is divided by the pool maximum (0 when a candidate did not
//! match lexically):
//!
//! ```text
//! fused     = distance_norm - keyword_weight * lexical_norm   (lower is better)
//! relevance = 1 - fused                                       (higher is better)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use rag_query::{HybridRetriever, Reranker};
//! use std::sync::Arc;
//!
//! let retriever = HybridRetriever::new(Arc::new(store), Arc::new(embedder), &config.search);
//! let results = retriever.retrieve("boiling point", 3).await?;
//! ```

mod fusion;
mod rerank;
mod retriever;

pub use fusion::{fuse, merge_candidates, relevance};
pub use rerank::Reranker;
pub use retriever::HybridRetriever;

// Re-export for convenience
pub use rag_core::{Candidate, RankedResult};
