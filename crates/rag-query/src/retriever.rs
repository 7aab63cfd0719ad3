//! Hybrid retriever: dense and lexical legs, fused into one ranking.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use rag_core::{content_hash, Candidate, Embedder, RankedResult, Result, SearchConfig, Store};

use crate::fusion::{fuse, merge_candidates, relevance};

/// Hybrid retriever over a document store.
///
/// Stateless between calls: output depends only on the query, the store
/// contents and `top_k`.
pub struct HybridRetriever<S: ?Sized, E: ?Sized> {
    /// Storage backend.
    store: Arc<S>,

    /// Embedding provider.
    embedder: Arc<E>,

    /// Each leg fetches `top_k * candidate_multiplier` rows.
    candidate_multiplier: usize,

    /// Weight of the lexical term in the fused score.
    keyword_weight: f32,
}

impl<S, E> HybridRetriever<S, E>
where
    S: Store + ?Sized,
    E: Embedder + ?Sized,
{
    /// Create a new retriever.
    pub fn new(store: Arc<S>, embedder: Arc<E>, config: &SearchConfig) -> Self {
        Self {
            store,
            embedder,
            candidate_multiplier: config.candidate_multiplier.max(1),
            keyword_weight: config.keyword_weight,
        }
    }

    /// Retrieve the `top_k` best passages, highest relevance first.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RankedResult>> {
        Ok(self
            .retrieve_candidates(query, top_k)
            .await?
            .into_iter()
            .map(|c| RankedResult::new(c.content, relevance(c.fused_score)))
            .collect())
    }

    /// Retrieve the `top_k` best candidates with their raw and fused scores,
    /// best first, with no two sharing the same content.
    pub async fn retrieve_candidates(&self, query: &str, top_k: usize) -> Result<Vec<Candidate>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let start = Instant::now();

        let embedding = self.embedder.embed(query).await?;

        let pool = u32::try_from(top_k.saturating_mul(self.candidate_multiplier))
            .unwrap_or(u32::MAX);

        // Both legs are independent; fusion needs both
        let (dense, lexical) = tokio::join!(
            self.store.query_dense(&embedding, pool),
            self.store.query_hybrid(&embedding, query, pool)
        );
        let dense = dense?;
        let lexical = lexical?;

        debug!(
            "Dense leg returned {} rows, lexical leg returned {} rows",
            dense.len(),
            lexical.len()
        );

        let mut candidates = merge_candidates(dense, lexical);
        fuse(&mut candidates, self.keyword_weight);

        let mut seen = HashSet::with_capacity(candidates.len());
        let results: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| seen.insert(content_hash(&c.content)))
            .take(top_k)
            .collect();

        info!(
            results = results.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Retrieval complete"
        );

        Ok(results)
    }
}
