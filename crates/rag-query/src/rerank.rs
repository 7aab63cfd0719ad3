//! Cross-encoder reranking.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use rag_core::{RagError, RankedResult, RelevanceScorer, Result};

/// Reorders passages by pairwise query relevance.
pub struct Reranker<S: ?Sized> {
    scorer: Arc<S>,

    /// Upper bound for one scoring batch.
    timeout: Duration,
}

impl<S> Reranker<S>
where
    S: RelevanceScorer + ?Sized,
{
    /// Create a new reranker.
    pub fn new(scorer: Arc<S>, timeout: Duration) -> Self {
        Self { scorer, timeout }
    }

    /// Score every passage against `query` in one batch and return the best
    /// `top_k`, highest score first.
    ///
    /// Equal scores keep their input order. Any scoring failure fails the
    /// whole call with `RerankFailure`.
    pub async fn rerank<P: AsRef<str>>(
        &self,
        query: &str,
        passages: &[P],
        top_k: usize,
    ) -> Result<Vec<RankedResult>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let texts: Vec<&str> = passages.iter().map(|p| p.as_ref()).collect();

        let scores = match tokio::time::timeout(self.timeout, self.scorer.score(query, &texts)).await
        {
            Ok(Ok(scores)) => scores,
            Ok(Err(e @ RagError::RerankFailure { .. })) => return Err(e),
            Ok(Err(e)) => return Err(RagError::rerank(e.to_string())),
            Err(_) => {
                return Err(RagError::rerank(format!(
                    "Scoring {} passages exceeded {:?}",
                    texts.len(),
                    self.timeout
                )))
            }
        };

        if scores.len() != texts.len() {
            return Err(RagError::rerank(format!(
                "Scorer returned {} scores for {} passages",
                scores.len(),
                texts.len()
            )));
        }

        let mut ranked: Vec<RankedResult> = texts
            .iter()
            .zip(scores)
            .map(|(text, score)| RankedResult::new(*text, score))
            .collect();

        // Stable: ties keep input order
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(top_k.min(ranked.len()));

        debug!("Reranked {} passages down to {}", texts.len(), ranked.len());
        info!(
            latency_ms = start.elapsed().as_millis() as u64,
            "Rerank complete"
        );

        Ok(ranked)
    }

    /// Rerank retrieval results, falling back to retrieval order
    /// (truncated to `top_k`) when scoring fails.
    pub async fn rerank_or_fallback(
        &self,
        query: &str,
        results: Vec<RankedResult>,
        top_k: usize,
    ) -> Vec<RankedResult> {
        let outcome = {
            let passages: Vec<&str> = results.iter().map(|r| r.content.as_str()).collect();
            self.rerank(query, &passages, top_k).await
        };

        match outcome {
            Ok(reranked) => reranked,
            Err(e) => {
                warn!("Rerank failed, keeping retrieval order: {}", e);
                let mut results = results;
                results.truncate(top_k);
                results
            }
        }
    }
}
