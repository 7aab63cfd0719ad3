//! Linear fusion of dense distance and lexical relevance.

use std::collections::HashMap;

use ulid::Ulid;

use rag_core::{Candidate, DenseMatch, HybridMatch};

/// Union the two store legs into one candidate list.
///
/// Dense rows come first in their order, then lexical-only rows in theirs.
/// Rows present in both legs keep their dense position and gain the
/// lexical score.
pub fn merge_candidates(dense: Vec<DenseMatch>, lexical: Vec<HybridMatch>) -> Vec<Candidate> {
    let mut positions: HashMap<Ulid, usize> = HashMap::with_capacity(dense.len() + lexical.len());
    let mut candidates = Vec::with_capacity(dense.len() + lexical.len());

    for row in dense {
        if positions.contains_key(&row.id) {
            continue;
        }
        positions.insert(row.id, candidates.len());
        candidates.push(Candidate {
            id: row.id,
            content: row.content,
            dense_score: row.distance,
            lexical_score: None,
            fused_score: 0.0,
        });
    }

    for row in lexical {
        match positions.get(&row.id) {
            Some(&idx) => candidates[idx].lexical_score = Some(row.lexical_score),
            None => {
                positions.insert(row.id, candidates.len());
                candidates.push(Candidate {
                    id: row.id,
                    content: row.content,
                    dense_score: row.distance,
                    lexical_score: Some(row.lexical_score),
                    fused_score: 0.0,
                });
            }
        }
    }

    candidates
}

/// Compute fused scores and sort ascending (best first).
///
/// Distances are min-max normalized over the pool (all 0 when every distance
/// is equal); lexical scores are divided by the pool maximum, with missing or
/// non-positive scores counting as 0. Ties keep their input order.
pub fn fuse(candidates: &mut [Candidate], keyword_weight: f32) {
    if candidates.is_empty() {
        return;
    }

    let (min_dist, max_dist) = candidates.iter().fold(
        (f32::INFINITY, f32::NEG_INFINITY),
        |(lo, hi), c| (lo.min(c.dense_score), hi.max(c.dense_score)),
    );
    let range = max_dist - min_dist;

    let max_lex = candidates
        .iter()
        .filter_map(|c| c.lexical_score)
        .fold(0.0f32, f32::max);

    for candidate in candidates.iter_mut() {
        let dist_norm = if range > 0.0 {
            (candidate.dense_score - min_dist) / range
        } else {
            0.0
        };
        let lex_norm = match candidate.lexical_score {
            Some(lex) if max_lex > 0.0 => (lex / max_lex).max(0.0),
            _ => 0.0,
        };
        candidate.fused_score = dist_norm - keyword_weight * lex_norm;
    }

    candidates.sort_by(|a, b| a.fused_score.total_cmp(&b.fused_score));
}

/// Relevance reported to callers for a fused score (higher is better).
pub fn relevance(fused_score: f32) -> f32 {
    1.0 - fused_score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u128) -> Ulid {
        Ulid::from(n)
    }

    fn dense(n: u128, distance: f32) -> DenseMatch {
        DenseMatch {
            id: id(n),
            content: format!("doc {}", n),
            distance,
        }
    }

    fn lexical(n: u128, distance: f32, lexical_score: f32) -> HybridMatch {
        HybridMatch {
            id: id(n),
            content: format!("doc {}", n),
            distance,
            lexical_score,
        }
    }

    #[test]
    fn test_merge_keeps_dense_order_then_lexical_only() {
        let merged = merge_candidates(
            vec![dense(1, 0.1), dense(2, 0.2)],
            vec![lexical(3, 0.9, 4.0), lexical(2, 0.2, 2.0)],
        );

        let ids: Vec<Ulid> = merged.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![id(1), id(2), id(3)]);
        assert_eq!(merged[0].lexical_score, None);
        assert_eq!(merged[1].lexical_score, Some(2.0));
        assert_eq!(merged[2].dense_score, 0.9);
    }

    #[test]
    fn test_lexical_match_lifts_candidate() {
        let mut candidates = merge_candidates(
            vec![dense(1, 0.2), dense(2, 0.3), dense(3, 0.6)],
            vec![lexical(2, 0.3, 3.0)],
        );
        fuse(&mut candidates, 1.0);

        let ids: Vec<Ulid> = candidates.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![id(2), id(1), id(3)]);
        assert!(candidates[0].fused_score < 0.0);
        assert_eq!(candidates[1].fused_score, 0.0);
        assert_eq!(candidates[2].fused_score, 1.0);
    }

    #[test]
    fn test_equal_fused_scores_keep_dense_order() {
        // Farthest candidate with the only lexical match ties with the nearest
        let mut candidates = merge_candidates(
            vec![dense(1, 0.2), dense(2, 0.4)],
            vec![lexical(2, 0.4, 3.0)],
        );
        fuse(&mut candidates, 1.0);

        assert_eq!(candidates[0].fused_score, candidates[1].fused_score);
        assert_eq!(candidates[0].id, id(1));
    }

    #[test]
    fn test_zero_weight_is_dense_only() {
        let mut candidates = merge_candidates(
            vec![dense(1, 0.1), dense(2, 0.5)],
            vec![lexical(2, 0.5, 10.0)],
        );
        fuse(&mut candidates, 0.0);

        assert_eq!(candidates[0].id, id(1));
        assert_eq!(candidates[0].fused_score, 0.0);
        assert_eq!(candidates[1].fused_score, 1.0);
    }

    #[test]
    fn test_fused_scores_bounded() {
        let mut candidates = merge_candidates(
            vec![dense(1, 0.0), dense(2, 1.3), dense(3, 2.0)],
            vec![lexical(3, 2.0, 7.5), lexical(4, 0.6, 1.5)],
        );
        fuse(&mut candidates, 0.5);

        for c in &candidates {
            assert!(c.fused_score >= -0.5 && c.fused_score <= 1.0);
            assert!(relevance(c.fused_score) >= 0.0);
        }
        let scores: Vec<f32> = candidates.iter().map(|c| c.fused_score).collect();
        assert!(scores.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_identical_distances_normalize_to_zero() {
        let mut candidates = merge_candidates(vec![dense(1, 0.3), dense(2, 0.3)], Vec::new());
        fuse(&mut candidates, 1.0);

        assert!(candidates.iter().all(|c| c.fused_score == 0.0));
        assert_eq!(candidates[0].id, id(1));
    }

    #[test]
    fn test_fuse_empty() {
        let mut candidates: Vec<Candidate> = Vec::new();
        fuse(&mut candidates, 1.0);
        assert!(candidates.is_empty());
    }
}
