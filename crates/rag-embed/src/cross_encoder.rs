//! ONNX cross-encoder relevance scorer.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ndarray::ArrayViewD;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use rag_core::{RagError, RelevanceScorer, RerankConfig, Result};

/// Cross-encoder scorer using bge-reranker or a compatible ONNX model.
///
/// Inference is synchronous, so each batch runs on the blocking pool.
pub struct CrossEncoderScorer {
    inner: Arc<Inner>,
}

struct Inner {
    /// ONNX inference session (wrapped in Mutex for interior mutability).
    session: Mutex<Session>,

    /// Tokenizer for the model.
    tokenizer: Tokenizer,

    /// Maximum tokens per (query, passage) pair.
    max_length: usize,
}

impl CrossEncoderScorer {
    /// Load the model and tokenizer named in the reranker configuration.
    pub fn new(config: &RerankConfig) -> Result<Self> {
        Self::load(
            &config.model_path,
            &config.tokenizer_path,
            config.max_length,
            config.num_threads,
        )
    }

    /// Load a cross-encoder from model and tokenizer paths.
    pub fn load(
        model_path: impl AsRef<Path>,
        tokenizer_path: impl AsRef<Path>,
        max_length: usize,
        num_threads: usize,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let tokenizer_path = tokenizer_path.as_ref();

        if !model_path.exists() {
            return Err(RagError::config(format!(
                "Reranker model not found at {:?}",
                model_path
            )));
        }
        if max_length == 0 {
            return Err(RagError::config("reranker max_length must be positive"));
        }

        info!("Loading cross-encoder from {:?}", model_path);

        let session = Session::builder()
            .map_err(|e| RagError::config(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| RagError::config(format!("Failed to set optimization level: {}", e)))?
            .with_intra_threads(num_threads)
            .map_err(|e| RagError::config(format!("Failed to set thread count: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| RagError::config(format!("Failed to load model: {}", e)))?;

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| RagError::config(format!("Failed to load tokenizer: {}", e)))?;

        info!("Cross-encoder initialized: max_length={}", max_length);

        Ok(Self {
            inner: Arc::new(Inner {
                session: Mutex::new(session),
                tokenizer,
                max_length,
            }),
        })
    }
}

impl Inner {
    fn score_pairs(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        let pairs: Vec<(&str, &str)> = passages.iter().map(|p| (query, p.as_str())).collect();

        let encodings = self
            .tokenizer
            .encode_batch(pairs, true)
            .map_err(|e| RagError::rerank(format!("Tokenization failed: {}", e)))?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(self.max_length);
        let batch_size = encodings.len();

        debug!("Scoring batch: size={}, max_len={}", batch_size, max_len);

        let mut input_ids = vec![0i64; batch_size * max_len];
        let mut attention_mask = vec![0i64; batch_size * max_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let len = ids.len().min(max_len);

            for j in 0..len {
                input_ids[i * max_len + j] = ids[j] as i64;
                attention_mask[i * max_len + j] = mask[j] as i64;
            }
        }

        let input_ids_tensor = Tensor::from_array((vec![batch_size, max_len], input_ids))
            .map_err(|e| RagError::rerank(format!("Failed to create input tensor: {}", e)))?;
        let attention_mask_tensor =
            Tensor::from_array((vec![batch_size, max_len], attention_mask))
                .map_err(|e| RagError::rerank(format!("Failed to create mask tensor: {}", e)))?;

        // Copy logits out while the session is held
        let (shape, logits): (Vec<usize>, Vec<f32>) = {
            let mut session = self
                .session
                .lock()
                .map_err(|e| RagError::rerank(format!("Failed to lock session: {}", e)))?;

            let outputs = session
                .run(ort::inputs![
                    "input_ids" => input_ids_tensor,
                    "attention_mask" => attention_mask_tensor
                ])
                .map_err(|e| RagError::rerank(format!("Inference failed: {}", e)))?;

            let (_, output) = outputs
                .iter()
                .next()
                .ok_or_else(|| RagError::rerank("No output tensor found"))?;

            let view = output
                .try_extract_array::<f32>()
                .map_err(|e| RagError::rerank(format!("Failed to extract tensor: {}", e)))?;

            (view.shape().to_vec(), view.iter().copied().collect())
        };

        let view = ArrayViewD::from_shape(shape.as_slice(), logits.as_slice())
            .map_err(|e| RagError::rerank(format!("Malformed logits: {}", e)))?;

        pair_scores(&view, batch_size)
    }
}

/// One relevance score per pair from a logits tensor.
///
/// Two-logit heads yield the positive-class logit; single-logit heads yield
/// the logit itself.
fn pair_scores(logits: &ArrayViewD<'_, f32>, batch_size: usize) -> Result<Vec<f32>> {
    let shape = logits.shape();
    if shape.is_empty() || shape[0] != batch_size {
        return Err(RagError::rerank(format!(
            "Expected {} scores, model returned shape {:?}",
            batch_size, shape
        )));
    }

    let scores = match shape {
        [_] => (0..batch_size).map(|i| logits[[i]]).collect(),
        [_, 1] => (0..batch_size).map(|i| logits[[i, 0]]).collect(),
        [_, n] if *n > 1 => (0..batch_size).map(|i| logits[[i, 1]]).collect(),
        _ => {
            return Err(RagError::rerank(format!(
                "Unexpected logits shape: {:?}",
                shape
            )))
        }
    };

    Ok(scores)
}

#[async_trait]
impl RelevanceScorer for CrossEncoderScorer {
    async fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let inner = Arc::clone(&self.inner);
        let query = query.to_string();
        let passages: Vec<String> = passages.iter().map(|p| p.to_string()).collect();

        tokio::task::spawn_blocking(move || inner.score_pairs(&query, &passages))
            .await
            .map_err(|e| RagError::rerank(format!("Scoring task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn test_two_logit_head_takes_positive_class() {
        let logits = ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![0.9, -1.0, -0.5, 2.5]).unwrap();
        let scores = pair_scores(&logits.view(), 2).unwrap();
        assert_eq!(scores, vec![-1.0, 2.5]);
    }

    #[test]
    fn test_single_logit_head() {
        let logits = ArrayD::from_shape_vec(IxDyn(&[3, 1]), vec![0.1, 0.7, -0.2]).unwrap();
        assert_eq!(pair_scores(&logits.view(), 3).unwrap(), vec![0.1, 0.7, -0.2]);

        let flat = ArrayD::from_shape_vec(IxDyn(&[2]), vec![1.5, 0.5]).unwrap();
        assert_eq!(pair_scores(&flat.view(), 2).unwrap(), vec![1.5, 0.5]);
    }

    #[test]
    fn test_batch_mismatch_is_rerank_failure() {
        let logits = ArrayD::from_shape_vec(IxDyn(&[1, 1]), vec![0.1]).unwrap();
        let err = pair_scores(&logits.view(), 2).unwrap_err();
        assert_eq!(err.error_code(), "RERANK_FAILURE");
    }

    #[test]
    fn test_missing_model_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = CrossEncoderScorer::load(
            dir.path().join("model.onnx"),
            dir.path().join("tokenizer.json"),
            512,
            1,
        );
        assert!(matches!(result, Err(RagError::Config { .. })));
    }
}
