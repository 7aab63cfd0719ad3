//! Ingestion: chunk, embed, store.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use rag_core::{ChunkConfig, Chunker, Embedder, IngestReport, RagError, Result, Store};

/// Splits source text into chunks and writes each chunk with its embedding.
pub struct IngestionPipeline<S: ?Sized, E: ?Sized> {
    store: Arc<S>,
    embedder: Arc<E>,
    chunker: Arc<dyn Chunker>,
    config: ChunkConfig,
}

impl<S, E> IngestionPipeline<S, E>
where
    S: Store + ?Sized,
    E: Embedder + ?Sized,
{
    /// Create a new pipeline.
    pub fn new(
        store: Arc<S>,
        embedder: Arc<E>,
        chunker: Arc<dyn Chunker>,
        config: ChunkConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            embedder,
            chunker,
            config,
        })
    }

    /// Ingest one source text.
    ///
    /// All chunks are embedded in a single batch before anything is written,
    /// so an embedding failure leaves the store untouched.
    pub async fn ingest(&self, text: &str) -> Result<IngestReport> {
        let start = Instant::now();

        let chunks: Vec<_> = self
            .chunker
            .chunk(text, &self.config)?
            .into_iter()
            .filter(|c| !c.content.trim().is_empty())
            .collect();

        if chunks.is_empty() {
            debug!("Nothing to ingest");
            return Ok(IngestReport::default());
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        if embeddings.len() != chunks.len() {
            return Err(RagError::embedding(format!(
                "Expected {} embeddings, got {}",
                chunks.len(),
                embeddings.len()
            )));
        }

        let mut document_ids = Vec::with_capacity(chunks.len());
        for (chunk, embedding) in chunks.iter().zip(embeddings.iter()) {
            let id = self.store.insert(&chunk.content, embedding).await?;
            document_ids.push(id);
        }

        info!(
            chunks = document_ids.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Ingestion complete"
        );

        Ok(IngestReport {
            chunks: document_ids.len(),
            document_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rag_core::{DenseMatch, HybridMatch};
    use ulid::Ulid;

    use crate::WindowChunker;

    #[derive(Default)]
    struct RecordingStore {
        inserted: Mutex<Vec<(String, Vec<f32>)>>,
    }

    #[async_trait]
    impl Store for RecordingStore {
        async fn insert(&self, content: &str, embedding: &[f32]) -> Result<Ulid> {
            self.inserted
                .lock()
                .unwrap()
                .push((content.to_string(), embedding.to_vec()));
            Ok(Ulid::new())
        }

        async fn query_dense(&self, _: &[f32], _: u32) -> Result<Vec<DenseMatch>> {
            Ok(Vec::new())
        }

        async fn query_hybrid(&self, _: &[f32], _: &str, _: u32) -> Result<Vec<HybridMatch>> {
            Ok(Vec::new())
        }

        async fn count(&self) -> Result<u64> {
            Ok(self.inserted.lock().unwrap().len() as u64)
        }
    }

    /// Embeds a text as its character count.
    struct LengthEmbedder {
        fail: bool,
    }

    #[async_trait]
    impl Embedder for LengthEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![text.chars().count() as f32])
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            if self.fail {
                return Err(RagError::provider_timeout("embedding"));
            }
            Ok(texts.iter().map(|t| vec![t.chars().count() as f32]).collect())
        }

        fn dimension(&self) -> usize {
            1
        }
    }

    fn pipeline(
        store: Arc<RecordingStore>,
        fail: bool,
    ) -> IngestionPipeline<RecordingStore, LengthEmbedder> {
        IngestionPipeline::new(
            store,
            Arc::new(LengthEmbedder { fail }),
            Arc::new(WindowChunker),
            ChunkConfig::new(20, 5).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_ingest_writes_every_chunk() {
        let store = Arc::new(RecordingStore::default());
        let report = pipeline(store.clone(), false)
            .ingest("The sky is blue. Water boils at 100C.")
            .await
            .unwrap();

        assert_eq!(report.chunks, 3);
        assert_eq!(report.document_ids.len(), 3);

        let inserted = store.inserted.lock().unwrap();
        assert_eq!(inserted[0].0, "The sky is blue. Wat");
        assert_eq!(inserted[0].1, vec![20.0]);
        assert_eq!(inserted[2].0, "t 100C.");
    }

    #[tokio::test]
    async fn test_empty_and_blank_text() {
        let store = Arc::new(RecordingStore::default());
        let pipeline = pipeline(store.clone(), false);

        assert_eq!(pipeline.ingest("").await.unwrap(), IngestReport::default());
        assert_eq!(pipeline.ingest("   \n\t ").await.unwrap().chunks, 0);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_embedding_failure_writes_nothing() {
        let store = Arc::new(RecordingStore::default());
        let err = pipeline(store.clone(), true)
            .ingest("Some text worth keeping.")
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = IngestionPipeline::new(
            Arc::new(RecordingStore::default()),
            Arc::new(LengthEmbedder { fail: false }),
            Arc::new(WindowChunker),
            ChunkConfig {
                chunk_size: 5,
                chunk_overlap: 5,
            },
        );
        assert!(result.is_err());
    }
}
