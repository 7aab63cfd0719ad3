//! Service facade wiring every pipeline component from configuration.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use rag_chunk::{chunker_for, IngestionPipeline};
use rag_core::{
    Answer, CompletionClient, Embedder, EmbeddingConfig, EmbeddingProviderKind, FragmentStream,
    IngestReport, RagConfig, RankedResult, RelevanceScorer, Result, SearchConfig, Store,
};
use rag_embed::{CrossEncoderScorer, HashingEmbedder, HttpEmbedder};
use rag_llm::{AnswerSynthesizer, OpenAiClient};
use rag_query::{HybridRetriever, Reranker};
use rag_store::SqliteStore;

/// A grounded answer together with the passages it was grounded on.
#[derive(Debug, Clone)]
pub struct QaOutcome {
    pub answer: Answer,
    pub context: Vec<RankedResult>,
}

/// Long-lived handle over the store, providers and pipeline components.
///
/// Created once at startup and shared by every request.
pub struct RagService {
    store: Arc<dyn Store>,
    retriever: HybridRetriever<dyn Store, dyn Embedder>,
    reranker: Option<Reranker<dyn RelevanceScorer>>,
    synthesizer: AnswerSynthesizer<dyn CompletionClient>,
    pipeline: IngestionPipeline<dyn Store, dyn Embedder>,
    search: SearchConfig,
    rerank_top_k: usize,
    rerank_by_default: bool,
}

impl RagService {
    /// Build every component from configuration.
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_with_config(&config.database)?);
        let embedder = embedder_from_config(&config.embedding)?;

        let scorer: Option<Arc<dyn RelevanceScorer>> = if config.rerank.enabled {
            Some(Arc::new(CrossEncoderScorer::new(&config.rerank)?))
        } else {
            None
        };

        let client: Arc<dyn CompletionClient> = Arc::new(OpenAiClient::new(&config.llm)?);

        Self::from_parts(config, store, embedder, scorer, client)
    }

    /// Build the service around already constructed capabilities.
    pub fn from_parts(
        config: &RagConfig,
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        scorer: Option<Arc<dyn RelevanceScorer>>,
        client: Arc<dyn CompletionClient>,
    ) -> Result<Self> {
        let retriever = HybridRetriever::new(store.clone(), embedder.clone(), &config.search);

        let reranker = scorer.map(|scorer| {
            Reranker::new(scorer, Duration::from_secs(config.rerank.timeout_secs))
        });

        let pipeline = IngestionPipeline::new(
            store.clone(),
            embedder,
            chunker_for(config.chunking.strategy),
            config.chunking.chunk_config(),
        )?;

        let synthesizer = AnswerSynthesizer::new(client, &config.llm);

        info!(
            "Service ready: chunking={:?}, reranker={}, model={}",
            config.chunking.strategy,
            reranker.is_some(),
            synthesizer.model()
        );

        Ok(Self {
            store,
            retriever,
            reranker,
            synthesizer,
            pipeline,
            search: config.search.clone(),
            rerank_top_k: config.rerank.top_k,
            rerank_by_default: config.rerank.enabled,
        })
    }

    /// Requested result count, defaulted and capped.
    pub fn resolve_top_k(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.search.default_top_k)
            .min(self.search.max_top_k)
    }

    /// Whether reranking applies when a caller does not say.
    pub fn rerank_by_default(&self) -> bool {
        self.rerank_by_default
    }

    /// Chunk, embed and store one source text.
    pub async fn ingest(&self, text: &str) -> Result<IngestReport> {
        self.pipeline.ingest(text).await
    }

    /// Ranked passages for `query`, optionally reranked.
    ///
    /// Reranking widens the retrieval pool and falls back to retrieval order
    /// when scoring fails. Without an explicit `top_k`, reranked results are
    /// cut at `rerank.top_k`.
    pub async fn search(
        &self,
        query: &str,
        top_k: Option<usize>,
        rerank: bool,
    ) -> Result<Vec<RankedResult>> {
        match (&self.reranker, rerank) {
            (Some(reranker), true) => {
                let top_k = top_k
                    .unwrap_or(self.rerank_top_k)
                    .min(self.search.max_top_k);
                let pool = top_k.saturating_mul(self.search.candidate_multiplier);
                let results = self.retriever.retrieve(query, pool).await?;
                Ok(reranker.rerank_or_fallback(query, results, top_k).await)
            }
            (None, true) => {
                debug!("Rerank requested but no scorer is loaded");
                self.retriever.retrieve(query, self.resolve_top_k(top_k)).await
            }
            _ => self.retriever.retrieve(query, self.resolve_top_k(top_k)).await,
        }
    }

    /// Retrieve context for `query` and synthesize a grounded answer.
    pub async fn answer(&self, query: &str, top_k: Option<usize>) -> Result<QaOutcome> {
        let context = self.search(query, top_k, self.rerank_by_default).await?;
        let passages: Vec<&str> = context.iter().map(|r| r.content.as_str()).collect();

        let answer = self.synthesizer.answer(query, &passages).await?;
        Ok(QaOutcome { answer, context })
    }

    /// Ungrounded single-turn chat.
    pub async fn chat(&self, prompt: &str) -> Result<Answer> {
        self.synthesizer.chat(prompt).await
    }

    /// Streamed single-turn chat.
    pub async fn chat_stream(&self, prompt: &str) -> Result<FragmentStream> {
        self.synthesizer.answer_stream(prompt).await
    }

    /// Number of stored documents.
    pub async fn document_count(&self) -> Result<u64> {
        self.store.count().await
    }
}

fn embedder_from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match config.provider {
        EmbeddingProviderKind::Http => Arc::new(HttpEmbedder::new(config)?),
        EmbeddingProviderKind::Hashing => Arc::new(HashingEmbedder::new(config.dimension)?),
    };
    Ok(embedder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rag_core::{CompletionRequest, CompletionResponse, RagError};

    struct EchoClient;

    #[async_trait]
    impl CompletionClient for EchoClient {
        async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
            Ok(CompletionResponse {
                content: request.messages.last().map(|m| m.content.clone()).unwrap_or_default(),
                model: request.model.clone(),
                usage: None,
            })
        }

        async fn complete_stream(&self, _: &CompletionRequest) -> Result<FragmentStream> {
            Err(RagError::provider_connectivity("not used"))
        }
    }

    /// Scores by passage length; optionally fails.
    struct LengthScorer {
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RelevanceScorer for LengthScorer {
        async fn score(&self, _: &str, passages: &[&str]) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RagError::rerank("model missing"));
            }
            Ok(passages.iter().map(|p| p.len() as f32).collect())
        }
    }

    fn config() -> RagConfig {
        let mut config = RagConfig::default();
        config.embedding.provider = EmbeddingProviderKind::Hashing;
        config.embedding.dimension = 256;
        config.chunking.chunk_size = 40;
        config.chunking.chunk_overlap = 0;
        config
    }

    fn service(scorer: Option<Arc<dyn RelevanceScorer>>) -> RagService {
        service_with(config(), scorer)
    }

    fn service_with(config: RagConfig, scorer: Option<Arc<dyn RelevanceScorer>>) -> RagService {
        RagService::from_parts(
            &config,
            Arc::new(SqliteStore::open_memory().unwrap()),
            embedder_from_config(&config.embedding).unwrap(),
            scorer,
            Arc::new(EchoClient),
        )
        .unwrap()
    }

    #[test]
    fn test_top_k_defaulted_and_capped() {
        let service = service(None);
        assert_eq!(service.resolve_top_k(None), 3);
        assert_eq!(service.resolve_top_k(Some(7)), 7);
        assert_eq!(service.resolve_top_k(Some(10_000)), 50);
    }

    #[tokio::test]
    async fn test_ingest_then_count() {
        let service = service(None);
        let report = service.ingest("The sky is blue. Water boils at 100C.").await.unwrap();

        assert_eq!(report.chunks, 1);
        assert_eq!(service.document_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rerank_orders_by_scorer() {
        let scorer = Arc::new(LengthScorer {
            fail: false,
            calls: AtomicUsize::new(0),
        });
        let service = service(Some(scorer.clone()));
        service.ingest("Short one.").await.unwrap();
        service.ingest("A considerably longer passage here.").await.unwrap();

        let results = service.search("passage", Some(2), true).await.unwrap();
        assert_eq!(results[0].content, "A considerably longer passage here.");
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rerank_top_k_bounds_default_output() {
        let mut config = config();
        config.rerank.top_k = 1;
        let scorer = Arc::new(LengthScorer {
            fail: false,
            calls: AtomicUsize::new(0),
        });
        let service = service_with(config, Some(scorer));
        for text in ["Water boils at 100C.", "The sky is blue.", "Grass is green."] {
            service.ingest(text).await.unwrap();
        }

        assert_eq!(service.search("water", None, false).await.unwrap().len(), 3);
        assert_eq!(service.search("water", None, true).await.unwrap().len(), 1);
        assert_eq!(service.search("water", Some(2), true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rerank_failure_keeps_retrieval_order() {
        let scorer = Arc::new(LengthScorer {
            fail: true,
            calls: AtomicUsize::new(0),
        });
        let service = service(Some(scorer));
        service.ingest("Water boils at 100C.").await.unwrap();

        let plain = service.search("water", Some(1), false).await.unwrap();
        let fallback = service.search("water", Some(1), true).await.unwrap();
        assert_eq!(fallback.len(), 1);
        assert_eq!(fallback[0].content, plain[0].content);
    }

    #[tokio::test]
    async fn test_answer_carries_context() {
        let service = service(None);
        service.ingest("Water boils at 100C.").await.unwrap();

        let outcome = service.answer("When does water boil?", None).await.unwrap();
        assert_eq!(outcome.context.len(), 1);
        assert!(outcome.answer.reply.contains("Water boils at 100C."));
        assert!(outcome.answer.reply.ends_with("Q: When does water boil?"));
    }

    #[tokio::test]
    async fn test_answer_on_empty_store_has_no_context() {
        let outcome = service(None).answer("anything", None).await.unwrap();
        assert!(outcome.context.is_empty());
        assert_eq!(outcome.answer.reply, "Context:\n\n\nQ: anything");
    }
}
