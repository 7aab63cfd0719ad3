//! Grounded answer synthesis.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tracing::info;

use rag_core::{
    Answer, ChatMessage, CompletionClient, CompletionRequest, CompletionResponse, FragmentStream,
    LlmConfig, Result,
};

use crate::retry::RetryPolicy;

/// Builds grounded prompts and calls the completion capability.
pub struct AnswerSynthesizer<C: ?Sized> {
    client: Arc<C>,
    model: String,
    system_prompt: String,
    timeout: Duration,
    stream_timeout: Duration,
    max_context_chars: usize,
    retry: RetryPolicy,
}

impl<C> AnswerSynthesizer<C>
where
    C: CompletionClient + ?Sized,
{
    /// Create a synthesizer from the completion section of the configuration.
    pub fn new(client: Arc<C>, config: &LlmConfig) -> Self {
        Self {
            client,
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            stream_timeout: Duration::from_secs(config.stream_timeout_secs),
            max_context_chars: config.max_context_chars,
            retry: RetryPolicy::from_config(config),
        }
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Model requested on every call.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Answer `query` using only the given context passages.
    pub async fn answer<P: AsRef<str>>(&self, query: &str, context: &[P]) -> Result<Answer> {
        let messages = self.build_messages(query, context);
        self.complete_with_retry(messages).await
    }

    /// Single user turn, no grounding context.
    pub async fn chat(&self, prompt: &str) -> Result<Answer> {
        self.complete_with_retry(vec![ChatMessage::user(prompt)]).await
    }

    /// Stream a reply to a single user turn.
    ///
    /// One call, never retried. Errors raised before the first fragment are
    /// returned here; later errors end the stream.
    pub async fn answer_stream(&self, prompt: &str) -> Result<FragmentStream> {
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user(prompt)],
            timeout: self.stream_timeout,
            stream: true,
        };

        let started = Instant::now();
        let inner = self.client.complete_stream(&request).await?;

        let counted = stream::unfold((inner, 0usize), move |(mut inner, fragments)| async move {
            match inner.next().await {
                Some(item) => Some((item, (inner, fragments + 1))),
                None => {
                    info!(
                        fragments,
                        latency_ms = started.elapsed().as_millis() as u64,
                        "Stream complete"
                    );
                    None
                }
            }
        });

        Ok(Box::pin(counted))
    }

    /// System instruction plus one user turn holding the context and query.
    ///
    /// Passages are deduplicated (first occurrence wins) and added in order
    /// until `max_context_chars` would be exceeded. A first passage that is
    /// too long on its own is cut to the limit.
    pub fn build_messages<P: AsRef<str>>(&self, query: &str, context: &[P]) -> Vec<ChatMessage> {
        let mut seen = HashSet::new();
        let mut passages: Vec<String> = Vec::new();
        let mut used = 0usize;

        for passage in context.iter().map(|p| p.as_ref()) {
            if !seen.insert(passage) {
                continue;
            }

            let len = passage.chars().count();
            let separator = usize::from(!passages.is_empty());

            if used + separator + len <= self.max_context_chars {
                passages.push(passage.to_string());
                used += separator + len;
            } else {
                if passages.is_empty() && self.max_context_chars > 0 {
                    passages.push(passage.chars().take(self.max_context_chars).collect());
                }
                break;
            }
        }

        vec![
            ChatMessage::system(self.system_prompt.clone()),
            ChatMessage::user(format!(
                "Context:\n{}\n\nQ: {}",
                passages.join("\n"),
                query
            )),
        ]
    }

    async fn complete_with_retry(&self, messages: Vec<ChatMessage>) -> Result<Answer> {
        let request = CompletionRequest {
            model: self.model.clone(),
            messages,
            timeout: self.timeout,
            stream: false,
        };

        let client = &self.client;
        let request = &request;

        let started = Instant::now();
        let response: CompletionResponse = self
            .retry
            .run(move |_| client.complete(request))
            .await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let usage = response.usage.unwrap_or_default();
        info!(
            model = %response.model,
            latency_ms,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "Completion finished"
        );

        Ok(Answer {
            reply: response.content,
            model_id: response.model,
            token_usage: response.usage,
            latency_ms,
        })
    }
}
