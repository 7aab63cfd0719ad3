//! rag-llm - Language-model calls and answer synthesis
//!
//! This crate provides the completion capability over an OpenAI-compatible
//! chat API (whole responses and server-sent-event streams), the retry
//! policy for non-streaming calls, and the [`AnswerSynthesizer`] that turns
//! retrieved passages into a grounded answer.

mod openai;
mod retry;
mod sse;
mod synth;

pub use openai::OpenAiClient;
pub use retry::RetryPolicy;
pub use sse::{sse_fragments, SseDecoder, SseEvent, MAX_LINE_BYTES};
pub use synth::AnswerSynthesizer;

// Re-export for convenience
pub use rag_core::{Answer, CompletionClient, FragmentStream};
