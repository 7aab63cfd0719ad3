//! Server-sent-event decoding for streamed chat completions.

use std::collections::VecDeque;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tracing::debug;

use rag_core::{FragmentStream, RagError, Result};

/// One decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Payload of a `data:` line.
    Data(String),
    /// The `[DONE]` terminator.
    Done,
}

/// Longest unterminated line the decoder will buffer.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Incremental line decoder for `text/event-stream` bodies.
///
/// Bytes may arrive split anywhere, including inside a UTF-8 sequence, so
/// only complete lines are decoded.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    // Bytes of `buffer` already known to hold no newline
    scanned: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return every event completed by them.
    ///
    /// Fails once a line grows past [`MAX_LINE_BYTES`] without a newline.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<SseEvent>> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        let mut start = 0;
        let mut cursor = self.scanned;
        while let Some(offset) = self.buffer[cursor..].iter().position(|&b| b == b'\n') {
            let end = cursor + offset;
            if let Some(event) = Self::decode_line(&self.buffer[start..end]) {
                events.push(event);
            }
            start = end + 1;
            cursor = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if self.buffer.len() > MAX_LINE_BYTES {
            let len = self.buffer.len();
            self.buffer.clear();
            self.scanned = 0;
            return Err(RagError::internal(format!(
                "Stream line exceeded {} bytes ({} buffered)",
                MAX_LINE_BYTES, len
            )));
        }
        Ok(events)
    }

    /// Decode whatever remains once the body has ended.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let line = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        Self::decode_line(&line)
    }

    fn decode_line(line: &[u8]) -> Option<SseEvent> {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches('\r');

        // Comments, blank separators and other fields carry no content
        let data = line.strip_prefix("data:")?;
        let data = data.strip_prefix(' ').unwrap_or(data);

        if data == "[DONE]" {
            Some(SseEvent::Done)
        } else {
            Some(SseEvent::Data(data.to_string()))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Extract the text fragment carried by one `data:` payload, if any.
fn fragment(data: &str) -> Result<Option<String>> {
    let payload: ChunkPayload = serde_json::from_str(data)
        .map_err(|e| RagError::internal(format!("Malformed stream chunk: {}", e)))?;

    Ok(payload
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|c| !c.is_empty()))
}

struct StreamState<S> {
    body: S,
    decoder: SseDecoder,
    pending: VecDeque<Result<String>>,
    finished: bool,
}

impl<S> StreamState<S> {
    fn absorb(&mut self, events: impl IntoIterator<Item = SseEvent>) {
        for event in events {
            match event {
                SseEvent::Done => {
                    self.finished = true;
                    return;
                }
                SseEvent::Data(data) => match fragment(&data) {
                    Ok(Some(text)) => self.pending.push_back(Ok(text)),
                    Ok(None) => {}
                    Err(e) => {
                        self.pending.push_back(Err(e));
                        self.finished = true;
                        return;
                    }
                },
            }
        }
    }
}

/// Turn a streamed chat-completion body into text fragments.
///
/// The stream ends at `[DONE]`, at the end of the body, or after the first
/// error, which is yielded as the final item. Dropping the stream drops
/// `body`.
pub fn sse_fragments<S>(body: S) -> FragmentStream
where
    S: Stream<Item = Result<Bytes>> + Send + Unpin + 'static,
{
    let state = StreamState {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    let fragments = stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(bytes)) => match state.decoder.push(&bytes) {
                    Ok(events) => state.absorb(events),
                    Err(e) => {
                        state.pending.push_back(Err(e));
                        state.finished = true;
                    }
                },
                Some(Err(e)) => {
                    state.pending.push_back(Err(e));
                    state.finished = true;
                }
                None => {
                    debug!("Stream body ended without terminator");
                    let tail = state.decoder.finish();
                    state.absorb(tail);
                    state.finished = true;
                }
            }
        }
    });

    Box::pin(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    async fn collect(parts: Vec<Result<Bytes>>) -> Vec<Result<String>> {
        sse_fragments(stream::iter(parts)).collect().await
    }

    #[test]
    fn test_decoder_handles_split_lines() {
        let mut decoder = SseDecoder::new();

        assert!(decoder.push(b"data: {\"a\"").unwrap().is_empty());
        assert_eq!(
            decoder.push(b":1}\r\n\r\n: keep-alive\ndata: [DONE]\n").unwrap(),
            vec![SseEvent::Data("{\"a\":1}".to_string()), SseEvent::Done]
        );
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_decoder_keeps_split_utf8() {
        let mut decoder = SseDecoder::new();
        let line = "data: héllo\n".as_bytes();

        assert!(decoder.push(&line[..8]).unwrap().is_empty());
        assert_eq!(
            decoder.push(&line[8..]).unwrap(),
            vec![SseEvent::Data("héllo".to_string())]
        );
    }

    #[test]
    fn test_decoder_rejects_unbounded_line() {
        let mut decoder = SseDecoder::new();
        let half = vec![b'x'; MAX_LINE_BYTES / 2 + 1];

        assert!(decoder.push(b"data: ").unwrap().is_empty());
        assert!(decoder.push(&half).unwrap().is_empty());
        let err = decoder.push(&half).unwrap_err();
        assert_eq!(err.error_code(), "INTERNAL_ERROR");

        // The decoder is usable again after the oversized line is dropped
        assert_eq!(
            decoder.push(b"data: [DONE]\n").unwrap(),
            vec![SseEvent::Done]
        );
    }

    #[tokio::test]
    async fn test_oversized_line_fails_stream() {
        let parts = vec![
            Ok(Bytes::from(chunk("ok"))),
            Ok(Bytes::from(vec![b'x'; MAX_LINE_BYTES + 1])),
            Ok(Bytes::from(chunk("never"))),
        ];

        let fragments = collect(parts).await;
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].as_ref().unwrap(), "ok");
        assert_eq!(
            fragments[1].as_ref().unwrap_err().error_code(),
            "INTERNAL_ERROR"
        );
    }

    #[tokio::test]
    async fn test_fragments_concatenate_exactly() {
        let body = format!("{}{}data: [DONE]\n\n", chunk("Hel"), chunk("lo"));
        // Split mid-line to exercise buffering
        let (a, b) = body.split_at(17);
        let parts = vec![
            Ok(Bytes::from(a.to_string())),
            Ok(Bytes::from(b.to_string())),
        ];

        let fragments: Vec<String> = collect(parts)
            .await
            .into_iter()
            .map(|f| f.unwrap())
            .collect();
        assert_eq!(fragments, vec!["Hel", "lo"]);
        assert_eq!(fragments.concat(), "Hello");
    }

    #[tokio::test]
    async fn test_role_and_empty_deltas_skipped() {
        let body = format!(
            "data: {}\n\n{}data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"role": "assistant"}}]}),
            chunk("hi"),
            serde_json::json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}),
        );

        let fragments = collect(vec![Ok(Bytes::from(body))]).await;
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].as_ref().unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_nothing_after_done() {
        let body = format!("{}data: [DONE]\n\n{}", chunk("a"), chunk("b"));
        let fragments = collect(vec![Ok(Bytes::from(body))]).await;
        assert_eq!(fragments.len(), 1);
    }

    #[tokio::test]
    async fn test_error_ends_stream() {
        let parts = vec![
            Ok(Bytes::from(chunk("partial"))),
            Err(RagError::provider_connectivity("reset")),
            Ok(Bytes::from(chunk("never"))),
        ];

        let fragments = collect(parts).await;
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].as_ref().unwrap(), "partial");
        assert!(fragments[1].is_err());
    }

    #[tokio::test]
    async fn test_body_end_without_terminator() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}";
        let fragments = collect(vec![Ok(Bytes::from(body))]).await;
        assert_eq!(fragments[0].as_ref().unwrap(), "tail");
    }
}
