//! Fixed-size character window chunker.

use rag_core::{ChunkConfig, ChunkData, Chunker, Result};

/// Splits text into windows of `chunk_size` characters.
///
/// Each window starts `chunk_size - chunk_overlap` characters after the
/// previous one, so consecutive chunks share exactly `chunk_overlap`
/// characters. Only the final chunk may be shorter.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowChunker;

impl Chunker for WindowChunker {
    fn chunk(&self, content: &str, config: &ChunkConfig) -> Result<Vec<ChunkData>> {
        config.validate()?;

        let chars: Vec<char> = content.chars().collect();
        if chars.is_empty() {
            return Ok(Vec::new());
        }

        let step = config.chunk_size - config.chunk_overlap;
        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let end = (start + config.chunk_size).min(chars.len());
            chunks.push(ChunkData {
                content: chars[start..end].iter().collect(),
                start_char: start,
                end_char: end,
            });

            if end == chars.len() {
                break;
            }
            start += step;
        }

        Ok(chunks)
    }
}
