//! Recursive text chunker.
//!
//! Splits text by trying progressively smaller separators until every piece
//! fits within the chunk size, then merges neighbouring pieces back into
//! chunks, carrying trailing characters over as overlap.

use rag_core::{ChunkConfig, ChunkData, Chunker, Result};

const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " "];

/// Recursive chunker that splits text by multiple separators.
///
/// Tries each separator in order until pieces are small enough:
/// 1. Double newline (paragraph breaks)
/// 2. Single newline
/// 3. Sentence boundaries
/// 4. Word boundaries (space)
/// 5. Fixed character windows (last resort)
///
/// Separators stay attached to the piece they end, so every chunk is an
/// exact slice of the source and offsets are contiguous.
pub struct RecursiveChunker {
    separators: Vec<String>,
}

/// Half-open range of character offsets.
type Span = (usize, usize);

impl RecursiveChunker {
    /// Create a new recursive chunker with the default separators.
    pub fn new() -> Self {
        Self::with_separators(DEFAULT_SEPARATORS)
    }

    /// Create a chunker with custom separators, coarsest first.
    pub fn with_separators(separators: &[&str]) -> Self {
        Self {
            separators: separators
                .iter()
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Split `chars[start..end]` at every occurrence of `separator`.
    fn split_by_separator(chars: &[char], span: Span, separator: &[char]) -> Vec<Span> {
        let (start, end) = span;
        let mut parts = Vec::new();
        let mut part_start = start;
        let mut i = start;

        while i + separator.len() <= end {
            if chars[i..i + separator.len()] == *separator {
                let part_end = i + separator.len();
                parts.push((part_start, part_end));
                part_start = part_end;
                i = part_end;
            } else {
                i += 1;
            }
        }

        if part_start < end {
            parts.push((part_start, end));
        }

        parts
    }

    /// Recursively split a span into pieces no longer than `max_chars`.
    fn split_recursive(
        &self,
        chars: &[char],
        span: Span,
        depth: usize,
        max_chars: usize,
    ) -> Vec<Span> {
        let (start, end) = span;
        if end - start <= max_chars {
            return vec![span];
        }

        for (offset, separator) in self.separators[depth..].iter().enumerate() {
            let separator: Vec<char> = separator.chars().collect();
            let parts = Self::split_by_separator(chars, span, &separator);

            if parts.len() <= 1 {
                continue;
            }

            let next_depth = depth + offset + 1;
            return parts
                .into_iter()
                .flat_map(|part| self.split_recursive(chars, part, next_depth, max_chars))
                .collect();
        }

        // No separator helps, split by size
        (start..end)
            .step_by(max_chars)
            .map(|s| (s, (s + max_chars).min(end)))
            .collect()
    }

    /// Merge contiguous pieces into chunks of at most `chunk_size` characters.
    fn merge(pieces: Vec<Span>, config: &ChunkConfig) -> Vec<Span> {
        let mut chunks = Vec::new();
        let mut current: Option<Span> = None;

        for (piece_start, piece_end) in pieces {
            current = match current {
                None => Some((piece_start, piece_end)),
                Some((chunk_start, _)) if piece_end - chunk_start <= config.chunk_size => {
                    Some((chunk_start, piece_end))
                }
                Some((chunk_start, chunk_end)) => {
                    chunks.push((chunk_start, chunk_end));

                    // Carry overlap, but never past what still fits with the new piece
                    let next_start = chunk_end
                        .saturating_sub(config.chunk_overlap)
                        .max(piece_end.saturating_sub(config.chunk_size));
                    Some((next_start, piece_end))
                }
            };
        }

        if let Some(span) = current {
            chunks.push(span);
        }

        chunks
    }
}

impl Default for RecursiveChunker {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, content: &str, config: &ChunkConfig) -> Result<Vec<ChunkData>> {
        config.validate()?;

        let chars: Vec<char> = content.chars().collect();
        if chars.is_empty() {
            return Ok(Vec::new());
        }

        let pieces = self.split_recursive(&chars, (0, chars.len()), 0, config.chunk_size);
        let chunks = Self::merge(pieces, config)
            .into_iter()
            .map(|(start, end)| ChunkData {
                content: chars[start..end].iter().collect(),
                start_char: start,
                end_char: end,
            })
            .collect();

        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice(text: &str, chunk: &ChunkData) -> String {
        text.chars()
            .skip(chunk.start_char)
            .take(chunk.char_len())
            .collect()
    }

    #[test]
    fn test_simple_chunk() {
        let chunker = RecursiveChunker::new();
        let config = ChunkConfig::new(100, 10).unwrap();

        let text = "Hello world. This is a test.";
        let chunks = chunker.chunk(text, &config).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, text);
    }

    #[test]
    fn test_paragraph_split() {
        let chunker = RecursiveChunker::new();
        let config = ChunkConfig::new(45, 0).unwrap();

        let text = "First paragraph with several words here.\n\nSecond paragraph also with words.\n\nThird paragraph too.";
        let chunks = chunker.chunk(text, &config).unwrap();

        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].content.starts_with("First paragraph"));
        assert!(chunks[1].content.starts_with("Second paragraph"));
        assert!(chunks[2].content.starts_with("Third paragraph"));
    }

    #[test]
    fn test_chunks_are_source_slices_within_size() {
        let chunker = RecursiveChunker::new();
        let config = ChunkConfig::new(40, 10).unwrap();

        let text = "Rust gives you control. It also gives you safety.\nMemory is managed by ownership.\n\nBorrowing lets you share data without copying it around needlessly.";
        let chunks = chunker.chunk(text, &config).unwrap();

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.char_len() <= 40);
            assert_eq!(chunk.content, slice(text, chunk));
        }
        assert_eq!(chunks.last().unwrap().end_char, text.chars().count());
    }

    #[test]
    fn test_overlap_is_carried() {
        let chunker = RecursiveChunker::new();
        let config = ChunkConfig::new(12, 4).unwrap();

        let chunks = chunker.chunk("alpha beta gamma delta epsilon", &config).unwrap();

        for pair in chunks.windows(2) {
            assert!(pair[1].start_char < pair[0].end_char);
            assert!(pair[0].end_char - pair[1].start_char <= 4);
            assert!(pair[1].start_char > pair[0].start_char);
        }
    }

    #[test]
    fn test_unbroken_text_falls_back_to_windows() {
        let chunker = RecursiveChunker::new();
        let config = ChunkConfig::new(4, 1).unwrap();

        let chunks = chunker.chunk("ééééééééé", &config).unwrap();
        assert!(chunks.iter().all(|c| c.char_len() <= 4));
        assert_eq!(chunks.last().unwrap().end_char, 9);
    }

    #[test]
    fn test_empty_content() {
        let chunker = RecursiveChunker::new();
        let chunks = chunker.chunk("", &ChunkConfig::default()).unwrap();
        assert!(chunks.is_empty());
    }
}
