//! rag-chunk - Chunking strategies and ingestion
//!
//! This crate splits raw text into overlapping chunks and writes each chunk,
//! with its embedding, to the document store.
//!
//! # Chunkers
//!
//! - [`WindowChunker`]: Fixed character windows advancing by
//!   `chunk_size - chunk_overlap`.
//!
//! - [`RecursiveChunker`]: Recursively splits text using progressively smaller
//!   separators (paragraphs, lines, sentences, words), then merges pieces
//!   back up to the chunk size with overlap carried between chunks.
//!
//! # Example
//!
//! ```rust
//! use rag_chunk::{ChunkConfig, Chunker, WindowChunker};
//!
//! let config = ChunkConfig::new(20, 5).unwrap();
//! let chunks = WindowChunker.chunk("The sky is blue. Water boils at 100C.", &config).unwrap();
//! assert_eq!(chunks.len(), 3);
//! ```

mod pipeline;
mod recursive;
mod window;

use std::sync::Arc;

pub use pipeline::IngestionPipeline;
pub use recursive::RecursiveChunker;
pub use window::WindowChunker;

// Re-export types for convenience
pub use rag_core::{ChunkConfig, ChunkData, ChunkStrategy, Chunker};

/// Build the chunker for a configured strategy.
pub fn chunker_for(strategy: ChunkStrategy) -> Arc<dyn Chunker> {
    match strategy {
        ChunkStrategy::Window => Arc::new(WindowChunker),
        ChunkStrategy::Recursive => Arc::new(RecursiveChunker::new()),
    }
}
