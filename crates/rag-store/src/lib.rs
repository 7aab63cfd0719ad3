//! rag-store - SQLite document store
//!
//! This crate provides the append-only document store: passages with their
//! embeddings, a porter-stemmed FTS5 lexical index, and a registered scalar
//! function computing cosine distance so both retrieval legs run in SQL.

mod distance;
mod schema;
mod sqlite;

pub use distance::cosine_distance;
pub use sqlite::SqliteStore;

// Re-export schema for testing/migrations
pub use schema::SCHEMA;
