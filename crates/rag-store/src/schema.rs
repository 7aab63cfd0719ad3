//! Database schema definitions.

/// Main schema SQL for initializing the database.
pub const SCHEMA: &str = r#"
-- Documents table (append-only)
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    content_hash BLOB NOT NULL,
    embedding BLOB NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_content_hash ON documents(content_hash);

-- FTS5 lexical index, stemmed so "boiling" matches "boils"
CREATE VIRTUAL TABLE IF NOT EXISTS documents_fts USING fts5(
    content,
    content=documents,
    content_rowid=rowid,
    tokenize='porter unicode61'
);

-- Keep the lexical index in step with inserts
CREATE TRIGGER IF NOT EXISTS documents_ai AFTER INSERT ON documents BEGIN
    INSERT INTO documents_fts(rowid, content) VALUES (NEW.rowid, NEW.content);
END;

-- Store-level settings such as the embedding dimension
CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Name of the SQL function computing cosine distance between two
/// little-endian f32 blobs.
pub const DISTANCE_FN: &str = "rag_cosine_distance";

/// Schema version for migrations.
pub const SCHEMA_VERSION: u32 = 1;
