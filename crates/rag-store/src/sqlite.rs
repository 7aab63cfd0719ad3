//! SQLite-based storage implementation.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info};
use ulid::Ulid;

use rag_core::{DatabaseConfig, DenseMatch, Document, HybridMatch, RagError, Result, Store};

use crate::distance::{bytes_to_vec, cosine_distance, vec_to_bytes};
use crate::schema::{DISTANCE_FN, SCHEMA, SCHEMA_VERSION};

const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_BUSY_TIMEOUT_MS: u32 = 30000;

/// SQLite-based store implementation.
///
/// The connection sits behind a blocking Mutex and every operation runs on
/// the blocking thread pool via `spawn_blocking`, bounded by a query timeout.
pub struct SqliteStore {
    /// Connection wrapped in blocking Mutex.
    conn: Arc<Mutex<Connection>>,

    /// Upper bound for a single store call.
    query_timeout: Duration,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT_MS)
    }

    /// Open using the database section of the configuration.
    pub fn open_with_config(config: &DatabaseConfig) -> Result<Self> {
        Ok(Self::open_with_busy_timeout(&config.path, config.busy_timeout_ms)?
            .with_query_timeout(Duration::from_millis(config.query_timeout_ms)))
    }

    fn open_with_busy_timeout(path: impl AsRef<Path>, busy_timeout_ms: u32) -> Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| RagError::store_unavailable(format!("Failed to open database: {}", e)))?;

        Self::init(conn, path, busy_timeout_ms)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            RagError::store_unavailable(format!("Failed to open in-memory database: {}", e))
        })?;

        Self::init(conn, Path::new(":memory:"), DEFAULT_BUSY_TIMEOUT_MS)
    }

    /// Set the upper bound for a single store call.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Initialize the store with a connection.
    fn init(conn: Connection, path: &Path, busy_timeout_ms: u32) -> Result<Self> {
        Self::configure_connection(&conn, busy_timeout_ms)?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| RagError::store_unavailable(format!("Failed to initialize schema: {}", e)))?;

        conn.execute(
            "INSERT OR IGNORE INTO store_meta (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )
        .map_err(|e| RagError::store_unavailable(format!("Failed to record schema version: {}", e)))?;

        Self::register_distance_fn(&conn)?;

        info!("Database opened at {:?}", path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        })
    }

    /// Configure SQLite connection for concurrent reads during ingestion.
    fn configure_connection(conn: &Connection, busy_timeout_ms: u32) -> Result<()> {
        conn.execute_batch(&format!(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA busy_timeout = {};
            PRAGMA temp_store = MEMORY;
            "#,
            busy_timeout_ms
        ))
        .map_err(|e| RagError::store_unavailable(format!("Failed to configure connection: {}", e)))?;

        Ok(())
    }

    /// Register the cosine distance function used by both query legs.
    fn register_distance_fn(conn: &Connection) -> Result<()> {
        conn.create_scalar_function(
            DISTANCE_FN,
            2,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let a: Vec<u8> = ctx.get(0)?;
                let b: Vec<u8> = ctx.get(1)?;
                let (a, b) = match (bytes_to_vec(&a), bytes_to_vec(&b)) {
                    (Some(a), Some(b)) if a.len() == b.len() => (a, b),
                    _ => {
                        return Err(rusqlite::Error::UserFunctionError(
                            "embedding blobs have mismatched dimensions".into(),
                        ))
                    }
                };
                Ok(cosine_distance(&a, &b) as f64)
            },
        )
        .map_err(|e| RagError::store_unavailable(format!("Failed to register distance function: {}", e)))
    }

    /// Run a blocking operation on the connection off the async scheduler.
    ///
    /// The query timeout bounds the caller's wait, not the SQLite work: a
    /// timed-out task keeps running and holds the connection lock until it
    /// finishes, so later calls queue behind it.
    async fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let task = tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| RagError::store_unavailable(e.to_string()))?;
            f(&mut conn)
        });

        match tokio::time::timeout(self.query_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(RagError::store_unavailable(format!("Store task failed: {}", e))),
            Err(_) => Err(RagError::store_unavailable(format!(
                "Store call exceeded {:?}",
                self.query_timeout
            ))),
        }
    }

    /// Read the embedding dimension fixed by the first insert.
    fn stored_dimension(conn: &Connection) -> Result<Option<usize>> {
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = 'dimension'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RagError::store_unavailable(e.to_string()))?;

        value
            .map(|v| {
                v.parse::<usize>()
                    .map_err(|e| RagError::internal(format!("Corrupt stored dimension {:?}: {}", v, e)))
            })
            .transpose()
    }

    /// Reject query embeddings that cannot be compared with stored ones.
    fn check_dimension(conn: &Connection, len: usize) -> Result<bool> {
        match Self::stored_dimension(conn)? {
            None => Ok(false),
            Some(dim) if dim == len => Ok(true),
            Some(dim) => Err(RagError::invalid_argument(format!(
                "Query embedding has dimension {}, store holds dimension {}",
                len, dim
            ))),
        }
    }

    fn parse_id(id: &str) -> rusqlite::Result<Ulid> {
        Ulid::from_string(id)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
    }

    /// Build an FTS5 query matching any of the query's terms.
    ///
    /// Each term is quoted so FTS5 syntax in user input is inert; quoted
    /// strings still go through the porter tokenizer.
    fn fts_query(text: &str) -> Option<String> {
        let mut terms: Vec<String> = Vec::new();
        for term in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let quoted = format!("\"{}\"", term.to_lowercase());
            if !terms.contains(&quoted) {
                terms.push(quoted);
            }
        }

        if terms.is_empty() {
            None
        } else {
            Some(terms.join(" OR "))
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert(&self, content: &str, embedding: &[f32]) -> Result<Ulid> {
        if embedding.is_empty() {
            return Err(RagError::invalid_argument("embedding must not be empty"));
        }

        let doc = Document::new(content, embedding.to_vec());
        let id = doc.id;

        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| RagError::store_unavailable(e.to_string()))?;

            match Self::stored_dimension(&tx)? {
                Some(dim) if dim != doc.embedding.len() => {
                    return Err(RagError::invalid_argument(format!(
                        "Embedding has dimension {}, store holds dimension {}",
                        doc.embedding.len(),
                        dim
                    )));
                }
                Some(_) => {}
                None => {
                    tx.execute(
                        "INSERT INTO store_meta (key, value) VALUES ('dimension', ?1)",
                        params![doc.embedding.len().to_string()],
                    )
                    .map_err(|e| RagError::store_unavailable(e.to_string()))?;
                }
            }

            tx.execute(
                r#"
                INSERT INTO documents (id, content, content_hash, embedding, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    doc.id.to_string(),
                    doc.content,
                    doc.content_hash.as_slice(),
                    vec_to_bytes(&doc.embedding),
                    doc.created_at as i64,
                ],
            )
            .map_err(|e| RagError::store_unavailable(format!("Failed to insert document: {}", e)))?;

            tx.commit()
                .map_err(|e| RagError::store_unavailable(e.to_string()))?;

            debug!("Inserted document: {}", doc.id);
            Ok(())
        })
        .await?;

        Ok(id)
    }

    async fn query_dense(&self, embedding: &[f32], k: u32) -> Result<Vec<DenseMatch>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let embedding_bytes = vec_to_bytes(embedding);
        let dim = embedding.len();

        self.with_conn(move |conn| {
            if !Self::check_dimension(conn, dim)? {
                return Ok(Vec::new());
            }

            let mut stmt = conn
                .prepare(&format!(
                    r#"
                    SELECT id, content, {DISTANCE_FN}(embedding, ?1) AS distance
                    FROM documents
                    ORDER BY distance ASC, rowid ASC
                    LIMIT ?2
                    "#
                ))
                .map_err(|e| RagError::store_unavailable(e.to_string()))?;

            let rows = stmt
                .query_map(params![embedding_bytes, k], |row| {
                    let id: String = row.get(0)?;
                    let distance: f64 = row.get(2)?;
                    Ok(DenseMatch {
                        id: Self::parse_id(&id)?,
                        content: row.get(1)?,
                        distance: distance as f32,
                    })
                })
                .map_err(|e| RagError::store_unavailable(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RagError::store_unavailable(e.to_string()))?;

            debug!("Dense query returned {} rows", rows.len());
            Ok(rows)
        })
        .await
    }

    async fn query_hybrid(
        &self,
        embedding: &[f32],
        query_text: &str,
        k: u32,
    ) -> Result<Vec<HybridMatch>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let fts_query = match Self::fts_query(query_text) {
            Some(q) => q,
            None => return Ok(Vec::new()),
        };
        let embedding_bytes = vec_to_bytes(embedding);
        let dim = embedding.len();

        self.with_conn(move |conn| {
            if !Self::check_dimension(conn, dim)? {
                return Ok(Vec::new());
            }

            let mut stmt = conn
                .prepare(&format!(
                    r#"
                    SELECT d.id, d.content,
                           {DISTANCE_FN}(d.embedding, ?1) AS distance,
                           -bm25(documents_fts) AS lexical_score
                    FROM documents_fts
                    JOIN documents d ON d.rowid = documents_fts.rowid
                    WHERE documents_fts MATCH ?2
                    ORDER BY lexical_score DESC, distance ASC, d.rowid ASC
                    LIMIT ?3
                    "#
                ))
                .map_err(|e| RagError::store_unavailable(e.to_string()))?;

            let rows = stmt
                .query_map(params![embedding_bytes, fts_query, k], |row| {
                    let id: String = row.get(0)?;
                    let distance: f64 = row.get(2)?;
                    let lexical_score: f64 = row.get(3)?;
                    Ok(HybridMatch {
                        id: Self::parse_id(&id)?,
                        content: row.get(1)?,
                        distance: distance as f32,
                        lexical_score: lexical_score as f32,
                    })
                })
                .map_err(|e| RagError::store_unavailable(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RagError::store_unavailable(e.to_string()))?;

            debug!("Lexical query returned {} rows", rows.len());
            Ok(rows)
        })
        .await
    }

    async fn count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
                .map_err(|e| RagError::store_unavailable(e.to_string()))?;
            Ok(count as u64)
        })
        .await
    }
}
