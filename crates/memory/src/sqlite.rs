//! SQLite vector store.
//!
//! Uses a single table `points` keyed by `(collection, id)`. Vectors are
//! stored as little-endian f32 blobs and searched by brute-force cosine
//! similarity over one collection at a time, which is plenty for the
//! per-session memories this runtime keeps.

use crate::vector::{self, StoredPoint};
use async_trait::async_trait;
use chrono::Utc;
use reflexa_core::error::MemoryError;
use reflexa_core::memory::{VectorMatch, VectorStore};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// A SQLite-backed vector store.
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    /// Open (or create) a store at `path`.
    ///
    /// Accepts a file path or a `sqlite:` URL. An in-memory database
    /// (`sqlite::memory:`) is limited to one connection, since each
    /// connection would otherwise see its own empty database.
    pub async fn new(path: &str) -> Result<Self, MemoryError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| MemoryError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite vector store initialized at {path}");
        Ok(store)
    }

    /// Open a store at a filesystem path, creating parent directories.
    pub async fn open(path: &std::path::Path) -> Result<Self, MemoryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MemoryError::Storage(format!("Failed to create {}: {e}", parent.display())))?;
        }
        Self::new(&path.to_string_lossy()).await
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, MemoryError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS points (
                collection  TEXT NOT NULL,
                id          TEXT NOT NULL,
                vector      BLOB NOT NULL,
                dims        INTEGER NOT NULL,
                payload     TEXT NOT NULL DEFAULT 'null',
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("points table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_points_collection ON points(collection)")
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::MigrationFailed(format!("collection index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_point(row: &sqlx::sqlite::SqliteRow) -> Result<StoredPoint, MemoryError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| MemoryError::QueryFailed(format!("id column: {e}")))?;
        let blob: Vec<u8> = row
            .try_get("vector")
            .map_err(|e| MemoryError::QueryFailed(format!("vector column: {e}")))?;
        let payload_json: String = row
            .try_get("payload")
            .map_err(|e| MemoryError::QueryFailed(format!("payload column: {e}")))?;

        let payload = serde_json::from_str(&payload_json).unwrap_or_else(|e| {
            warn!(id = %id, error = %e, "Unreadable payload, returning null");
            serde_json::Value::Null
        });

        Ok(StoredPoint {
            id,
            vector: vector::from_blob(&blob),
            payload,
        })
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorMatch>, MemoryError> {
        // Only points with the query's dimensionality can match
        let rows = sqlx::query("SELECT id, vector, payload FROM points WHERE collection = ?1 AND dims = ?2")
            .bind(collection)
            .bind(query.len() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("search: {e}")))?;

        let points = rows
            .iter()
            .map(Self::row_to_point)
            .collect::<Result<Vec<_>, _>>()?;

        let hits = vector::rank(&points, query, top_k);
        debug!(collection, candidates = points.len(), hits = hits.len(), "SQLite vector search");
        Ok(hits)
    }

    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        vector: Vec<f32>,
        payload: serde_json::Value,
    ) -> Result<(), MemoryError> {
        let payload_json = serde_json::to_string(&payload)
            .map_err(|e| MemoryError::Storage(format!("Payload serialization: {e}")))?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO points (collection, id, vector, dims, payload, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            ON CONFLICT(collection, id) DO UPDATE SET
                vector = excluded.vector,
                dims = excluded.dims,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(vector::to_blob(&vector))
        .bind(vector.len() as i64)
        .bind(&payload_json)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("INSERT failed: {e}")))?;

        debug!(collection, id, "Upserted point");
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize, MemoryError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM points WHERE collection = ?1")
            .bind(collection)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("COUNT: {e}")))?;

        let cnt: i64 = row
            .try_get("cnt")
            .map_err(|e| MemoryError::QueryFailed(format!("cnt column: {e}")))?;

        Ok(cnt as usize)
    }
}
