//! Vector store implementations for Reflexa.

pub mod in_memory;
pub mod noop;
pub mod qdrant;
pub mod vector;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryVectorStore;
pub use noop::NoopVectorStore;
pub use qdrant::QdrantVectorStore;
pub use vector::cosine_similarity;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteVectorStore;

use reflexa_config::MemoryConfig;
use reflexa_core::error::MemoryError;
use reflexa_core::memory::VectorStore;
use std::sync::Arc;

/// Build the configured vector store.
///
/// Returns `None` for the `none` backend, so memory actions report that no
/// store backs the session instead of silently finding nothing.
pub async fn build_from_config(
    config: &MemoryConfig,
) -> Result<Option<Arc<dyn VectorStore>>, MemoryError> {
    let store: Arc<dyn VectorStore> = match config.backend.as_str() {
        "none" => return Ok(None),
        "in_memory" => Arc::new(InMemoryVectorStore::new()),
        "qdrant" => Arc::new(QdrantVectorStore::new(
            config.url.as_deref().unwrap_or(qdrant::DEFAULT_URL),
            config.api_key.clone(),
        )),
        #[cfg(feature = "sqlite")]
        "sqlite" => Arc::new(SqliteVectorStore::open(&config.sqlite_path()).await?),
        other => {
            return Err(MemoryError::Storage(format!(
                "Unsupported memory backend '{other}'"
            )));
        }
    };

    tracing::info!(backend = store.name(), "Vector store ready");
    Ok(Some(store))
}
