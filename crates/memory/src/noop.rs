//! No-op vector store — disables memory entirely.

use async_trait::async_trait;
use reflexa_core::error::MemoryError;
use reflexa_core::memory::{VectorMatch, VectorStore};

/// Stores nothing; every collection looks absent.
pub struct NoopVectorStore;

#[async_trait]
impl VectorStore for NoopVectorStore {
    fn name(&self) -> &str {
        "none"
    }

    async fn search(
        &self,
        _collection: &str,
        _vector: &[f32],
        _top_k: usize,
    ) -> Result<Vec<VectorMatch>, MemoryError> {
        Ok(Vec::new())
    }

    async fn upsert(
        &self,
        _collection: &str,
        _id: &str,
        _vector: Vec<f32>,
        _payload: serde_json::Value,
    ) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn count(&self, _collection: &str) -> Result<usize, MemoryError> {
        Ok(0)
    }
}
