//! In-memory vector store — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use reflexa_core::error::MemoryError;
use reflexa_core::memory::{VectorMatch, VectorStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::vector::{self, StoredPoint};

/// Collections of points held in a map, searched by brute-force cosine.
#[derive(Clone, Default)]
pub struct InMemoryVectorStore {
    collections: Arc<RwLock<HashMap<String, Vec<StoredPoint>>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of existing collections.
    pub async fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorMatch>, MemoryError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|points| vector::rank(points, query, top_k))
            .unwrap_or_default())
    }

    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        vector: Vec<f32>,
        payload: serde_json::Value,
    ) -> Result<(), MemoryError> {
        let mut collections = self.collections.write().await;
        let points = collections.entry(collection.to_string()).or_default();
        let point = StoredPoint {
            id: id.to_string(),
            vector,
            payload,
        };
        match points.iter_mut().find(|p| p.id == id) {
            Some(existing) => *existing = point,
            None => points.push(point),
        }
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize, MemoryError> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len))
    }
}
