//! VectorStore trait — similarity search over embedded memories.
//!
//! Each session owns a collection (its memory id). The retrieval chain
//! embeds keyword groups and asks the store for the nearest stored point.
//! Implementations: in-memory, SQLite, Qdrant, none (no-op).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::MemoryError;

/// A single nearest-neighbour hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    /// Point id within the collection
    pub id: String,

    /// Similarity score (higher is closer)
    pub score: f32,

    /// Stored payload, usually `{"content": "..."}`
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl VectorMatch {
    /// The `content` field of the payload, if it is a string.
    pub fn content(&self) -> Option<&str> {
        self.payload.get("content").and_then(|v| v.as_str())
    }
}

/// The core VectorStore trait.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "qdrant", "none").
    fn name(&self) -> &str;

    /// Return up to `top_k` nearest points, best first.
    ///
    /// A collection that does not exist yields an empty list, not an error.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> std::result::Result<Vec<VectorMatch>, MemoryError>;

    /// Insert or replace a point, creating the collection if needed.
    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        vector: Vec<f32>,
        payload: serde_json::Value,
    ) -> std::result::Result<(), MemoryError>;

    /// Number of points in a collection (0 when absent).
    async fn count(&self, collection: &str) -> std::result::Result<usize, MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_exposes_content() {
        let hit = VectorMatch {
            id: "p1".into(),
            score: 0.93,
            payload: serde_json::json!({ "content": "The user prefers Rust over C++" }),
        };
        assert_eq!(hit.content(), Some("The user prefers Rust over C++"));

        let bare = VectorMatch { id: "p2".into(), score: 0.1, payload: serde_json::Value::Null };
        assert!(bare.content().is_none());
    }
}
