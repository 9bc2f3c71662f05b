//! Qdrant vector store over its REST API.
//!
//! - search: `POST /collections/{c}/points/search` (404 means no collection)
//! - upsert: `PUT /collections/{c}/points?wait=true`, creating the
//!   collection with cosine distance on first write
//! - count: `POST /collections/{c}/points/count`
//!
//! Qdrant only accepts UUIDs or unsigned integers as point ids.

use async_trait::async_trait;
use reflexa_core::error::MemoryError;
use reflexa_core::memory::{VectorMatch, VectorStore};
use serde::Deserialize;
use tracing::{debug, info, warn};

pub const DEFAULT_URL: &str = "http://localhost:6333";

/// A Qdrant-backed vector store.
pub struct QdrantVectorStore {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl QdrantVectorStore {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{path}", self.base_url));
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    /// Qdrant rejects anything but UUIDs and unsigned integers.
    fn point_id(id: &str) -> Result<serde_json::Value, MemoryError> {
        if let Ok(n) = id.parse::<u64>() {
            return Ok(serde_json::json!(n));
        }
        uuid::Uuid::parse_str(id)
            .map(|u| serde_json::json!(u.to_string()))
            .map_err(|_| {
                MemoryError::Storage(format!(
                    "Qdrant point id '{id}' must be a UUID or an unsigned integer"
                ))
            })
    }

    async fn create_collection(&self, collection: &str, dims: usize) -> Result<(), MemoryError> {
        let body = serde_json::json!({
            "vectors": { "size": dims, "distance": "Cosine" }
        });
        let response = self
            .request(reqwest::Method::PUT, &format!("/collections/{collection}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| MemoryError::Storage(format!("Qdrant unreachable: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(MemoryError::Storage(format!(
                "Creating collection '{collection}' failed ({status}): {text}"
            )));
        }

        info!(collection, dims, "Created Qdrant collection");
        Ok(())
    }

    async fn put_points(
        &self,
        collection: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, MemoryError> {
        self.request(
            reqwest::Method::PUT,
            &format!("/collections/{collection}/points?wait=true"),
        )
        .json(body)
        .send()
        .await
        .map_err(|e| MemoryError::Storage(format!("Qdrant unreachable: {e}")))
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    fn name(&self) -> &str {
        "qdrant"
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorMatch>, MemoryError> {
        let body = serde_json::json!({
            "vector": vector,
            "limit": top_k,
            "with_payload": true,
        });

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{collection}/points/search"),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("Qdrant unreachable: {e}")))?;

        let status = response.status().as_u16();
        if status == 404 {
            debug!(collection, "Qdrant collection absent, no matches");
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(collection, status, body = %text, "Qdrant search failed");
            return Err(MemoryError::QueryFailed(format!("Qdrant search ({status}): {text}")));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("Qdrant search response: {e}")))?;

        Ok(parsed.into_matches())
    }

    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        vector: Vec<f32>,
        payload: serde_json::Value,
    ) -> Result<(), MemoryError> {
        let dims = vector.len();
        let body = serde_json::json!({
            "points": [{
                "id": Self::point_id(id)?,
                "vector": vector,
                "payload": payload,
            }]
        });

        let mut response = self.put_points(collection, &body).await?;
        if response.status().as_u16() == 404 {
            self.create_collection(collection, dims).await?;
            response = self.put_points(collection, &body).await?;
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(MemoryError::Storage(format!("Qdrant upsert ({status}): {text}")));
        }

        debug!(collection, id, "Upserted Qdrant point");
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize, MemoryError> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{collection}/points/count"),
            )
            .json(&serde_json::json!({ "exact": true }))
            .send()
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("Qdrant unreachable: {e}")))?;

        if response.status().as_u16() == 404 {
            return Ok(0);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(MemoryError::QueryFailed(format!("Qdrant count ({status})")));
        }

        let parsed: CountResponse = response
            .json()
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("Qdrant count response: {e}")))?;
        Ok(parsed.result.count)
    }
}

// --- Qdrant API types ---

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: serde_json::Value,
    score: f32,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

impl SearchResponse {
    fn into_matches(self) -> Vec<VectorMatch> {
        self.result
            .into_iter()
            .map(|p| VectorMatch {
                id: match p.id {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                },
                score: p.score,
                payload: p.payload.unwrap_or(serde_json::Value::Null),
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    result: CountResult,
}

#[derive(Debug, Deserialize)]
struct CountResult {
    count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_ids_must_be_uuid_or_integer() {
        assert_eq!(QdrantVectorStore::point_id("42").unwrap(), serde_json::json!(42));
        let uuid = "5c56c793-69f3-4fbf-87e6-c4bf54c28c26";
        assert_eq!(QdrantVectorStore::point_id(uuid).unwrap(), serde_json::json!(uuid));
        assert!(QdrantVectorStore::point_id("memory-1").is_err());
    }

    #[test]
    fn search_response_maps_ids_and_payloads() {
        let data = r#"{
            "result": [
                {"id": "5c56c793-69f3-4fbf-87e6-c4bf54c28c26", "version": 3, "score": 0.87,
                 "payload": {"content": "prefers dark mode"}},
                {"id": 7, "version": 1, "score": 0.42}
            ],
            "status": "ok",
            "time": 0.001
        }"#;
        let parsed: SearchResponse = serde_json::from_str(data).unwrap();
        let matches = parsed.into_matches();
        assert_eq!(matches[0].id, "5c56c793-69f3-4fbf-87e6-c4bf54c28c26");
        assert_eq!(matches[0].content(), Some("prefers dark mode"));
        assert_eq!(matches[1].id, "7");
        assert!(matches[1].payload.is_null());
    }

    #[test]
    fn base_url_is_trimmed() {
        let store = QdrantVectorStore::new("http://qdrant:6333/", None);
        assert_eq!(store.base_url, "http://qdrant:6333");
        assert_eq!(store.name(), "qdrant");
    }
}
