//! Vector similarity utilities shared by the brute-force stores.
//!
//! - Cosine similarity
//! - Top-k ranking of scored points
//! - Little-endian f32 blob encoding for on-disk vectors

use reflexa_core::memory::VectorMatch;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if the vectors differ in length, are empty, or either is all zeros.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// A stored point: id, vector and payload.
#[derive(Debug, Clone)]
pub struct StoredPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

/// Rank points by cosine similarity to `query`, best first, keeping `top_k`.
///
/// Ties keep insertion order so results are deterministic.
pub fn rank<'a>(
    points: impl IntoIterator<Item = &'a StoredPoint>,
    query: &[f32],
    top_k: usize,
) -> Vec<VectorMatch> {
    let mut scored: Vec<(f32, &StoredPoint)> = points
        .into_iter()
        .map(|p| (cosine_similarity(&p.vector, query), p))
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    scored
        .into_iter()
        .map(|(score, p)| VectorMatch {
            id: p.id.clone(),
            score,
            payload: p.payload.clone(),
        })
        .collect()
}

/// Serialize a vector to little-endian bytes.
pub fn to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize little-endian bytes into a vector. Trailing bytes are ignored.
pub fn from_blob(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(id: &str, vector: Vec<f32>) -> StoredPoint {
        StoredPoint {
            id: id.into(),
            vector,
            payload: serde_json::json!({ "content": id }),
        }
    }

    #[test]
    fn cosine_identical_vectors() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn rank_orders_by_similarity_and_truncates() {
        let points = vec![
            point("far", vec![0.0, 1.0]),
            point("near", vec![1.0, 0.1]),
            point("exact", vec![1.0, 0.0]),
        ];
        let hits = rank(&points, &[1.0, 0.0], 2);
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, ["exact", "near"]);
        assert_eq!(hits[0].content(), Some("exact"));
    }

    #[test]
    fn rank_empty_collection() {
        assert!(rank(&Vec::<StoredPoint>::new(), &[1.0], 1).is_empty());
    }

    #[test]
    fn blob_round_trip() {
        let v = vec![0.25, -1.5, 3.0];
        let blob = to_blob(&v);
        assert_eq!(blob.len(), 12);
        assert_eq!(from_blob(&blob), v);
    }
}
