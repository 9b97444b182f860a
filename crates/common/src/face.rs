//! Wire types shared between the face pipeline service and its consumers.

use serde::{Deserialize, Serialize};

/// Dimensionality of the identity embeddings produced by the pipeline.
pub const EMBEDDING_DIM: usize = 512;

/// Face bounding box in original image pixels, with detection confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }
}

/// Response body for `POST /api/v1/detect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResponse {
    pub faces: Vec<BoundingBox>,
    pub count: usize,
}

/// Response body for `POST /api/v1/embed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// 512-dimensional L2-normalized embedding vector.
    pub embedding: Vec<f32>,
    /// Overall quality score of the face image in [0, 1].
    pub quality_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
}

/// One image's outcome within a batch embedding request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEmbedItem {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response body for `POST /api/v1/embed/batch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEmbeddingResponse {
    pub results: Vec<BatchEmbedItem>,
    pub count: usize,
}

/// Why a liveness check produced its verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessReason {
    NoFaceFrame1,
    NoFaceFrame2,
    Static,
    Excessive,
    Insufficient,
    Natural,
}

/// Response body for `POST /api/v1/liveness`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub is_live: bool,
    pub confidence: f32,
    pub reason: LivenessReason,
}

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub models_loaded: bool,
}

/// Cosine similarity between two vectors of equal length.
///
/// For L2-normalized embeddings this is the plain dot product.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Euclidean distance between two vectors of equal length.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_normalized_vectors_is_one() {
        let v = vec![0.6, 0.8, 0.0, 0.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn euclidean_relates_to_cosine_for_unit_vectors() {
        // For unit vectors, d^2 = 2 - 2 * cos.
        let a = vec![0.6, 0.8, 0.0];
        let b = vec![0.8, 0.6, 0.0];
        let d = euclidean_distance(&a, &b);
        let cos = cosine_similarity(&a, &b);
        assert!((d * d - (2.0 - 2.0 * cos)).abs() < 1e-5);
        assert_eq!(euclidean_distance(&a, &a), 0.0);
    }

    #[test]
    fn liveness_reason_serializes_snake_case() {
        let json = serde_json::to_string(&LivenessReason::NoFaceFrame1).unwrap();
        assert_eq!(json, "\"no_face_frame1\"");
        let json = serde_json::to_string(&LivenessReason::Natural).unwrap();
        assert_eq!(json, "\"natural\"");
    }

    #[test]
    fn bounding_box_dimensions() {
        let bbox = BoundingBox {
            x1: 10,
            y1: 20,
            x2: 110,
            y2: 170,
            confidence: 0.9,
        };
        assert_eq!(bbox.width(), 100);
        assert_eq!(bbox.height(), 150);
    }
}
