use crate::error::PipelineError;
use crate::pipeline::DetectedFace;
use crate::state::FaceServiceState;
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use common::face::{
    BatchEmbedItem, BatchEmbeddingResponse, BoundingBox, DetectionResponse, EmbeddingResponse,
    HealthResponse, LivenessResponse,
};
use serde_json::json;
use std::collections::HashMap;
use std::time::Instant;

/// Detect all faces in an uploaded image.
pub async fn detect(
    State(state): State<FaceServiceState>,
    multipart: Multipart,
) -> Result<Json<DetectionResponse>, PipelineError> {
    let mut fields = collect_fields(multipart).await?;
    let image = require_field(&mut fields, "image")?;

    let started = Instant::now();
    let result = state.detect(image).await;
    observe("detect", &result, started);

    let faces = result?;
    tracing::info!(count = faces.len(), "detect request completed");
    Ok(Json(DetectionResponse {
        count: faces.len(),
        faces: faces.iter().map(to_bounding_box).collect(),
    }))
}

/// Generate an identity embedding for the primary face in an image.
pub async fn embed(
    State(state): State<FaceServiceState>,
    multipart: Multipart,
) -> Result<Json<EmbeddingResponse>, PipelineError> {
    let mut fields = collect_fields(multipart).await?;
    let image = require_field(&mut fields, "image")?;

    let started = Instant::now();
    let result = state.embed(image).await;
    observe("embed", &result, started);

    let outcome = result?;
    tracing::info!(
        quality = outcome.quality.overall,
        confidence = outcome.face.confidence,
        "embed request completed"
    );
    Ok(Json(EmbeddingResponse {
        embedding: outcome.embedding,
        quality_score: outcome.quality.overall,
        bbox: Some(to_bounding_box(&outcome.face)),
    }))
}

/// Embed every uploaded image in one batched forward pass. Image fields
/// succeed or fail independently.
pub async fn embed_batch(
    State(state): State<FaceServiceState>,
    multipart: Multipart,
) -> Result<Json<BatchEmbeddingResponse>, PipelineError> {
    let images = collect_image_fields(multipart).await?;
    if images.is_empty() {
        return Err(PipelineError::InvalidImage(
            "no image fields in multipart body".to_string(),
        ));
    }

    let started = Instant::now();
    let result = state.embed_batch(images).await;
    observe("embed_batch", &result, started);

    let outcomes = result?;
    let results: Vec<BatchEmbedItem> = outcomes
        .into_iter()
        .map(|outcome| match outcome {
            Ok(o) => BatchEmbedItem {
                success: true,
                embedding: Some(o.embedding),
                quality_score: Some(o.quality.overall),
                bbox: Some(to_bounding_box(&o.face)),
                error: None,
            },
            Err(e) => BatchEmbedItem {
                success: false,
                embedding: None,
                quality_score: None,
                bbox: None,
                error: Some(e.kind().to_string()),
            },
        })
        .collect();

    tracing::info!(
        count = results.len(),
        succeeded = results.iter().filter(|r| r.success).count(),
        "batch embed request completed"
    );
    Ok(Json(BatchEmbeddingResponse {
        count: results.len(),
        results,
    }))
}

/// Two-frame liveness verdict.
pub async fn liveness(
    State(state): State<FaceServiceState>,
    multipart: Multipart,
) -> Result<Json<LivenessResponse>, PipelineError> {
    let mut fields = collect_fields(multipart).await?;
    let frame1 = require_field(&mut fields, "frame1")?;
    let frame2 = require_field(&mut fields, "frame2")?;

    let started = Instant::now();
    let result = state.liveness(frame1, frame2).await;
    observe("liveness", &result, started);

    let verdict = result?;
    tracing::info!(
        is_live = verdict.is_live,
        confidence = verdict.confidence,
        reason = ?verdict.reason,
        "liveness request completed"
    );
    Ok(Json(LivenessResponse {
        is_live: verdict.is_live,
        confidence: verdict.confidence,
        reason: verdict.reason,
    }))
}

/// Health check endpoint.
pub async fn health(State(state): State<FaceServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        models_loaded: state.models_loaded(),
    })
}

/// Service information.
pub async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": "face-service",
        "version": common::VERSION,
    }))
}

/// Metrics endpoint (Prometheus format).
pub async fn metrics() -> impl IntoResponse {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = telemetry::metrics::REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("failed to encode metrics: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response();
    }

    match String::from_utf8(buffer) {
        Ok(s) => s.into_response(),
        Err(e) => {
            tracing::error!("failed to convert metrics to UTF-8: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to convert metrics",
            )
                .into_response()
        }
    }
}

fn to_bounding_box(face: &DetectedFace) -> BoundingBox {
    let (x1, y1, x2, y2) = face.bbox;
    BoundingBox {
        x1,
        y1,
        x2,
        y2,
        confidence: face.confidence,
    }
}

/// Gather every `image*` field of a batch upload, in order.
async fn collect_image_fields(mut multipart: Multipart) -> Result<Vec<Vec<u8>>, PipelineError> {
    let mut images = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PipelineError::InvalidImage(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if !name.starts_with("image") {
            continue;
        }
        let data = field
            .bytes()
            .await
            .map_err(|e| PipelineError::InvalidImage(format!("failed to read upload: {e}")))?;
        if !data.is_empty() {
            images.push(data.to_vec());
        }
    }
    Ok(images)
}

async fn collect_fields(
    mut multipart: Multipart,
) -> Result<HashMap<String, Vec<u8>>, PipelineError> {
    let mut fields = HashMap::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PipelineError::InvalidImage(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| PipelineError::InvalidImage(format!("failed to read upload: {e}")))?;
        fields.insert(name, data.to_vec());
    }
    Ok(fields)
}

fn require_field(
    fields: &mut HashMap<String, Vec<u8>>,
    name: &str,
) -> Result<Vec<u8>, PipelineError> {
    fields
        .remove(name)
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| PipelineError::InvalidImage(format!("missing multipart field '{name}'")))
}

fn observe<T>(operation: &str, result: &Result<T, PipelineError>, started: Instant) {
    let status = match result {
        Ok(_) => "success",
        Err(e) => e.kind(),
    };
    telemetry::metrics::FACE_PIPELINE_REQUESTS
        .with_label_values(&[operation, status])
        .inc();
    telemetry::metrics::FACE_PIPELINE_LATENCY
        .with_label_values(&[operation])
        .observe(started.elapsed().as_secs_f64());
}
