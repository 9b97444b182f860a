use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Error taxonomy of the face pipeline.
///
/// Every stage returns one of these kinds; conversion to HTTP happens only
/// at the API boundary.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("no face detected in image")]
    NoFace,

    #[error("face quality too low ({score:.2}, minimum {minimum:.2})")]
    LowQuality { score: f32, minimum: f32 },

    #[error("model not loaded: {0}")]
    ModelNotLoaded(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("request deadline of {0}s exceeded")]
    Timeout(u64),
}

impl PipelineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidImage(_) | Self::NoFace | Self::LowQuality { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::ModelNotLoaded(_) | Self::Inference(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Stable machine-readable kind, used in responses and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidImage(_) => "invalid_image",
            Self::NoFace => "no_face",
            Self::LowQuality { .. } => "low_quality",
            Self::ModelNotLoaded(_) => "model_not_loaded",
            Self::Inference(_) => "inference_error",
            Self::Timeout(_) => "timeout",
        }
    }
}

impl From<ort::Error> for PipelineError {
    fn from(e: ort::Error) -> Self {
        Self::Inference(e.to_string())
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.kind(),
            "detail": self.to_string(),
        }));
        (self.status_code(), body).into_response()
    }
}
