//! HTTP client for the face pipeline service.

use async_trait::async_trait;
use common::face::EmbeddingResponse;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaceClientError {
  #[error("no face detected")]
  NoFace,

  /// The pipeline rejected the image (invalid payload or low quality).
  #[error("image rejected: {0}")]
  Rejected(String),

  #[error("face service request timed out")]
  Timeout,

  #[error("face service unavailable: {0}")]
  Unavailable(String),
}

#[async_trait]
pub trait FaceClient: Send + Sync {
  /// Generate an embedding for the primary face in the image.
  async fn embed(&self, image: Vec<u8>) -> Result<EmbeddingResponse, FaceClientError>;

  /// Whether the face service reports itself healthy.
  async fn health(&self) -> bool;
}

pub struct HttpFaceClient {
  base_url: String,
  client: reqwest::Client,
}

impl HttpFaceClient {
  pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, FaceClientError> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(timeout_secs))
      .build()
      .map_err(|e| FaceClientError::Unavailable(e.to_string()))?;
    Ok(Self {
      base_url: base_url.into().trim_end_matches('/').to_string(),
      client,
    })
  }

  fn map_send_error(e: reqwest::Error) -> FaceClientError {
    if e.is_timeout() {
      FaceClientError::Timeout
    } else {
      FaceClientError::Unavailable(e.to_string())
    }
  }
}

#[async_trait]
impl FaceClient for HttpFaceClient {
  async fn embed(&self, image: Vec<u8>) -> Result<EmbeddingResponse, FaceClientError> {
    let part = reqwest::multipart::Part::bytes(image)
      .file_name("face.jpg")
      .mime_str("image/jpeg")
      .map_err(|e| FaceClientError::Unavailable(e.to_string()))?;
    let form = reqwest::multipart::Form::new().part("image", part);

    let response = self
      .client
      .post(format!("{}/api/v1/embed", self.base_url))
      .multipart(form)
      .send()
      .await
      .map_err(Self::map_send_error)?;

    let status = response.status();
    if status == reqwest::StatusCode::BAD_REQUEST {
      let body: serde_json::Value = response.json().await.unwrap_or_default();
      let kind = body
        .get("error")
        .and_then(|v| v.as_str())
        .unwrap_or("invalid_image");
      return Err(if kind == "no_face" {
        FaceClientError::NoFace
      } else {
        let detail = body
          .get("detail")
          .and_then(|v| v.as_str())
          .unwrap_or(kind)
          .to_string();
        FaceClientError::Rejected(detail)
      });
    }

    if !status.is_success() {
      return Err(FaceClientError::Unavailable(format!(
        "face service returned {status}"
      )));
    }

    response
      .json::<EmbeddingResponse>()
      .await
      .map_err(|e| FaceClientError::Unavailable(format!("malformed embed response: {e}")))
  }

  async fn health(&self) -> bool {
    let response = self
      .client
      .get(format!("{}/health", self.base_url))
      .timeout(Duration::from_secs(5))
      .send()
      .await;

    match response {
      Ok(r) if r.status().is_success() => r
        .json::<common::face::HealthResponse>()
        .await
        .map(|h| h.status == "healthy")
        .unwrap_or(false),
      _ => false,
    }
  }
}
