use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt::{self, Display};

#[derive(Debug)]
pub struct ApiError {
  status: StatusCode,
  message: String,
}

impl ApiError {
  pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
    Self {
      status,
      message: message.into(),
    }
  }

  pub fn bad_request(message: impl Into<String>) -> Self {
    Self::new(StatusCode::BAD_REQUEST, message)
  }

  pub fn not_found(message: impl Into<String>) -> Self {
    Self::new(StatusCode::NOT_FOUND, message)
  }

  pub fn unavailable(message: impl Into<String>) -> Self {
    Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
  }

  pub fn internal(message: impl Into<String>) -> Self {
    Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let body = Json(ErrorBody {
      error: self.message,
    });
    (self.status, body).into_response()
  }
}

impl Display for ApiError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} ({})", self.message, self.status)
  }
}

impl std::error::Error for ApiError {}

impl From<anyhow::Error> for ApiError {
  fn from(value: anyhow::Error) -> Self {
    Self::internal(value.to_string())
  }
}

#[derive(Serialize)]
struct ErrorBody {
  error: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn constructors_set_status() {
    assert_eq!(
      ApiError::bad_request("x").status,
      StatusCode::BAD_REQUEST
    );
    assert_eq!(ApiError::not_found("x").status, StatusCode::NOT_FOUND);
    assert_eq!(
      ApiError::unavailable("x").status,
      StatusCode::SERVICE_UNAVAILABLE
    );
  }
}
