use std::env;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
  pub bind_addr: String,
  pub database_url: Option<String>,
  pub face_service_url: String,
  pub face_service_timeout_secs: u64,
  pub default_recognition_threshold: f32,
}

impl CoordinatorConfig {
  pub fn from_env() -> Self {
    let bind_addr = env::var("COORDINATOR_ADDR").unwrap_or_else(|_| "0.0.0.0:8086".to_string());
    let database_url = env::var("DATABASE_URL").ok();
    let face_service_url =
      env::var("FACE_SERVICE_URL").unwrap_or_else(|_| "http://127.0.0.1:8085".to_string());

    let face_service_timeout_secs = env::var("FACE_SERVICE_TIMEOUT")
      .ok()
      .and_then(|v| v.parse::<u64>().ok())
      .unwrap_or(30);

    let default_recognition_threshold = env::var("DEFAULT_RECOGNITION_THRESHOLD")
      .ok()
      .and_then(|v| v.parse::<f32>().ok())
      .unwrap_or(0.75);

    Self {
      bind_addr,
      database_url,
      face_service_url,
      face_service_timeout_secs,
      default_recognition_threshold,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_sane() {
    let config = CoordinatorConfig::from_env();
    assert_eq!(config.face_service_timeout_secs, 30);
    assert!((config.default_recognition_threshold - 0.75).abs() < 1e-6);
  }
}
