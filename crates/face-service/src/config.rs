use anyhow::Result;
use std::{env, path::PathBuf, str::FromStr};

/// Configuration for the face pipeline service, loaded from the environment.
#[derive(Debug, Clone)]
pub struct FaceServiceConfig {
    /// Address to bind the HTTP server to
    pub bind_addr: String,

    /// Node ID for this service instance
    pub node_id: String,

    /// Directory holding the ONNX model files
    pub models_dir: PathBuf,

    /// Detector model file name within `models_dir`
    pub detector_model: String,

    /// Embedder model file name within `models_dir`
    pub embedder_model: String,

    /// Preferred ONNX execution provider (CPU, CUDA, TensorRT)
    pub execution_provider: String,

    /// Confidence floor for face detections
    pub detection_threshold: f32,

    /// Minimum face size (min of width/height) in pixels
    pub min_face_size: u32,

    /// Cap on the number of faces returned per image
    pub max_faces: usize,

    /// Embedder input size (width, height); the models require 112x112
    pub input_size: (u32, u32),

    /// Quality floor for embedding generation
    pub min_quality_score: f32,

    /// Reserved liveness movement threshold
    pub liveness_movement_threshold: f32,

    /// Per-request deadline in seconds
    pub request_timeout_secs: u64,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_input_size() -> (u32, u32) {
    env::var("INPUT_SIZE")
        .ok()
        .and_then(|v| {
            let (w, h) = v.split_once(',')?;
            Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
        })
        .unwrap_or((112, 112))
}

impl FaceServiceConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr =
            env::var("FACE_SERVICE_ADDR").unwrap_or_else(|_| "0.0.0.0:8085".to_string());

        let node_id = env::var("NODE_ID").unwrap_or_else(|_| {
            format!(
                "face-service-{}",
                hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
            )
        });

        let models_dir =
            PathBuf::from(env::var("MODELS_DIR").unwrap_or_else(|_| "models".to_string()));
        let detector_model =
            env::var("DETECTOR_MODEL").unwrap_or_else(|_| "det_10g.onnx".to_string());
        let embedder_model =
            env::var("EMBEDDER_MODEL").unwrap_or_else(|_| "w600k_r50.onnx".to_string());
        let execution_provider =
            env::var("ONNX_EXECUTION_PROVIDER").unwrap_or_else(|_| "CPU".to_string());

        Ok(Self {
            bind_addr,
            node_id,
            models_dir,
            detector_model,
            embedder_model,
            execution_provider,
            detection_threshold: env_parse("DETECTION_THRESHOLD", 0.5),
            min_face_size: env_parse("MIN_FACE_SIZE", 50),
            max_faces: env_parse("MAX_FACES", 10),
            input_size: env_input_size(),
            min_quality_score: env_parse("MIN_QUALITY_SCORE", 0.3),
            liveness_movement_threshold: env_parse("LIVENESS_MOVEMENT_THRESHOLD", 0.02),
            request_timeout_secs: env_parse("FACE_SERVICE_TIMEOUT", 30),
        })
    }

    pub fn detector_path(&self) -> PathBuf {
        self.models_dir.join(&self.detector_model)
    }

    pub fn embedder_path(&self) -> PathBuf {
        self.models_dir.join(&self.embedder_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_contract() {
        let config = FaceServiceConfig::from_env().unwrap();
        assert_eq!(config.detection_threshold, 0.5);
        assert_eq!(config.min_face_size, 50);
        assert_eq!(config.max_faces, 10);
        assert_eq!(config.input_size, (112, 112));
        assert_eq!(config.min_quality_score, 0.3);
        assert_eq!(config.liveness_movement_threshold, 0.02);
    }

    #[test]
    fn model_paths_join_models_dir() {
        let config = FaceServiceConfig::from_env().unwrap();
        assert!(config
            .detector_path()
            .to_string_lossy()
            .ends_with("det_10g.onnx"));
        assert!(config
            .embedder_path()
            .to_string_lossy()
            .ends_with("w600k_r50.onnx"));
    }
}
