//! ONNX model registry.
//!
//! Lazily loads the detector and embedder graphs on first use, hands out
//! shared session handles, and provides warmup/clear lifecycle operations.
//! Handles are process-scoped; per-call tensors are not shared.

use crate::config::FaceServiceConfig;
use crate::error::PipelineError;
use ndarray::{Array4, ArrayD};
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

pub type SessionHandle = Arc<Mutex<Session>>;

const DETECTOR_WARMUP_SHAPE: (usize, usize, usize, usize) = (1, 3, 640, 640);

pub struct ModelRegistry {
    detector_path: PathBuf,
    embedder_path: PathBuf,
    execution_provider: String,
    embedder_input_size: (u32, u32),
    detector: RwLock<Option<SessionHandle>>,
    embedder: RwLock<Option<SessionHandle>>,
    provider_used: RwLock<String>,
}

impl ModelRegistry {
    pub fn new(config: &FaceServiceConfig) -> Self {
        Self {
            detector_path: config.detector_path(),
            embedder_path: config.embedder_path(),
            execution_provider: config.execution_provider.clone(),
            embedder_input_size: config.input_size,
            detector: RwLock::new(None),
            embedder: RwLock::new(None),
            provider_used: RwLock::new("CPU".to_string()),
        }
    }

    /// Get the detector session, loading it on first call.
    pub fn get_detector(&self) -> Result<SessionHandle, PipelineError> {
        self.get_or_load(&self.detector, &self.detector_path)
    }

    /// Get the embedder session, loading it on first call.
    pub fn get_embedder(&self) -> Result<SessionHandle, PipelineError> {
        self.get_or_load(&self.embedder, &self.embedder_path)
    }

    /// Whether both graphs are currently loaded.
    pub fn models_loaded(&self) -> bool {
        let detector = self.detector.read().map(|s| s.is_some()).unwrap_or(false);
        let embedder = self.embedder.read().map(|s| s.is_some()).unwrap_or(false);
        detector && embedder
    }

    /// Drop all session handles.
    pub fn clear(&self) {
        if let Ok(mut slot) = self.detector.write() {
            *slot = None;
        }
        if let Ok(mut slot) = self.embedder.write() {
            *slot = None;
        }
        telemetry::metrics::FACE_MODELS_LOADED.set(0);
    }

    /// Load both graphs and run one zero-tensor inference through each.
    pub fn warmup(&self) -> Result<(), PipelineError> {
        let (n, c, h, w) = DETECTOR_WARMUP_SHAPE;
        let detector_input = Array4::<f32>::zeros((n, c, h, w)).into_dyn();
        self.run_detector(detector_input)?;

        let (ew, eh) = self.embedder_input_size;
        let embedder_input = Array4::<f32>::zeros((1, 3, eh as usize, ew as usize)).into_dyn();
        self.run_embedder(embedder_input)?;

        tracing::info!("models loaded and warmed up");
        Ok(())
    }

    /// Run the detector and return every output as (dims, data) in graph
    /// output order.
    pub fn run_detector(
        &self,
        input: ArrayD<f32>,
    ) -> Result<Vec<(Vec<usize>, Vec<f32>)>, PipelineError> {
        let handle = self.get_detector()?;
        let tensor = Value::from_array(input)?;
        let mut session = lock_session(&handle)?;

        let started = Instant::now();
        let outputs = session.run(ort::inputs![tensor])?;
        self.observe_inference("detector", started);

        let mut extracted = Vec::with_capacity(outputs.len());
        for i in 0..outputs.len() {
            let (shape, data) = outputs[i].try_extract_tensor::<f32>()?;
            let dims: Vec<usize> = shape.as_ref().iter().map(|&d| d as usize).collect();
            extracted.push((dims, data.to_vec()));
        }
        Ok(extracted)
    }

    /// Run the embedder and return its first output as (dims, data).
    pub fn run_embedder(
        &self,
        input: ArrayD<f32>,
    ) -> Result<(Vec<usize>, Vec<f32>), PipelineError> {
        let handle = self.get_embedder()?;
        let tensor = Value::from_array(input)?;
        let mut session = lock_session(&handle)?;

        let started = Instant::now();
        let outputs = session.run(ort::inputs![tensor])?;
        self.observe_inference("embedder", started);

        if outputs.len() == 0 {
            return Err(PipelineError::Inference(
                "embedder produced no outputs".to_string(),
            ));
        }
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: Vec<usize> = shape.as_ref().iter().map(|&d| d as usize).collect();
        Ok((dims, data.to_vec()))
    }

    fn observe_inference(&self, model: &str, started: Instant) {
        let provider = self
            .provider_used
            .read()
            .map(|p| p.clone())
            .unwrap_or_else(|_| "CPU".to_string());
        telemetry::metrics::FACE_INFERENCE_TIME
            .with_label_values(&[model, &provider])
            .observe(started.elapsed().as_secs_f64());
    }

    fn get_or_load(
        &self,
        slot: &RwLock<Option<SessionHandle>>,
        path: &Path,
    ) -> Result<SessionHandle, PipelineError> {
        if let Ok(guard) = slot.read() {
            if let Some(handle) = guard.as_ref() {
                return Ok(handle.clone());
            }
        }

        let mut guard = slot
            .write()
            .map_err(|_| PipelineError::Inference("model registry lock poisoned".to_string()))?;
        if let Some(handle) = guard.as_ref() {
            return Ok(handle.clone());
        }

        let (session, provider) = self.create_session(path)?;
        if let Ok(mut used) = self.provider_used.write() {
            *used = provider;
        }
        telemetry::metrics::FACE_MODELS_LOADED.inc();

        let handle = Arc::new(Mutex::new(session));
        *guard = Some(handle.clone());
        Ok(handle)
    }

    /// Create an ONNX session with execution-provider fallback.
    fn create_session(&self, path: &Path) -> Result<(Session, String), PipelineError> {
        if !path.exists() {
            return Err(PipelineError::ModelNotLoaded(format!(
                "model file not found at {}",
                path.display()
            )));
        }

        match self.execution_provider.to_uppercase().as_str() {
            "TENSORRT" => {
                tracing::info!(model = %path.display(), "attempting TensorRT");
                let result = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .with_execution_providers([
                        TensorRTExecutionProvider::default().build(),
                        CUDAExecutionProvider::default().build(),
                        CPUExecutionProvider::default().build(),
                    ])?
                    .commit_from_file(path);

                match result {
                    Ok(session) => Ok((session, "TensorRT".to_string())),
                    Err(e) => {
                        tracing::warn!(error = %e, "TensorRT failed, trying CUDA");
                        self.try_cuda(path)
                    }
                }
            }
            "CUDA" => self.try_cuda(path),
            _ => self.try_cpu(path),
        }
    }

    fn try_cuda(&self, path: &Path) -> Result<(Session, String), PipelineError> {
        tracing::info!(model = %path.display(), "attempting CUDA");
        let result = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_execution_providers([
                CUDAExecutionProvider::default().build(),
                CPUExecutionProvider::default().build(),
            ])?
            .commit_from_file(path);

        match result {
            Ok(session) => Ok((session, "CUDA".to_string())),
            Err(e) => {
                tracing::warn!(error = %e, "CUDA failed, using CPU");
                self.try_cpu(path)
            }
        }
    }

    fn try_cpu(&self, path: &Path) -> Result<(Session, String), PipelineError> {
        tracing::info!(model = %path.display(), "using CPU");
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(path)
            .map_err(|e| {
                PipelineError::ModelNotLoaded(format!(
                    "failed to load model from {}: {e}",
                    path.display()
                ))
            })?;
        Ok((session, "CPU".to_string()))
    }
}

fn lock_session(handle: &SessionHandle) -> Result<std::sync::MutexGuard<'_, Session>, PipelineError> {
    handle
        .lock()
        .map_err(|_| PipelineError::Inference("model session lock poisoned".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_missing_models() -> ModelRegistry {
        let config = FaceServiceConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            node_id: "test".to_string(),
            models_dir: PathBuf::from("/nonexistent"),
            detector_model: "det.onnx".to_string(),
            embedder_model: "emb.onnx".to_string(),
            execution_provider: "CPU".to_string(),
            detection_threshold: 0.5,
            min_face_size: 50,
            max_faces: 10,
            input_size: (112, 112),
            min_quality_score: 0.3,
            liveness_movement_threshold: 0.02,
            request_timeout_secs: 30,
        };
        ModelRegistry::new(&config)
    }

    #[test]
    fn missing_model_file_is_model_not_loaded() {
        let registry = registry_with_missing_models();
        let err = registry.get_detector().unwrap_err();
        assert!(matches!(err, PipelineError::ModelNotLoaded(_)));
        let err = registry.get_embedder().unwrap_err();
        assert!(matches!(err, PipelineError::ModelNotLoaded(_)));
    }

    #[test]
    fn models_loaded_is_false_before_any_load() {
        let registry = registry_with_missing_models();
        assert!(!registry.models_loaded());
    }

    #[test]
    fn clear_is_idempotent() {
        let registry = registry_with_missing_models();
        registry.clear();
        registry.clear();
        assert!(!registry.models_loaded());
    }
}
