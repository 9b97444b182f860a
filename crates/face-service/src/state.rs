use crate::config::FaceServiceConfig;
use crate::error::PipelineError;
use crate::models::ModelRegistry;
use crate::pipeline::{
    AlignedFace, BgrImage, DetectedFace, FaceAligner, FaceDetector, FaceEmbedder,
    LivenessDetector, LivenessResult, QualityAssessor, QualityScore,
};
use std::sync::Arc;
use std::time::Duration;

/// Shared service state. Cloning is cheap; all clones share the model
/// registry and pipeline components.
#[derive(Clone)]
pub struct FaceServiceState {
    inner: Arc<StateInner>,
}

struct StateInner {
    config: FaceServiceConfig,
    registry: Arc<ModelRegistry>,
    detector: FaceDetector,
    aligner: FaceAligner,
    quality: QualityAssessor,
    embedder: FaceEmbedder,
    liveness: LivenessDetector,
}

/// Result of a successful embed request.
pub struct EmbedOutcome {
    pub embedding: Vec<f32>,
    pub quality: QualityScore,
    pub face: DetectedFace,
}

impl FaceServiceState {
    pub fn new(config: FaceServiceConfig) -> Self {
        let registry = Arc::new(ModelRegistry::new(&config));
        let detector = FaceDetector::new(registry.clone(), &config);
        let liveness = LivenessDetector::new(detector.clone(), &config);
        Self {
            inner: Arc::new(StateInner {
                aligner: FaceAligner::new(config.input_size),
                quality: QualityAssessor::new(),
                embedder: FaceEmbedder::new(registry.clone(), config.input_size),
                liveness,
                detector,
                registry,
                config,
            }),
        }
    }

    pub fn config(&self) -> &FaceServiceConfig {
        &self.inner.config
    }

    pub fn models_loaded(&self) -> bool {
        self.inner.registry.models_loaded()
    }

    /// Drop the loaded model handles.
    pub fn clear_models(&self) {
        self.inner.registry.clear();
    }

    /// Load and warm up both models off the async runtime.
    pub async fn warmup(&self) -> Result<(), PipelineError> {
        self.run_blocking(|inner| inner.registry.warmup()).await
    }

    /// Detect all faces in the image. Zero faces is a valid result.
    pub async fn detect(&self, bytes: Vec<u8>) -> Result<Vec<DetectedFace>, PipelineError> {
        self.run_blocking(move |inner| {
            let image = BgrImage::decode(&bytes)?;
            inner.detector.detect(&image)
        })
        .await
    }

    /// Detect the primary face, gate on quality, align and embed it.
    pub async fn embed(&self, bytes: Vec<u8>) -> Result<EmbedOutcome, PipelineError> {
        self.run_blocking(move |inner| {
            let image = BgrImage::decode(&bytes)?;
            let faces = inner.detector.detect(&image)?;
            let face = faces.into_iter().next().ok_or(PipelineError::NoFace)?;

            let quality = inner.quality.assess(&image, &face);
            if quality.overall < inner.config.min_quality_score {
                return Err(PipelineError::LowQuality {
                    score: quality.overall,
                    minimum: inner.config.min_quality_score,
                });
            }

            let aligned = inner.aligner.align(&image, &face.landmarks);
            let embedding = inner.embedder.embed(&aligned)?;

            Ok(EmbedOutcome {
                embedding,
                quality,
                face,
            })
        })
        .await
    }

    /// Embed several images with a single embedder forward pass.
    ///
    /// Each image fails or succeeds independently; only infrastructure
    /// errors (a failed batch inference) fail the whole request.
    pub async fn embed_batch(
        &self,
        images: Vec<Vec<u8>>,
    ) -> Result<Vec<Result<EmbedOutcome, PipelineError>>, PipelineError> {
        self.run_blocking(move |inner| {
            let staged: Vec<Result<(DetectedFace, QualityScore, AlignedFace), PipelineError>> =
                images
                    .iter()
                    .map(|bytes| {
                        let image = BgrImage::decode(bytes)?;
                        let faces = inner.detector.detect(&image)?;
                        let face = faces.into_iter().next().ok_or(PipelineError::NoFace)?;

                        let quality = inner.quality.assess(&image, &face);
                        if quality.overall < inner.config.min_quality_score {
                            return Err(PipelineError::LowQuality {
                                score: quality.overall,
                                minimum: inner.config.min_quality_score,
                            });
                        }

                        let aligned = inner.aligner.align(&image, &face.landmarks);
                        Ok((face, quality, aligned))
                    })
                    .collect();

            let aligned: Vec<AlignedFace> = staged
                .iter()
                .filter_map(|r| r.as_ref().ok().map(|(_, _, a)| a.clone()))
                .collect();
            let embeddings = if aligned.is_empty() {
                Vec::new()
            } else {
                inner.embedder.embed_batch(&aligned)?
            };

            let mut embeddings = embeddings.into_iter();
            Ok(staged
                .into_iter()
                .map(|staged| {
                    staged.map(|(face, quality, _)| EmbedOutcome {
                        embedding: embeddings.next().unwrap_or_default(),
                        quality,
                        face,
                    })
                })
                .collect())
        })
        .await
    }

    /// Two-frame liveness check.
    pub async fn liveness(
        &self,
        frame1: Vec<u8>,
        frame2: Vec<u8>,
    ) -> Result<LivenessResult, PipelineError> {
        self.run_blocking(move |inner| {
            let image1 = BgrImage::decode(&frame1)
                .map_err(|e| PipelineError::InvalidImage(format!("frame1: {e}")))?;
            let image2 = BgrImage::decode(&frame2)
                .map_err(|e| PipelineError::InvalidImage(format!("frame2: {e}")))?;
            inner.liveness.check(&image1, &image2)
        })
        .await
    }

    /// Run a compute block on the blocking worker pool under the configured
    /// request deadline. A cancelled or timed-out request lets the in-flight
    /// work finish on the pool; only the result is discarded.
    async fn run_blocking<T, F>(&self, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce(&StateInner) -> Result<T, PipelineError> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        let deadline = Duration::from_secs(inner.config.request_timeout_secs);
        let timeout_secs = inner.config.request_timeout_secs;

        let task = tokio::task::spawn_blocking(move || f(&inner));
        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(PipelineError::Inference(format!(
                "pipeline worker failed: {join_error}"
            ))),
            Err(_) => Err(PipelineError::Timeout(timeout_secs)),
        }
    }
}
