pub mod aligner;
pub mod detector;
pub mod embedder;
pub mod image;
pub mod liveness;
pub mod quality;

pub use aligner::{AlignedFace, FaceAligner};
pub use detector::{DetectedFace, FaceDetector};
pub use embedder::FaceEmbedder;
pub use image::BgrImage;
pub use liveness::{LivenessDetector, LivenessResult};
pub use quality::{QualityAssessor, QualityScore};
