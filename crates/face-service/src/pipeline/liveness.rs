//! Two-frame liveness detection.
//!
//! Compares the landmark positions of the top face in two frames captured
//! roughly 500ms apart. Live subjects show small natural micro-movements;
//! photos are static and replay attacks tend to overshoot.

use crate::config::FaceServiceConfig;
use crate::error::PipelineError;
use crate::pipeline::detector::FaceDetector;
use crate::pipeline::image::BgrImage;
use common::face::LivenessReason;

const STATIC_MOTION_FLOOR: f32 = 0.001;
const EXCESSIVE_MOTION_CEILING: f32 = 0.15;
const LIVE_CONFIDENCE_FLOOR: f32 = 0.7;

#[derive(Debug, Clone, PartialEq)]
pub struct LivenessResult {
    pub is_live: bool,
    pub confidence: f32,
    pub reason: LivenessReason,
}

#[derive(Clone)]
pub struct LivenessDetector {
    detector: FaceDetector,
    /// Reserved tuning knob carried from configuration.
    #[allow(dead_code)]
    movement_threshold: f32,
}

impl LivenessDetector {
    pub fn new(detector: FaceDetector, config: &FaceServiceConfig) -> Self {
        Self {
            detector,
            movement_threshold: config.liveness_movement_threshold,
        }
    }

    /// Check whether the face across the two frames belongs to a live
    /// person. The top face of each frame is used; no identity check is
    /// performed between the frames.
    pub fn check(
        &self,
        frame1: &BgrImage,
        frame2: &BgrImage,
    ) -> Result<LivenessResult, PipelineError> {
        let faces1 = self.detector.detect(frame1)?;
        let Some(face1) = faces1.first() else {
            return Ok(LivenessResult {
                is_live: false,
                confidence: 0.0,
                reason: LivenessReason::NoFaceFrame1,
            });
        };

        let faces2 = self.detector.detect(frame2)?;
        let Some(face2) = faces2.first() else {
            return Ok(LivenessResult {
                is_live: false,
                confidence: 0.0,
                reason: LivenessReason::NoFaceFrame2,
            });
        };

        Ok(classify_movement(&face1.landmarks, &face2.landmarks))
    }
}

/// Classify liveness from the two landmark sets alone.
pub(crate) fn classify_movement(
    landmarks1: &[[f32; 2]; 5],
    landmarks2: &[[f32; 2]; 5],
) -> LivenessResult {
    let motion = normalized_movement(landmarks1, landmarks2);

    if motion < STATIC_MOTION_FLOOR {
        return LivenessResult {
            is_live: false,
            confidence: 0.2,
            reason: LivenessReason::Static,
        };
    }

    if motion > EXCESSIVE_MOTION_CEILING {
        return LivenessResult {
            is_live: false,
            confidence: 0.3,
            reason: LivenessReason::Excessive,
        };
    }

    let eye = eye_movement(landmarks1, landmarks2);
    let confidence = (movement_score(motion) + (eye * 10.0).min(0.3)).min(1.0);
    let is_live = confidence >= LIVE_CONFIDENCE_FLOOR;

    LivenessResult {
        is_live,
        confidence,
        reason: if is_live {
            LivenessReason::Natural
        } else {
            LivenessReason::Insufficient
        },
    }
}

/// Mean per-landmark displacement, normalized by the first frame's eye
/// distance for scale invariance.
pub(crate) fn normalized_movement(
    landmarks1: &[[f32; 2]; 5],
    landmarks2: &[[f32; 2]; 5],
) -> f32 {
    let ex = landmarks1[1][0] - landmarks1[0][0];
    let ey = landmarks1[1][1] - landmarks1[0][1];
    let eye_distance = (ex * ex + ey * ey).sqrt();
    if eye_distance < 1.0 {
        return 0.0;
    }

    let total: f32 = landmarks1
        .iter()
        .zip(landmarks2.iter())
        .map(|(a, b)| {
            let dx = b[0] - a[0];
            let dy = b[1] - a[1];
            (dx * dx + dy * dy).sqrt()
        })
        .sum();

    total / 5.0 / eye_distance
}

/// Mean vertical displacement of the two eye landmarks, in pixels.
pub(crate) fn eye_movement(landmarks1: &[[f32; 2]; 5], landmarks2: &[[f32; 2]; 5]) -> f32 {
    let left = (landmarks2[0][1] - landmarks1[0][1]).abs();
    let right = (landmarks2[1][1] - landmarks1[1][1]).abs();
    (left + right) / 2.0
}

/// Score the motion magnitude: natural micro-movement peaks near 0.03 and
/// falls off toward the static and excessive extremes.
pub(crate) fn movement_score(motion: f32) -> f32 {
    if (0.005..=0.08).contains(&motion) {
        (1.0 - (motion - 0.03).abs() / 0.05).max(0.0)
    } else if motion > 0.08 && motion <= 0.22 {
        (0.5 - (motion - 0.08) / 0.14).max(0.0)
    } else {
        0.0
    }
}
