//! Face image quality assessment.
//!
//! Scores brightness, sharpness, face size and frontality on [0, 1] and
//! combines them into a weighted overall score used to gate enrollment.

use crate::pipeline::detector::DetectedFace;
use crate::pipeline::image::BgrImage;
use serde::Serialize;

const BRIGHTNESS_WEIGHT: f32 = 0.20;
const SHARPNESS_WEIGHT: f32 = 0.30;
const FACE_SIZE_WEIGHT: f32 = 0.25;
const FACE_ANGLE_WEIGHT: f32 = 0.25;

/// Component and overall quality scores, all in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityScore {
    pub overall: f32,
    pub brightness: f32,
    pub sharpness: f32,
    pub face_size: f32,
    pub face_angle: f32,
}

impl QualityScore {
    fn zero() -> Self {
        Self {
            overall: 0.0,
            brightness: 0.0,
            sharpness: 0.0,
            face_size: 0.0,
            face_angle: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QualityAssessor;

impl QualityAssessor {
    pub fn new() -> Self {
        Self
    }

    /// Assess a detected face within its source image.
    pub fn assess(&self, image: &BgrImage, face: &DetectedFace) -> QualityScore {
        let (x1, y1, x2, y2) = face.bbox;
        let crop = image.crop(x1, y1, x2, y2);

        if crop.width() < 2 || crop.height() < 2 {
            return QualityScore::zero();
        }

        let gray = gray_values(&crop);
        let mean = gray.iter().sum::<f64>() / gray.len() as f64;

        let brightness = brightness_score(mean as f32);
        let sharpness =
            sharpness_score(laplacian_variance(&gray, crop.width(), crop.height()));
        let face_size = face_size_score(face.face_size());
        let face_angle = face_angle_score(&face.landmarks);

        let overall = brightness * BRIGHTNESS_WEIGHT
            + sharpness * SHARPNESS_WEIGHT
            + face_size * FACE_SIZE_WEIGHT
            + face_angle * FACE_ANGLE_WEIGHT;

        QualityScore {
            overall,
            brightness,
            sharpness,
            face_size,
            face_angle,
        }
    }
}

/// BT.601 grayscale of a BGR crop.
fn gray_values(crop: &BgrImage) -> Vec<f64> {
    let data = crop.data();
    data.chunks_exact(3)
        .map(|bgr| 0.114 * bgr[0] as f64 + 0.587 * bgr[1] as f64 + 0.299 * bgr[2] as f64)
        .collect()
}

/// Ideal mean brightness is 80-180 on the 0-255 scale; the score falls
/// linearly to 0.2 at 40 and 220 and stays there beyond.
pub(crate) fn brightness_score(mean: f32) -> f32 {
    if (80.0..=180.0).contains(&mean) {
        1.0
    } else if mean < 40.0 || mean > 220.0 {
        0.2
    } else if mean < 80.0 {
        0.2 + 0.8 * (mean - 40.0) / 40.0
    } else {
        0.2 + 0.8 * (220.0 - mean) / 40.0
    }
}

/// Variance of the 4-neighbor Laplacian over interior pixels.
fn laplacian_variance(gray: &[f64], width: u32, height: u32) -> f64 {
    let w = width as usize;
    let h = height as usize;
    if w < 3 || h < 3 {
        return 0.0;
    }

    let mut values = Vec::with_capacity((w - 2) * (h - 2));
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let lap = gray[(y - 1) * w + x]
                + gray[(y + 1) * w + x]
                + gray[y * w + x - 1]
                + gray[y * w + x + 1]
                - 4.0 * gray[y * w + x];
            values.push(lap);
        }
    }

    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

pub(crate) fn sharpness_score(variance: f64) -> f32 {
    if variance > 500.0 {
        1.0
    } else if variance > 100.0 {
        0.5 + 0.5 * ((variance - 100.0) / 400.0) as f32
    } else {
        ((variance / 200.0) as f32).max(0.0)
    }
}

/// Faces below 50px are nearly unusable; 200px and above is ideal.
pub(crate) fn face_size_score(size: i32) -> f32 {
    let size = size as f32;
    if size >= 200.0 {
        1.0
    } else if size >= 100.0 {
        0.5 + 0.5 * (size - 100.0) / 100.0
    } else if size >= 50.0 {
        0.2 + 0.3 * (size - 50.0) / 50.0
    } else {
        (size / 50.0 * 0.2).max(0.0)
    }
}

/// Frontality from landmark geometry: yaw from the nose's horizontal offset
/// against the eye midpoint, pitch from its vertical offset against the
/// expected 0.35 x eye-distance drop.
pub(crate) fn face_angle_score(landmarks: &[[f32; 2]; 5]) -> f32 {
    let left_eye = landmarks[0];
    let right_eye = landmarks[1];
    let nose = landmarks[2];

    let eye_center_x = (left_eye[0] + right_eye[0]) / 2.0;
    let dx = right_eye[0] - left_eye[0];
    let dy = right_eye[1] - left_eye[1];
    let eye_distance = (dx * dx + dy * dy).sqrt();

    if eye_distance < 1.0 {
        return 0.0;
    }

    let yaw_ratio = (nose[0] - eye_center_x).abs() / (eye_distance / 2.0);
    let yaw_score = (1.0 - yaw_ratio).max(0.0);

    let eye_y = (left_eye[1] + right_eye[1]) / 2.0;
    let expected_offset = eye_distance * 0.35;
    let pitch_ratio = (nose[1] - (eye_y + expected_offset)).abs() / expected_offset.max(1.0);
    let pitch_score = (1.0 - pitch_ratio).max(0.0);

    (yaw_score + pitch_score) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face_with_bbox(x1: i32, y1: i32, x2: i32, y2: i32) -> DetectedFace {
        // Frontal landmark layout inside the box.
        let w = (x2 - x1) as f32;
        let cx = x1 as f32 + w / 2.0;
        let eye_y = y1 as f32 + (y2 - y1) as f32 * 0.35;
        let eye_dx = w * 0.2;
        DetectedFace {
            bbox: (x1, y1, x2, y2),
            confidence: 0.95,
            landmarks: [
                [cx - eye_dx, eye_y],
                [cx + eye_dx, eye_y],
                [cx, eye_y + 2.0 * eye_dx * 0.35],
                [cx - eye_dx * 0.7, y2 as f32 - w * 0.2],
                [cx + eye_dx * 0.7, y2 as f32 - w * 0.2],
            ],
        }
    }

    #[test]
    fn brightness_plateau_and_anchors() {
        assert_eq!(brightness_score(80.0), 1.0);
        assert_eq!(brightness_score(130.0), 1.0);
        assert_eq!(brightness_score(180.0), 1.0);
        assert_eq!(brightness_score(30.0), 0.2);
        assert_eq!(brightness_score(230.0), 0.2);
        // Linear ramps between the anchors.
        assert!((brightness_score(60.0) - 0.6).abs() < 1e-6);
        assert!((brightness_score(200.0) - 0.6).abs() < 1e-6);
    }

    #[test]
    fn sharpness_monotone_from_50_to_600() {
        let mut last = -1.0f32;
        for v in [50.0, 100.0, 150.0, 300.0, 500.0, 600.0] {
            let s = sharpness_score(v);
            assert!(s >= last, "sharpness must not decrease: {v} -> {s}");
            last = s;
        }
        assert_eq!(sharpness_score(600.0), 1.0);
        assert!((sharpness_score(300.0) - 0.75).abs() < 1e-6);
        assert!((sharpness_score(50.0) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn face_size_monotone_up_to_200() {
        let mut last = -1.0f32;
        for s in [10, 49, 50, 75, 100, 150, 199, 200, 400] {
            let score = face_size_score(s);
            assert!(score >= last, "size score must not decrease at {s}");
            last = score;
        }
        assert_eq!(face_size_score(200), 1.0);
        assert_eq!(face_size_score(400), 1.0);
        assert!((face_size_score(150) - 0.75).abs() < 1e-6);
        assert!((face_size_score(25) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn frontal_face_scores_near_one() {
        let landmarks = [
            [80.0, 100.0],
            [120.0, 100.0],
            [100.0, 114.0], // exactly eye_y + 0.35 * eye_distance
            [85.0, 135.0],
            [115.0, 135.0],
        ];
        let score = face_angle_score(&landmarks);
        assert!(score > 0.99, "frontal face scored {score}");
    }

    #[test]
    fn turned_face_scores_lower() {
        let frontal = [
            [80.0, 100.0],
            [120.0, 100.0],
            [100.0, 114.0],
            [85.0, 135.0],
            [115.0, 135.0],
        ];
        // Nose pushed far to the side.
        let turned = [
            [80.0, 100.0],
            [120.0, 100.0],
            [115.0, 114.0],
            [85.0, 135.0],
            [115.0, 135.0],
        ];
        assert!(face_angle_score(&turned) < face_angle_score(&frontal));
    }

    #[test]
    fn degenerate_eye_distance_scores_zero() {
        let landmarks = [[50.0, 50.0]; 5];
        assert_eq!(face_angle_score(&landmarks), 0.0);
    }

    #[test]
    fn tiny_crop_scores_all_zero() {
        let image = BgrImage::from_bgr(100, 100, vec![128u8; 100 * 100 * 3]).unwrap();
        let face = face_with_bbox(99, 99, 100, 100);
        let score = QualityAssessor::new().assess(&image, &face);
        assert_eq!(score.overall, 0.0);
        assert_eq!(score.brightness, 0.0);
    }

    #[test]
    fn overall_is_the_weighted_sum() {
        let image = BgrImage::from_bgr(300, 300, vec![130u8; 300 * 300 * 3]).unwrap();
        let face = face_with_bbox(20, 20, 280, 280);
        let q = QualityAssessor::new().assess(&image, &face);
        let expected = q.brightness * 0.20 + q.sharpness * 0.30 + q.face_size * 0.25
            + q.face_angle * 0.25;
        assert!((q.overall - expected).abs() < 1e-6);
        // Flat 130-gray crop: perfect brightness, perfect size, zero sharpness.
        assert_eq!(q.brightness, 1.0);
        assert_eq!(q.face_size, 1.0);
        assert_eq!(q.sharpness, 0.0);
    }

    #[test]
    fn dim_crop_gets_floor_brightness() {
        let image = BgrImage::from_bgr(320, 240, vec![30u8; 320 * 240 * 3]).unwrap();
        let face = face_with_bbox(40, 40, 200, 200);
        let q = QualityAssessor::new().assess(&image, &face);
        assert_eq!(q.brightness, 0.2);
    }
}
