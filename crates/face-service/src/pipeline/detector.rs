//! Anchor-based face detection.
//!
//! Runs a RetinaFace/SCRFD-style graph that emits nine tensors, three per
//! feature-pyramid stride (scores, box deltas, landmark deltas), decodes
//! them against cached anchor centers and reduces the proposals with greedy
//! NMS before mapping back to original image coordinates.

use crate::config::FaceServiceConfig;
use crate::error::PipelineError;
use crate::models::ModelRegistry;
use crate::pipeline::image::BgrImage;
use ndarray::Array4;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub const DETECTOR_INPUT_SIZE: u32 = 640;
pub const FPN_STRIDES: [u32; 3] = [8, 16, 32];
pub const ANCHORS_PER_CELL: usize = 2;
const NMS_IOU_THRESHOLD: f32 = 0.4;

/// A detected face in original image coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    /// (x1, y1, x2, y2) in pixels, clamped to the image.
    pub bbox: (i32, i32, i32, i32),
    /// Detection confidence in [0, 1].
    pub confidence: f32,
    /// Five landmarks: left eye, right eye, nose, left mouth, right mouth.
    pub landmarks: [[f32; 2]; 5],
}

impl DetectedFace {
    /// Min of box width and height.
    pub fn face_size(&self) -> i32 {
        let (x1, y1, x2, y2) = self.bbox;
        (x2 - x1).min(y2 - y1)
    }
}

/// Anchor centers for one input size, all strides concatenated in stride
/// order with two consecutive anchors per cell.
pub struct AnchorGrid {
    centers: Vec<[f32; 2]>,
    stride_ranges: Vec<(u32, std::ops::Range<usize>)>,
}

impl AnchorGrid {
    fn generate(input_height: u32, input_width: u32) -> Self {
        let mut centers = Vec::new();
        let mut stride_ranges = Vec::new();
        for &stride in &FPN_STRIDES {
            let start = centers.len();
            let cells_y = input_height / stride;
            let cells_x = input_width / stride;
            for y in 0..cells_y {
                for x in 0..cells_x {
                    let cx = (x as f32 + 0.5) * stride as f32;
                    let cy = (y as f32 + 0.5) * stride as f32;
                    for _ in 0..ANCHORS_PER_CELL {
                        centers.push([cx, cy]);
                    }
                }
            }
            stride_ranges.push((stride, start..centers.len()));
        }
        Self {
            centers,
            stride_ranges,
        }
    }

    pub fn total(&self) -> usize {
        self.centers.len()
    }

    pub fn centers(&self) -> &[[f32; 2]] {
        &self.centers
    }

    /// Anchor centers belonging to one stride.
    pub fn stride_centers(&self, stride: u32) -> &[[f32; 2]] {
        self.stride_ranges
            .iter()
            .find(|(s, _)| *s == stride)
            .map(|(_, range)| &self.centers[range.clone()])
            .unwrap_or(&[])
    }
}

/// Write-once anchor cache keyed by input (height, width). After first
/// publication for a size, the grid is only ever read.
static ANCHOR_CACHE: Lazy<RwLock<HashMap<(u32, u32), Arc<AnchorGrid>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

pub fn anchor_grid(input_height: u32, input_width: u32) -> Arc<AnchorGrid> {
    let key = (input_height, input_width);
    {
        let cache = match ANCHOR_CACHE.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(grid) = cache.get(&key) {
            return grid.clone();
        }
    }

    let computed = Arc::new(AnchorGrid::generate(input_height, input_width));
    let mut cache = match ANCHOR_CACHE.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    cache.entry(key).or_insert(computed).clone()
}

/// Letterbox transform recorded during preprocessing.
#[derive(Debug, Clone, Copy)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_w: u32,
    pub pad_h: u32,
}

/// A decoded proposal in letterboxed 640x640 coordinates.
#[derive(Debug, Clone)]
pub(crate) struct Proposal {
    bbox: [f32; 4],
    confidence: f32,
    landmarks: [[f32; 2]; 5],
}

/// Per-stride views over the raw detector outputs.
pub(crate) struct StrideTensors<'a> {
    pub stride: u32,
    pub scores: &'a [f32],
    pub boxes: &'a [f32],
    pub landmarks: &'a [f32],
    pub count: usize,
}

#[derive(Clone)]
pub struct FaceDetector {
    registry: Arc<ModelRegistry>,
    threshold: f32,
    min_face_size: u32,
    max_faces: usize,
}

impl FaceDetector {
    pub fn new(registry: Arc<ModelRegistry>, config: &FaceServiceConfig) -> Self {
        Self {
            registry,
            threshold: config.detection_threshold,
            min_face_size: config.min_face_size,
            max_faces: config.max_faces,
        }
    }

    /// Detect faces, sorted by confidence descending, capped at the
    /// configured maximum. An empty list is a legitimate result.
    pub fn detect(&self, image: &BgrImage) -> Result<Vec<DetectedFace>, PipelineError> {
        let (input, letterbox) = preprocess(image);
        let raw = self.registry.run_detector(input.into_dyn())?;
        let grouped = group_outputs_by_stride(&raw)?;
        let grid = anchor_grid(DETECTOR_INPUT_SIZE, DETECTOR_INPUT_SIZE);
        let proposals = decode_proposals(&grouped, &grid, self.threshold)?;
        let kept = non_maximum_suppression(proposals, NMS_IOU_THRESHOLD);
        Ok(map_to_image(
            kept,
            letterbox,
            image.width(),
            image.height(),
            self.min_face_size,
            self.max_faces,
        ))
    }
}

/// Letterbox the image into a 640x640 tensor: aspect-preserving resize,
/// centered zero padding, (p - 127.5) / 128 normalization, HWC -> CHW.
pub(crate) fn preprocess(image: &BgrImage) -> (Array4<f32>, Letterbox) {
    let size = DETECTOR_INPUT_SIZE;
    let scale = (size as f32 / image.width() as f32).min(size as f32 / image.height() as f32);
    let new_w = ((image.width() as f32 * scale) as u32).max(1);
    let new_h = ((image.height() as f32 * scale) as u32).max(1);
    let resized = image.resize(new_w, new_h);

    let pad_w = (size - new_w) / 2;
    let pad_h = (size - new_h) / 2;

    // The padding is zero-valued pixels, normalized like everything else.
    let pad_value = (0.0 - 127.5) / 128.0;
    let mut input = Array4::<f32>::from_elem((1, 3, size as usize, size as usize), pad_value);
    for y in 0..new_h {
        for x in 0..new_w {
            let pixel = resized.pixel(x, y);
            let ty = (y + pad_h) as usize;
            let tx = (x + pad_w) as usize;
            for c in 0..3 {
                input[[0, c, ty, tx]] = (pixel[c] as f32 - 127.5) / 128.0;
            }
        }
    }

    (
        input,
        Letterbox {
            scale,
            pad_w,
            pad_h,
        },
    )
}

/// Match the nine raw outputs to strides by shape: rows identify the stride
/// (cells x 2 anchors), columns identify scores (1), boxes (4) or
/// landmarks (10). A leading batch dimension of 1 is tolerated.
pub(crate) fn group_outputs_by_stride(
    raw: &[(Vec<usize>, Vec<f32>)],
) -> Result<Vec<StrideTensors<'_>>, PipelineError> {
    let expected: HashMap<usize, u32> = FPN_STRIDES
        .iter()
        .map(|&s| {
            let cells = (DETECTOR_INPUT_SIZE / s) as usize;
            (cells * cells * ANCHORS_PER_CELL, s)
        })
        .collect();

    let mut scores: HashMap<u32, &[f32]> = HashMap::new();
    let mut boxes: HashMap<u32, &[f32]> = HashMap::new();
    let mut landmarks: HashMap<u32, &[f32]> = HashMap::new();

    for (dims, data) in raw {
        let shape: &[usize] = if dims.len() == 3 && dims[0] == 1 {
            &dims[1..]
        } else {
            dims
        };
        if shape.len() != 2 {
            continue;
        }
        let (rows, cols) = (shape[0], shape[1]);
        let Some(&stride) = expected.get(&rows) else {
            continue;
        };
        match cols {
            1 => {
                scores.entry(stride).or_insert(data.as_slice());
            }
            4 => {
                boxes.entry(stride).or_insert(data.as_slice());
            }
            10 => {
                landmarks.entry(stride).or_insert(data.as_slice());
            }
            _ => {}
        }
    }

    let mut grouped = Vec::with_capacity(FPN_STRIDES.len());
    for &stride in &FPN_STRIDES {
        let cells = (DETECTOR_INPUT_SIZE / stride) as usize;
        let count = cells * cells * ANCHORS_PER_CELL;
        let (Some(&scores), Some(&boxes), Some(&landmarks)) = (
            scores.get(&stride),
            boxes.get(&stride),
            landmarks.get(&stride),
        ) else {
            return Err(PipelineError::Inference(format!(
                "detector output layout missing tensors for stride {stride}"
            )));
        };
        grouped.push(StrideTensors {
            stride,
            scores,
            boxes,
            landmarks,
            count,
        });
    }
    Ok(grouped)
}

/// Decode anchor-relative predictions into proposals above the score floor.
pub(crate) fn decode_proposals(
    outputs: &[StrideTensors<'_>],
    grid: &AnchorGrid,
    threshold: f32,
) -> Result<Vec<Proposal>, PipelineError> {
    let mut proposals = Vec::new();

    for tensors in outputs {
        let centers = grid.stride_centers(tensors.stride);
        if centers.len() != tensors.count
            || tensors.scores.len() < tensors.count
            || tensors.boxes.len() < tensors.count * 4
            || tensors.landmarks.len() < tensors.count * 10
        {
            return Err(PipelineError::Inference(format!(
                "anchor count mismatch for stride {}",
                tensors.stride
            )));
        }
        let stride = tensors.stride as f32;

        for idx in 0..tensors.count {
            let confidence = tensors.scores[idx];
            if confidence < threshold {
                continue;
            }

            let [cx, cy] = centers[idx];
            let b = &tensors.boxes[idx * 4..idx * 4 + 4];
            let bbox = [
                cx - b[0] * stride,
                cy - b[1] * stride,
                cx + b[2] * stride,
                cy + b[3] * stride,
            ];

            let k = &tensors.landmarks[idx * 10..idx * 10 + 10];
            let mut landmarks = [[0.0f32; 2]; 5];
            for (point, chunk) in landmarks.iter_mut().zip(k.chunks_exact(2)) {
                point[0] = cx + chunk[0] * stride;
                point[1] = cy + chunk[1] * stride;
            }

            proposals.push(Proposal {
                bbox,
                confidence,
                landmarks,
            });
        }
    }

    Ok(proposals)
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Greedy NMS: repeatedly keep the highest-scoring remaining proposal and
/// suppress everything overlapping it above the IoU threshold. Score ties
/// break by original index (the sort is stable).
pub(crate) fn non_maximum_suppression(
    mut proposals: Vec<Proposal>,
    iou_threshold: f32,
) -> Vec<Proposal> {
    proposals.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; proposals.len()];

    for i in 0..proposals.len() {
        if suppressed[i] {
            continue;
        }
        for j in (i + 1)..proposals.len() {
            if !suppressed[j] && iou(&proposals[i].bbox, &proposals[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
        keep.push(proposals[i].clone());
    }

    keep
}

/// Undo the letterbox, clamp boxes to the image, drop degenerate or
/// too-small faces, sort by confidence and cap the result.
pub(crate) fn map_to_image(
    proposals: Vec<Proposal>,
    letterbox: Letterbox,
    img_width: u32,
    img_height: u32,
    min_face_size: u32,
    max_faces: usize,
) -> Vec<DetectedFace> {
    let mut faces: Vec<DetectedFace> = proposals
        .into_iter()
        .filter_map(|p| {
            let unpad_x = |v: f32| (v - letterbox.pad_w as f32) / letterbox.scale;
            let unpad_y = |v: f32| (v - letterbox.pad_h as f32) / letterbox.scale;

            let x1 = (unpad_x(p.bbox[0]) as i32).clamp(0, img_width as i32);
            let y1 = (unpad_y(p.bbox[1]) as i32).clamp(0, img_height as i32);
            let x2 = (unpad_x(p.bbox[2]) as i32).clamp(0, img_width as i32);
            let y2 = (unpad_y(p.bbox[3]) as i32).clamp(0, img_height as i32);

            if x2 <= x1 || y2 <= y1 {
                return None;
            }

            let mut landmarks = [[0.0f32; 2]; 5];
            for (out, src) in landmarks.iter_mut().zip(p.landmarks.iter()) {
                out[0] = unpad_x(src[0]);
                out[1] = unpad_y(src[1]);
            }

            let face = DetectedFace {
                bbox: (x1, y1, x2, y2),
                confidence: p.confidence,
                landmarks,
            };
            (face.face_size() >= min_face_size as i32).then_some(face)
        })
        .collect();

    faces.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    faces.truncate(max_faces);
    faces
}
