//! Face alignment via 4-DoF similarity transform.
//!
//! Maps the five detected landmarks onto the canonical ArcFace reference
//! positions with a least-squares similarity estimate, then warps the source
//! image into a 112x112 crop.

use crate::pipeline::image::BgrImage;

/// ArcFace reference landmarks for a 112x112 output.
/// Order: left eye, right eye, nose, left mouth, right mouth.
pub const ARCFACE_REFERENCE: [[f32; 2]; 5] = [
    [38.2946, 51.6963],
    [73.5318, 51.5014],
    [56.0252, 71.7366],
    [41.5493, 92.3655],
    [70.7299, 92.2041],
];

/// An aligned face crop in BGR byte order.
#[derive(Debug, Clone)]
pub struct AlignedFace {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl AlignedFace {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// BGR bytes at (x, y).
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }
}

#[derive(Debug, Clone)]
pub struct FaceAligner {
    output_size: (u32, u32),
}

impl FaceAligner {
    pub fn new(output_size: (u32, u32)) -> Self {
        Self { output_size }
    }

    /// Align a face to the canonical pose using its five landmarks.
    pub fn align(&self, image: &BgrImage, landmarks: &[[f32; 2]; 5]) -> AlignedFace {
        let matrix = estimate_similarity(landmarks, &ARCFACE_REFERENCE);
        warp_bgr(image, &matrix, self.output_size)
    }

    /// Align with extra context around the face: the destination landmarks
    /// are scaled about their centroid by (1 + margin) before estimation.
    pub fn align_with_margin(
        &self,
        image: &BgrImage,
        landmarks: &[[f32; 2]; 5],
        margin: f32,
    ) -> AlignedFace {
        let center = centroid(&ARCFACE_REFERENCE);
        let mut dst = ARCFACE_REFERENCE;
        for point in &mut dst {
            point[0] = (point[0] - center[0]) * (1.0 + margin) + center[0];
            point[1] = (point[1] - center[1]) * (1.0 + margin) + center[1];
        }
        let matrix = estimate_similarity(landmarks, &dst);
        warp_bgr(image, &matrix, self.output_size)
    }
}

/// Rough head pose estimated from landmark geometry, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseEstimate {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

/// Estimate yaw/pitch/roll from the five landmarks relative to their
/// expected frontal layout. Degenerate eye distances read as frontal.
pub fn estimate_pose(landmarks: &[[f32; 2]; 5]) -> PoseEstimate {
    let left_eye = landmarks[0];
    let right_eye = landmarks[1];
    let nose = landmarks[2];

    let eye_center = [
        (left_eye[0] + right_eye[0]) / 2.0,
        (left_eye[1] + right_eye[1]) / 2.0,
    ];
    let dx = right_eye[0] - left_eye[0];
    let dy = right_eye[1] - left_eye[1];
    let eye_distance = (dx * dx + dy * dy).sqrt();

    if eye_distance < 1.0 {
        return PoseEstimate {
            yaw: 0.0,
            pitch: 0.0,
            roll: 0.0,
        };
    }

    let yaw = (nose[0] - eye_center[0]).atan2(eye_distance / 2.0).to_degrees();
    let roll = dy.atan2(dx).to_degrees();

    let expected_nose_y = eye_center[1] + eye_distance * 0.35;
    let pitch = (nose[1] - expected_nose_y)
        .atan2(eye_distance * 0.35)
        .to_degrees();

    PoseEstimate { yaw, pitch, roll }
}

fn centroid(points: &[[f32; 2]; 5]) -> [f32; 2] {
    let mut cx = 0.0;
    let mut cy = 0.0;
    for p in points {
        cx += p[0];
        cy += p[1];
    }
    [cx / 5.0, cy / 5.0]
}

/// Estimate the 2x3 similarity transform (uniform scale, rotation,
/// translation) from `src` to `dst` by least squares.
///
/// Returned as [a, -b, tx, b, a, ty], representing:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
pub(crate) fn estimate_similarity(src: &[[f32; 2]; 5], dst: &[[f32; 2]; 5]) -> [f32; 6] {
    // Each correspondence (sx, sy) -> (dx, dy) contributes two equations in
    // the unknowns [a, b, tx, ty]:
    //   sx * a - sy * b + tx = dx
    //   sy * a + sx * b + ty = dy
    let mut ata = [0.0f64; 16];
    let mut atb = [0.0f64; 4];

    for i in 0..5 {
        let (sx, sy) = (src[i][0] as f64, src[i][1] as f64);
        let (dx, dy) = (dst[i][0] as f64, dst[i][1] as f64);

        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];

        for j in 0..4 {
            for k in 0..4 {
                ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    let x = solve_4x4(&ata, &atb);
    let (a, b, tx, ty) = (x[0] as f32, x[1] as f32, x[2] as f32, x[3] as f32);
    [a, -b, tx, b, a, ty]
}

/// Solve a 4x4 linear system with Gaussian elimination and partial pivoting.
fn solve_4x4(ata: &[f64; 16], atb: &[f64; 4]) -> [f64; 4] {
    let mut m = [[0.0f64; 5]; 4];
    for i in 0..4 {
        m[i][..4].copy_from_slice(&ata[i * 4..i * 4 + 4]);
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let mut max_row = col;
        for row in (col + 1)..4 {
            if m[row][col].abs() > m[max_row][col].abs() {
                max_row = row;
            }
        }
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            // Degenerate landmarks; identity keeps the warp well-defined.
            return [1.0, 0.0, 0.0, 0.0];
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f64; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }
    x
}

/// Apply the forward matrix by inverse-mapping every output pixel and
/// sampling bilinearly; out-of-bounds pixels are zero-filled.
fn warp_bgr(image: &BgrImage, matrix: &[f32; 6], output_size: (u32, u32)) -> AlignedFace {
    let (out_w, out_h) = output_size;
    let (a, tx) = (matrix[0], matrix[2]);
    let (b, ty) = (matrix[3], matrix[5]);

    // Invert the rotation-scale block [[a, -b], [b, a]].
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return AlignedFace {
            width: out_w,
            height: out_h,
            data: vec![0u8; out_w as usize * out_h as usize * 3],
        };
    }
    let ia = a / det;
    let ib = b / det;

    let mut data = vec![0u8; out_w as usize * out_h as usize * 3];
    for oy in 0..out_h {
        for ox in 0..out_w {
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;

            let i = (oy as usize * out_w as usize + ox as usize) * 3;
            for c in 0..3 {
                data[i + c] = image
                    .sample_bilinear(sx, sy, c)
                    .round()
                    .clamp(0.0, 255.0) as u8;
            }
        }
    }

    AlignedFace {
        width: out_w,
        height: out_h,
        data,
    }
}
