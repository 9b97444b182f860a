//! Identity embedding generation.
//!
//! Converts aligned BGR crops into the embedder's RGB input layout, runs a
//! forward pass and L2-normalizes each resulting 512-dim vector.

use crate::error::PipelineError;
use crate::models::ModelRegistry;
use crate::pipeline::aligner::AlignedFace;
use ndarray::Array4;
use std::sync::Arc;

const NORM_FLOOR: f32 = 1e-10;

#[derive(Clone)]
pub struct FaceEmbedder {
    registry: Arc<ModelRegistry>,
    input_size: (u32, u32),
}

impl FaceEmbedder {
    pub fn new(registry: Arc<ModelRegistry>, input_size: (u32, u32)) -> Self {
        Self {
            registry,
            input_size,
        }
    }

    /// Generate one L2-normalized embedding from an aligned face.
    pub fn embed(&self, face: &AlignedFace) -> Result<Vec<f32>, PipelineError> {
        let (w, h) = self.input_size;
        let mut input = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
        write_face(&mut input, 0, face)?;

        let (dims, data) = self.registry.run_embedder(input.into_dyn())?;
        let mut rows = split_rows(&dims, data, 1)?;
        let mut embedding = rows.remove(0);
        l2_normalize(&mut embedding);
        Ok(embedding)
    }

    /// Generate embeddings for several aligned faces with one forward pass.
    pub fn embed_batch(&self, faces: &[AlignedFace]) -> Result<Vec<Vec<f32>>, PipelineError> {
        if faces.is_empty() {
            return Ok(Vec::new());
        }

        let (w, h) = self.input_size;
        let mut input = Array4::<f32>::zeros((faces.len(), 3, h as usize, w as usize));
        for (n, face) in faces.iter().enumerate() {
            write_face(&mut input, n, face)?;
        }

        let (dims, data) = self.registry.run_embedder(input.into_dyn())?;
        let mut rows = split_rows(&dims, data, faces.len())?;
        for row in &mut rows {
            l2_normalize(row);
        }
        Ok(rows)
    }
}

/// Write one aligned face into batch slot `n`: BGR -> RGB, then
/// (p - 127.5) / 127.5, channel-first.
fn write_face(
    input: &mut Array4<f32>,
    n: usize,
    face: &AlignedFace,
) -> Result<(), PipelineError> {
    let shape = input.shape();
    let (h, w) = (shape[2], shape[3]);
    if face.width() as usize != w || face.height() as usize != h {
        return Err(PipelineError::Inference(format!(
            "aligned face is {}x{}, embedder expects {}x{}",
            face.width(),
            face.height(),
            w,
            h
        )));
    }

    for y in 0..h {
        for x in 0..w {
            let bgr = face.pixel(x as u32, y as u32);
            input[[n, 0, y, x]] = (bgr[2] as f32 - 127.5) / 127.5;
            input[[n, 1, y, x]] = (bgr[1] as f32 - 127.5) / 127.5;
            input[[n, 2, y, x]] = (bgr[0] as f32 - 127.5) / 127.5;
        }
    }
    Ok(())
}

/// Split a (batch, dim) output into per-row vectors.
fn split_rows(
    dims: &[usize],
    data: Vec<f32>,
    expected_batch: usize,
) -> Result<Vec<Vec<f32>>, PipelineError> {
    let (batch, dim) = match dims {
        [batch, dim] => (*batch, *dim),
        [dim] => (1, *dim),
        other => {
            return Err(PipelineError::Inference(format!(
                "unexpected embedder output shape {other:?}"
            )))
        }
    };
    if batch != expected_batch || data.len() != batch * dim {
        return Err(PipelineError::Inference(format!(
            "embedder output {batch}x{dim} does not match batch of {expected_batch}"
        )));
    }
    Ok(data.chunks_exact(dim).map(|row| row.to_vec()).collect())
}

/// Scale to unit L2 norm. Vectors with a norm below the floor (the all-zero
/// failure signal) are left untouched.
pub(crate) fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > NORM_FLOOR {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
