//! ArcFace Face Embedder
//!
//! R100+Glint360K model on 112x112 crops, producing L2-normalized vectors.

use std::sync::Arc;

use anyhow::Result;
use image::RgbImage;

use crate::backend::{BackendOptions, FaceEmbedderBackend};
use crate::utils::math::l2_normalize;

use super::pool::{output_f32, ModelPool, ModelType};
use super::preprocess::{resize_exact, to_nchw, ChannelOrder, EMBEDDER_INPUT_SIZE};

pub struct ArcFaceEmbedder {
    pool: Arc<ModelPool>,
    embedding_dim: usize,
}

impl ArcFaceEmbedder {
    pub fn new(pool: Arc<ModelPool>, embedding_dim: usize) -> Self {
        Self { pool, embedding_dim }
    }
}

/// Check the raw model output length and normalize it
pub fn embedding_from_output(mut raw: Vec<f32>, embedding_dim: usize) -> Result<Vec<f32>> {
    if raw.len() != embedding_dim {
        anyhow::bail!(
            "embedding has {} values, expected {}",
            raw.len(),
            embedding_dim
        );
    }

    l2_normalize(&mut raw);
    Ok(raw)
}

impl FaceEmbedderBackend for ArcFaceEmbedder {
    fn embed(&self, face: &RgbImage, _options: &BackendOptions) -> Result<Vec<f32>> {
        let input = if face.dimensions() == EMBEDDER_INPUT_SIZE {
            face.clone()
        } else {
            resize_exact(face, EMBEDDER_INPUT_SIZE)
        };
        let tensor = to_nchw(&input, ChannelOrder::Bgr);

        let model = self.pool.get_model(ModelType::Embedder)?;
        let request = model.infer(&tensor)?;

        embedding_from_output(output_f32(&request, 0)?, self.embedding_dim)
    }
}
