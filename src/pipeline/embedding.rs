//! Embedding stage

use anyhow::anyhow;
use tracing::{debug, info};

use crate::backend::{BackendOptions, EmbedderKind, FaceEmbedderBackend};
use crate::entity::FaceEntity;
use crate::error::PipelineError;

/// Compute an embedding for every face, in order, writing it in place.
///
/// Stops at the first failure: faces before the failing index keep the
/// embedding computed here, later faces are left untouched.
pub fn embed(
    embedder: &dyn FaceEmbedderBackend,
    kind: EmbedderKind,
    faces: &mut [FaceEntity],
) -> Result<(), PipelineError> {
    if faces.is_empty() {
        return Ok(());
    }

    info!("Extracting {} face/s embedding with {}", faces.len(), kind);

    for (index, face) in faces.iter_mut().enumerate() {
        let vector = embedder
            .embed(&face.cropped_pixels, &BackendOptions::PRE_DETECTED)
            .map_err(|source| PipelineError::EmbeddingFailed { embedder: kind, index, source })?;

        if vector.is_empty() {
            return Err(PipelineError::EmbeddingFailed {
                embedder: kind,
                index,
                source: anyhow!("backend returned an empty embedding"),
            });
        }

        debug!("Face {}: {}-d embedding", index, vector.len());
        face.embedding = Some(vector);
    }

    Ok(())
}
