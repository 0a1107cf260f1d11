//! Pipeline error taxonomy
//!
//! Backends report failures as `anyhow::Error`; each stage wraps them in the
//! variant naming the stage that failed so callers can decide whether to
//! retry, switch backends or give up.

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::{AnalysisKinds, DetectorKind, EmbedderKind};

/// Stage that produced a [`PipelineError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedStage {
    Load,
    Detection,
    Embedding,
    Analysis,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("image source not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    #[error("failed to read image '{name}'")]
    UnreadableImage {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("face detection with '{detector}' failed")]
    DetectionFailed {
        detector: DetectorKind,
        #[source]
        source: anyhow::Error,
    },

    /// Faces before `index` keep the embedding computed in the failed call.
    #[error("embedding extraction with '{embedder}' failed on face {index}")]
    EmbeddingFailed {
        embedder: EmbedderKind,
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("face analysis for {kinds} failed")]
    AnalysisFailed {
        kinds: AnalysisKinds,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    pub fn stage(&self) -> FailedStage {
        match self {
            PipelineError::SourceNotFound { .. } | PipelineError::UnreadableImage { .. } => {
                FailedStage::Load
            }
            PipelineError::DetectionFailed { .. } => FailedStage::Detection,
            PipelineError::EmbeddingFailed { .. } => FailedStage::Embedding,
            PipelineError::AnalysisFailed { .. } => FailedStage::Analysis,
        }
    }
}
