//! Backend interface
//!
//! Detection, embedding and attribute analysis are provided by opaque models
//! behind the traits in this module. The pipeline only ever talks to these
//! traits; concrete implementations are looked up in a [`BackendRegistry`]
//! by their selection token.

pub mod kinds;
pub mod registry;

use image::RgbImage;
use anyhow::Result;

use crate::entity::{BoundingBox, ScoreMap};

pub use kinds::{AnalysisKind, AnalysisKinds, DetectorKind, EmbedderKind};
pub use registry::BackendRegistry;

/// Options passed to a detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectOptions {
    /// Return crops geometrically normalized (eye line levelled)
    pub align: bool,
}

/// Options passed to embedders and analyzers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendOptions {
    /// Re-validate that the input contains a face before running the model.
    /// The pipeline always disables this since its inputs are detector crops.
    pub enforce_detection: bool,
}

impl BackendOptions {
    pub const PRE_DETECTED: BackendOptions = BackendOptions { enforce_detection: false };
}

/// One face found by a detector
#[derive(Debug, Clone)]
pub struct DetectedRegion {
    pub bounding_box: BoundingBox,
    pub cropped: RgbImage,
}

/// Age as reported by an analyzer; some models emit it as text
#[derive(Debug, Clone, PartialEq)]
pub enum AgeValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

/// Per-face result of a batched analysis call.
///
/// Only the fields for the requested kinds are expected to be set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisBundle {
    pub age: Option<AgeValue>,
    pub gender: Option<String>,
    pub emotion: Option<ScoreMap>,
    pub race: Option<ScoreMap>,
}

/// Locates faces in an RGB image.
///
/// The returned order becomes the identity order of the faces.
pub trait FaceDetectorBackend: Send + Sync {
    fn detect(&self, image: &RgbImage, options: &DetectOptions) -> Result<Vec<DetectedRegion>>;
}

/// Maps a face crop to a fixed-length vector.
pub trait FaceEmbedderBackend: Send + Sync {
    fn embed(&self, face: &RgbImage, options: &BackendOptions) -> Result<Vec<f32>>;
}

/// Runs attribute models over a batch of face crops.
///
/// Must return exactly one bundle per input, in input order.
pub trait FaceAnalyzerBackend: Send + Sync {
    fn analyze(
        &self,
        faces: &[&RgbImage],
        kinds: &AnalysisKinds,
        options: &BackendOptions,
    ) -> Result<Vec<AnalysisBundle>>;
}
