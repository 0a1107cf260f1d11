//! Face analysis pipeline library
//!
//! Loads one image, detects faces, embeds them and analyzes their
//! attributes through pluggable backends, memoizing each stage.

pub mod backend;
pub mod config;
pub mod engine;
pub mod entity;
pub mod error;
pub mod image_loader;
pub mod pipeline;
pub mod utils;

pub use backend::{AnalysisKind, AnalysisKinds, BackendRegistry, DetectorKind, EmbedderKind};
pub use config::Config;
pub use entity::{BoundingBox, FaceEntity, ImageAggregate, ScoreMap};
pub use error::{FailedStage, PipelineError};
pub use image_loader::ImageSource;
pub use pipeline::{FaceImageProcessor, ProcessRequest, ProcessorOptions, Stage};
