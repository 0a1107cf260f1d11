//! Processing pipeline
//!
//! Loader -> detection -> embedding -> analysis, driven by
//! [`FaceImageProcessor`]. The stage functions are stateless; all memoized
//! state lives in the processor.

pub mod analysis;
pub mod detection;
pub mod embedding;
pub mod processor;

pub use processor::{FaceImageProcessor, PipelineState, ProcessRequest, ProcessorOptions, Stage};
