//! OpenVINO inference engine
//!
//! Backends built on InsightFace/FER+ models:
//! - SCRFD detection with 5-point landmarks
//! - ArcFace embeddings
//! - Gender/age and emotion attributes
//!
//! Models are compiled lazily by a shared [`ModelPool`].

pub mod attribute;
pub mod detector;
pub mod embedder;
pub mod pool;
pub mod preprocess;

use std::sync::Arc;

use crate::backend::{BackendRegistry, DetectorKind, EmbedderKind};
use crate::config::Config;

pub use attribute::AttributeAnalyzer;
pub use detector::ScrfdDetector;
pub use embedder::ArcFaceEmbedder;
pub use pool::{ModelPool, ModelType};

/// Registry with the OpenVINO backends under their tokens
pub fn openvino_registry(pool: Arc<ModelPool>, config: &Config) -> BackendRegistry {
    let detector = ScrfdDetector::new(
        pool.clone(),
        config.detection.confidence_threshold,
        config.detection.nms_threshold,
    );
    let embedder = ArcFaceEmbedder::new(pool.clone(), config.embedding.embedding_dim);

    BackendRegistry::default()
        .with_detector(DetectorKind::RetinaFace, Arc::new(detector))
        .with_embedder(EmbedderKind::ArcFace, Arc::new(embedder))
        .with_analyzer(Arc::new(AttributeAnalyzer::new(pool)))
}
