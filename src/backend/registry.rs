//! Backend registry
//!
//! Maps selection tokens to backend instances. Adding a backend family only
//! means registering it here; the pipeline stages never change.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::{DetectorKind, EmbedderKind, FaceAnalyzerBackend, FaceDetectorBackend, FaceEmbedderBackend};

#[derive(Default, Clone)]
pub struct BackendRegistry {
    detectors: HashMap<DetectorKind, Arc<dyn FaceDetectorBackend>>,
    embedders: HashMap<EmbedderKind, Arc<dyn FaceEmbedderBackend>>,
    analyzer: Option<Arc<dyn FaceAnalyzerBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detector(mut self, kind: DetectorKind, backend: Arc<dyn FaceDetectorBackend>) -> Self {
        self.detectors.insert(kind, backend);
        self
    }

    pub fn with_embedder(mut self, kind: EmbedderKind, backend: Arc<dyn FaceEmbedderBackend>) -> Self {
        self.embedders.insert(kind, backend);
        self
    }

    pub fn with_analyzer(mut self, backend: Arc<dyn FaceAnalyzerBackend>) -> Self {
        self.analyzer = Some(backend);
        self
    }

    pub fn detector(&self, kind: DetectorKind) -> Result<Arc<dyn FaceDetectorBackend>> {
        self.detectors
            .get(&kind)
            .cloned()
            .ok_or_else(|| anyhow!("no backend registered for detector '{}'", kind))
    }

    pub fn embedder(&self, kind: EmbedderKind) -> Result<Arc<dyn FaceEmbedderBackend>> {
        self.embedders
            .get(&kind)
            .cloned()
            .ok_or_else(|| anyhow!("no backend registered for embedder '{}'", kind))
    }

    pub fn analyzer(&self) -> Result<Arc<dyn FaceAnalyzerBackend>> {
        self.analyzer
            .clone()
            .ok_or_else(|| anyhow!("no analysis backend registered"))
    }

    /// Registered detector tokens, sorted
    pub fn detector_kinds(&self) -> Vec<DetectorKind> {
        let mut kinds: Vec<_> = self.detectors.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Registered embedder tokens, sorted
    pub fn embedder_kinds(&self) -> Vec<EmbedderKind> {
        let mut kinds: Vec<_> = self.embedders.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("detectors", &self.detector_kinds())
            .field("embedders", &self.embedder_kinds())
            .field("analyzer", &self.analyzer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendOptions, DetectOptions, DetectedRegion};
    use image::RgbImage;

    struct NoFaces;

    impl FaceDetectorBackend for NoFaces {
        fn detect(&self, _image: &RgbImage, _options: &DetectOptions) -> Result<Vec<DetectedRegion>> {
            Ok(Vec::new())
        }
    }

    struct Zeros;

    impl FaceEmbedderBackend for Zeros {
        fn embed(&self, _face: &RgbImage, _options: &BackendOptions) -> Result<Vec<f32>> {
            Ok(vec![0.0; 4])
        }
    }

    #[test]
    fn test_lookup_registered_and_missing() {
        let registry = BackendRegistry::new()
            .with_detector(DetectorKind::Mtcnn, Arc::new(NoFaces))
            .with_embedder(EmbedderKind::Facenet, Arc::new(Zeros));

        assert!(registry.detector(DetectorKind::Mtcnn).is_ok());
        assert!(registry.embedder(EmbedderKind::Facenet).is_ok());

        let err = registry.detector(DetectorKind::Ssd).err().unwrap();
        assert_eq!(err.to_string(), "no backend registered for detector 'ssd'");
        assert!(registry.analyzer().is_err());
    }

    #[test]
    fn test_registered_kinds_sorted() {
        let registry = BackendRegistry::new()
            .with_detector(DetectorKind::RetinaFace, Arc::new(NoFaces))
            .with_detector(DetectorKind::OpenCv, Arc::new(NoFaces));
        assert_eq!(
            registry.detector_kinds(),
            vec![DetectorKind::OpenCv, DetectorKind::RetinaFace]
        );
    }
}
