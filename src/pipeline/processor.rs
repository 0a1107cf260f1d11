//! Face image processor
//!
//! Owns one loaded image and sequences detection, embedding and analysis
//! over it. Each step's result is memoized: asking again returns the stored
//! value unless the step is reset or forced.

use std::sync::Arc;
use std::time::Instant;

use image::{DynamicImage, RgbImage};
use tracing::{debug, info};

use crate::backend::{AnalysisKinds, BackendRegistry, DetectOptions, DetectorKind, EmbedderKind};
use crate::entity::{FaceEntity, ImageAggregate};
use crate::error::PipelineError;
use crate::image_loader::{self, ImageSource, LoadedImage};

use super::{analysis, detection, embedding};

/// Settings fixed for the lifetime of a processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorOptions {
    pub detector: DetectorKind,
    pub align: bool,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            detector: DetectorKind::RetinaFace,
            align: true,
        }
    }
}

/// Arguments of [`FaceImageProcessor::process`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub embedder: EmbedderKind,
    /// Empty means embedding only
    pub analysis: AnalysisKinds,
    /// Re-run embedding and analysis even if a result exists.
    /// Detection is not re-run.
    pub force: bool,
}

impl ProcessRequest {
    pub fn new(embedder: EmbedderKind) -> Self {
        Self {
            embedder,
            analysis: AnalysisKinds::none(),
            force: false,
        }
    }

    pub fn with_analysis(mut self, analysis: AnalysisKinds) -> Self {
        self.analysis = analysis;
        self
    }

    pub fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Undetected,
    Detected,
    Processed,
}

/// Memoized stage results
#[derive(Debug, Default)]
pub struct PipelineState {
    faces: Option<Vec<FaceEntity>>,
    aggregate: Option<Arc<ImageAggregate>>,
}

impl PipelineState {
    pub fn stage(&self) -> Stage {
        match (&self.faces, &self.aggregate) {
            (_, Some(_)) => Stage::Processed,
            (Some(_), None) => Stage::Detected,
            (None, None) => Stage::Undetected,
        }
    }

    pub fn faces(&self) -> Option<&[FaceEntity]> {
        self.faces.as_deref()
    }

    pub fn aggregate(&self) -> Option<&Arc<ImageAggregate>> {
        self.aggregate.as_ref()
    }
}

pub struct FaceImageProcessor {
    image: LoadedImage,
    options: ProcessorOptions,
    backends: Arc<BackendRegistry>,
    state: PipelineState,
}

impl FaceImageProcessor {
    /// Load `source`; fails with `SourceNotFound` or `UnreadableImage`
    pub fn new(
        source: &ImageSource,
        options: ProcessorOptions,
        backends: Arc<BackendRegistry>,
    ) -> Result<Self, PipelineError> {
        debug!("Reading '{}' image", source.name());
        let image = image_loader::load(source).inspect_err(|e| {
            tracing::error!("Failed to read '{}' image: {}", source.name(), error_chain(e));
        })?;

        Ok(Self::from_loaded(image, options, backends))
    }

    /// Wrap an already decoded image
    pub fn from_loaded(image: LoadedImage, options: ProcessorOptions, backends: Arc<BackendRegistry>) -> Self {
        Self {
            image,
            options,
            backends,
            state: PipelineState::default(),
        }
    }

    /// Detect faces, or return the memoized faces unless `force` is set.
    ///
    /// A forced run replaces the faces and discards any processed result.
    /// On failure the previous state is kept.
    pub fn detect_faces(&mut self, force: bool) -> Result<&[FaceEntity], PipelineError> {
        if self.state.faces.is_none() || force {
            let faces = self.run_detection()?;
            self.state.faces = Some(faces);
            self.state.aggregate = None;
        } else {
            debug!("Faces of '{}' already detected", self.image.name);
        }

        Ok(self.state.faces.as_deref().unwrap_or_default())
    }

    /// Embed and analyze the detected faces and assemble the result.
    ///
    /// Returns the memoized result when one exists and `request.force` is
    /// false, whatever the other arguments are. Detection runs first if it
    /// never has. On failure the previous result, if any, is kept.
    pub fn process(&mut self, request: &ProcessRequest) -> Result<Arc<ImageAggregate>, PipelineError> {
        if !request.force {
            if let Some(aggregate) = &self.state.aggregate {
                debug!("'{}' already processed", self.image.name);
                return Ok(Arc::clone(aggregate));
            }
        }

        let start = Instant::now();

        if self.state.faces.is_none() {
            self.detect_faces(false)?;
        }
        let faces = self.state.faces.get_or_insert_with(Vec::new);

        if !faces.is_empty() {
            let kind = request.embedder;
            let embedder = self
                .backends
                .embedder(kind)
                .map_err(|source| PipelineError::EmbeddingFailed { embedder: kind, index: 0, source })?;
            embedding::embed(embedder.as_ref(), kind, faces).inspect_err(|e| {
                tracing::error!("Failed to extract face embeddings in '{}': {}", self.image.name, e);
            })?;

            if !request.analysis.is_empty() {
                let analyzer = self.backends.analyzer().map_err(|source| PipelineError::AnalysisFailed {
                    kinds: request.analysis.clone(),
                    source,
                })?;
                analysis::analyze(analyzer.as_ref(), faces, &request.analysis).inspect_err(|e| {
                    tracing::error!("Failed to analyze '{}' face/s: {}", self.image.name, e);
                })?;
            }
        }

        let aggregate = Arc::new(ImageAggregate {
            name: self.image.name.clone(),
            original_image: Arc::clone(&self.image.display),
            faces: faces.clone(),
        });
        self.state.aggregate = Some(Arc::clone(&aggregate));

        info!(
            "Processed '{}': {} face/s in {}ms",
            self.image.name,
            aggregate.faces.len(),
            start.elapsed().as_millis()
        );

        Ok(aggregate)
    }

    /// Drop the processed result; faces stay memoized
    pub fn reset_processing(&mut self) {
        self.state.aggregate = None;
    }

    /// Drop faces and the processed result
    pub fn reset_detection(&mut self) {
        self.state = PipelineState::default();
    }

    pub fn stage(&self) -> Stage {
        self.state.stage()
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn faces(&self) -> Option<&[FaceEntity]> {
        self.state.faces()
    }

    pub fn aggregate(&self) -> Option<&Arc<ImageAggregate>> {
        self.state.aggregate()
    }

    pub fn name(&self) -> &str {
        &self.image.name
    }

    pub fn display_image(&self) -> &Arc<DynamicImage> {
        &self.image.display
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.image.pixels
    }

    pub fn options(&self) -> &ProcessorOptions {
        &self.options
    }

    fn run_detection(&self) -> Result<Vec<FaceEntity>, PipelineError> {
        let kind = self.options.detector;
        let detector = self
            .backends
            .detector(kind)
            .map_err(|source| PipelineError::DetectionFailed { detector: kind, source })?;

        info!("Detecting faces in '{}'", self.image.name);
        detection::detect(
            detector.as_ref(),
            kind,
            &self.image.pixels,
            &DetectOptions { align: self.options.align },
        )
        .inspect_err(|e| tracing::error!("Failed to detect faces in '{}': {}", self.image.name, e))
    }
}

fn error_chain(err: &PipelineError) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
