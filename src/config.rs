//! Face processing configuration

use serde::Deserialize;
use std::path::PathBuf;

use anyhow::Context;

use crate::backend::{AnalysisKind, AnalysisKinds, DetectorKind, EmbedderKind};
use crate::pipeline::{ProcessRequest, ProcessorOptions};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub inference: InferenceConfig,
    pub models: ModelsConfig,
    pub detection: DetectionConfig,
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub detector: DetectorKind,
    pub align: bool,
    pub embedder: EmbedderKind,
    pub analysis: AnalysisKinds,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub device: String,
    /// Seconds a model may stay unused before `ModelPool::evict_idle` unloads it
    pub model_idle_timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub detector: PathBuf,
    pub embedder: PathBuf,
    pub gender_age: PathBuf,
    pub emotion: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub embedding_dim: usize,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn default_path() -> &'static str {
        "config.toml"
    }

    pub fn to_processor_options(&self) -> ProcessorOptions {
        ProcessorOptions {
            detector: self.pipeline.detector,
            align: self.pipeline.align,
        }
    }

    pub fn to_process_request(&self, force: bool) -> ProcessRequest {
        ProcessRequest::new(self.pipeline.embedder)
            .with_analysis(self.pipeline.analysis.clone())
            .forced(force)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detector: DetectorKind::RetinaFace,
            align: true,
            embedder: EmbedderKind::ArcFace,
            analysis: AnalysisKinds::new([AnalysisKind::Age, AnalysisKind::Gender, AnalysisKind::Emotion]),
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            device: "CPU".to_string(),
            model_idle_timeout: 300,
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            detector: PathBuf::from("models/scrfd_10g_kps.onnx"),
            embedder: PathBuf::from("models/glint360k_r100.onnx"),
            gender_age: PathBuf::from("models/genderage.onnx"),
            emotion: PathBuf::from("models/emotion_ferplus.onnx"),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            nms_threshold: 0.4,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { embedding_dim: 512 }
    }
}
