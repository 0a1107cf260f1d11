//! Model Pool Manager
//!
//! Compiles OpenVINO models on first use and keeps them cached. Models that
//! have not been used for the idle timeout are dropped by `evict_idle`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use ndarray::Array4;
use openvino::{CompiledModel, Core, ElementType, InferRequest, Shape, Tensor};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::{InferenceConfig, ModelsConfig};

/// Model types that can be loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelType {
    Detector,
    Embedder,
    GenderAge,
    Emotion,
}

impl ModelType {
    pub const ALL: [ModelType; 4] = [
        ModelType::Detector,
        ModelType::Embedder,
        ModelType::GenderAge,
        ModelType::Emotion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Detector => "detector",
            ModelType::Embedder => "embedder",
            ModelType::GenderAge => "gender_age",
            ModelType::Emotion => "emotion",
        }
    }
}

/// OpenVINO core, created on first model load
struct SharedCore(Mutex<Option<Core>>);

// SAFETY: the core is only reached through the mutex.
unsafe impl Send for SharedCore {}
unsafe impl Sync for SharedCore {}

/// Handle to a compiled model
#[derive(Clone)]
pub struct SharedModel(Arc<Mutex<CompiledModel>>);

// SAFETY: the compiled model is only reached through the mutex.
unsafe impl Send for SharedModel {}
unsafe impl Sync for SharedModel {}

impl SharedModel {
    /// Run one synchronous inference on an NCHW f32 tensor
    pub fn infer(&self, input: &Array4<f32>) -> Result<InferRequest> {
        let dims: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
        let shape = Shape::new(&dims)?;
        let mut tensor = Tensor::new(ElementType::F32, &shape)?;

        let raw = tensor.get_raw_data_mut()?;
        for (dst, value) in raw.chunks_exact_mut(4).zip(input.iter()) {
            dst.copy_from_slice(&value.to_ne_bytes());
        }

        let mut request = self.0.lock().create_infer_request()?;
        request.set_input_tensor(&tensor)?;
        request.infer()?;
        Ok(request)
    }
}

/// Read output `index` of a finished request as f32 values
pub fn output_f32(request: &InferRequest, index: usize) -> Result<Vec<f32>> {
    let tensor = request.get_output_tensor_by_index(index)?;
    let raw = tensor.get_raw_data()?;
    Ok(raw
        .chunks_exact(4)
        .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Number of outputs a finished request exposes
pub fn output_count(request: &InferRequest) -> usize {
    (0..32)
        .take_while(|&i| request.get_output_tensor_by_index(i).is_ok())
        .count()
}

struct CachedModel {
    model: SharedModel,
    last_access: Instant,
}

pub struct ModelPool {
    core: SharedCore,
    device: String,
    idle_timeout: Duration,
    paths: HashMap<ModelType, PathBuf>,
    cache: RwLock<HashMap<ModelType, CachedModel>>,
}

impl ModelPool {
    /// Create an empty pool; nothing is loaded until a model is requested
    pub fn new(inference: &InferenceConfig, models: &ModelsConfig) -> Self {
        let paths = HashMap::from([
            (ModelType::Detector, models.detector.clone()),
            (ModelType::Embedder, models.embedder.clone()),
            (ModelType::GenderAge, models.gender_age.clone()),
            (ModelType::Emotion, models.emotion.clone()),
        ]);

        Self {
            core: SharedCore(Mutex::new(None)),
            device: inference.device.clone(),
            idle_timeout: Duration::from_secs(inference.model_idle_timeout),
            paths,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Get or load a model. Other models idle past the timeout are unloaded first.
    pub fn get_model(&self, model_type: ModelType) -> Result<SharedModel> {
        self.evict_idle();
        let mut cache = self.cache.write();

        if let Some(cached) = cache.get_mut(&model_type) {
            cached.last_access = Instant::now();
            return Ok(cached.model.clone());
        }

        let model = self.compile(model_type)?;
        cache.insert(
            model_type,
            CachedModel {
                model: model.clone(),
                last_access: Instant::now(),
            },
        );

        Ok(model)
    }

    fn compile(&self, model_type: ModelType) -> Result<SharedModel> {
        let path = self
            .paths
            .get(&model_type)
            .with_context(|| format!("no path configured for {} model", model_type.as_str()))?;
        let path_str = path
            .to_str()
            .with_context(|| format!("model path {} is not valid UTF-8", path.display()))?;

        info!("Loading model: {} from {}", model_type.as_str(), path.display());
        let start = Instant::now();

        let mut guard = self.core.0.lock();
        let core = match guard.take() {
            Some(core) => core,
            None => Core::new().context("failed to initialize OpenVINO")?,
        };
        let core = guard.insert(core);

        let model = core
            .read_model_from_file(path_str, "")
            .with_context(|| format!("failed to read model {}", path.display()))?;
        let compiled = core
            .compile_model(&model, self.device.as_str().into())
            .with_context(|| format!("failed to compile {} model for {}", model_type.as_str(), self.device))?;

        info!("Model {} loaded in {:?}", model_type.as_str(), start.elapsed());
        Ok(SharedModel(Arc::new(Mutex::new(compiled))))
    }

    pub fn is_loaded(&self, model_type: ModelType) -> bool {
        self.cache.read().contains_key(&model_type)
    }

    /// Loaded flag per model type
    pub fn status(&self) -> Vec<(ModelType, bool)> {
        ModelType::ALL
            .into_iter()
            .map(|t| (t, self.is_loaded(t)))
            .collect()
    }

    /// Unload models idle for longer than the timeout; returns how many were dropped
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut cache = self.cache.write();
        let before = cache.len();

        cache.retain(|model_type, cached| {
            let keep = !is_idle(cached.last_access, now, self.idle_timeout);
            if !keep {
                info!("Unloading idle model: {}", model_type.as_str());
            }
            keep
        });

        let evicted = before - cache.len();
        debug!("Model cleanup check: {} evicted", evicted);
        evicted
    }
}

fn is_idle(last_access: Instant, now: Instant, timeout: Duration) -> bool {
    now.saturating_duration_since(last_access) > timeout
}
