//! faceproc
//!
//! Runs the face pipeline over one image with the OpenVINO backends and
//! prints the result as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use faceproc::engine::{openvino_registry, ModelPool};
use faceproc::image_loader::encode_jpeg;
use faceproc::{AnalysisKind, AnalysisKinds, Config, DetectorKind, EmbedderKind, FaceImageProcessor, ImageSource};

#[derive(Parser, Debug)]
#[command(name = "faceproc", version, about = "Detect, embed and analyze the faces in an image")]
struct Args {
    /// Image to process
    image: PathBuf,

    /// TOML configuration file
    #[arg(short, long, default_value_t = Config::default_path().to_string())]
    config: String,

    /// Detector token, overrides the config
    #[arg(long)]
    detector: Option<DetectorKind>,

    /// Embedder token, overrides the config
    #[arg(long)]
    embedder: Option<EmbedderKind>,

    /// Comma-separated analysis kinds, overrides the config
    #[arg(long, value_delimiter = ',', conflicts_with = "no_analysis")]
    analysis: Option<Vec<AnalysisKind>>,

    /// Embed only
    #[arg(long)]
    no_analysis: bool,

    /// Use plain crops instead of aligned faces
    #[arg(long)]
    no_align: bool,

    /// Write each face crop as a JPEG into this directory
    #[arg(long, value_name = "DIR")]
    save_faces: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let mut config = Config::load(&args.config).unwrap_or_else(|e| {
        info!("Using default config ({:#})", e);
        Config::default()
    });

    if let Some(detector) = args.detector {
        config.pipeline.detector = detector;
    }
    if let Some(embedder) = args.embedder {
        config.pipeline.embedder = embedder;
    }
    if let Some(kinds) = args.analysis {
        config.pipeline.analysis = AnalysisKinds::new(kinds);
    }
    if args.no_analysis {
        config.pipeline.analysis = AnalysisKinds::none();
    }
    if args.no_align {
        config.pipeline.align = false;
    }

    info!("Device: {}", config.inference.device);
    info!(
        "Pipeline: detector={}, embedder={}, analysis=[{}], align={}",
        config.pipeline.detector, config.pipeline.embedder, config.pipeline.analysis, config.pipeline.align
    );

    let pool = Arc::new(ModelPool::new(&config.inference, &config.models));
    let registry = Arc::new(openvino_registry(pool.clone(), &config));

    let source = ImageSource::path(args.image);
    let mut processor = FaceImageProcessor::new(&source, config.to_processor_options(), registry)?;
    let aggregate = processor.process(&config.to_process_request(false))?;

    println!("{}", serde_json::to_string_pretty(&aggregate.to_json())?);

    if let Some(dir) = args.save_faces {
        std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
        for (i, face) in aggregate.faces.iter().enumerate() {
            let path = dir.join(format!("face_{}.jpg", i));
            let bytes = encode_jpeg(&face.face_image())?;
            std::fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        }
        info!("Saved {} face/s to {}", aggregate.faces.len(), dir.display());
    }

    let evicted = pool.evict_idle();
    if evicted > 0 {
        info!("Unloaded {} idle model/s", evicted);
    }
    for (model_type, loaded) in pool.status() {
        info!("Model {}: {}", model_type.as_str(), if loaded { "loaded" } else { "not loaded" });
    }

    Ok(())
}
