//! Face entity records shared by all pipeline stages

use std::collections::BTreeMap;
use std::sync::Arc;

use image::{DynamicImage, RgbImage};
use serde::Serialize;

/// Label -> confidence, iterated in label order
pub type ScoreMap = BTreeMap<String, f32>;

/// Axis-aligned face region in source image pixels, origin top-left
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Returns `None` for an empty box
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Option<Self> {
        (width > 0 && height > 0).then_some(Self { x, y, width, height })
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!(self)
    }
}

/// One detected face.
///
/// Attribute fields stay `None` until the stage that produces them has run.
#[derive(Debug, Clone, Serialize)]
pub struct FaceEntity {
    pub bounding_box: BoundingBox,
    #[serde(skip)]
    pub cropped_pixels: Arc<RgbImage>,

    #[serde(rename = "embeddings")]
    pub embedding: Option<Vec<f32>>,

    pub age: Option<f32>,
    pub gender: Option<String>,

    #[serde(rename = "emotion")]
    pub emotion_scores: Option<ScoreMap>,
    pub dominant_emotion: Option<String>,

    #[serde(rename = "race")]
    pub race_scores: Option<ScoreMap>,
    pub dominant_race: Option<String>,
}

impl FaceEntity {
    pub fn new(bounding_box: BoundingBox, cropped_pixels: RgbImage) -> Self {
        Self {
            bounding_box,
            cropped_pixels: Arc::new(cropped_pixels),
            embedding: None,
            age: None,
            gender: None,
            emotion_scores: None,
            dominant_emotion: None,
            race_scores: None,
            dominant_race: None,
        }
    }

    /// The face crop as a displayable image
    pub fn face_image(&self) -> DynamicImage {
        DynamicImage::ImageRgb8(self.cropped_pixels.as_ref().clone())
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!(self)
    }
}

/// Result of processing one image
#[derive(Debug, Clone, Serialize)]
pub struct ImageAggregate {
    #[serde(rename = "image_name")]
    pub name: String,
    #[serde(skip)]
    pub original_image: Arc<DynamicImage>,
    pub faces: Vec<FaceEntity>,
}

impl ImageAggregate {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!(self)
    }
}
