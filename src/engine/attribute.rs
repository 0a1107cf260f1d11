//! Face Attribute Analyzer
//!
//! Analyzes face attributes including:
//! - Age prediction
//! - Gender classification
//! - Emotion recognition
//!
//! There is no race model, so requests for race are refused.

use std::sync::Arc;

use anyhow::Result;
use image::RgbImage;

use crate::backend::{AgeValue, AnalysisBundle, AnalysisKind, AnalysisKinds, BackendOptions, FaceAnalyzerBackend};
use crate::entity::ScoreMap;
use crate::utils::math::{argmax, softmax};

use super::pool::{output_f32, ModelPool, ModelType};
use super::preprocess::{
    resize_exact, to_gray_nchw, to_nchw, ChannelOrder, EMOTION_INPUT_SIZE, GENDER_AGE_INPUT_SIZE,
};

/// Gender classification result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Woman,
    Man,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Woman => "Woman",
            Gender::Man => "Man",
        }
    }
}

/// FER+ emotion classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emotion {
    Neutral,
    Happy,
    Surprise,
    Sad,
    Angry,
    Disgust,
    Fear,
    Contempt,
}

impl Emotion {
    /// In FER+ output order
    pub const ALL: [Emotion; 8] = [
        Emotion::Neutral,
        Emotion::Happy,
        Emotion::Surprise,
        Emotion::Sad,
        Emotion::Angry,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Contempt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Happy => "happy",
            Emotion::Surprise => "surprise",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Disgust => "disgust",
            Emotion::Fear => "fear",
            Emotion::Contempt => "contempt",
        }
    }

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }
}

/// Gender, gender confidence and age from InsightFace genderage output.
///
/// Three values are `[female_logit, male_logit, age / 100]`; two values are
/// `[signed gender logit, age factor]` with positive meaning female.
pub fn parse_gender_age(output: &[f32]) -> Result<(Gender, f32, i32)> {
    let (gender, confidence, age) = match *output {
        [female, male, age_scale] => {
            let probs = softmax(&[female, male]);
            let (gender, confidence) = if male > female {
                (Gender::Man, probs[1])
            } else {
                (Gender::Woman, probs[0])
            };
            (gender, confidence, (age_scale * 100.0).round() as i32)
        }
        [gender_logit, age_factor] => {
            let sigmoid = 1.0 / (1.0 + (-gender_logit).exp());
            let (gender, confidence) = if sigmoid > 0.5 {
                (Gender::Woman, sigmoid)
            } else {
                (Gender::Man, 1.0 - sigmoid)
            };
            let age = if age_factor > 1.0 && age_factor < 120.0 {
                age_factor.round() as i32
            } else {
                (age_factor * 100.0).round() as i32
            };
            (gender, confidence, age)
        }
        _ => anyhow::bail!("unexpected genderage output length: {}", output.len()),
    };

    Ok((gender, confidence, age.clamp(1, 100)))
}

/// Softmax FER+ logits into a label -> probability map
pub fn emotion_scores(logits: &[f32]) -> Result<ScoreMap> {
    if logits.len() != Emotion::ALL.len() {
        anyhow::bail!("unexpected emotion output length: {}", logits.len());
    }

    Ok(Emotion::ALL
        .iter()
        .zip(softmax(logits))
        .map(|(emotion, p)| (emotion.as_str().to_string(), p))
        .collect())
}

pub struct AttributeAnalyzer {
    pool: Arc<ModelPool>,
}

impl AttributeAnalyzer {
    pub fn new(pool: Arc<ModelPool>) -> Self {
        Self { pool }
    }

    fn analyze_gender_age(&self, face: &RgbImage) -> Result<(Gender, f32, i32)> {
        let resized = resize_exact(face, GENDER_AGE_INPUT_SIZE);
        let tensor = to_nchw(&resized, ChannelOrder::Rgb);

        let model = self.pool.get_model(ModelType::GenderAge)?;
        let request = model.infer(&tensor)?;
        let output = output_f32(&request, 0)?;
        tracing::debug!("GenderAge model raw output: {:?}", output);

        let parsed = parse_gender_age(&output)?;
        tracing::debug!("Parsed: gender={:?}, conf={:.3}, age={}", parsed.0, parsed.1, parsed.2);
        Ok(parsed)
    }

    fn analyze_emotion(&self, face: &RgbImage) -> Result<ScoreMap> {
        let resized = resize_exact(face, EMOTION_INPUT_SIZE);
        let tensor = to_gray_nchw(&resized);

        let model = self.pool.get_model(ModelType::Emotion)?;
        let request = model.infer(&tensor)?;
        let output = output_f32(&request, 0)?;
        tracing::debug!(
            "Emotion model raw output: {:?}, top class {:?}",
            output,
            argmax(&output).and_then(Emotion::from_index)
        );

        emotion_scores(&output)
    }

    fn analyze_one(&self, face: &RgbImage, kinds: &AnalysisKinds) -> Result<AnalysisBundle> {
        let mut bundle = AnalysisBundle::default();

        if kinds.contains(AnalysisKind::Age) || kinds.contains(AnalysisKind::Gender) {
            let (gender, _, age) = self.analyze_gender_age(face)?;
            if kinds.contains(AnalysisKind::Age) {
                bundle.age = Some(AgeValue::Integer(age.into()));
            }
            if kinds.contains(AnalysisKind::Gender) {
                bundle.gender = Some(gender.as_str().to_string());
            }
        }

        if kinds.contains(AnalysisKind::Emotion) {
            bundle.emotion = Some(self.analyze_emotion(face)?);
        }

        Ok(bundle)
    }
}

impl FaceAnalyzerBackend for AttributeAnalyzer {
    fn analyze(
        &self,
        faces: &[&RgbImage],
        kinds: &AnalysisKinds,
        _options: &BackendOptions,
    ) -> Result<Vec<AnalysisBundle>> {
        if kinds.contains(AnalysisKind::Race) {
            anyhow::bail!("race analysis is not supported by the OpenVINO analyzer");
        }

        faces
            .iter()
            .map(|face| self.analyze_one(face, kinds))
            .collect()
    }
}
