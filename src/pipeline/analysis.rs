//! Analysis stage
//!
//! One batched backend call covers every face. Bundle `i` belongs to face
//! `i`. All bundles are validated and converted before any face is updated,
//! so a failure leaves the faces as they were.

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, info};

use crate::backend::{AgeValue, AnalysisBundle, AnalysisKind, AnalysisKinds, BackendOptions, FaceAnalyzerBackend};
use crate::entity::{FaceEntity, ScoreMap};
use crate::error::PipelineError;

/// Typed attributes for one face, one field per analysis kind
#[derive(Debug, Clone, Default, PartialEq)]
struct FaceAttributes {
    age: Option<f32>,
    gender: Option<String>,
    emotion: Option<(ScoreMap, String)>,
    race: Option<(ScoreMap, String)>,
}

impl FaceAttributes {
    fn apply(self, face: &mut FaceEntity) {
        if let Some(age) = self.age {
            face.age = Some(age);
        }
        if let Some(gender) = self.gender {
            face.gender = Some(gender);
        }
        if let Some((scores, dominant)) = self.emotion {
            face.emotion_scores = Some(scores);
            face.dominant_emotion = Some(dominant);
        }
        if let Some((scores, dominant)) = self.race {
            face.race_scores = Some(scores);
            face.dominant_race = Some(dominant);
        }
    }
}

pub fn analyze(
    analyzer: &dyn FaceAnalyzerBackend,
    faces: &mut [FaceEntity],
    kinds: &AnalysisKinds,
) -> Result<(), PipelineError> {
    if faces.is_empty() || kinds.is_empty() {
        return Ok(());
    }

    info!("Analyzing {} face/s for {}", faces.len(), kinds);

    let fail = |source: anyhow::Error| PipelineError::AnalysisFailed { kinds: kinds.clone(), source };

    let crops: Vec<_> = faces.iter().map(|f| f.cropped_pixels.as_ref()).collect();
    let bundles = analyzer
        .analyze(&crops, kinds, &BackendOptions::PRE_DETECTED)
        .map_err(fail)?;

    if bundles.len() != faces.len() {
        return Err(fail(anyhow!(
            "backend returned {} results for {} faces",
            bundles.len(),
            faces.len()
        )));
    }

    let attributes = bundles
        .into_iter()
        .enumerate()
        .map(|(index, bundle)| {
            debug!("Face {}: analysis result {:?}", index, bundle);
            merge(bundle, kinds).with_context(|| format!("face {}", index))
        })
        .collect::<Result<Vec<_>>>()
        .map_err(fail)?;

    for (face, attrs) in faces.iter_mut().zip(attributes) {
        attrs.apply(face);
    }

    Ok(())
}

/// Convert one bundle into typed attributes for the requested kinds
fn merge(mut bundle: AnalysisBundle, kinds: &AnalysisKinds) -> Result<FaceAttributes> {
    let mut attrs = FaceAttributes::default();

    for kind in kinds.iter() {
        let missing = || anyhow!("backend returned no {} result", kind);
        match kind {
            AnalysisKind::Age => {
                let age = bundle.age.take().ok_or_else(missing)?;
                attrs.age = Some(normalize_age(&age)?);
            }
            AnalysisKind::Gender => {
                attrs.gender = Some(bundle.gender.take().ok_or_else(missing)?);
            }
            AnalysisKind::Emotion => {
                let scores = finite_scores(bundle.emotion.take().ok_or_else(missing)?, kind)?;
                let dominant = dominant_label(&scores).ok_or_else(|| anyhow!("empty emotion scores"))?;
                attrs.emotion = Some((scores, dominant));
            }
            AnalysisKind::Race => {
                let scores = finite_scores(bundle.race.take().ok_or_else(missing)?, kind)?;
                let dominant = dominant_label(&scores).ok_or_else(|| anyhow!("empty race scores"))?;
                attrs.race = Some((scores, dominant));
            }
        }
    }

    Ok(attrs)
}

fn finite_scores(scores: ScoreMap, kind: AnalysisKind) -> Result<ScoreMap> {
    if let Some((label, score)) = scores.iter().find(|(_, s)| !s.is_finite()) {
        bail!("invalid {} score {} for '{}'", kind, score, label);
    }
    Ok(scores)
}

/// Age as a float, whatever form the backend reported it in
pub fn normalize_age(age: &AgeValue) -> Result<f32> {
    let value = match age {
        AgeValue::Integer(v) => *v as f32,
        AgeValue::Float(v) => *v as f32,
        AgeValue::Text(text) => text
            .trim()
            .parse::<f32>()
            .with_context(|| format!("invalid age '{}'", text))?,
    };
    if !value.is_finite() {
        bail!("invalid age {}", value);
    }
    Ok(value)
}

/// Label with the highest score; ties go to the label that sorts first.
/// NaN scores never win.
pub fn dominant_label(scores: &ScoreMap) -> Option<String> {
    let mut best: Option<(&String, f32)> = None;
    for (label, &score) in scores.iter().filter(|(_, s)| !s.is_nan()) {
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((label, score)),
        }
    }
    best.map(|(label, _)| label.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::BoundingBox;
    use image::RgbImage;

    fn scores(entries: &[(&str, f32)]) -> ScoreMap {
        entries.iter().map(|(l, s)| (l.to_string(), *s)).collect()
    }

    fn face() -> FaceEntity {
        FaceEntity::new(BoundingBox::new(0, 0, 4, 4).unwrap(), RgbImage::new(4, 4))
    }

    struct Canned(Vec<AnalysisBundle>);

    impl FaceAnalyzerBackend for Canned {
        fn analyze(
            &self,
            _faces: &[&RgbImage],
            _kinds: &AnalysisKinds,
            options: &BackendOptions,
        ) -> anyhow::Result<Vec<AnalysisBundle>> {
            assert!(!options.enforce_detection);
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_dominant_emotion() {
        let map = scores(&[("happy", 0.7), ("sad", 0.2), ("neutral", 0.1)]);
        assert_eq!(dominant_label(&map).as_deref(), Some("happy"));
    }

    #[test]
    fn test_dominant_tie_is_lexicographic() {
        let map = scores(&[("white", 0.4), ("asian", 0.4), ("black", 0.2)]);
        assert_eq!(dominant_label(&map).as_deref(), Some("asian"));
        assert_eq!(dominant_label(&ScoreMap::new()), None);
    }

    #[test]
    fn test_dominant_ignores_nan() {
        let map = scores(&[("angry", 0.9), ("sad", f32::NAN)]);
        assert_eq!(dominant_label(&map).as_deref(), Some("angry"));
        let map = scores(&[("angry", f32::NAN), ("sad", 0.1)]);
        assert_eq!(dominant_label(&map).as_deref(), Some("sad"));
        assert_eq!(dominant_label(&scores(&[("fear", f32::NAN)])), None);
    }

    #[test]
    fn test_non_finite_scores_fail_analysis() {
        let bundle = AnalysisBundle {
            emotion: Some(scores(&[("angry", 0.9), ("sad", f32::NAN)])),
            ..Default::default()
        };
        let mut faces = vec![face()];
        let kinds = AnalysisKinds::new([AnalysisKind::Emotion]);

        let err = analyze(&Canned(vec![bundle]), &mut faces, &kinds).unwrap_err();
        assert!(matches!(err, PipelineError::AnalysisFailed { .. }));
        assert!(faces[0].dominant_emotion.is_none());
    }

    #[test]
    fn test_age_normalization() {
        assert_eq!(normalize_age(&AgeValue::Text("29.0".into())).unwrap(), 29.0);
        assert_eq!(normalize_age(&AgeValue::Integer(29)).unwrap(), 29.0);
        assert_eq!(normalize_age(&AgeValue::Float(29.0)).unwrap(), 29.0);
        assert!(normalize_age(&AgeValue::Text("about thirty".into())).is_err());
        assert!(normalize_age(&AgeValue::Float(f64::NAN)).is_err());
    }

    #[test]
    fn test_merge_only_requested_kinds() {
        let bundle = AnalysisBundle {
            age: Some(AgeValue::Integer(40)),
            gender: Some("Woman".into()),
            emotion: Some(scores(&[("sad", 0.9)])),
            race: None,
        };
        let mut faces = vec![face()];
        let kinds = AnalysisKinds::new([AnalysisKind::Age, AnalysisKind::Gender]);
        analyze(&Canned(vec![bundle]), &mut faces, &kinds).unwrap();

        assert_eq!(faces[0].age, Some(40.0));
        assert_eq!(faces[0].gender.as_deref(), Some("Woman"));
        assert!(faces[0].emotion_scores.is_none());
        assert!(faces[0].dominant_emotion.is_none());
    }

    #[test]
    fn test_failure_is_atomic() {
        let good = AnalysisBundle {
            emotion: Some(scores(&[("happy", 0.8), ("fear", 0.2)])),
            ..Default::default()
        };
        let missing = AnalysisBundle::default();
        let mut faces = vec![face(), face()];
        let kinds = AnalysisKinds::new([AnalysisKind::Emotion]);

        let err = analyze(&Canned(vec![good, missing]), &mut faces, &kinds).unwrap_err();
        assert!(matches!(err, PipelineError::AnalysisFailed { .. }));
        assert!(faces.iter().all(|f| f.emotion_scores.is_none()));
    }

    #[test]
    fn test_result_count_mismatch() {
        let mut faces = vec![face(), face()];
        let kinds = AnalysisKinds::new([AnalysisKind::Gender]);
        let bundle = AnalysisBundle { gender: Some("Man".into()), ..Default::default() };

        let err = analyze(&Canned(vec![bundle]), &mut faces, &kinds).unwrap_err();
        assert!(err.to_string().contains("gender"));
        assert!(faces[0].gender.is_none());
    }

    #[test]
    fn test_race_sets_dominant() {
        let bundle = AnalysisBundle {
            race: Some(scores(&[("latino hispanic", 0.6), ("middle eastern", 0.4)])),
            ..Default::default()
        };
        let mut faces = vec![face()];
        analyze(&Canned(vec![bundle]), &mut faces, &AnalysisKinds::new([AnalysisKind::Race])).unwrap();
        assert_eq!(faces[0].dominant_race.as_deref(), Some("latino hispanic"));
    }
}
