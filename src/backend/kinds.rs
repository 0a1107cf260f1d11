//! Backend selection tokens
//!
//! The token strings match the model names used in configuration files.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Face detector families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DetectorKind {
    #[serde(rename = "opencv")]
    OpenCv,
    #[serde(rename = "ssd")]
    Ssd,
    #[serde(rename = "dlib")]
    Dlib,
    #[serde(rename = "mtcnn")]
    Mtcnn,
    #[serde(rename = "retinaface")]
    RetinaFace,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 5] = [
        DetectorKind::OpenCv,
        DetectorKind::Ssd,
        DetectorKind::Dlib,
        DetectorKind::Mtcnn,
        DetectorKind::RetinaFace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::OpenCv => "opencv",
            DetectorKind::Ssd => "ssd",
            DetectorKind::Dlib => "dlib",
            DetectorKind::Mtcnn => "mtcnn",
            DetectorKind::RetinaFace => "retinaface",
        }
    }
}

/// Face embedding model families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EmbedderKind {
    #[serde(rename = "VGG-Face")]
    VggFace,
    #[serde(rename = "Facenet")]
    Facenet,
    #[serde(rename = "Facenet512")]
    Facenet512,
    #[serde(rename = "OpenFace")]
    OpenFace,
    #[serde(rename = "DeepFace")]
    DeepFace,
    #[serde(rename = "DeepID")]
    DeepId,
    #[serde(rename = "Dlib")]
    Dlib,
    #[serde(rename = "ArcFace")]
    ArcFace,
}

impl EmbedderKind {
    pub const ALL: [EmbedderKind; 8] = [
        EmbedderKind::VggFace,
        EmbedderKind::Facenet,
        EmbedderKind::Facenet512,
        EmbedderKind::OpenFace,
        EmbedderKind::DeepFace,
        EmbedderKind::DeepId,
        EmbedderKind::Dlib,
        EmbedderKind::ArcFace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmbedderKind::VggFace => "VGG-Face",
            EmbedderKind::Facenet => "Facenet",
            EmbedderKind::Facenet512 => "Facenet512",
            EmbedderKind::OpenFace => "OpenFace",
            EmbedderKind::DeepFace => "DeepFace",
            EmbedderKind::DeepId => "DeepID",
            EmbedderKind::Dlib => "Dlib",
            EmbedderKind::ArcFace => "ArcFace",
        }
    }
}

/// Attribute analyses that can be requested for detected faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisKind {
    Age,
    Gender,
    Emotion,
    Race,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 4] = [
        AnalysisKind::Age,
        AnalysisKind::Gender,
        AnalysisKind::Emotion,
        AnalysisKind::Race,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Age => "age",
            AnalysisKind::Gender => "gender",
            AnalysisKind::Emotion => "emotion",
            AnalysisKind::Race => "race",
        }
    }
}

/// De-duplicated set of requested analyses, iterated in a fixed order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisKinds(BTreeSet<AnalysisKind>);

impl AnalysisKinds {
    pub fn new(kinds: impl IntoIterator<Item = AnalysisKind>) -> Self {
        Self(kinds.into_iter().collect())
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self::new(AnalysisKind::ALL)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, kind: AnalysisKind) -> bool {
        self.0.contains(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = AnalysisKind> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<AnalysisKind> for AnalysisKinds {
    fn from_iter<I: IntoIterator<Item = AnalysisKind>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl fmt::Display for AnalysisKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|k| k.as_str()).collect();
        write!(f, "{}", names.join(", "))
    }
}

macro_rules! impl_token {
    ($kind:ty, $what:literal) => {
        impl fmt::Display for $kind {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $kind {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .into_iter()
                    .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
                    .ok_or_else(|| anyhow::anyhow!("unknown {} '{}'", $what, s))
            }
        }
    };
}

impl_token!(DetectorKind, "detector");
impl_token!(EmbedderKind, "embedder");
impl_token!(AnalysisKind, "analysis kind");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_parse_case_insensitive() {
        assert_eq!("RetinaFace".parse::<DetectorKind>().unwrap(), DetectorKind::RetinaFace);
        assert_eq!("facenet512".parse::<EmbedderKind>().unwrap(), EmbedderKind::Facenet512);
        assert_eq!("vgg-face".parse::<EmbedderKind>().unwrap(), EmbedderKind::VggFace);
        assert_eq!(" Race ".parse::<AnalysisKind>().unwrap(), AnalysisKind::Race);
        assert!("yolo".parse::<DetectorKind>().is_err());
    }

    #[test]
    fn test_analysis_kinds_dedup_and_order() {
        let kinds = AnalysisKinds::new([
            AnalysisKind::Race,
            AnalysisKind::Age,
            AnalysisKind::Race,
        ]);
        assert_eq!(kinds.len(), 2);
        assert_eq!(kinds.to_string(), "age, race");
        assert!(AnalysisKinds::none().is_empty());
        assert_eq!(AnalysisKinds::all().len(), 4);
    }

    #[test]
    fn test_serde_tokens() {
        let json = serde_json::to_string(&EmbedderKind::DeepId).unwrap();
        assert_eq!(json, "\"DeepID\"");
        let kinds: AnalysisKinds = serde_json::from_str(r#"["gender", "age"]"#).unwrap();
        assert!(kinds.contains(AnalysisKind::Age));
        assert!(kinds.contains(AnalysisKind::Gender));
    }
}
