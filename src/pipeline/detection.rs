//! Detection stage

use anyhow::anyhow;
use image::RgbImage;
use tracing::info;

use crate::backend::{DetectOptions, DetectorKind, FaceDetectorBackend};
use crate::entity::FaceEntity;
use crate::error::PipelineError;

/// Run `detector` over `pixels` and package each region as a fresh entity.
///
/// The backend's order is kept as-is and becomes the identity order of the faces.
pub fn detect(
    detector: &dyn FaceDetectorBackend,
    kind: DetectorKind,
    pixels: &RgbImage,
    options: &DetectOptions,
) -> Result<Vec<FaceEntity>, PipelineError> {
    let regions = detector
        .detect(pixels, options)
        .map_err(|source| PipelineError::DetectionFailed { detector: kind, source })?;

    let mut faces = Vec::with_capacity(regions.len());
    for (index, region) in regions.into_iter().enumerate() {
        let bbox = region.bounding_box;
        if bbox.width == 0 || bbox.height == 0 {
            return Err(PipelineError::DetectionFailed {
                detector: kind,
                source: anyhow!("face {} has an empty bounding box {:?}", index, bbox),
            });
        }
        faces.push(FaceEntity::new(bbox, region.cropped));
    }

    info!("Detected {} face/s with {}", faces.len(), kind);
    Ok(faces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DetectedRegion;
    use crate::entity::BoundingBox;

    struct Fixed(Vec<DetectedRegion>);

    impl FaceDetectorBackend for Fixed {
        fn detect(&self, _image: &RgbImage, _options: &DetectOptions) -> anyhow::Result<Vec<DetectedRegion>> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    impl FaceDetectorBackend for Broken {
        fn detect(&self, _image: &RgbImage, _options: &DetectOptions) -> anyhow::Result<Vec<DetectedRegion>> {
            anyhow::bail!("corrupt buffer")
        }
    }

    fn region(x: i32, w: u32) -> DetectedRegion {
        DetectedRegion {
            bounding_box: BoundingBox { x, y: 0, width: w, height: 8 },
            cropped: RgbImage::new(w.max(1), 8),
        }
    }

    #[test]
    fn test_order_is_preserved() {
        let backend = Fixed(vec![region(50, 8), region(10, 8), region(30, 8)]);
        let faces = detect(&backend, DetectorKind::Ssd, &RgbImage::new(64, 64), &DetectOptions { align: false })
            .unwrap();
        let xs: Vec<i32> = faces.iter().map(|f| f.bounding_box.x).collect();
        assert_eq!(xs, vec![50, 10, 30]);
        assert!(faces.iter().all(|f| f.embedding.is_none() && f.gender.is_none()));
    }

    #[test]
    fn test_empty_box_fails() {
        let backend = Fixed(vec![region(0, 8), region(5, 0)]);
        let err = detect(&backend, DetectorKind::Ssd, &RgbImage::new(64, 64), &DetectOptions { align: true })
            .unwrap_err();
        assert!(matches!(err, PipelineError::DetectionFailed { detector: DetectorKind::Ssd, .. }));
    }

    #[test]
    fn test_backend_error_propagates() {
        let err = detect(&Broken, DetectorKind::Dlib, &RgbImage::new(4, 4), &DetectOptions { align: true })
            .unwrap_err();
        assert!(matches!(err, PipelineError::DetectionFailed { .. }));
    }
}
