//! SCRFD Face Detector
//!
//! InsightFace SCRFD model. Produces bounding boxes and 5-point landmarks;
//! registered as the RetinaFace-family detector.

use std::sync::Arc;

use anyhow::Result;
use image::RgbImage;

use crate::backend::{DetectOptions, DetectedRegion, FaceDetectorBackend};
use crate::entity::BoundingBox;

use super::pool::{output_count, output_f32, ModelPool, ModelType};
use super::preprocess::{
    align_face, crop_region, letterbox, to_nchw, ChannelOrder, ResizeInfo, DETECTOR_INPUT_SIZE,
};

/// Face detection result in source image coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub landmarks: [(f32, f32); 5],
}

impl FaceBox {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection over union
    pub fn iou(&self, other: &FaceBox) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = w * h;
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// `None` if the box rounds to zero size
    pub fn to_bounding_box(&self) -> Option<BoundingBox> {
        let x = self.x1.round();
        let y = self.y1.round();
        let width = (self.x2.round() - x).max(0.0) as u32;
        let height = (self.y2.round() - y).max(0.0) as u32;
        BoundingBox::new(x as i32, y as i32, width, height)
    }

    fn has_landmarks(&self) -> bool {
        self.landmarks.iter().any(|&(x, y)| x != 0.0 || y != 0.0)
    }
}

/// Output arrangement of an SCRFD export, told apart by output count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLayout {
    pub strides: &'static [u32],
    pub anchors: usize,
    pub keypoints: bool,
}

impl OutputLayout {
    pub fn from_output_count(count: usize) -> Self {
        const THREE: &[u32] = &[8, 16, 32];
        const FIVE: &[u32] = &[8, 16, 32, 64, 128];
        match count {
            6 => Self { strides: THREE, anchors: 2, keypoints: false },
            9 => Self { strides: THREE, anchors: 2, keypoints: true },
            10 => Self { strides: FIVE, anchors: 1, keypoints: false },
            15 => Self { strides: FIVE, anchors: 1, keypoints: true },
            _ => {
                tracing::warn!("Unknown SCRFD output count: {}, trying default", count);
                Self { strides: THREE, anchors: 2, keypoints: true }
            }
        }
    }
}

/// Raw outputs of one stride level
pub struct StrideOutputs<'a> {
    pub stride: u32,
    pub scores: &'a [f32],
    /// left, top, right, bottom distances in stride units
    pub distances: &'a [f32],
    pub keypoints: Option<&'a [f32]>,
}

/// Decode the anchors of one stride level above `threshold`
pub fn decode_stride(
    outputs: &StrideOutputs<'_>,
    anchors: usize,
    threshold: f32,
    resize: &ResizeInfo,
    found: &mut Vec<FaceBox>,
) {
    let (input_w, input_h) = DETECTOR_INPUT_SIZE;
    let step = outputs.stride as f32;
    let (feat_w, feat_h) = (input_w / outputs.stride, input_h / outputs.stride);
    let (max_x, max_y) = (resize.original_width as f32, resize.original_height as f32);

    let centers = (0..feat_h).flat_map(|y| {
        (0..feat_w).flat_map(move |x| std::iter::repeat((x as f32 * step, y as f32 * step)).take(anchors))
    });

    for (i, (cx, cy)) in centers.enumerate() {
        let Some(&score) = outputs.scores.get(i) else { break };
        if score < threshold {
            continue;
        }
        let Some(d) = outputs.distances.get(i * 4..i * 4 + 4) else { break };

        let (x1, y1) = resize.to_original(cx - d[0] * step, cy - d[1] * step);
        let (x2, y2) = resize.to_original(cx + d[2] * step, cy + d[3] * step);

        let mut landmarks = [(0.0f32, 0.0f32); 5];
        if let Some(kps) = outputs.keypoints.and_then(|k| k.get(i * 10..i * 10 + 10)) {
            for (j, point) in landmarks.iter_mut().enumerate() {
                *point = resize.to_original(cx + kps[j * 2] * step, cy + kps[j * 2 + 1] * step);
            }
        }

        found.push(FaceBox {
            x1: x1.clamp(0.0, max_x),
            y1: y1.clamp(0.0, max_y),
            x2: x2.clamp(0.0, max_x),
            y2: y2.clamp(0.0, max_y),
            confidence: score,
            landmarks,
        });
    }
}

/// Non-maximum suppression; result is sorted by descending confidence
pub fn nms(mut boxes: Vec<FaceBox>, threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if keep.iter().all(|kept| kept.iou(&candidate) <= threshold) {
            keep.push(candidate);
        }
    }
    keep
}

pub struct ScrfdDetector {
    pool: Arc<ModelPool>,
    confidence_threshold: f32,
    nms_threshold: f32,
}

impl ScrfdDetector {
    pub fn new(pool: Arc<ModelPool>, confidence_threshold: f32, nms_threshold: f32) -> Self {
        Self {
            pool,
            confidence_threshold,
            nms_threshold,
        }
    }

    /// Run SCRFD and return NMS-filtered boxes in source coordinates
    pub fn detect_boxes(&self, image: &RgbImage) -> Result<Vec<FaceBox>> {
        let (input, resize) = letterbox(image, DETECTOR_INPUT_SIZE);
        let tensor = to_nchw(&input, ChannelOrder::Bgr);

        let model = self.pool.get_model(ModelType::Detector)?;
        let request = model.infer(&tensor)?;

        let layout = OutputLayout::from_output_count(output_count(&request));
        let levels = layout.strides.len();
        tracing::debug!("SCRFD layout {:?}, threshold {}", layout, self.confidence_threshold);

        let mut found = Vec::new();
        for (idx, &stride) in layout.strides.iter().enumerate() {
            let scores = output_f32(&request, idx)?;
            let distances = output_f32(&request, idx + levels)?;
            let keypoints = if layout.keypoints {
                Some(output_f32(&request, idx + levels * 2)?)
            } else {
                None
            };

            let outputs = StrideOutputs {
                stride,
                scores: &scores,
                distances: &distances,
                keypoints: keypoints.as_deref(),
            };
            decode_stride(&outputs, layout.anchors, self.confidence_threshold, &resize, &mut found);
        }

        tracing::debug!("Total {} faces before NMS", found.len());
        Ok(nms(found, self.nms_threshold))
    }
}

impl FaceDetectorBackend for ScrfdDetector {
    fn detect(&self, image: &RgbImage, options: &DetectOptions) -> Result<Vec<DetectedRegion>> {
        let boxes = self.detect_boxes(image)?;

        let regions = boxes
            .iter()
            .filter_map(|face| face.to_bounding_box().map(|bbox| (face, bbox)))
            .map(|(face, bbox)| {
                let cropped = if options.align && face.has_landmarks() {
                    align_face(image, &face.landmarks)
                } else {
                    crop_region(image, &bbox)
                };
                DetectedRegion {
                    bounding_box: bbox,
                    cropped,
                }
            })
            .collect();

        Ok(regions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face_box(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> FaceBox {
        FaceBox { x1, y1, x2, y2, confidence, landmarks: [(0.0, 0.0); 5] }
    }

    #[test]
    fn test_iou_calculation() {
        let a = face_box(0.0, 0.0, 10.0, 10.0, 0.9);
        let b = face_box(5.0, 5.0, 15.0, 15.0, 0.8);

        // 25 / (100 + 100 - 25)
        assert!((a.iou(&b) - 0.143).abs() < 0.01);
        assert_eq!(a.iou(&face_box(20.0, 20.0, 30.0, 30.0, 0.5)), 0.0);
    }

    #[test]
    fn test_nms_keeps_best_and_sorts() {
        let boxes = vec![
            face_box(100.0, 100.0, 140.0, 140.0, 0.6),
            face_box(0.0, 0.0, 10.0, 10.0, 0.8),
            face_box(1.0, 1.0, 11.0, 11.0, 0.95),
        ];
        let kept = nms(boxes, 0.4);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.95);
        assert_eq!(kept[1].confidence, 0.6);
    }

    #[test]
    fn test_output_layouts() {
        assert_eq!(OutputLayout::from_output_count(9).strides, &[8, 16, 32]);
        assert!(OutputLayout::from_output_count(15).keypoints);
        assert_eq!(OutputLayout::from_output_count(10).anchors, 1);
        assert!(!OutputLayout::from_output_count(6).keypoints);
    }

    #[test]
    fn test_decode_stride() {
        // 640 / 32 = 20x20 grid, 2 anchors per cell
        let cells = 20 * 20 * 2;
        let mut scores = vec![0.0f32; cells];
        let mut distances = vec![0.0f32; cells * 4];
        let mut keypoints = vec![0.0f32; cells * 10];

        // cell (x=1, y=0), first anchor, centered at (32, 0)
        let i = 2;
        scores[i] = 0.9;
        distances[i * 4..i * 4 + 4].copy_from_slice(&[0.5, 0.0, 0.5, 1.0]);
        keypoints[i * 10] = 0.25;

        let resize = ResizeInfo::new((640, 640), DETECTOR_INPUT_SIZE);
        let outputs = StrideOutputs {
            stride: 32,
            scores: &scores,
            distances: &distances,
            keypoints: Some(keypoints.as_slice()),
        };

        let mut found = Vec::new();
        decode_stride(&outputs, 2, 0.5, &resize, &mut found);

        assert_eq!(found.len(), 1);
        let face = &found[0];
        assert_eq!((face.x1, face.y1, face.x2, face.y2), (16.0, 0.0, 48.0, 32.0));
        assert_eq!(face.landmarks[0], (40.0, 0.0));
        assert_eq!(
            face.to_bounding_box(),
            BoundingBox::new(16, 0, 32, 32)
        );
    }

    #[test]
    fn test_degenerate_box_has_no_bounding_box() {
        assert!(face_box(5.0, 5.0, 5.2, 30.0, 0.9).to_bounding_box().is_none());
    }
}
