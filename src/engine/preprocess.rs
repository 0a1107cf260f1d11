//! Image preprocessing for the InsightFace-style models

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::Array4;

use crate::entity::BoundingBox;

/// Input size of the SCRFD detector
pub const DETECTOR_INPUT_SIZE: (u32, u32) = (640, 640);

/// Input size of the ArcFace embedder, also the aligned crop size
pub const EMBEDDER_INPUT_SIZE: (u32, u32) = (112, 112);

/// Input size of the gender/age model
pub const GENDER_AGE_INPUT_SIZE: (u32, u32) = (96, 96);

/// Input size of the FER+ emotion model
pub const EMOTION_INPUT_SIZE: (u32, u32) = (64, 64);

/// ArcFace landmark template for a 112x112 crop:
/// left eye, right eye, nose, left mouth corner, right mouth corner
pub const ALIGNED_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// Convert an RGB image to a 1x3xHxW tensor of (p - 127.5) / 128 values
pub fn to_nchw(image: &RgbImage, order: ChannelOrder) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let channels = match order {
            ChannelOrder::Rgb => [r, g, b],
            ChannelOrder::Bgr => [b, g, r],
        };
        for (c, value) in channels.into_iter().enumerate() {
            tensor[[0, c, y as usize, x as usize]] = (value as f32 - 127.5) / 128.0;
        }
    }

    tensor
}

/// Convert to a 1x1xHxW grayscale tensor of raw [0, 255] values (FER+ input)
pub fn to_gray_nchw(image: &RgbImage) -> Array4<f32> {
    let gray = imageops::grayscale(image);
    let (width, height) = gray.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 1, height as usize, width as usize));

    for (x, y, pixel) in gray.enumerate_pixels() {
        tensor[[0, 0, y as usize, x as usize]] = pixel[0] as f32;
    }

    tensor
}

/// Resize to exactly `size`
pub fn resize_exact(image: &RgbImage, size: (u32, u32)) -> RgbImage {
    imageops::resize(image, size.0, size.1, FilterType::Lanczos3)
}

/// Scale/offset applied by `letterbox`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeInfo {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub original_width: u32,
    pub original_height: u32,
}

impl ResizeInfo {
    pub fn new(original: (u32, u32), target: (u32, u32)) -> Self {
        let (orig_w, orig_h) = original;
        let (target_w, target_h) = target;

        let scale = f32::min(
            target_w as f32 / orig_w as f32,
            target_h as f32 / orig_h as f32,
        );

        let scaled_width = ((orig_w as f32 * scale) as u32).clamp(1, target_w);
        let scaled_height = ((orig_h as f32 * scale) as u32).clamp(1, target_h);

        Self {
            scale,
            offset_x: (target_w - scaled_width) / 2,
            offset_y: (target_h - scaled_height) / 2,
            scaled_width,
            scaled_height,
            original_width: orig_w,
            original_height: orig_h,
        }
    }

    /// Map a point in model input space back to the source image
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x as f32) / self.scale,
            (y - self.offset_y as f32) / self.scale,
        )
    }
}

/// Scale into `target` keeping the aspect ratio; the rest is black padding, image centered
pub fn letterbox(image: &RgbImage, target: (u32, u32)) -> (RgbImage, ResizeInfo) {
    let info = ResizeInfo::new(image.dimensions(), target);
    let resized = imageops::resize(image, info.scaled_width, info.scaled_height, FilterType::Lanczos3);

    let mut canvas = RgbImage::new(target.0, target.1);
    imageops::replace(&mut canvas, &resized, info.offset_x as i64, info.offset_y as i64);

    (canvas, info)
}

/// Copy out `bbox`, clipped to the image
pub fn crop_region(image: &RgbImage, bbox: &BoundingBox) -> RgbImage {
    let (img_w, img_h) = image.dimensions();
    let x = bbox.x.clamp(0, img_w as i32) as u32;
    let y = bbox.y.clamp(0, img_h as i32) as u32;
    let right = (bbox.x as i64 + bbox.width as i64).clamp(0, img_w as i64) as u32;
    let bottom = (bbox.y as i64 + bbox.height as i64).clamp(0, img_h as i64) as u32;

    imageops::crop_imm(image, x, y, right.saturating_sub(x), bottom.saturating_sub(y)).to_image()
}

/// 2x3 similarity transform `[s*R | t]`
pub type Similarity = [[f32; 3]; 2];

/// Least-squares similarity transform (rotation, uniform scale, translation)
/// mapping `src` onto `dst`
pub fn estimate_similarity(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Similarity {
    let centroid = |pts: &[(f32, f32); 5]| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
        (sx / 5.0, sy / 5.0)
    };
    let (scx, scy) = centroid(src);
    let (dcx, dcy) = centroid(dst);

    let (mut dot, mut cross, mut var) = (0.0f32, 0.0f32, 0.0f32);
    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
        let (sx, sy, dx, dy) = (sx - scx, sy - scy, dx - dcx, dy - dcy);
        dot += sx * dx + sy * dy;
        cross += sx * dy - sy * dx;
        var += sx * sx + sy * sy;
    }

    // a = s*cos(theta), b = s*sin(theta)
    let (a, b) = if var > 1e-10 { (dot / var, cross / var) } else { (1.0, 0.0) };

    [
        [a, -b, dcx - (a * scx - b * scy)],
        [b, a, dcy - (b * scx + a * scy)],
    ]
}

/// Warp the face so its landmarks land on the 112x112 ArcFace template
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let transform = estimate_similarity(landmarks, &ALIGNED_LANDMARKS);
    warp_similarity(image, &transform, EMBEDDER_INPUT_SIZE)
}

/// Backward-map every output pixel through the inverse transform with
/// bilinear sampling; samples outside the source stay black
fn warp_similarity(image: &RgbImage, transform: &Similarity, size: (u32, u32)) -> RgbImage {
    let (out_w, out_h) = size;
    let mut output = RgbImage::new(out_w, out_h);

    let (a, b) = (transform[0][0], transform[1][0]);
    let det = a * a + b * b;
    if det <= f32::EPSILON || image.width() < 2 || image.height() < 2 {
        return output;
    }
    let (tx, ty) = (transform[0][2], transform[1][2]);
    let max_x = (image.width() - 1) as f32;
    let max_y = (image.height() - 1) as f32;

    for (x, y, out) in output.enumerate_pixels_mut() {
        let (dx, dy) = (x as f32 - tx, y as f32 - ty);
        let src_x = (a * dx + b * dy) / det;
        let src_y = (-b * dx + a * dy) / det;

        if src_x < 0.0 || src_y < 0.0 || src_x >= max_x || src_y >= max_y {
            continue;
        }

        let (x0, y0) = (src_x as u32, src_y as u32);
        let (fx, fy) = (src_x - x0 as f32, src_y - y0 as f32);
        let p00 = image.get_pixel(x0, y0);
        let p10 = image.get_pixel(x0 + 1, y0);
        let p01 = image.get_pixel(x0, y0 + 1);
        let p11 = image.get_pixel(x0 + 1, y0 + 1);

        let mut pixel = [0u8; 3];
        for (c, value) in pixel.iter_mut().enumerate() {
            let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
                + p10[c] as f32 * fx * (1.0 - fy)
                + p01[c] as f32 * (1.0 - fx) * fy
                + p11[c] as f32 * fx * fy;
            *value = v.round().clamp(0.0, 255.0) as u8;
        }
        *out = Rgb(pixel);
    }

    output
}
