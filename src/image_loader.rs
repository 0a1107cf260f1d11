//! Image loading
//!
//! Turns a path or an in-memory buffer into the decoded display image plus
//! the RGB pixel buffer the detectors consume.

use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use image::{DynamicImage, GenericImageView, RgbImage};

use crate::error::PipelineError;

/// Where to read an image from
#[derive(Debug, Clone)]
pub enum ImageSource {
    Path(PathBuf),
    Bytes { name: String, data: Vec<u8> },
}

impl ImageSource {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        ImageSource::Path(path.into())
    }

    pub fn bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        ImageSource::Bytes { name: name.into(), data }
    }

    /// File name of a path source, or the given name of a buffer
    pub fn name(&self) -> String {
        match self {
            ImageSource::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            ImageSource::Bytes { name, .. } => name.clone(),
        }
    }
}

impl From<&Path> for ImageSource {
    fn from(path: &Path) -> Self {
        ImageSource::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

/// A decoded image
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub name: String,
    /// Decoded image in its native color type, EXIF orientation applied
    pub display: Arc<DynamicImage>,
    /// Same image as 8-bit RGB
    pub pixels: RgbImage,
}

/// Load and decode an image source
pub fn load(source: &ImageSource) -> Result<LoadedImage, PipelineError> {
    let name = source.name();

    let data = match source {
        ImageSource::Path(path) => read_file(path)?,
        ImageSource::Bytes { data, .. } => data.clone(),
    };

    let display = decode_image(&data).map_err(|e| PipelineError::UnreadableImage {
        name: name.clone(),
        source: e,
    })?;

    let (width, height) = display.dimensions();
    if width == 0 || height == 0 {
        return Err(PipelineError::UnreadableImage {
            name,
            source: anyhow!("image has zero dimensions"),
        });
    }

    let pixels = display.to_rgb8();
    let color = display.color();
    tracing::debug!("Loaded '{}' ({}x{}, {:?})", name, width, height, color);

    Ok(LoadedImage {
        name,
        display: Arc::new(display),
        pixels,
    })
}

fn read_file(path: &Path) -> Result<Vec<u8>, PipelineError> {
    std::fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => PipelineError::SourceNotFound { path: path.to_path_buf() },
        _ => PipelineError::UnreadableImage {
            name: path.display().to_string(),
            source: e.into(),
        },
    })
}

/// Decode image bytes and apply the EXIF orientation tag, if any
pub fn decode_image(data: &[u8]) -> anyhow::Result<DynamicImage> {
    let image = image::load_from_memory(data)?;
    Ok(apply_exif_orientation(data, image))
}

fn apply_exif_orientation(data: &[u8], image: DynamicImage) -> DynamicImage {
    let orientation = exif::Reader::new()
        .read_from_container(&mut Cursor::new(data))
        .ok()
        .and_then(|exif| {
            exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
                .and_then(|field| field.value.get_uint(0))
        })
        .unwrap_or(1);

    orient(image, orientation)
}

/// Rotate/flip according to an EXIF orientation value (1-8); unknown values are ignored
fn orient(image: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

/// Encode image to PNG bytes
pub fn encode_png(image: &DynamicImage) -> anyhow::Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, image::ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

/// Encode image to JPEG bytes
pub fn encode_jpeg(image: &DynamicImage) -> anyhow::Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    // JPEG has no alpha channel
    DynamicImage::ImageRgb8(image.to_rgb8()).write_to(&mut buffer, image::ImageFormat::Jpeg)?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, Rgba, RgbaImage};

    #[test]
    fn test_missing_path_is_source_not_found() {
        let source = ImageSource::path("/definitely/not/here/photo.jpg");
        match load(&source) {
            Err(PipelineError::SourceNotFound { path }) => {
                assert!(path.ends_with("photo.jpg"));
            }
            other => panic!("expected SourceNotFound, got {:?}", other.map(|l| l.name)),
        }
    }

    #[test]
    fn test_garbage_bytes_are_unreadable() {
        let source = ImageSource::bytes("noise.bin", vec![0x13, 0x37, 0x00, 0xff, 0x42]);
        match load(&source) {
            Err(PipelineError::UnreadableImage { name, .. }) => assert_eq!(name, "noise.bin"),
            other => panic!("expected UnreadableImage, got {:?}", other.map(|l| l.name)),
        }
    }

    #[test]
    fn test_rgba_source_becomes_rgb() {
        let rgba = RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 128]));
        let png = encode_png(&DynamicImage::ImageRgba8(rgba)).unwrap();

        let loaded = load(&ImageSource::bytes("rgba.png", png)).unwrap();
        assert_eq!(loaded.pixels.dimensions(), (4, 3));
        assert_eq!(loaded.pixels.get_pixel(0, 0).0, [10, 20, 30]);
        assert!(loaded.display.color().has_alpha());
    }

    #[test]
    fn test_grayscale_source_becomes_rgb() {
        let gray = GrayImage::from_pixel(2, 2, Luma([77]));
        let png = encode_png(&DynamicImage::ImageLuma8(gray)).unwrap();

        let loaded = load(&ImageSource::bytes("gray.png", png)).unwrap();
        assert_eq!(loaded.pixels.get_pixel(1, 1).0, [77, 77, 77]);
    }

    #[test]
    fn test_path_source_uses_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portrait.png");
        let png = encode_png(&DynamicImage::new_rgb8(8, 8)).unwrap();
        std::fs::write(&path, png).unwrap();

        let loaded = load(&ImageSource::from(path)).unwrap();
        assert_eq!(loaded.name, "portrait.png");
        assert_eq!(loaded.display.dimensions(), (8, 8));
    }

    /// JPEG with an APP1 segment holding a single big-endian Orientation tag
    fn jpeg_with_orientation(image: &DynamicImage, orientation: u8) -> Vec<u8> {
        let jpeg = encode_jpeg(image).unwrap();
        let mut tiff = b"MM\x00\x2a\x00\x00\x00\x08".to_vec();
        tiff.extend_from_slice(&[0x00, 0x01]);
        tiff.extend_from_slice(&[0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01, 0x00, orientation, 0x00, 0x00]);
        tiff.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);

        let mut payload = b"Exif\x00\x00".to_vec();
        payload.extend_from_slice(&tiff);
        let length = (payload.len() + 2) as u16;

        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&[0xff, 0xe1]);
        out.extend_from_slice(&length.to_be_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    fn red_blue() -> DynamicImage {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, Rgb([255, 0, 0]));
        image.put_pixel(1, 0, Rgb([0, 0, 255]));
        DynamicImage::ImageRgb8(image)
    }

    #[test]
    fn test_orientation_moves_pixels() {
        let red = [255, 0, 0];
        let blue = [0, 0, 255];
        let top_left = |orientation| {
            let turned = orient(red_blue(), orientation).to_rgb8();
            (turned.dimensions(), turned.get_pixel(0, 0).0)
        };

        assert_eq!(top_left(1), ((2, 1), red));
        assert_eq!(top_left(2), ((2, 1), blue));
        assert_eq!(top_left(3), ((2, 1), blue));
        assert_eq!(top_left(4), ((2, 1), red));
        assert_eq!(top_left(5), ((1, 2), red));
        assert_eq!(top_left(6), ((1, 2), red));
        assert_eq!(top_left(7), ((1, 2), blue));
        assert_eq!(top_left(8), ((1, 2), blue));
        assert_eq!(top_left(42), ((2, 1), red));
    }

    #[test]
    fn test_exif_orientation_applied_on_load() {
        let landscape = DynamicImage::new_rgb8(16, 8);

        let upright = load(&ImageSource::bytes("plain.jpg", encode_jpeg(&landscape).unwrap())).unwrap();
        assert_eq!(upright.pixels.dimensions(), (16, 8));

        let rotated = load(&ImageSource::bytes("phone.jpg", jpeg_with_orientation(&landscape, 6))).unwrap();
        assert_eq!(rotated.pixels.dimensions(), (8, 16));
        assert_eq!(rotated.display.dimensions(), (8, 16));
    }

    #[test]
    fn test_jpeg_encoding_drops_alpha() {
        let rgba = DynamicImage::ImageRgba8(RgbaImage::new(4, 4));
        let jpeg = encode_jpeg(&rgba).unwrap();
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);
    }
}
