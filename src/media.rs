//! Image decoding, preview encoding, and the scene codec interface.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

use crate::engine::Geometry;
use crate::error::CodecError;

/// Longest side of a preview image, in pixels.
pub const PREVIEW_MAX_SIZE: u32 = 720;

/// JPEG quality used for previews.
pub const PREVIEW_QUALITY: u8 = 92;

/// Focal length assumed when an image carries none, as a 35mm equivalent.
const DEFAULT_FOCAL_LENGTH_MM: f32 = 30.0;

/// Full-frame sensor width the 35mm equivalent is relative to.
const FULL_FRAME_WIDTH_MM: f32 = 36.0;

/// A decoded input image.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub image: RgbImage,
    pub focal_length_px: f32,
}

impl LoadedImage {
    /// `(height, width)` in pixels.
    pub fn dims(&self) -> (u32, u32) {
        (self.image.height(), self.image.width())
    }
}

/// Camera parameters the renderer needs.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneMetadata {
    pub focal_length_px: f32,
    /// `(width, height)` in pixels.
    pub resolution: (u32, u32),
    pub color_space: String,
}

/// Videos produced by a render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedVideo {
    pub video: PathBuf,
    pub depth_video: Option<PathBuf>,
}

/// Image codec, geometry writer, and renderer.
pub trait SceneCodec: Send + Sync {
    fn load_rgb(&self, path: &Path) -> Result<LoadedImage, CodecError>;

    /// Write `geometry` to `path`. `dims` is `(height, width)`.
    fn save_geometry(
        &self,
        geometry: &Geometry,
        focal_length_px: f32,
        dims: (u32, u32),
        path: &Path,
    ) -> Result<(), CodecError>;

    /// Render a turntable video to `path`, possibly with a depth video beside it.
    fn render(
        &self,
        geometry: &Geometry,
        metadata: &SceneMetadata,
        path: &Path,
    ) -> Result<RenderedVideo, CodecError>;
}

/// Decode an image file into RGB8 with a default focal length.
pub fn decode_rgb(path: &Path) -> Result<LoadedImage, CodecError> {
    let image = image::open(path)
        .map_err(|e| CodecError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
        .into_rgb8();
    let focal_length_px = default_focal_length_px(image.width(), image.height());
    Ok(LoadedImage {
        image,
        focal_length_px,
    })
}

/// Focal length in pixels for the default 35mm-equivalent lens.
pub fn default_focal_length_px(width: u32, height: u32) -> f32 {
    DEFAULT_FOCAL_LENGTH_MM / FULL_FRAME_WIDTH_MM * width.max(height) as f32
}

/// Write a JPEG preview no larger than `max_size` on either side.
///
/// Images already within bounds are encoded at their original size.
pub fn write_preview(image: &RgbImage, path: &Path, max_size: u32) -> Result<(), CodecError> {
    let encode_err = |e: image::ImageError| CodecError::Encode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let (width, height) = image.dimensions();
    let scaled;
    let preview = if width > max_size || height > max_size {
        let scale = max_size as f32 / width.max(height) as f32;
        let new_width = ((width as f32 * scale).round() as u32).max(1);
        let new_height = ((height as f32 * scale).round() as u32).max(1);
        scaled = image::imageops::resize(image, new_width, new_height, FilterType::Triangle);
        &scaled
    } else {
        image
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(path)?);
    let mut encoder = JpegEncoder::new_with_quality(writer, PREVIEW_QUALITY);
    encoder.encode_image(preview).map_err(encode_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| image::Rgb([(x % 256) as u8, (y % 256) as u8, 128]))
    }

    #[test]
    fn test_preview_downscales_large_images() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("big.preview.jpg");

        write_preview(&gradient(1440, 720), &path, PREVIEW_MAX_SIZE).unwrap();

        let preview = image::open(&path).unwrap();
        assert_eq!(preview.width(), 720);
        assert_eq!(preview.height(), 360);
    }

    #[test]
    fn test_preview_never_upscales() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("small.preview.jpg");

        write_preview(&gradient(64, 32), &path, PREVIEW_MAX_SIZE).unwrap();

        let preview = image::open(&path).unwrap();
        assert_eq!((preview.width(), preview.height()), (64, 32));
    }

    #[test]
    fn test_decode_rgb_reads_png() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("in.png");
        gradient(40, 20).save(&path).unwrap();

        let loaded = decode_rgb(&path).unwrap();
        assert_eq!(loaded.dims(), (20, 40));
        assert!((loaded.focal_length_px - 40.0 * 30.0 / 36.0).abs() < 1e-3);
    }

    #[test]
    fn test_decode_rgb_rejects_garbage() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("junk.png");
        std::fs::write(&path, b"not an image").unwrap();

        let err = decode_rgb(&path).unwrap_err();
        assert!(matches!(err, CodecError::Decode { .. }));
    }
}
