//! Decode and preview-write seam over the `image` crate.
//!
//! The provider and preview manager only ever talk to [`ImageIo`], so tests
//! can count decodes, gate them, or fail writes without touching the
//! filesystem pipeline.

use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView, ImageFormat, RgbaImage};
use std::path::Path;

use pixel_cache::PixelBuffer;

/// Filesystem-facing image operations consumed by the serving core.
pub trait ImageIo: Send + Sync {
    /// Decode `path` into RGBA8 pixels, downscaled to fit within `target`
    /// when given. Implementations never upscale.
    fn decode(&self, path: &Path, target: Option<(u32, u32)>) -> Result<PixelBuffer>;

    /// Write `pixels` to `path`, with the format chosen by the extension.
    fn write(&self, path: &Path, pixels: &PixelBuffer) -> Result<()>;

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Production [`ImageIo`] backed by the `image` crate.
#[derive(Debug, Default)]
pub struct CrateImageIo;

impl ImageIo for CrateImageIo {
    fn decode(&self, path: &Path, target: Option<(u32, u32)>) -> Result<PixelBuffer> {
        let img = image::open(path)
            .with_context(|| format!("Failed to decode {}", path.display()))?;
        let img = match target {
            Some((w, h)) if w > 0 && h > 0 => downscale(img, w, h),
            _ => img,
        };
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(PixelBuffer::new(width, height, rgba.into_raw()))
    }

    fn write(&self, path: &Path, pixels: &PixelBuffer) -> Result<()> {
        let (width, height) = pixels.dimensions();
        let rgba = RgbaImage::from_raw(width, height, pixels.data().to_vec())
            .context("Pixel buffer does not match its dimensions")?;

        // JPEG has no alpha channel; flatten before encoding.
        match ImageFormat::from_path(path) {
            Ok(ImageFormat::Jpeg) => DynamicImage::ImageRgba8(rgba)
                .to_rgb8()
                .save(path)
                .with_context(|| format!("Failed to write {}", path.display()))?,
            _ => rgba
                .save(path)
                .with_context(|| format!("Failed to write {}", path.display()))?,
        }
        Ok(())
    }
}

/// Resize to fit within `max_w` x `max_h`, preserving aspect ratio.
/// Images already within bounds are returned untouched.
fn downscale(img: DynamicImage, max_w: u32, max_h: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if width <= max_w && height <= max_h {
        return img;
    }
    img.resize(max_w, max_h, image::imageops::FilterType::Lanczos3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn checker(width: u32, height: u32) -> PixelBuffer {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                let v = if (x + y) % 2 == 0 { 255 } else { 0 };
                data.extend_from_slice(&[v, v, v, 255]);
            }
        }
        PixelBuffer::new(width, height, data)
    }

    #[test]
    fn write_then_decode_round_trips_dimensions() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("img.png");
        let io = CrateImageIo;

        io.write(&path, &checker(64, 48))?;
        let decoded = io.decode(&path, None)?;
        assert_eq!(decoded.dimensions(), (64, 48));
        Ok(())
    }

    #[test]
    fn decode_downscales_but_never_upscales() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("img.png");
        let io = CrateImageIo;
        io.write(&path, &checker(100, 80))?;

        let scaled = io.decode(&path, Some((50, 50)))?;
        let (w, h) = scaled.dimensions();
        assert!(w <= 50 && h <= 50);
        assert_eq!(w, 50); // width is the limiting dimension
        assert_eq!(h, 40); // aspect ratio preserved

        let untouched = io.decode(&path, Some((400, 400)))?;
        assert_eq!(untouched.dimensions(), (100, 80));
        Ok(())
    }

    #[test]
    fn jpeg_write_flattens_alpha() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("img.jpg");
        let io = CrateImageIo;

        io.write(&path, &checker(32, 32))?;
        let decoded = io.decode(&path, None)?;
        assert_eq!(decoded.dimensions(), (32, 32));
        Ok(())
    }

    #[test]
    fn decode_of_missing_file_errors() {
        let io = CrateImageIo;
        assert!(io.decode(Path::new("/nonexistent/img.png"), None).is_err());
    }
}
