//! Error level analysis (ELA).
//!
//! Re-compresses the image as JPEG at a fixed quality and amplifies the
//! per-pixel difference. Regions pasted from a different source recompress
//! differently from the rest of the card and stand out in the residual.

use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ELA_JPEG_QUALITY: u8 = 90;

#[derive(Error, Debug)]
pub enum ElaError {
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Compute the brightness-scaled ELA residual of an RGB image in memory.
pub fn ela_residual(original: &RgbImage, quality: u8) -> Result<RgbImage, ElaError> {
    let mut encoded = Vec::new();
    JpegEncoder::new_with_quality(&mut encoded, quality).encode_image(original)?;
    let recompressed = image::load_from_memory_with_format(&encoded, ImageFormat::Jpeg)?.to_rgb8();

    let (w, h) = original.dimensions();
    let mut diff = RgbImage::new(w, h);
    let mut max_diff = 0u8;
    for (x, y, px) in diff.enumerate_pixels_mut() {
        let a = original.get_pixel(x, y);
        let b = recompressed.get_pixel(x, y);
        for c in 0..3 {
            let d = a[c].abs_diff(b[c]);
            px[c] = d;
            max_diff = max_diff.max(d);
        }
    }

    // An identical recompression would divide by zero; treat it as 1.
    let scale = 255.0 / max_diff.max(1) as f32;
    for px in diff.pixels_mut() {
        for c in 0..3 {
            px[c] = (px[c] as f32 * scale).round().min(255.0) as u8;
        }
    }

    Ok(diff)
}

/// Run ELA on the image at `image_path` and write the residual as JPEG.
pub fn compute_ela(
    image_path: &Path,
    output_path: &Path,
    quality: u8,
) -> Result<(PathBuf, RgbImage), ElaError> {
    let original = image::open(image_path)?.to_rgb8();
    let residual = ela_residual(&original, quality)?;

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    residual.save_with_format(output_path, ImageFormat::Jpeg)?;

    tracing::debug!(
        input = %image_path.display(),
        output = %output_path.display(),
        quality,
        "ELA residual written"
    );

    Ok((output_path.to_path_buf(), residual))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn checkerboard(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                Rgb([230, 40, 40])
            } else {
                Rgb([20, 20, 200])
            }
        })
    }

    #[test]
    fn test_residual_matches_input_size() {
        let img = checkerboard(64, 48);
        let ela = ela_residual(&img, ELA_JPEG_QUALITY).unwrap();
        assert_eq!(ela.dimensions(), (64, 48));
    }

    #[test]
    fn test_residual_is_scaled_to_full_range() {
        // Hard colour edges always leave some JPEG error; after scaling the
        // strongest difference lands at 255.
        let img = checkerboard(64, 64);
        let ela = ela_residual(&img, ELA_JPEG_QUALITY).unwrap();
        let max = ela.pixels().flat_map(|p| p.0).max().unwrap();
        assert_eq!(max, 255);
    }

    #[test]
    fn test_compute_ela_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("card.png");
        checkerboard(32, 32).save(&input).unwrap();

        let out = dir.path().join("ela/upload1/ela.jpg");
        let (path, residual) = compute_ela(&input, &out, ELA_JPEG_QUALITY).unwrap();
        assert_eq!(path, out);
        assert!(out.exists());
        assert_eq!(residual.dimensions(), (32, 32));
    }

    #[test]
    fn test_compute_ela_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let result = compute_ela(
            &dir.path().join("missing.jpg"),
            &dir.path().join("out.jpg"),
            ELA_JPEG_QUALITY,
        );
        assert!(result.is_err());
    }
}
