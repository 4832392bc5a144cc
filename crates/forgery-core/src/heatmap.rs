//! Tamper heatmaps: coarse [0, 1] activation grids, the tampered-area
//! ratio computed from them, and the jet-coloured overlays written for
//! the dashboard.

use image::{ImageFormat, Rgb, RgbImage};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Cells at or above this activation count as tampered.
pub const TAMPER_THRESHOLD: f32 = 0.5;

/// Side length of the activation grid built from an ELA residual.
pub const RESIDUAL_GRID: usize = 32;

/// Blend factor of the colour ramp over the source image.
pub const OVERLAY_ALPHA: f32 = 0.5;

#[derive(Error, Debug)]
pub enum HeatmapError {
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Row-major activation grid with values in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct Heatmap {
    width: usize,
    height: usize,
    values: Vec<f32>,
}

impl Heatmap {
    /// Build from raw values. Returns `None` if the length does not match.
    pub fn new(width: usize, height: usize, values: Vec<f32>) -> Option<Self> {
        (values.len() == width * height).then_some(Self { width, height, values })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Average an ELA residual into a `grid × grid` map and min-max normalize it.
    pub fn from_residual(residual: &RgbImage, grid: usize) -> Self {
        let (w, h) = residual.dimensions();
        let (w, h) = (w as usize, h as usize);
        let grid = grid.max(1);
        let mut sums = vec![0f32; grid * grid];
        let mut counts = vec![0u32; grid * grid];

        for (x, y, px) in residual.enumerate_pixels() {
            let gx = (x as usize * grid / w.max(1)).min(grid - 1);
            let gy = (y as usize * grid / h.max(1)).min(grid - 1);
            let intensity = px.0.iter().copied().max().unwrap_or(0) as f32 / 255.0;
            sums[gy * grid + gx] += intensity;
            counts[gy * grid + gx] += 1;
        }

        let values = sums
            .iter()
            .zip(counts.iter())
            .map(|(&s, &c)| if c > 0 { s / c as f32 } else { 0.0 })
            .collect();

        Self { width: grid, height: grid, values }.normalized()
    }

    /// Shift to zero minimum and scale to unit maximum. A flat map becomes all zeros.
    pub fn normalized(mut self) -> Self {
        let min = self.values.iter().copied().fold(f32::INFINITY, f32::min);
        for v in self.values.iter_mut() {
            *v -= min;
        }
        let max = self.values.iter().copied().fold(0.0f32, f32::max);
        if max > 0.0 {
            for v in self.values.iter_mut() {
                *v /= max;
            }
        }
        self
    }

    /// Number of cells at or above `threshold`.
    pub fn count_at_or_above(&self, threshold: f32) -> usize {
        self.values.iter().filter(|&&v| v >= threshold).count()
    }

    /// Bilinear sample at normalized coordinates (u, v) in [0, 1].
    fn sample(&self, u: f32, v: f32) -> f32 {
        let fx = (u * self.width as f32 - 0.5).clamp(0.0, (self.width - 1) as f32);
        let fy = (v * self.height as f32 - 0.5).clamp(0.0, (self.height - 1) as f32);
        let x0 = fx as usize;
        let y0 = fy as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let dx = fx - x0 as f32;
        let dy = fy - y0 as f32;

        let at = |x: usize, y: usize| self.values[y * self.width + x];
        let top = at(x0, y0) * (1.0 - dx) + at(x1, y0) * dx;
        let bot = at(x0, y1) * (1.0 - dx) + at(x1, y1) * dx;
        top * (1.0 - dy) + bot * dy
    }
}

/// Fraction of tampered cells across every heatmap of a document.
pub fn tampered_ratio(heatmaps: &[Heatmap], threshold: f32) -> f32 {
    let total: usize = heatmaps.iter().map(Heatmap::len).sum();
    if total == 0 {
        return 0.0;
    }
    let on: usize = heatmaps.iter().map(|h| h.count_at_or_above(threshold)).sum();
    on as f32 / total as f32
}

/// Jet colour ramp: blue → cyan → yellow → red.
pub fn jet(value: f32) -> Rgb<u8> {
    let v = value.clamp(0.0, 1.0);
    let channel = |offset: f32| ((1.5 - (4.0 * v - offset).abs()).clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

/// Blend a jet-coloured heatmap over `image`.
pub fn overlay(image: &RgbImage, heatmap: &Heatmap, alpha: f32) -> RgbImage {
    let (w, h) = image.dimensions();
    if heatmap.is_empty() {
        return image.clone();
    }
    RgbImage::from_fn(w, h, |x, y| {
        let u = (x as f32 + 0.5) / w as f32;
        let v = (y as f32 + 0.5) / h as f32;
        let colour = jet(heatmap.sample(u, v));
        let base = image.get_pixel(x, y);
        let mut out = [0u8; 3];
        for c in 0..3 {
            out[c] = (alpha * colour[c] as f32 + (1.0 - alpha) * base[c] as f32) as u8;
        }
        Rgb(out)
    })
}

/// Overlay `heatmap` on `image` and write it as JPEG, creating parent directories.
pub fn save_overlay(image: &RgbImage, heatmap: &Heatmap, output_path: &Path) -> Result<PathBuf, HeatmapError> {
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    overlay(image, heatmap, OVERLAY_ALPHA).save_with_format(output_path, ImageFormat::Jpeg)?;
    Ok(output_path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_wrong_length() {
        assert!(Heatmap::new(2, 2, vec![0.0; 3]).is_none());
        assert!(Heatmap::new(2, 2, vec![0.0; 4]).is_some());
    }

    #[test]
    fn test_normalized_range() {
        let h = Heatmap::new(2, 2, vec![2.0, 4.0, 6.0, 10.0]).unwrap().normalized();
        assert_eq!(h.values(), &[0.0, 0.25, 0.5, 1.0]);
    }

    #[test]
    fn test_normalized_flat_map_is_zero() {
        let h = Heatmap::new(2, 1, vec![0.7, 0.7]).unwrap().normalized();
        assert_eq!(h.values(), &[0.0, 0.0]);
    }

    #[test]
    fn test_tampered_ratio_spans_all_maps() {
        let a = Heatmap::new(2, 2, vec![0.9, 0.1, 0.5, 0.2]).unwrap();
        let b = Heatmap::new(2, 2, vec![0.0, 0.0, 0.0, 1.0]).unwrap();
        // 3 of 8 cells are >= 0.5
        assert!((tampered_ratio(&[a, b], TAMPER_THRESHOLD) - 0.375).abs() < 1e-6);
    }

    #[test]
    fn test_tampered_ratio_empty() {
        assert_eq!(tampered_ratio(&[], TAMPER_THRESHOLD), 0.0);
    }

    #[test]
    fn test_jet_endpoints() {
        assert_eq!(jet(0.0), Rgb([0, 0, 128]));
        assert_eq!(jet(1.0), Rgb([128, 0, 0]));
        let mid = jet(0.5);
        assert_eq!(mid[1], 255);
    }

    #[test]
    fn test_from_residual_highlights_bright_quadrant() {
        let residual = RgbImage::from_fn(40, 40, |x, y| {
            if x >= 20 && y >= 20 { Rgb([255, 255, 255]) } else { Rgb([0, 0, 0]) }
        });
        let h = Heatmap::from_residual(&residual, 4);
        assert_eq!(h.len(), 16);
        assert_eq!(h.count_at_or_above(TAMPER_THRESHOLD), 4);
        assert_eq!(h.values()[15], 1.0);
        assert_eq!(h.values()[0], 0.0);
    }

    #[test]
    fn test_residual_grid_shape_for_small_crops() {
        // ROI crops can be narrower than the grid; cells with no pixels stay at 0.
        let residual = RgbImage::from_fn(20, 10, |x, _| if x < 10 { Rgb([0, 0, 0]) } else { Rgb([200, 200, 200]) });
        let h = Heatmap::from_residual(&residual, RESIDUAL_GRID);
        assert_eq!((h.width(), h.height()), (32, 32));
        assert_eq!(h.len(), 32 * 32);
        assert!(h.values().iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(h.count_at_or_above(TAMPER_THRESHOLD) > 0);
    }

    #[test]
    fn test_overlay_preserves_size_and_writes() {
        let img = RgbImage::from_pixel(30, 20, Rgb([100, 100, 100]));
        let h = Heatmap::new(2, 2, vec![0.0, 1.0, 0.0, 1.0]).unwrap();
        let out = overlay(&img, &h, OVERLAY_ALPHA);
        assert_eq!(out.dimensions(), (30, 20));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heatmaps/u1/full/heatmap.jpg");
        save_overlay(&img, &h, &path).unwrap();
        assert!(path.exists());
    }
}
