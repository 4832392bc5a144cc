//! Region-of-interest extraction: face, QR and text-block crops.
//!
//! Text blocks are found with a classic morphology pass: blur, Otsu
//! binarization, inverted so ink is foreground, dilation with a wide
//! rectangle to merge characters into lines, then connected components.

use crate::face::FaceDetector;
use crate::qr;
use crate::types::{Rect, RoiCrop, RoiKind};
use image::{imageops, GrayImage, RgbImage};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Gaussian sigma equivalent to a 5×5 kernel with automatic sigma.
const TEXT_BLUR_SIGMA: f32 = 1.1;
/// Dilation kernel (width, height) used to join characters into lines.
const TEXT_DILATE_KERNEL: (usize, usize) = (15, 5);
const TEXT_DILATE_ITERATIONS: usize = 2;
const TEXT_MIN_AREA: u64 = 500;
const TEXT_MIN_ASPECT: f32 = 1.5;

#[derive(Error, Debug)]
pub enum RoiError {
    #[error("failed to read image: {0}")]
    Image(#[from] image::ImageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("face detector: {0}")]
    Face(#[from] crate::face::FaceError),
}

/// Otsu's threshold: the level maximizing between-class variance.
pub fn otsu_level(gray: &[u8]) -> u8 {
    if gray.is_empty() {
        return 0;
    }
    let mut hist = [0u64; 256];
    for &p in gray {
        hist[p as usize] += 1;
    }

    let total = gray.len() as f64;
    let sum_all: f64 = hist.iter().enumerate().map(|(i, &c)| i as f64 * c as f64).sum();

    let mut sum_bg = 0.0f64;
    let mut weight_bg = 0.0f64;
    let mut best_level = 0u8;
    let mut best_var = -1.0f64;

    for (level, &count) in hist.iter().enumerate() {
        weight_bg += count as f64;
        if weight_bg == 0.0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0.0 {
            break;
        }
        sum_bg += level as f64 * count as f64;
        let mean_bg = sum_bg / weight_bg;
        let mean_fg = (sum_all - sum_bg) / weight_fg;
        let var = weight_bg * weight_fg * (mean_bg - mean_fg).powi(2);
        if var > best_var {
            best_var = var;
            best_level = level as u8;
        }
    }

    best_level
}

/// Binary dilation of a 0/1 mask with a `kw × kh` rectangular kernel.
///
/// Rectangles are separable, so this runs a horizontal then a vertical max.
pub fn dilate(mask: &[bool], width: usize, height: usize, kw: usize, kh: usize) -> Vec<bool> {
    if width == 0 || height == 0 {
        return mask.to_vec();
    }
    let rx = kw / 2;
    let ry = kh / 2;

    let mut horiz = vec![false; mask.len()];
    for y in 0..height {
        let row = &mask[y * width..(y + 1) * width];
        for x in 0..width {
            let lo = x.saturating_sub(rx);
            let hi = (x + rx).min(width - 1);
            horiz[y * width + x] = row[lo..=hi].iter().any(|&b| b);
        }
    }

    let mut out = vec![false; mask.len()];
    for y in 0..height {
        let lo = y.saturating_sub(ry);
        let hi = (y + ry).min(height - 1);
        for x in 0..width {
            out[y * width + x] = (lo..=hi).any(|yy| horiz[yy * width + x]);
        }
    }
    out
}

/// Bounding boxes of 8-connected foreground components.
pub fn component_boxes(mask: &[bool], width: usize, height: usize) -> Vec<Rect> {
    let mut seen = vec![false; mask.len()];
    let mut boxes = Vec::new();
    let mut queue = VecDeque::new();

    for start in 0..mask.len() {
        if !mask[start] || seen[start] {
            continue;
        }
        seen[start] = true;
        queue.push_back(start);
        let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
        let (mut max_x, mut max_y) = (0usize, 0usize);

        while let Some(idx) = queue.pop_front() {
            let (x, y) = (idx % width, idx / width);
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);

            for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                    let n = ny * width + nx;
                    if mask[n] && !seen[n] {
                        seen[n] = true;
                        queue.push_back(n);
                    }
                }
            }
        }

        boxes.push(Rect {
            x: min_x as u32,
            y: min_y as u32,
            width: (max_x - min_x + 1) as u32,
            height: (max_y - min_y + 1) as u32,
        });
    }

    boxes
}

/// Locate text-line regions in a grayscale card image.
pub fn detect_text_blocks(gray: &GrayImage) -> Vec<Rect> {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    if w == 0 || h == 0 {
        return Vec::new();
    }

    let blurred = imageops::blur(gray, TEXT_BLUR_SIGMA);
    let level = otsu_level(blurred.as_raw());
    // Inverted binarization: dark ink becomes foreground.
    let mut mask: Vec<bool> = blurred.as_raw().iter().map(|&p| p <= level).collect();

    for _ in 0..TEXT_DILATE_ITERATIONS {
        mask = dilate(&mask, w, h, TEXT_DILATE_KERNEL.0, TEXT_DILATE_KERNEL.1);
    }

    let boxes = component_boxes(&mask, w, h);
    // Keep outermost regions only; nested components sit inside a larger block.
    let outer: Vec<Rect> = boxes
        .iter()
        .enumerate()
        .filter(|(i, b)| !boxes.iter().enumerate().any(|(j, o)| j != *i && o != *b && o.contains(b)))
        .map(|(_, b)| *b)
        .collect();

    outer
        .into_iter()
        .filter(|b| b.area() >= TEXT_MIN_AREA && b.aspect() >= TEXT_MIN_ASPECT)
        // A block covering the whole card is background, not text.
        .filter(|b| !(b.width as usize == w && b.height as usize == h))
        .collect()
}

/// Crop `bbox` out of `image` and save it to `path`.
fn save_crop(image: &RgbImage, bbox: Rect, path: &Path) -> Result<PathBuf, RoiError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    imageops::crop_imm(image, bbox.x, bbox.y, bbox.width, bbox.height)
        .to_image()
        .save(path)?;
    Ok(path.to_path_buf())
}

fn save_crops(
    image: &RgbImage,
    kind: RoiKind,
    boxes: &[Rect],
    base_dir: &Path,
) -> Result<Vec<RoiCrop>, RoiError> {
    let (w, h) = image.dimensions();
    let dir = base_dir.join(kind.dir_name());
    let mut crops = Vec::with_capacity(boxes.len());
    for (i, bbox) in boxes.iter().enumerate() {
        let Some(bbox) = bbox.clamp_to(w, h) else {
            continue;
        };
        let path = save_crop(image, bbox, &dir.join(format!("{kind}_{i}.jpg")))?;
        crops.push(RoiCrop { kind, bbox, path });
    }
    Ok(crops)
}

/// Detect face, QR and text ROIs in `image` and write every crop under `output_dir`.
///
/// Faces are only searched when a detector is supplied.
pub fn detect_all_rois(
    image: &RgbImage,
    output_dir: &Path,
    faces: Option<&mut FaceDetector>,
) -> Result<Vec<RoiCrop>, RoiError> {
    std::fs::create_dir_all(output_dir)?;
    let gray = imageops::grayscale(image);

    let mut rois = Vec::new();

    if let Some(detector) = faces {
        let boxes = detector.detect(image)?;
        rois.extend(save_crops(image, RoiKind::Face, &boxes, output_dir)?);
    }

    let qr_boxes = qr::locate_qr(&gray);
    rois.extend(save_crops(image, RoiKind::Qr, &qr_boxes[..qr_boxes.len().min(1)], output_dir)?);

    let text_boxes = detect_text_blocks(&gray);
    rois.extend(save_crops(image, RoiKind::Text, &text_boxes, output_dir)?);

    tracing::debug!(
        total = rois.len(),
        qr = qr_boxes.len(),
        text = text_boxes.len(),
        "ROIs extracted"
    );

    Ok(rois)
}
