//! QR code location and decoding.
//!
//! Aadhaar cards carry a signed QR payload. Decoding here is a plausibility
//! check only: a readable payload of reasonable length counts as valid.

use crate::types::Rect;
use image::GrayImage;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Payloads must be longer than this many characters to count as valid.
const MIN_PAYLOAD_CHARS: usize = 10;

#[derive(Error, Debug)]
pub enum QrError {
    #[error("failed to read image: {0}")]
    Image(#[from] image::ImageError),
}

/// Result of a QR decode attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QrReading {
    pub data: Option<String>,
    pub valid: bool,
}

impl QrReading {
    fn from_payload(payload: String) -> Self {
        if payload.is_empty() {
            return Self::default();
        }
        let valid = payload.chars().count() > MIN_PAYLOAD_CHARS;
        Self { data: Some(payload), valid }
    }
}

/// Decode the first readable QR code in `gray`.
pub fn decode_qr(gray: &GrayImage) -> QrReading {
    let mut prepared =
        rqrr::PreparedImage::prepare_from_greyscale(gray.width() as usize, gray.height() as usize, |x, y| {
            gray.get_pixel(x as u32, y as u32)[0]
        });
    for grid in prepared.detect_grids() {
        match grid.decode() {
            Ok((_, content)) => return QrReading::from_payload(content),
            Err(e) => tracing::debug!(error = ?e, "QR grid found but not decodable"),
        }
    }
    QrReading::default()
}

/// Open `path` and decode the first QR code in it.
pub fn decode_qr_file(path: &Path) -> Result<QrReading, QrError> {
    let gray = image::open(path)?.to_luma8();
    Ok(decode_qr(&gray))
}

/// Bounding rectangles of every QR grid found in `gray`, clipped to the image.
pub fn locate_qr(gray: &GrayImage) -> Vec<Rect> {
    let (w, h) = gray.dimensions();
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(w as usize, h as usize, |x, y| {
        gray.get_pixel(x as u32, y as u32)[0]
    });
    let grids = prepared.detect_grids();
    grids
        .iter()
        .filter_map(|grid| {
            let min_x = grid.bounds.iter().map(|p| p.x).min()?.max(0) as u32;
            let max_x = grid.bounds.iter().map(|p| p.x).max()?.max(0) as u32;
            let min_y = grid.bounds.iter().map(|p| p.y).min()?.max(0) as u32;
            let max_y = grid.bounds.iter().map(|p| p.y).max()?.max(0) as u32;
            Rect {
                x: min_x,
                y: min_y,
                width: max_x.saturating_sub(min_x) + 1,
                height: max_y.saturating_sub(min_y) + 1,
            }
            .clamp_to(w, h)
        })
        .collect()
}

/// Render `payload` as a QR code, `scale` pixels per module, with a
/// `quiet`-module white border.
#[cfg(test)]
pub(crate) fn render_qr(payload: &str, scale: u32, quiet: u32) -> GrayImage {
    let code = qrcode::QrCode::new(payload.as_bytes()).unwrap();
    let modules = code.width() as u32;
    let colors = code.to_colors();
    let side = (modules + 2 * quiet) * scale;
    GrayImage::from_fn(side, side, |x, y| {
        let (mx, my) = (x / scale, y / scale);
        let span = quiet..quiet + modules;
        let dark = span.contains(&mx)
            && span.contains(&my)
            && colors[((my - quiet) * modules + (mx - quiet)) as usize] == qrcode::Color::Dark;
        image::Luma([if dark { 0 } else { 255 }])
    })
}
