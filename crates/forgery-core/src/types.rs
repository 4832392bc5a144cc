use crate::ensemble::{summarize_roi_scores, RoiSummary};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Axis-aligned pixel rectangle inside a decoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Width divided by height; 0.0 for degenerate rectangles.
    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    /// True if `other` lies entirely inside `self`.
    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x + other.width <= self.x + self.width
            && other.y + other.height <= self.y + self.height
    }

    /// Clip to an image of the given size. Returns `None` if nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(Rect { x: self.x, y: self.y, width: w, height: h })
    }
}

/// Region-of-interest category on an Aadhaar card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoiKind {
    Face,
    Qr,
    Text,
}

impl RoiKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoiKind::Face => "face",
            RoiKind::Qr => "qr",
            RoiKind::Text => "text",
        }
    }

    /// Sub-directory name the crops of this kind are written to.
    pub fn dir_name(&self) -> &'static str {
        match self {
            RoiKind::Face => "faces",
            RoiKind::Qr => "qr",
            RoiKind::Text => "text",
        }
    }
}

impl fmt::Display for RoiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected region saved as its own image file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoiCrop {
    pub kind: RoiKind,
    pub bbox: Rect,
    pub path: PathBuf,
}

/// Per-model forgery probabilities and their weighted combination, all in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnsembleScores {
    pub densenet: f32,
    pub mobilenet: f32,
    pub ensemble: f32,
}

/// Four-level tamper severity, ordered from clean to fully forged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "Authentic")]
    Authentic,
    #[serde(rename = "Minor Tampering")]
    MinorTampering,
    #[serde(rename = "Partial Forgery")]
    PartialForgery,
    #[serde(rename = "Complete Forgery")]
    CompleteForgery,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Authentic,
        Severity::MinorTampering,
        Severity::PartialForgery,
        Severity::CompleteForgery,
    ];

    /// Map the ensemble probability and tampered-area ratio to a severity.
    ///
    /// Both conditions of a tier must hold; otherwise the next tier is tried.
    pub fn classify(ensemble_score: f32, tampered_ratio: f32) -> Self {
        if ensemble_score < 0.3 && tampered_ratio < 0.15 {
            Severity::Authentic
        } else if ensemble_score < 0.5 && tampered_ratio < 0.3 {
            Severity::MinorTampering
        } else if ensemble_score < 0.75 && tampered_ratio < 0.6 {
            Severity::PartialForgery
        } else {
            Severity::CompleteForgery
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Authentic => "Authentic",
            Severity::MinorTampering => "Minor Tampering",
            Severity::PartialForgery => "Partial Forgery",
            Severity::CompleteForgery => "Complete Forgery",
        }
    }

    /// Position on the severity meter, 0.0 (authentic) to 1.0 (complete forgery).
    pub fn meter_position(&self) -> f32 {
        let idx = Self::ALL.iter().position(|s| s == self).unwrap_or(0);
        idx as f32 / (Self::ALL.len() - 1) as f32
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|sev| sev.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown severity label: {s}"))
    }
}

/// Scores and heatmap for one ROI crop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoiInference {
    pub kind: RoiKind,
    pub path: PathBuf,
    pub scores: EnsembleScores,
    pub heatmap_path: PathBuf,
}

/// Output of an inference backend for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResult {
    pub full_image_scores: EnsembleScores,
    pub full_image_heatmap: PathBuf,
    pub roi_results: Vec<RoiInference>,
    pub tampered_ratio: f32,
    pub severity: Severity,
}

impl InferenceResult {
    /// Full-image heatmap first, then one per ROI, in ROI order.
    pub fn heatmap_paths(&self) -> Vec<PathBuf> {
        std::iter::once(self.full_image_heatmap.clone())
            .chain(self.roi_results.iter().map(|r| r.heatmap_path.clone()))
            .collect()
    }

    /// Max and mean ensemble score over the ROIs; zeros without ROIs.
    pub fn roi_summary(&self) -> RoiSummary {
        let scores: Vec<EnsembleScores> = self.roi_results.iter().map(|r| r.scores).collect();
        summarize_roi_scores(&scores)
    }
}

/// Everything produced by analysing one uploaded document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentAnalysis {
    pub ela_path: PathBuf,
    pub roi_crops: Vec<RoiCrop>,
    pub qr_data: Option<String>,
    pub qr_valid: bool,
    pub inference: InferenceResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_tiers() {
        assert_eq!(Severity::classify(0.1, 0.05), Severity::Authentic);
        assert_eq!(Severity::classify(0.4, 0.2), Severity::MinorTampering);
        assert_eq!(Severity::classify(0.6, 0.5), Severity::PartialForgery);
        assert_eq!(Severity::classify(0.9, 0.9), Severity::CompleteForgery);
    }

    #[test]
    fn test_severity_needs_both_conditions() {
        // Low score but large tampered area escalates.
        assert_eq!(Severity::classify(0.1, 0.2), Severity::MinorTampering);
        assert_eq!(Severity::classify(0.1, 0.7), Severity::CompleteForgery);
        // Boundaries are exclusive.
        assert_eq!(Severity::classify(0.3, 0.0), Severity::MinorTampering);
        assert_eq!(Severity::classify(0.75, 0.0), Severity::CompleteForgery);
    }

    #[test]
    fn test_severity_labels_roundtrip_through_serde() {
        let json = serde_json::to_string(&Severity::MinorTampering).unwrap();
        assert_eq!(json, "\"Minor Tampering\"");
        let back: Severity = "Partial Forgery".parse().unwrap();
        assert_eq!(back, Severity::PartialForgery);
        assert!("Forged".parse::<Severity>().is_err());
    }

    #[test]
    fn test_meter_position() {
        assert_eq!(Severity::Authentic.meter_position(), 0.0);
        assert!((Severity::MinorTampering.meter_position() - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(Severity::CompleteForgery.meter_position(), 1.0);
    }

    #[test]
    fn test_roi_summary_over_results() {
        let roi = |ensemble: f32| RoiInference {
            kind: RoiKind::Text,
            path: PathBuf::from("text_0.jpg"),
            scores: EnsembleScores { densenet: ensemble, mobilenet: ensemble, ensemble },
            heatmap_path: PathBuf::from("heatmap.jpg"),
        };
        let mut result = InferenceResult {
            full_image_scores: EnsembleScores { densenet: 0.1, mobilenet: 0.1, ensemble: 0.1 },
            full_image_heatmap: PathBuf::from("full/heatmap.jpg"),
            roi_results: Vec::new(),
            tampered_ratio: 0.0,
            severity: Severity::Authentic,
        };
        assert_eq!(result.roi_summary(), RoiSummary { max: 0.0, mean: 0.0 });

        result.roi_results = vec![roi(0.2), roi(0.6)];
        let summary = result.roi_summary();
        assert!((summary.max - 0.6).abs() < 1e-6);
        assert!((summary.mean - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_rect_clamp() {
        let r = Rect { x: 90, y: 10, width: 50, height: 20 };
        assert_eq!(r.clamp_to(100, 100), Some(Rect { x: 90, y: 10, width: 10, height: 20 }));
        assert_eq!(r.clamp_to(80, 100), None);
    }

    #[test]
    fn test_rect_contains() {
        let outer = Rect { x: 0, y: 0, width: 100, height: 50 };
        let inner = Rect { x: 10, y: 10, width: 20, height: 10 };
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
    }
}
