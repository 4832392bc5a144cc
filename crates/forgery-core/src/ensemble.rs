//! Weighted DenseNet/MobileNet ensemble.

use crate::types::EnsembleScores;
use serde::Serialize;

pub const DENSENET_WEIGHT: f32 = 0.6;
pub const MOBILENET_WEIGHT: f32 = 0.4;

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Combine raw logits from both classifiers into forgery probabilities.
///
/// Weights are normalized by their sum, so any positive pair works.
pub fn compute_ensemble(
    densenet_logit: f32,
    mobilenet_logit: f32,
    weight_densenet: f32,
    weight_mobilenet: f32,
) -> EnsembleScores {
    let dn = sigmoid(densenet_logit);
    let mb = sigmoid(mobilenet_logit);
    let total = weight_densenet + weight_mobilenet;
    let (wd, wm) = if total > 0.0 {
        (weight_densenet / total, weight_mobilenet / total)
    } else {
        (0.5, 0.5)
    };
    EnsembleScores {
        densenet: dn,
        mobilenet: mb,
        ensemble: wd * dn + wm * mb,
    }
}

/// [`compute_ensemble`] with the default 0.6 / 0.4 weighting.
pub fn default_ensemble(densenet_logit: f32, mobilenet_logit: f32) -> EnsembleScores {
    compute_ensemble(densenet_logit, mobilenet_logit, DENSENET_WEIGHT, MOBILENET_WEIGHT)
}

/// Max and mean of ROI-level ensemble scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RoiSummary {
    pub max: f32,
    pub mean: f32,
}

pub fn summarize_roi_scores(roi_scores: &[EnsembleScores]) -> RoiSummary {
    if roi_scores.is_empty() {
        return RoiSummary { max: 0.0, mean: 0.0 };
    }
    let max = roi_scores
        .iter()
        .map(|s| s.ensemble)
        .fold(f32::NEG_INFINITY, f32::max);
    let mean = roi_scores.iter().map(|s| s.ensemble).sum::<f32>() / roi_scores.len() as f32;
    RoiSummary { max, mean }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigmoid_midpoint() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(10.0) > 0.99);
        assert!(sigmoid(-10.0) < 0.01);
    }

    #[test]
    fn test_ensemble_weighting() {
        // densenet → 0.5, mobilenet → ~1.0
        let s = default_ensemble(0.0, 20.0);
        assert!((s.densenet - 0.5).abs() < 1e-6);
        assert!((s.mobilenet - 1.0).abs() < 1e-6);
        assert!((s.ensemble - (0.6 * 0.5 + 0.4 * 1.0)).abs() < 1e-5);
    }

    #[test]
    fn test_ensemble_weights_are_normalized() {
        let a = compute_ensemble(1.0, -1.0, 3.0, 2.0);
        let b = compute_ensemble(1.0, -1.0, 0.6, 0.4);
        assert!((a.ensemble - b.ensemble).abs() < 1e-6);
    }

    #[test]
    fn test_summary_empty() {
        assert_eq!(summarize_roi_scores(&[]), RoiSummary { max: 0.0, mean: 0.0 });
    }

    #[test]
    fn test_summary_max_and_mean() {
        let scores = [
            EnsembleScores { densenet: 0.0, mobilenet: 0.0, ensemble: 0.2 },
            EnsembleScores { densenet: 0.0, mobilenet: 0.0, ensemble: 0.8 },
        ];
        let s = summarize_roi_scores(&scores);
        assert!((s.max - 0.8).abs() < 1e-6);
        assert!((s.mean - 0.5).abs() < 1e-6);
    }
}
