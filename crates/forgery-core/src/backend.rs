//! Inference backends behind one trait.
//!
//! [`OnnxEnsemble`] runs the exported checkpoints. [`MockEnsemble`] samples
//! plausible scores and paints placeholder heatmaps so the service stays
//! usable on machines without trained models.

use crate::classifier::{BinaryClassifier, ClassifierError};
use crate::ela::{self, ElaError, ELA_JPEG_QUALITY};
use crate::ensemble::default_ensemble;
use crate::heatmap::{self, Heatmap, HeatmapError, RESIDUAL_GRID, TAMPER_THRESHOLD};
use crate::types::{EnsembleScores, InferenceResult, RoiCrop, RoiInference, Severity};
use crate::{DENSENET_MODEL_FILE, MOBILENET_MODEL_FILE};
use image::{ImageFormat, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const HEATMAP_FILE: &str = "heatmap.jpg";

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("model files missing in {0}: need {DENSENET_MODEL_FILE} and {MOBILENET_MODEL_FILE}")]
    ModelsMissing(String),
    #[error("classifier: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("ela: {0}")]
    Ela(#[from] ElaError),
    #[error("heatmap: {0}")]
    Heatmap(#[from] HeatmapError),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Scores a document and its ROI crops, writing one heatmap per image.
///
/// Heatmaps go to `<heatmap_dir>/full/heatmap.jpg` and
/// `<heatmap_dir>/roi_<i>/heatmap.jpg`, in ROI order.
pub trait InferenceBackend: Send {
    fn name(&self) -> &'static str;

    fn infer(
        &mut self,
        full_image: &Path,
        rois: &[RoiCrop],
        heatmap_dir: &Path,
    ) -> Result<InferenceResult, BackendError>;
}

/// Which backend to load at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// ONNX when both checkpoints exist, mock otherwise.
    #[default]
    Auto,
    Onnx,
    Mock,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Auto => "auto",
            BackendKind::Onnx => "onnx",
            BackendKind::Mock => "mock",
        })
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(BackendKind::Auto),
            "onnx" => Ok(BackendKind::Onnx),
            "mock" => Ok(BackendKind::Mock),
            other => Err(format!("unknown inference backend '{other}' (expected auto, onnx or mock)")),
        }
    }
}

/// True if both classifier checkpoints are present in `model_dir`.
pub fn models_present(model_dir: &Path) -> bool {
    model_dir.join(DENSENET_MODEL_FILE).exists() && model_dir.join(MOBILENET_MODEL_FILE).exists()
}

/// Load the backend selected by `kind`. `seed` only affects the mock backend.
pub fn load_backend(
    kind: BackendKind,
    model_dir: &Path,
    seed: Option<u64>,
) -> Result<Box<dyn InferenceBackend>, BackendError> {
    match kind {
        BackendKind::Mock => Ok(Box::new(MockEnsemble::new(seed))),
        BackendKind::Onnx => Ok(Box::new(OnnxEnsemble::load(model_dir)?)),
        BackendKind::Auto if models_present(model_dir) => Ok(Box::new(OnnxEnsemble::load(model_dir)?)),
        BackendKind::Auto => {
            tracing::warn!(
                model_dir = %model_dir.display(),
                "trained checkpoints not found, using mock inference"
            );
            Ok(Box::new(MockEnsemble::new(seed)))
        }
    }
}

fn heatmap_path(heatmap_dir: &Path, slot: &str) -> PathBuf {
    heatmap_dir.join(slot).join(HEATMAP_FILE)
}

fn roi_slot(index: usize) -> String {
    format!("roi_{index}")
}

// --- ONNX ---

/// DenseNet-121 + MobileNetV2 ensemble over ONNX Runtime.
///
/// Heatmaps are the normalized ELA residual of each scored image.
pub struct OnnxEnsemble {
    densenet: BinaryClassifier,
    mobilenet: BinaryClassifier,
}

impl OnnxEnsemble {
    pub fn load(model_dir: &Path) -> Result<Self, BackendError> {
        if !models_present(model_dir) {
            return Err(BackendError::ModelsMissing(model_dir.display().to_string()));
        }
        let densenet = BinaryClassifier::load(&model_dir.join(DENSENET_MODEL_FILE), "densenet121")?;
        let mobilenet = BinaryClassifier::load(&model_dir.join(MOBILENET_MODEL_FILE), "mobilenetv2")?;
        Ok(Self { densenet, mobilenet })
    }

    fn infer_single(
        &mut self,
        image_path: &Path,
        output_path: &Path,
    ) -> Result<(EnsembleScores, Heatmap), BackendError> {
        let image = image::open(image_path)?.to_rgb8();
        let dn = self.densenet.logit(&image)?;
        let mb = self.mobilenet.logit(&image)?;
        let scores = default_ensemble(dn, mb);

        let residual = ela::ela_residual(&image, ELA_JPEG_QUALITY)?;
        let activation = Heatmap::from_residual(&residual, RESIDUAL_GRID);
        heatmap::save_overlay(&image, &activation, output_path)?;

        Ok((scores, activation))
    }
}

impl InferenceBackend for OnnxEnsemble {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn infer(
        &mut self,
        full_image: &Path,
        rois: &[RoiCrop],
        heatmap_dir: &Path,
    ) -> Result<InferenceResult, BackendError> {
        let full_heatmap = heatmap_path(heatmap_dir, "full");
        let (full_scores, full_map) = self.infer_single(full_image, &full_heatmap)?;

        let mut maps = vec![full_map];
        let mut roi_results = Vec::with_capacity(rois.len());
        for (i, roi) in rois.iter().enumerate() {
            let path = heatmap_path(heatmap_dir, &roi_slot(i));
            let (scores, map) = self.infer_single(&roi.path, &path)?;
            maps.push(map);
            roi_results.push(RoiInference {
                kind: roi.kind,
                path: roi.path.clone(),
                scores,
                heatmap_path: path,
            });
        }

        let tampered_ratio = heatmap::tampered_ratio(&maps, TAMPER_THRESHOLD);
        let severity = Severity::classify(full_scores.ensemble, tampered_ratio);

        tracing::debug!(
            ensemble = full_scores.ensemble,
            tampered_ratio,
            %severity,
            rois = rois.len(),
            "onnx inference finished"
        );

        Ok(InferenceResult {
            full_image_scores: full_scores,
            full_image_heatmap: full_heatmap,
            roi_results,
            tampered_ratio,
            severity,
        })
    }
}

// --- Mock ---

/// Score band: probability mass, classifier score range, tampered-ratio range.
struct MockBand {
    weight: f32,
    score: (f32, f32),
    ratio: (f32, f32),
}

/// Mostly authentic with occasional forgeries.
static MOCK_BANDS: [MockBand; 4] = [
    MockBand { weight: 0.70, score: (0.05, 0.25), ratio: (0.01, 0.15) },
    MockBand { weight: 0.15, score: (0.25, 0.45), ratio: (0.15, 0.35) },
    MockBand { weight: 0.10, score: (0.45, 0.70), ratio: (0.35, 0.60) },
    MockBand { weight: 0.05, score: (0.70, 0.99), ratio: (0.60, 0.95) },
];

const MOCK_ROI_JITTER: f32 = 0.15;
const MOCK_REGION_MIN: u32 = 50;
const MOCK_REGION_MAX: u32 = 200;
const MOCK_MAX_REGIONS: f32 = 5.0;
const MOCK_FILL: [u8; 3] = [255, 50, 50];
const MOCK_OUTLINE: [u8; 3] = [255, 100, 100];
const MOCK_OUTLINE_WIDTH: u32 = 2;

/// Random but plausible predictions for machines without trained checkpoints.
pub struct MockEnsemble {
    rng: StdRng,
}

impl MockEnsemble {
    pub fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::with_seed(seed),
            None => Self { rng: StdRng::from_entropy() },
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    fn sample_band(&mut self) -> &'static MockBand {
        let roll: f32 = self.rng.gen();
        let mut acc = 0.0;
        for band in &MOCK_BANDS {
            acc += band.weight;
            if roll < acc {
                return band;
            }
        }
        &MOCK_BANDS[MOCK_BANDS.len() - 1]
    }

    fn uniform(&mut self, (lo, hi): (f32, f32)) -> f32 {
        if hi > lo { self.rng.gen_range(lo..hi) } else { lo }
    }

    fn jitter(&mut self, centre: f32) -> f32 {
        let lo = (centre - MOCK_ROI_JITTER).max(0.0);
        let hi = (centre + MOCK_ROI_JITTER).min(1.0);
        self.uniform((lo, hi))
    }

    fn random_span(&mut self, extent: u32) -> (u32, u32) {
        let min = MOCK_REGION_MIN.min(extent);
        let start = self.rng.gen_range(0..=extent - min);
        let max = MOCK_REGION_MAX.min(extent - start).max(min);
        (start, self.rng.gen_range(min..=max))
    }

    /// Paint translucent red rectangles over `image`; more and stronger as
    /// `intensity` grows.
    fn paint(&mut self, image: &mut RgbImage, intensity: f32) {
        let intensity = intensity.clamp(0.0, 1.0);
        let regions = ((MOCK_MAX_REGIONS * intensity) as u32).max(1);
        let alpha = (200.0 * intensity).floor() / 255.0;
        let (w, h) = image.dimensions();

        for _ in 0..regions {
            let (x0, rw) = self.random_span(w);
            let (y0, rh) = self.random_span(h);
            for y in y0..y0 + rh {
                for x in x0..x0 + rw {
                    let edge = x < x0 + MOCK_OUTLINE_WIDTH
                        || y < y0 + MOCK_OUTLINE_WIDTH
                        || x + MOCK_OUTLINE_WIDTH >= x0 + rw
                        || y + MOCK_OUTLINE_WIDTH >= y0 + rh;
                    let px = image.get_pixel_mut(x, y);
                    *px = if edge { Rgb(MOCK_OUTLINE) } else { blend(*px, MOCK_FILL, alpha) };
                }
            }
        }
    }

    fn write_heatmap(&mut self, source: &Path, output: &Path, intensity: f32) -> Result<(), BackendError> {
        let mut image = image::open(source)?.to_rgb8();
        self.paint(&mut image, intensity);
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        image.save_with_format(output, ImageFormat::Jpeg)?;
        Ok(())
    }
}

fn blend(base: Rgb<u8>, colour: [u8; 3], alpha: f32) -> Rgb<u8> {
    let mut out = [0u8; 3];
    for c in 0..3 {
        out[c] = (alpha * colour[c] as f32 + (1.0 - alpha) * base[c] as f32).round() as u8;
    }
    Rgb(out)
}

impl InferenceBackend for MockEnsemble {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn infer(
        &mut self,
        full_image: &Path,
        rois: &[RoiCrop],
        heatmap_dir: &Path,
    ) -> Result<InferenceResult, BackendError> {
        let band = self.sample_band();
        let densenet = self.uniform(band.score);
        let mobilenet = self.uniform(band.score);
        let tampered_ratio = self.uniform(band.ratio);
        let full_scores = EnsembleScores { densenet, mobilenet, ensemble: (densenet + mobilenet) / 2.0 };
        let severity = Severity::classify(full_scores.ensemble, tampered_ratio);

        let full_heatmap = heatmap_path(heatmap_dir, "full");
        self.write_heatmap(full_image, &full_heatmap, full_scores.ensemble)?;

        let mut roi_results = Vec::with_capacity(rois.len());
        for (i, roi) in rois.iter().enumerate() {
            let dn = self.jitter(densenet);
            let mb = self.jitter(mobilenet);
            let scores = EnsembleScores { densenet: dn, mobilenet: mb, ensemble: (dn + mb) / 2.0 };
            let path = heatmap_path(heatmap_dir, &roi_slot(i));
            self.write_heatmap(&roi.path, &path, scores.ensemble)?;
            roi_results.push(RoiInference {
                kind: roi.kind,
                path: roi.path.clone(),
                scores,
                heatmap_path: path,
            });
        }

        tracing::debug!(ensemble = full_scores.ensemble, tampered_ratio, %severity, "mock inference finished");

        Ok(InferenceResult {
            full_image_scores: full_scores,
            full_image_heatmap: full_heatmap,
            roi_results,
            tampered_ratio,
            severity,
        })
    }
}
