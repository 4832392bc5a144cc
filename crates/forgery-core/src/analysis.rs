//! Full document analysis: ELA → ROIs → QR → ensemble inference.
//!
//! Artifacts for an upload land under the storage directory:
//! `ela/<upload>/ela.jpg`, `rois/<upload>/{faces,qr,text}/…` and
//! `heatmaps/<upload>/{full,roi_N}/heatmap.jpg`.

use crate::backend::{load_backend, BackendError, BackendKind, InferenceBackend};
use crate::ela::{self, ElaError, ELA_JPEG_QUALITY};
use crate::face::FaceDetector;
use crate::qr::{self, QrError, QrReading};
use crate::roi::{self, RoiError};
use crate::types::{DocumentAnalysis, RoiCrop, RoiKind};
use crate::FACE_MODEL_FILE;
use image::{imageops, GrayImage};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("ela: {0}")]
    Ela(#[from] ElaError),
    #[error("roi extraction: {0}")]
    Roi(#[from] RoiError),
    #[error("qr: {0}")]
    Qr(#[from] QrError),
    #[error("inference: {0}")]
    Backend(#[from] BackendError),
    #[error("failed to read image: {0}")]
    Image(#[from] image::ImageError),
}

/// Run every analysis stage on one image.
///
/// `upload_id` only names the artifact directories; callers must pass a
/// path-safe identifier.
pub fn analyze_document(
    backend: &mut dyn InferenceBackend,
    faces: Option<&mut FaceDetector>,
    storage_dir: &Path,
    image_path: &Path,
    upload_id: &str,
) -> Result<DocumentAnalysis, AnalysisError> {
    let ela_path = storage_dir.join("ela").join(upload_id).join("ela.jpg");
    let (ela_path, _) = ela::compute_ela(image_path, &ela_path, ELA_JPEG_QUALITY)?;

    let image = image::open(image_path)?.to_rgb8();
    let roi_dir = storage_dir.join("rois").join(upload_id);
    let roi_crops = roi::detect_all_rois(&image, &roi_dir, faces)?;

    let QrReading { data: qr_data, valid: qr_valid } = read_document_qr(&imageops::grayscale(&image), &roi_crops)?;

    let heatmap_dir = storage_dir.join("heatmaps").join(upload_id);
    let inference = backend.infer(image_path, &roi_crops, &heatmap_dir)?;

    tracing::info!(
        upload_id,
        backend = backend.name(),
        rois = roi_crops.len(),
        qr_valid,
        ensemble = inference.full_image_scores.ensemble,
        tampered_ratio = inference.tampered_ratio,
        severity = %inference.severity,
        "document analysed"
    );

    Ok(DocumentAnalysis { ela_path, roi_crops, qr_data, qr_valid, inference })
}

/// Decode the card's QR code: the full card first, then the first QR crop,
/// which sometimes decodes where the card does not.
fn read_document_qr(card: &GrayImage, roi_crops: &[RoiCrop]) -> Result<QrReading, QrError> {
    let reading = qr::decode_qr(card);
    if reading.data.is_some() {
        return Ok(reading);
    }
    match roi_crops.iter().find(|r| r.kind == RoiKind::Qr) {
        Some(crop) => qr::decode_qr_file(&crop.path),
        None => Ok(reading),
    }
}

/// Owns the loaded models and the storage root.
pub struct DocumentAnalyzer {
    backend: Box<dyn InferenceBackend>,
    faces: Option<FaceDetector>,
    storage_dir: PathBuf,
}

impl DocumentAnalyzer {
    pub fn new(
        backend: Box<dyn InferenceBackend>,
        faces: Option<FaceDetector>,
        storage_dir: impl Into<PathBuf>,
    ) -> Self {
        Self { backend, faces, storage_dir: storage_dir.into() }
    }

    /// Load the backend and, if its checkpoint is present, the face detector.
    pub fn load(
        kind: BackendKind,
        model_dir: &Path,
        storage_dir: impl Into<PathBuf>,
        seed: Option<u64>,
    ) -> Result<Self, BackendError> {
        let backend = load_backend(kind, model_dir, seed)?;
        let face_model = model_dir.join(FACE_MODEL_FILE);
        let faces = if face_model.exists() {
            match FaceDetector::load(&face_model) {
                Ok(detector) => Some(detector),
                Err(e) => {
                    tracing::warn!(error = %e, "face detector failed to load, face ROIs disabled");
                    None
                }
            }
        } else {
            tracing::info!(path = %face_model.display(), "no face detector model, face ROIs disabled");
            None
        };
        Ok(Self::new(backend, faces, storage_dir))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn has_face_detector(&self) -> bool {
        self.faces.is_some()
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn analyze(&mut self, image_path: &Path, upload_id: &str) -> Result<DocumentAnalysis, AnalysisError> {
        analyze_document(
            self.backend.as_mut(),
            self.faces.as_mut(),
            &self.storage_dir,
            image_path,
            upload_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockEnsemble;
    use crate::types::Rect;
    use image::{Rgb, RgbImage};

    fn write_card(path: &Path) {
        // Light card with two dark text lines.
        RgbImage::from_fn(240, 150, |x, y| {
            let line = (40..48).contains(&y) || (90..98).contains(&y);
            if line && (30..190).contains(&x) { Rgb([25, 25, 25]) } else { Rgb([235, 235, 230]) }
        })
        .save(path)
        .unwrap();
    }

    #[test]
    fn test_analyze_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("card.png");
        write_card(&image);
        let storage = dir.path().join("storage");

        let mut analyzer = DocumentAnalyzer::new(Box::new(MockEnsemble::with_seed(11)), None, &storage);
        let result = analyzer.analyze(&image, "upload-1").unwrap();

        assert_eq!(result.ela_path, storage.join("ela/upload-1/ela.jpg"));
        assert!(result.ela_path.exists());
        assert!(!result.roi_crops.is_empty());
        assert!(result.roi_crops.iter().all(|r| r.path.starts_with(storage.join("rois/upload-1"))));
        assert_eq!(result.qr_data, None);
        assert!(!result.qr_valid);

        let inf = &result.inference;
        assert_eq!(inf.full_image_heatmap, storage.join("heatmaps/upload-1/full/heatmap.jpg"));
        assert_eq!(inf.roi_results.len(), result.roi_crops.len());
        assert_eq!(inf.heatmap_paths().len(), result.roi_crops.len() + 1);
        assert!(inf.heatmap_paths().iter().all(|p| p.exists()));
    }

    #[test]
    fn test_analyze_reads_qr_on_card() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("card.png");
        let payload = "uid=999941057058 name=Test";
        let code = image::DynamicImage::ImageLuma8(qr::render_qr(payload, 4, 4)).to_rgb8();
        let mut card = RgbImage::from_fn(420, 260, |x, y| {
            let line = (40..48).contains(&y) || (90..98).contains(&y);
            if line && (20..200).contains(&x) { Rgb([25, 25, 25]) } else { Rgb([255, 255, 255]) }
        });
        imageops::overlay(&mut card, &code, 260, 40);
        card.save(&path).unwrap();

        let storage = dir.path().join("storage");
        let mut analyzer = DocumentAnalyzer::new(Box::new(MockEnsemble::with_seed(5)), None, &storage);
        let result = analyzer.analyze(&path, "upload-qr").unwrap();

        assert_eq!(result.qr_data.as_deref(), Some(payload));
        assert!(result.qr_valid);
        assert!(result.roi_crops.iter().any(|r| r.kind == RoiKind::Qr));
    }

    #[test]
    fn test_qr_falls_back_to_crop() {
        let dir = tempfile::tempdir().unwrap();
        let crop_path = dir.path().join("qr_0.png");
        let code = qr::render_qr("uid=999941057058 name=Test", 4, 4);
        code.save(&crop_path).unwrap();
        let crops = vec![
            RoiCrop { kind: RoiKind::Text, bbox: Rect { x: 0, y: 0, width: 10, height: 4 }, path: dir.path().join("text_0.jpg") },
            RoiCrop { kind: RoiKind::Qr, bbox: Rect { x: 0, y: 0, width: code.width(), height: code.height() }, path: crop_path },
        ];

        // Nothing decodable on the card itself.
        let blank = GrayImage::from_pixel(200, 120, image::Luma([240]));
        let reading = read_document_qr(&blank, &crops).unwrap();
        assert_eq!(reading.data.as_deref(), Some("uid=999941057058 name=Test"));
        assert!(reading.valid);

        // Without a QR crop there is nothing to fall back on.
        let reading = read_document_qr(&blank, &crops[..1]).unwrap();
        assert_eq!(reading, QrReading::default());
    }

    #[test]
    fn test_analyze_missing_image() {
        let dir = tempfile::tempdir().unwrap();
        let mut analyzer = DocumentAnalyzer::new(Box::new(MockEnsemble::with_seed(1)), None, dir.path());
        let err = analyzer.analyze(&dir.path().join("gone.jpg"), "x").unwrap_err();
        assert!(matches!(err, AnalysisError::Ela(_)));
    }

    #[test]
    fn test_load_mock_without_face_model() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = DocumentAnalyzer::load(BackendKind::Mock, dir.path(), dir.path(), Some(2)).unwrap();
        assert_eq!(analyzer.backend_name(), "mock");
        assert!(!analyzer.has_face_detector());
    }
}
