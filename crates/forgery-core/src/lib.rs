//! forgery-core: Aadhaar document forgery analysis.
//!
//! Error level analysis, region-of-interest extraction (faces, QR codes,
//! text blocks), QR validation and a DenseNet/MobileNet ensemble scored
//! through ONNX Runtime, with a sampling backend for machines without
//! trained checkpoints.

pub mod analysis;
pub mod backend;
pub mod classifier;
pub mod ela;
pub mod ensemble;
pub mod face;
pub mod heatmap;
pub mod qr;
pub mod roi;
pub mod types;

pub use analysis::{analyze_document, AnalysisError, DocumentAnalyzer};
pub use backend::{load_backend, models_present, BackendError, BackendKind, InferenceBackend, MockEnsemble, OnnxEnsemble};
pub use ensemble::RoiSummary;
pub use types::{
    DocumentAnalysis, EnsembleScores, InferenceResult, Rect, RoiCrop, RoiInference, RoiKind, Severity,
};

/// File name of the DenseNet-121 checkpoint exported to ONNX.
pub const DENSENET_MODEL_FILE: &str = "densenet121_aadhaar.onnx";
/// File name of the MobileNetV2 checkpoint exported to ONNX.
pub const MOBILENET_MODEL_FILE: &str = "mobilenetv2_aadhaar.onnx";
/// File name of the SCRFD face detector used for face ROIs.
pub const FACE_MODEL_FILE: &str = "det_10g.onnx";
