//! Binary forgery classifier via ONNX Runtime.
//!
//! Wraps one exported checkpoint (DenseNet-121 or MobileNetV2) that maps a
//! 384x384 RGB card to a single forgery logit.

use image::{imageops, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

pub const CLASSIFIER_INPUT_SIZE: u32 = 384;
// ImageNet statistics, applied after scaling to [0, 1].
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model file not found: {0} (export the trained checkpoint to ONNX)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct BinaryClassifier {
    name: &'static str,
    session: Session,
}

impl BinaryClassifier {
    /// Load a classifier checkpoint. `name` is used in logs and errors.
    pub fn load(model_path: &Path, name: &'static str) -> Result<Self, ClassifierError> {
        if !model_path.exists() {
            return Err(ClassifierError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            model = name,
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded classifier"
        );

        Ok(Self { name, session })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Raw forgery logit for one image.
    pub fn logit(&mut self, image: &RgbImage) -> Result<f32, ClassifierError> {
        let input = preprocess(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("{}: {e}", self.name)))?;

        raw.first().copied().ok_or_else(|| {
            ClassifierError::InferenceFailed(format!("{} returned an empty output", self.name))
        })
    }
}

/// Resize to 384x384 and normalize into an NCHW tensor.
pub fn preprocess(image: &RgbImage) -> Array4<f32> {
    let size = CLASSIFIER_INPUT_SIZE;
    let resized = imageops::resize(image, size, size, imageops::FilterType::Triangle);
    let n = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, n, n));
    for (x, y, px) in resized.enumerate_pixels() {
        for c in 0..3 {
            let v = px[c] as f32 / 255.0;
            tensor[[0, c, y as usize, x as usize]] = (v - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_output_shape() {
        let img = RgbImage::from_pixel(50, 30, Rgb([10, 20, 30]));
        let tensor = preprocess(&img);
        let n = CLASSIFIER_INPUT_SIZE as usize;
        assert_eq!(tensor.shape(), &[1, 3, n, n]);
    }

    #[test]
    fn test_preprocess_per_channel_normalization() {
        let img = RgbImage::from_pixel(8, 8, Rgb([255, 0, 128]));
        let tensor = preprocess(&img);
        let r = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        let g = (0.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1];
        let b = (128.0 / 255.0 - IMAGENET_MEAN[2]) / IMAGENET_STD[2];
        assert!((tensor[[0, 0, 10, 10]] - r).abs() < 1e-5);
        assert!((tensor[[0, 1, 10, 10]] - g).abs() < 1e-5);
        assert!((tensor[[0, 2, 10, 10]] - b).abs() < 1e-5);
    }

    #[test]
    fn test_load_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let err = BinaryClassifier::load(&dir.path().join("absent.onnx"), "densenet");
        assert!(matches!(err, Err(ClassifierError::ModelNotFound(_))));
    }
}
