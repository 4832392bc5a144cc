use crate::config::Config;
use forgery_core::{AnalysisError, BackendError, DocumentAnalysis, DocumentAnalyzer};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model load failed: {0}")]
    Backend(#[from] BackendError),
    #[error("analysis failed: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Analyze {
        image_path: PathBuf,
        upload_id: String,
        reply: oneshot::Sender<Result<DocumentAnalysis, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    backend: &'static str,
}

impl EngineHandle {
    /// Run the full analysis pipeline on an uploaded image.
    pub async fn analyze(&self, image_path: PathBuf, upload_id: String) -> Result<DocumentAnalysis, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Analyze {
                image_path,
                upload_id,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Name of the loaded backend ("onnx" or "mock").
    pub fn backend_name(&self) -> &'static str {
        self.backend
    }
}

/// Load the models and spawn the engine on a dedicated OS thread.
///
/// Model loading happens before the thread starts so a broken checkpoint
/// fails startup instead of the first request.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let analyzer = DocumentAnalyzer::load(
        config.inference,
        &config.model_dir,
        config.storage_dir.clone(),
        config.mock_seed,
    )?;
    tracing::info!(
        backend = analyzer.backend_name(),
        faces = analyzer.has_face_detector(),
        model_dir = %config.model_dir.display(),
        "inference backend loaded"
    );
    spawn_with(analyzer)
}

/// Spawn the request loop around an already loaded analyzer.
pub fn spawn_with(mut analyzer: DocumentAnalyzer) -> Result<EngineHandle, EngineError> {
    let backend = analyzer.backend_name();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("forgery-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Analyze {
                        image_path,
                        upload_id,
                        reply,
                    } => {
                        let result = analyzer
                            .analyze(&image_path, &upload_id)
                            .map_err(EngineError::from);
                        if let Err(e) = &result {
                            tracing::warn!(upload_id = %upload_id, error = %e, "analysis failed");
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, backend })
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgery_core::MockEnsemble;

    #[tokio::test]
    async fn test_engine_roundtrip_with_mock() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("card.png");
        image::RgbImage::from_pixel(80, 60, image::Rgb([220, 220, 220]))
            .save(&image)
            .unwrap();

        let analyzer = DocumentAnalyzer::new(Box::new(MockEnsemble::with_seed(4)), None, dir.path());
        let engine = spawn_with(analyzer).unwrap();
        assert_eq!(engine.backend_name(), "mock");

        let result = engine.analyze(image, "u1".to_string()).await.unwrap();
        assert!(result.ela_path.exists());
        assert!(result.inference.full_image_heatmap.exists());
    }

    #[tokio::test]
    async fn test_engine_reports_analysis_errors() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = DocumentAnalyzer::new(Box::new(MockEnsemble::with_seed(4)), None, dir.path());
        let engine = spawn_with(analyzer).unwrap();
        let err = engine
            .analyze(dir.path().join("missing.png"), "u2".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Analysis(_)));
    }
}
