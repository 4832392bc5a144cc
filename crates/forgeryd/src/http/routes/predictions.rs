use crate::http::extract::Caller;
use crate::http::{ApiError, AppState};
use axum::extract::{Path, State};
use axum::Json;
use forgery_core::{RoiKind, RoiSummary};
use forgery_store::{NewPrediction, Prediction, Upload, User};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRequest {
    pub upload_id: String,
}

#[derive(Debug, Serialize)]
pub struct RoiMetadata {
    pub kind: RoiKind,
    pub path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResponse {
    pub upload_id: String,
    pub densenet_score: f64,
    pub mobilenet_score: f64,
    pub ensemble_score: f64,
    pub severity: String,
    /// 0.0 (authentic) to 1.0 (complete forgery), for the severity meter.
    pub severity_meter: f32,
    pub tampered_ratio: f64,
    pub roi_scores: RoiSummary,
    pub ela_path: String,
    pub roi_crops: Vec<RoiMetadata>,
    pub heatmap_full: String,
    pub roi_heatmaps: Vec<RoiMetadata>,
    pub qr_data: Option<String>,
    pub qr_valid: bool,
    pub created_at: f64,
}

fn path_string(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

async fn owned_upload(state: &AppState, user: &User, upload_id: &str) -> Result<Upload, ApiError> {
    let upload = state
        .store
        .get_upload_by_id(upload_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Upload not found"))?;
    if upload.user_id != user.id {
        return Err(ApiError::forbidden("Not your upload"));
    }
    Ok(upload)
}

/// Analyse an upload and record the prediction.
pub async fn create(
    State(state): State<AppState>,
    Caller(user): Caller,
    Json(body): Json<PredictionRequest>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let upload = owned_upload(&state, &user, &body.upload_id).await?;

    let image_path = PathBuf::from(&upload.image_path);
    if !tokio::fs::try_exists(&image_path).await.unwrap_or(false) {
        return Err(ApiError::not_found("Uploaded image missing on server"));
    }

    let analysis = state.engine.analyze(image_path, upload.id.clone()).await?;
    let inference = &analysis.inference;
    let scores = inference.full_image_scores;

    let prediction = state
        .store
        .create_prediction(NewPrediction {
            upload_id: upload.id.clone(),
            densenet_score: f64::from(scores.densenet),
            mobilenet_score: f64::from(scores.mobilenet),
            ensemble_score: f64::from(scores.ensemble),
            severity: inference.severity.to_string(),
            tampered_ratio: f64::from(inference.tampered_ratio),
            heatmap_paths: inference.heatmap_paths().iter().map(|p| path_string(p)).collect(),
            created_at: forgery_store::now_secs(),
        })
        .await?;

    Ok(Json(PredictionResponse {
        upload_id: upload.id,
        densenet_score: prediction.densenet_score,
        mobilenet_score: prediction.mobilenet_score,
        ensemble_score: prediction.ensemble_score,
        severity: prediction.severity,
        severity_meter: inference.severity.meter_position(),
        tampered_ratio: prediction.tampered_ratio,
        roi_scores: inference.roi_summary(),
        ela_path: path_string(&analysis.ela_path),
        roi_crops: analysis
            .roi_crops
            .iter()
            .map(|r| RoiMetadata { kind: r.kind, path: path_string(&r.path) })
            .collect(),
        heatmap_full: path_string(&inference.full_image_heatmap),
        roi_heatmaps: inference
            .roi_results
            .iter()
            .map(|r| RoiMetadata { kind: r.kind, path: path_string(&r.heatmap_path) })
            .collect(),
        qr_data: analysis.qr_data.clone(),
        qr_valid: analysis.qr_valid,
        created_at: prediction.created_at,
    }))
}

/// Predictions recorded for one of the caller's uploads, newest first.
pub async fn list_for_upload(
    State(state): State<AppState>,
    Caller(user): Caller,
    Path(upload_id): Path<String>,
) -> Result<Json<Vec<Prediction>>, ApiError> {
    let upload = owned_upload(&state, &user, &upload_id).await?;
    Ok(Json(state.store.get_predictions_by_upload(&upload.id).await?))
}
