use crate::http::extract::AuthUser;
use crate::http::{ApiError, AppState};
use crate::retrain::RetrainStatus;
use axum::extract::State;
use axum::Json;
use forgery_store::{ModelMetric, User};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub models: Vec<ModelMetric>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrainResponse {
    pub status: RetrainStatus,
    pub triggered_at: f64,
}

fn require_admin(user: &User) -> Result<(), ApiError> {
    if user.is_admin {
        Ok(())
    } else {
        Err(ApiError::forbidden("Admin privileges required"))
    }
}

pub async fn metrics(State(state): State<AppState>, AuthUser(user): AuthUser) -> Result<Json<MetricsResponse>, ApiError> {
    require_admin(&user)?;
    let models = state.store.get_model_metrics().await?;
    Ok(Json(MetricsResponse { models }))
}

/// Record the trigger for auditing, then start the training job.
pub async fn retrain(State(state): State<AppState>, AuthUser(user): AuthUser) -> Result<Json<RetrainResponse>, ApiError> {
    require_admin(&user)?;
    let trigger = state.store.trigger_retrain(&user.id, forgery_store::now_secs()).await?;
    let status = state.retrain.start();
    tracing::info!(admin_id = %user.id, ?status, "retrain requested");
    Ok(Json(RetrainResponse { status, triggered_at: trigger.triggered_at }))
}
