use crate::http::AppState;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Backend is running",
        "version": env!("CARGO_PKG_VERSION"),
        "inference": state.engine.backend_name(),
    }))
}
