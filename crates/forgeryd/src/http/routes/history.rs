use crate::http::extract::Caller;
use crate::http::{ApiError, AppState};
use axum::extract::State;
use axum::Json;
use forgery_store::HistoryEntry;

/// The caller's analysed uploads, newest first, each with its latest prediction.
pub async fn history(
    State(state): State<AppState>,
    Caller(user): Caller,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    Ok(Json(state.store.get_history_by_user(&user.id).await?))
}
