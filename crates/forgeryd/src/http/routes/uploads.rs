use crate::http::extract::Caller;
use crate::http::{ApiError, AppState};
use axum::extract::{Multipart, State};
use axum::Json;
use forgery_store::Upload;
use serde::Serialize;
use std::path::Path;

const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub upload_id: String,
    pub image_path: String,
    pub created_at: f64,
}

/// Keep only the final path component and a conservative character set.
fn sanitize_filename(name: Option<&str>) -> String {
    let base = name
        .and_then(|n| Path::new(n).file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// `<unix_secs>_<nonce>_<name>`; the nonce keeps same-second uploads of one
/// filename apart.
fn stored_name(created_at: f64, filename: &str) -> String {
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", created_at as i64, &nonce[..8], filename)
}

/// Accept a multipart image under field `file` and record the upload.
pub async fn create(
    State(state): State<AppState>,
    Caller(user): Caller,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(e.status(), e.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let is_image = field.content_type().is_some_and(|ct| ct.starts_with("image/"));
        if !is_image {
            return Err(ApiError::bad_request("File must be an image"));
        }
        let filename = sanitize_filename(field.file_name());
        let content = field
            .bytes()
            .await
            .map_err(|e| ApiError::new(e.status(), e.body_text()))?;

        let created_at = forgery_store::now_secs();
        let user_dir = state.config.storage_dir.join(&user.id);
        tokio::fs::create_dir_all(&user_dir).await?;
        let path = user_dir.join(stored_name(created_at, &filename));
        tokio::fs::write(&path, &content).await?;

        let upload = state
            .store
            .create_upload(&user.id, &path.to_string_lossy(), created_at)
            .await?;
        tracing::info!(
            upload_id = %upload.id,
            user_id = %user.id,
            bytes = content.len(),
            path = %path.display(),
            "upload stored"
        );

        return Ok(Json(UploadResponse {
            upload_id: upload.id,
            image_path: upload.image_path,
            created_at: upload.created_at,
        }));
    }

    Err(ApiError::bad_request("No file provided"))
}

/// The caller's uploads, newest first.
pub async fn list(State(state): State<AppState>, Caller(user): Caller) -> Result<Json<Vec<Upload>>, ApiError> {
    Ok(Json(state.store.get_uploads_by_user(&user.id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename(Some("card.jpg")), "card.jpg");
        assert_eq!(sanitize_filename(Some("../../etc/passwd")), "passwd");
        assert_eq!(sanitize_filename(Some("my card (1).png")), "my_card__1_.png");
        assert_eq!(sanitize_filename(Some("..")), "upload");
        assert_eq!(sanitize_filename(None), "upload");
    }

    #[test]
    fn test_stored_name_is_unique_per_upload() {
        let a = stored_name(1_700_000_000.4, "card.png");
        let b = stored_name(1_700_000_000.9, "card.png");
        assert_ne!(a, b);
        assert!(a.starts_with("1700000000_"));
        assert!(a.ends_with("_card.png"));
        assert_eq!(a.len(), "1700000000_".len() + 8 + "_card.png".len());
    }
}
