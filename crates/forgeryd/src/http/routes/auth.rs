use crate::auth;
use crate::http::extract::{ensure_demo_user, AuthUser};
use crate::http::{ApiError, AppState};
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use forgery_store::User;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

fn token_response(state: &AppState, user: &User) -> Result<Json<TokenResponse>, ApiError> {
    Ok(Json(TokenResponse {
        access_token: state.tokens.issue(&user.id)?,
        token_type: "bearer",
    }))
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain.contains('.')
        && !email.chars().any(char::is_whitespace)
        && !domain.contains('@')
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    if !is_valid_email(&body.email) {
        return Err(ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "Invalid email address"));
    }
    if state.store.get_user_by_email(&body.email).await?.is_some() {
        return Err(ApiError::bad_request("User already exists"));
    }

    let hash = auth::hash_password(&body.password)?;
    let user = state.store.create_user(&body.email, &hash, body.is_admin).await?;
    token_response(&state, &user)
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let user = state
        .store
        .get_user_by_email(&body.email)
        .await?
        .filter(|u| auth::verify_password(&body.password, &u.password_hash))
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    tracing::debug!(user_id = %user.id, "login");
    token_response(&state, &user)
}

pub async fn me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

/// Log in as the shared demo account, creating it on first use.
pub async fn demo(State(state): State<AppState>) -> Result<Json<TokenResponse>, ApiError> {
    let user = ensure_demo_user(&state.store).await?;
    token_response(&state, &user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("a@example.com"));
        assert!(is_valid_email("first.last@sub.example.org"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("a@localhost"));
        assert!(!is_valid_email("a b@example.com"));
        assert!(!is_valid_email("a@@example.com"));
    }
}
