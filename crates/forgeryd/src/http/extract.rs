//! Request extractors resolving the calling user.

use super::error::ApiError;
use super::AppState;
use crate::auth::{self, DEMO_EMAIL, DEMO_PASSWORD};
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use forgery_store::{Store, StoreError, User};

/// An authenticated user. Requires a valid bearer token.
pub struct AuthUser(pub User);

/// The caller of an upload/prediction/history route: the token's user, or
/// the demo account when no `Authorization` header is sent at all.
pub struct Caller(pub User);

/// `Ok(None)` when the header is absent; malformed headers are rejected.
fn extract_bearer(headers: &HeaderMap) -> Result<Option<&str>, ApiError> {
    let Some(header) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let header = header
        .to_str()
        .map_err(|_| ApiError::unauthorized("Invalid authorization header"))?;
    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .ok_or_else(|| ApiError::unauthorized("Invalid authorization header"))?
        .trim();
    if token.is_empty() {
        return Err(ApiError::unauthorized("Invalid authorization header"));
    }
    Ok(Some(token))
}

async fn user_from_token(state: &AppState, token: &str) -> Result<User, ApiError> {
    let claims = state.tokens.verify(token)?;
    state
        .store
        .get_user_by_id(&claims.sub)
        .await?
        .ok_or_else(|| ApiError::unauthorized("User not found"))
}

/// Fetch the demo account, creating it (as admin) on first use.
pub async fn ensure_demo_user(store: &Store) -> Result<User, ApiError> {
    if let Some(user) = store.get_user_by_email(DEMO_EMAIL).await? {
        return Ok(user);
    }
    let hash = auth::hash_password(DEMO_PASSWORD)?;
    match store.create_user(DEMO_EMAIL, &hash, true).await {
        Ok(user) => {
            tracing::info!(user_id = %user.id, "demo account created");
            Ok(user)
        }
        // Lost a creation race with a concurrent request.
        Err(StoreError::UserExists(_)) => store
            .get_user_by_email(DEMO_EMAIL)
            .await?
            .ok_or_else(|| ApiError::internal("demo account vanished")),
        Err(e) => Err(e.into()),
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = extract_bearer(&parts.headers)?.ok_or_else(|| ApiError::unauthorized("Not authenticated"))?;
        Ok(Self(user_from_token(state, token).await?))
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match extract_bearer(&parts.headers)? {
            Some(token) => Ok(Self(user_from_token(state, token).await?)),
            None => Ok(Self(ensure_demo_user(&state.store).await?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer(&HeaderMap::new()).unwrap(), None);
        assert_eq!(extract_bearer(&headers("Bearer abc")).unwrap(), Some("abc"));
        assert_eq!(extract_bearer(&headers("Bearer   abc  ")).unwrap(), Some("abc"));
        assert!(extract_bearer(&headers("Basic abc")).is_err());
        assert!(extract_bearer(&headers("Bearer ")).is_err());
    }

    #[tokio::test]
    async fn test_ensure_demo_user_is_idempotent() {
        let store = Store::open_in_memory().await.unwrap();
        let first = ensure_demo_user(&store).await.unwrap();
        let second = ensure_demo_user(&store).await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(first.is_admin);
        assert_eq!(first.email, DEMO_EMAIL);
        assert!(auth::verify_password(DEMO_PASSWORD, &first.password_hash));
    }
}
