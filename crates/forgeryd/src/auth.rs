//! Password hashing and access tokens.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shared demo account, created on first use and granted admin rights.
pub const DEMO_EMAIL: &str = "demo@forgerydetection.ai";
pub const DEMO_PASSWORD: &str = "demo_password_123";

/// Passwords are cut to this many bytes so hashes stay compatible with
/// accounts created under the old bcrypt limit.
const MAX_PASSWORD_BYTES: usize = 72;

/// One year.
const MAX_TTL_MINUTES: i64 = 60 * 24 * 365;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Token expired")]
    Expired,
    #[error("Invalid token")]
    InvalidToken,
    #[error("token encoding failed: {0}")]
    Encode(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

/// Issues and validates HS256 access tokens.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl_minutes: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl: Duration::minutes(i64::try_from(ttl_minutes).unwrap_or(MAX_TTL_MINUTES).min(MAX_TTL_MINUTES)),
        }
    }

    pub fn issue(&self, user_id: &str) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Encode(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken,
            })
    }
}

/// Longest prefix of `password` within the byte limit, cut at a char boundary.
fn truncate_password(password: &str) -> &str {
    if password.len() <= MAX_PASSWORD_BYTES {
        return password;
    }
    let mut end = MAX_PASSWORD_BYTES;
    while !password.is_char_boundary(end) {
        end -= 1;
    }
    &password[..end]
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(truncate_password(password).as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

/// False on mismatch and on malformed stored hashes.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        tracing::warn!("stored password hash is malformed");
        return false;
    };
    Argon2::default()
        .verify_password(truncate_password(password).as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-hash"));
    }

    #[test]
    fn test_long_passwords_truncated() {
        let base = "a".repeat(MAX_PASSWORD_BYTES);
        let hash = hash_password(&format!("{base}tail-one")).unwrap();
        assert!(verify_password(&format!("{base}tail-two"), &hash));
        assert!(!verify_password(&base[..MAX_PASSWORD_BYTES - 1], &hash));
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        // 71 ASCII bytes then a 2-byte char straddling the limit.
        let pw = format!("{}é", "a".repeat(71));
        assert_eq!(truncate_password(&pw).len(), 71);
        assert_eq!(truncate_password("short"), "short");
    }

    #[test]
    fn test_token_roundtrip() {
        let issuer = TokenIssuer::new("test-secret", 60);
        let token = issuer.issue("user-1").unwrap();
        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_token_wrong_secret() {
        let token = TokenIssuer::new("secret-a", 60).issue("user-1").unwrap();
        let err = TokenIssuer::new("secret-b", 60).verify(&token).unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
        assert!(matches!(TokenIssuer::new("s", 60).verify("garbage"), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_token_expired() {
        let now = Utc::now().timestamp();
        let claims = Claims { sub: "user-1".into(), iat: now - 7200, exp: now - 3600 };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        let err = TokenIssuer::new("test-secret", 60).verify(&token).unwrap_err();
        assert!(matches!(err, AuthError::Expired));
        assert_eq!(err.to_string(), "Token expired");
    }
}
