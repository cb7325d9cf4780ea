//! Bearer-token check for the trigger endpoint.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::error::ApiError;

/// Rejections raised before any feed work starts. All map to 401.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing bearer token")]
    Missing,
    #[error("Invalid bearer token")]
    Invalid,
    #[error("Trigger secret is not configured")]
    NotConfigured,
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        if err == AuthError::NotConfigured {
            tracing::warn!("Trigger rejected: no secret configured");
        }
        ApiError::unauthorized(err.to_string())
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Check the request's bearer token against the configured secret.
///
/// With no secret configured every request is rejected.
pub fn verify(headers: &HeaderMap, secret: Option<&SecretString>) -> Result<(), AuthError> {
    let secret = secret.ok_or(AuthError::NotConfigured)?;
    let token = bearer_token(headers).ok_or(AuthError::Missing)?;

    if digests_match(token.as_bytes(), secret.expose_secret().as_bytes()) {
        Ok(())
    } else {
        Err(AuthError::Invalid)
    }
}

/// Compare SHA-256 digests without early exit, so timing does not leak the
/// length or prefix of the secret.
fn digests_match(a: &[u8], b: &[u8]) -> bool {
    let da = Sha256::digest(a);
    let db = Sha256::digest(b);
    da.iter().zip(db.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
