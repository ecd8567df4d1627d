use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::AppState;

pub const CRON_SECRET_HEADER: &str = "x-cron-secret";
pub const INGEST_SECRET_HEADER: &str = "x-ingest-secret";

/// Hash a secret with SHA-256 so comparisons run over fixed-length digests.
fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod auth_tests;

/// Shared-secret gate for the cron trigger.
///
/// Accepts the secret from:
/// 1. `x-cron-secret` header
/// 2. `Authorization: Bearer <secret>` header
/// 3. `?secret=` query parameter, for schedulers that can only issue plain GETs
pub async fn cron_auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let from_query = Query::<HashMap<String, String>>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(params)| params.get("secret").cloned());
    let provided = extract_secret(&headers, CRON_SECRET_HEADER).or(from_query);

    verify_secret(state.config.cron_secret.as_deref(), provided.as_deref())?;
    Ok(next.run(request).await)
}

/// Secret from the named header, falling back to a bearer token.
pub(crate) fn extract_secret(headers: &HeaderMap, header: &str) -> Option<String> {
    if let Some(value) = headers.get(header).and_then(|v| v.to_str().ok()) {
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }

    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Compare a provided secret against the configured one.
///
/// An unconfigured secret rejects everything.
pub(crate) fn verify_secret(expected: Option<&str>, provided: Option<&str>) -> Result<(), AuthError> {
    let Some(expected) = expected else {
        tracing::warn!("Protected endpoint called but no shared secret is configured");
        return Err(AuthError::NotConfigured);
    };
    let provided = provided.filter(|p| !p.is_empty()).ok_or(AuthError::MissingSecret)?;

    if hash_key(provided) != hash_key(expected) {
        tracing::warn!("Invalid shared secret attempted: {}", mask_secret(provided));
        return Err(AuthError::InvalidSecret);
    }
    Ok(())
}

/// Mask a secret for logging (first and last four characters)
pub(crate) fn mask_secret(key: &str) -> String {
    if key.len() <= 8 || !key.is_ascii() {
        return "****".to_string();
    }
    format!("{}...{}", &key[..4], &key[key.len() - 4..])
}

#[derive(Debug, PartialEq)]
pub enum AuthError {
    NotConfigured,
    MissingSecret,
    InvalidSecret,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::NotConfigured => write!(f, "Shared secret not configured"),
            AuthError::MissingSecret => write!(f, "Missing shared secret"),
            AuthError::InvalidSecret => write!(f, "Invalid shared secret"),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match self {
            AuthError::NotConfigured => "Unauthorized. This endpoint is disabled until its shared secret is configured.",
            AuthError::MissingSecret => "Unauthorized. Provide the shared secret via header, Authorization: Bearer, or secret parameter.",
            AuthError::InvalidSecret => "Unauthorized. Invalid shared secret.",
        };

        (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "success": false,
                "error": message,
            })),
        )
            .into_response()
    }
}
