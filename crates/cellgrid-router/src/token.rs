//! Bearer token claim extraction.
//!
//! The router reads the tenant identifier out of the token payload and
//! nothing else. It does **not** verify the signature: tokens are assumed
//! to have been validated by the authorizer in front of the edge. Anything
//! that reaches this module unverified must not be trusted for more than
//! picking a cell.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("authorization header is empty")]
    Empty,
    #[error("token has {0} segments, expected 3")]
    Segments(usize),
    #[error("token payload is not base64url: {0}")]
    Base64(String),
    #[error("token payload is not a JSON object: {0}")]
    Json(String),
    #[error("token payload has no string claim {0:?}")]
    MissingClaim(String),
}

/// Strip an optional, case-insensitive `Bearer ` prefix.
pub fn strip_bearer(value: &str) -> &str {
    let value = value.trim();
    match value.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => value[7..].trim_start(),
        _ => value,
    }
}

/// Pull a non-empty string claim out of a `header.payload.signature` token.
pub fn extract_claim(authorization: &str, claim: &str) -> Result<String, TokenError> {
    let token = strip_bearer(authorization);
    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(TokenError::Segments(segments.len()));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(segments[1].trim_end_matches('='))
        .map_err(|e| TokenError::Base64(e.to_string()))?;
    let payload: serde_json::Value =
        serde_json::from_slice(&payload).map_err(|e| TokenError::Json(e.to_string()))?;

    payload
        .get(claim)
        .and_then(|v| v.as_str())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TokenError::MissingClaim(claim.to_string()))
}
