//! Bearer-token authentication for the webhook ingest endpoint.
use crate::api::error::{ApiError, api_unauthorized};
use axum::http::{HeaderMap, header};
use sha2::{Digest, Sha256};

const BEARER_PREFIX: &str = "Bearer ";

/// Validate the `Authorization: Bearer <token>` header against the configured
/// secret. Only `POST /webhook` requires this; reads are public.
pub fn require_bearer(headers: &HeaderMap, secret: &str) -> Result<(), ApiError> {
    let header_value = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let Some(token) = header_value.and_then(|value| value.strip_prefix(BEARER_PREFIX)) else {
        return Err(api_unauthorized("Missing or invalid Authorization header"));
    };
    if !constant_time_eq(secret, token) {
        return Err(api_unauthorized("Invalid token"));
    }
    Ok(())
}

// Comparing fixed-length digests keeps the comparison cost independent of how
// many token bytes match.
fn constant_time_eq(expected: &str, provided: &str) -> bool {
    Sha256::digest(expected.as_bytes()) == Sha256::digest(provided.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = value {
            headers.insert(
                header::AUTHORIZATION,
                HeaderValue::from_str(value).expect("header"),
            );
        }
        headers
    }

    #[test]
    fn accepts_the_configured_token() {
        let headers = headers_with(Some("Bearer supersecret"));
        assert!(require_bearer(&headers, "supersecret").is_ok());
    }

    #[test]
    fn rejects_missing_header() {
        let err = require_bearer(&headers_with(None), "supersecret").expect_err("missing");
        assert_eq!(err.body.message, "Missing or invalid Authorization header");
    }

    #[test]
    fn rejects_non_bearer_scheme() {
        let headers = headers_with(Some("Basic c3VwZXJzZWNyZXQ="));
        let err = require_bearer(&headers, "supersecret").expect_err("scheme");
        assert_eq!(err.body.message, "Missing or invalid Authorization header");
    }

    #[test]
    fn rejects_wrong_token() {
        let headers = headers_with(Some("Bearer wrong"));
        let err = require_bearer(&headers, "supersecret").expect_err("wrong token");
        assert_eq!(err.body.message, "Invalid token");
    }
}
