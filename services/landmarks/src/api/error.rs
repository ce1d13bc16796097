//! API error envelope and helpers.
//!
//! # Purpose
//! Centralizes HTTP error response construction so every failure renders the
//! same `{error, message[, fieldErrors]}` shape.
use crate::api::types::ErrorResponse;
use crate::store::StoreError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub fn api_validation_error(message: &str) -> ApiError {
    ApiError {
        status: StatusCode::BAD_REQUEST,
        body: ErrorResponse {
            error: "VALIDATION_ERROR".to_string(),
            message: message.to_string(),
            field_errors: None,
        },
    }
}

pub fn api_validation_fields(field_errors: BTreeMap<String, String>) -> ApiError {
    ApiError {
        status: StatusCode::BAD_REQUEST,
        body: ErrorResponse {
            error: "VALIDATION_ERROR".to_string(),
            message: "Validation failed".to_string(),
            field_errors: Some(field_errors),
        },
    }
}

pub fn api_unauthorized(message: &str) -> ApiError {
    ApiError {
        status: StatusCode::UNAUTHORIZED,
        body: ErrorResponse {
            error: "UNAUTHORIZED".to_string(),
            message: message.to_string(),
            field_errors: None,
        },
    }
}

/// 502 for infrastructure failures on the ingest path (enqueue refused).
pub fn api_processing_unavailable(message: &str) -> ApiError {
    ApiError {
        status: StatusCode::BAD_GATEWAY,
        body: ErrorResponse {
            error: "WEBHOOK_PROCESSING_ERROR".to_string(),
            message: message.to_string(),
            field_errors: None,
        },
    }
}

/// 500 with an opaque message; the cause goes to the log, not the client.
pub fn api_internal(message: &str, err: &StoreError) -> ApiError {
    tracing::error!(error = ?err, "landmarks storage error");
    ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: ErrorResponse {
            error: "INTERNAL_ERROR".to_string(),
            message: message.to_string(),
            field_errors: None,
        },
    }
}

pub fn api_internal_message(message: &str) -> ApiError {
    ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: ErrorResponse {
            error: "INTERNAL_ERROR".to_string(),
            message: message.to_string(),
            field_errors: None,
        },
    }
}
