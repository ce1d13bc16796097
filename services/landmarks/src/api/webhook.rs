//! Webhook ingest and status handlers.
use crate::api::error::{
    ApiError, api_internal, api_processing_unavailable, api_validation_error,
    api_validation_fields,
};
use crate::api::types::{SubmissionResponse, WebhookRequest, WebhookResponse};
use crate::app::AppState;
use crate::auth;
use crate::query::{self, StatusLookup};
use crate::submission::{self, SubmitError};
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

#[utoipa::path(
    post,
    path = "/webhook",
    tag = "webhook",
    request_body = WebhookRequest,
    responses(
        (status = 202, description = "Submission accepted or coalesced", body = SubmissionResponse),
        (status = 400, description = "Invalid coordinates or body", body = crate::api::types::ErrorResponse),
        (status = 401, description = "Missing or invalid bearer token", body = crate::api::types::ErrorResponse),
        (status = 502, description = "Processing queue unavailable", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn submit_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<WebhookRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    auth::require_bearer(&headers, &state.webhook_secret)?;
    let Json(body) = payload
        .map_err(|_| api_validation_error("request body must be JSON with numeric lat and lng"))?;

    match submission::submit(&state.context, body.lat, body.lng).await {
        Ok(outcome) => Ok((
            StatusCode::ACCEPTED,
            Json(SubmissionResponse {
                id: outcome.id,
                status: outcome.status,
            }),
        )),
        Err(SubmitError::InvalidInput(err)) => Err(api_validation_fields(err.field_errors)),
        Err(SubmitError::Queue(err)) => {
            tracing::error!(error = %err, "webhook enqueue failed");
            Err(api_processing_unavailable(
                "failed to enqueue webhook for processing",
            ))
        }
        Err(SubmitError::Store(err)) => Err(api_internal("failed to submit webhook", &err)),
        Err(err) => {
            tracing::error!(error = %err, "webhook submission failed");
            Err(crate::api::error::api_internal_message(
                "failed to submit webhook",
            ))
        }
    }
}

#[utoipa::path(
    get,
    path = "/webhook/{id}",
    tag = "webhook",
    params(
        ("id" = Uuid, Path, description = "Request identifier returned by the submission")
    ),
    responses(
        (status = 200, description = "Materialized result", body = WebhookResponse),
        (status = 202, description = "Still pending; poll again"),
        (status = 404, description = "No such request")
    )
)]
pub(crate) async fn webhook_status(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    match query::webhook_status(&state.context, id).await {
        Ok(StatusLookup::NotFound) => Ok(StatusCode::NOT_FOUND.into_response()),
        Ok(StatusLookup::NotReady) => Ok(StatusCode::ACCEPTED.into_response()),
        Ok(StatusLookup::Ready(response)) => Ok(Json(response).into_response()),
        Err(err) => Err(api_internal("failed to load webhook status", &err)),
    }
}
