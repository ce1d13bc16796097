//! OpenAPI document for the HTTP surface.
use crate::api;
use crate::api::types::{
    ErrorResponse, HealthStatus, LandmarksQueryResponse, QueryKey, QuerySource, ResponseKey,
    SubmissionResponse, WebhookRequest, WebhookResponse,
};
use crate::model::{LandmarkView, OsmType, RequestStatus};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "landmarks",
        version = "v1",
        description = "Coordinate ingestion and landmark materialization service"
    ),
    paths(
        api::webhook::submit_webhook,
        api::webhook::webhook_status,
        api::landmarks::query_landmarks,
        api::system::healthz
    ),
    components(schemas(
        WebhookRequest,
        SubmissionResponse,
        ResponseKey,
        WebhookResponse,
        QueryKey,
        QuerySource,
        LandmarksQueryResponse,
        LandmarkView,
        OsmType,
        RequestStatus,
        HealthStatus,
        ErrorResponse
    )),
    tags(
        (name = "webhook", description = "Coordinate submission and status polling"),
        (name = "landmarks", description = "Landmark retrieval by coordinates"),
        (name = "system", description = "Health and discovery")
    )
)]
pub struct ApiDoc;
