//! Request/response DTOs for the HTTP surface.
use crate::model::{LandmarkView, RequestStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookRequest {
    pub lat: f64,
    pub lng: f64,
}

/// Body of the 202 returned by `POST /webhook`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmissionResponse {
    pub id: Uuid,
    pub status: RequestStatus,
}

/// Canonicalized key echoed by `GET /webhook/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResponseKey {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub key: ResponseKey,
    pub count: usize,
    pub radius_meters: u32,
    pub landmarks: Vec<LandmarkView>,
}

/// Canonicalized key echoed by `GET /landmarks`, radius included.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryKey {
    pub lat: f64,
    pub lng: f64,
    pub radius_meters: u32,
}

/// Where the landmark list was resolved from; part of the observable contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum QuerySource {
    Cache,
    Db,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LandmarksQueryResponse {
    pub key: QueryKey,
    pub source: QuerySource,
    pub landmarks: Vec<LandmarkView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
}

/// Error envelope shared by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(rename = "fieldErrors", skip_serializing_if = "Option::is_none")]
    pub field_errors: Option<BTreeMap<String, String>>,
}
