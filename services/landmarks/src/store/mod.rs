//! Persistent store for request records and landmarks.
//!
//! # Purpose
//! Defines the `LandmarkStore` trait the pipeline is written against, with an
//! in-memory implementation for tests/dev and a Postgres implementation for
//! durable deployments.
//!
//! # Soft-delete contract
//! Every read filters on `deleted_at IS NULL`. Soft-deleting a request frees
//! its canonical key for a new live row (the partial-unique constraint only
//! covers live rows); soft-delete does not cascade, and the refresh path deletes
//! request and landmarks explicitly inside one transaction.
use crate::model::{
    CanonicalKey, FetchedLandmark, LandmarkRecord, OsmType, RequestRecord, RequestStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

/// The store refuses to persist longer error messages; callers get the
/// truncated form back rather than a failure.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage operations used by the submission coordinator, the processing
/// worker, and the retrieval service.
///
/// The compound operations (`create_pending_request`, `record_fetch_result`,
/// `attach_landmarks`) each execute as a single transaction so racing
/// submitters and duplicate deliveries observe consistent state.
#[async_trait]
pub trait LandmarkStore: Send + Sync {
    /// Live request for a canonical key, if any.
    async fn find_live_request_by_key(
        &self,
        key: &CanonicalKey,
    ) -> StoreResult<Option<RequestRecord>>;

    /// Live request by id.
    async fn find_request_by_id(&self, id: Uuid) -> StoreResult<Option<RequestRecord>>;

    /// Insert a new PENDING record for the key. When `refresh` names an
    /// expired predecessor, that record and its landmarks are soft-deleted in
    /// the same transaction so the partial-unique index admits the insert.
    /// A racing winner surfaces as [`StoreError::Conflict`].
    async fn create_pending_request(
        &self,
        key: &CanonicalKey,
        refresh: Option<Uuid>,
    ) -> StoreResult<RequestRecord>;

    /// Write a status transition (and optional error message, truncated to
    /// [`MAX_ERROR_MESSAGE_CHARS`]), bumping `updated_at`.
    async fn update_request_status(
        &self,
        id: Uuid,
        status: RequestStatus,
        error_message: Option<String>,
    ) -> StoreResult<RequestRecord>;

    async fn soft_delete_request(&self, id: Uuid) -> StoreResult<()>;

    async fn soft_delete_landmark(&self, id: Uuid) -> StoreResult<()>;

    /// Live landmarks associated with a request, in insertion order.
    async fn landmarks_for_request(&self, request_id: Uuid) -> StoreResult<Vec<LandmarkRecord>>;

    /// Live landmark row with the given global OSM identity.
    async fn find_live_landmark_by_osm(
        &self,
        osm_type: OsmType,
        osm_id: i64,
    ) -> StoreResult<Option<LandmarkRecord>>;

    /// Persist the outcome of an external fetch in one transaction: reuse live
    /// rows with matching `(osm_type, osm_id)`, insert the rest, associate all
    /// of them with the request, and set its status to FOUND (any landmarks)
    /// or EMPTY (none). Returns the saved record and its landmark set.
    async fn record_fetch_result(
        &self,
        request_id: Uuid,
        fetched: Vec<FetchedLandmark>,
    ) -> StoreResult<(RequestRecord, Vec<LandmarkRecord>)>;

    /// Associate existing landmark rows with a request and mark it FOUND, in
    /// one transaction. Used when another live request for the same key
    /// already materialized the data.
    async fn attach_landmarks(
        &self,
        request_id: Uuid,
        landmark_ids: &[Uuid],
    ) -> StoreResult<RequestRecord>;

    /// Live PENDING records requested before `cutoff`; feeds the sweeper that
    /// re-enqueues stranded work.
    async fn pending_requests_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<RequestRecord>>;

    async fn health_check(&self) -> StoreResult<()>;

    fn is_durable(&self) -> bool;

    fn backend_name(&self) -> &'static str;
}

/// Clamp an error message to the stored bound, on a char boundary.
pub(crate) fn truncate_error_message(message: String) -> String {
    if message.chars().count() <= MAX_ERROR_MESSAGE_CHARS {
        return message;
    }
    message.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_keeps_short_messages_intact() {
        let message = "upstream returned 504".to_string();
        assert_eq!(truncate_error_message(message.clone()), message);
    }

    #[test]
    fn truncation_bounds_long_messages() {
        let message = "x".repeat(MAX_ERROR_MESSAGE_CHARS + 50);
        let truncated = truncate_error_message(message);
        assert_eq!(truncated.chars().count(), MAX_ERROR_MESSAGE_CHARS);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let message = "é".repeat(MAX_ERROR_MESSAGE_CHARS + 1);
        let truncated = truncate_error_message(message);
        assert_eq!(truncated.chars().count(), MAX_ERROR_MESSAGE_CHARS);
    }
}
