//! Retrieval service: cache-first reads with store fallback and write-through.
use crate::api::types::{LandmarksQueryResponse, QueryKey, QuerySource, ResponseKey, WebhookResponse};
use crate::context::ServiceContext;
use crate::model::{InvalidCoordinates, RequestStatus, canonicalize, views};
use crate::store::StoreError;
use tracing::debug;
use uuid::Uuid;

/// Outcome of a GET-by-id lookup.
#[derive(Debug)]
pub enum StatusLookup {
    NotFound,
    /// The record exists but is still PENDING; the caller polls again later.
    NotReady,
    Ready(WebhookResponse),
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    InvalidInput(#[from] InvalidCoordinates),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub async fn webhook_status(ctx: &ServiceContext, id: Uuid) -> Result<StatusLookup, StoreError> {
    let Some(record) = ctx.store.find_request_by_id(id).await? else {
        return Ok(StatusLookup::NotFound);
    };
    if record.status == RequestStatus::Pending {
        return Ok(StatusLookup::NotReady);
    }
    let key = record.key();

    let landmarks = match ctx.caches.landmarks(&key).await {
        Some(cached) => {
            debug!(id = %id, key = %key, "webhook status served from cache");
            cached
        }
        None => {
            let stored = ctx.store.landmarks_for_request(record.id).await?;
            let projected = views(&stored);
            ctx.caches.put_landmarks(&key, &projected).await;
            debug!(id = %id, key = %key, "webhook status loaded from store");
            projected
        }
    };

    Ok(StatusLookup::Ready(WebhookResponse {
        key: ResponseKey {
            lat: record.key_lat,
            lng: record.key_lng,
        },
        count: landmarks.len(),
        radius_meters: record.radius_m,
        landmarks,
    }))
}

pub async fn by_coordinates(
    ctx: &ServiceContext,
    lat: f64,
    lng: f64,
) -> Result<LandmarksQueryResponse, QueryError> {
    let key = canonicalize(lat, lng, ctx.radius_m)?;
    let query_key = QueryKey {
        lat: key.key_lat,
        lng: key.key_lng,
        radius_meters: key.radius_m,
    };

    // Materialized landmarks in the hot cache settle the query outright.
    if let Some(cached) = ctx.caches.landmarks(&key).await {
        debug!(key = %key, "landmarks query served from cache");
        return Ok(LandmarksQueryResponse {
            key: query_key,
            source: QuerySource::Cache,
            landmarks: cached,
        });
    }

    // Resolve the owning request (cache, then store with cache fill).
    let mut request = ctx.caches.request(&key).await;
    if request.is_none() {
        request = ctx.store.find_live_request_by_key(&key).await?;
        if let Some(record) = &request {
            ctx.caches.put_request(&key, record).await;
        }
    }
    let Some(record) = request else {
        debug!(key = %key, "no live request for key");
        return Ok(LandmarksQueryResponse {
            key: query_key,
            source: QuerySource::None,
            landmarks: Vec::new(),
        });
    };

    let stored = ctx.store.landmarks_for_request(record.id).await?;
    let projected = views(&stored);
    if !projected.is_empty() {
        ctx.caches.put_landmarks(&key, &projected).await;
    }
    debug!(key = %key, count = projected.len(), "landmarks query loaded from store");
    Ok(LandmarksQueryResponse {
        key: query_key,
        source: QuerySource::Db,
        landmarks: projected,
    })
}
