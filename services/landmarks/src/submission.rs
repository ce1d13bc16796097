//! Submission coordinator: turns an inbound coordinate pair into a request
//! record and (at most) one queued unit of work.
//!
//! The dedup rules, in order: a live PENDING record coalesces the submission
//! onto the in-flight work; a fresh terminal record is an idempotent hit; an
//! expired record is refreshed: soft-deleted together with its landmarks in
//! the same transaction that inserts the replacement PENDING row. The
//! partial-unique index on the canonical key is the ultimate guard against
//! racing submitters: the loser of the insert race re-reads and adopts the
//! winner's record.
use crate::context::ServiceContext;
use crate::model::{InvalidCoordinates, ProcessingMessage, RequestStatus, canonicalize};
use crate::store::StoreError;
use bytes::Bytes;
use chrono::Utc;
use landmark_queue::QueueError;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub id: Uuid,
    pub status: RequestStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    InvalidInput(#[from] InvalidCoordinates),
    #[error("failed to enqueue processing message: {0}")]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to encode processing message")]
    Encode(#[source] serde_json::Error),
}

pub async fn submit(
    ctx: &ServiceContext,
    lat: f64,
    lng: f64,
) -> Result<SubmissionOutcome, SubmitError> {
    let key = canonicalize(lat, lng, ctx.radius_m)?;

    // Cache probe first, store on a miss; store hits warm the cache.
    let mut existing = ctx.caches.request(&key).await;
    if existing.is_none() {
        existing = ctx.store.find_live_request_by_key(&key).await?;
        if let Some(record) = &existing {
            ctx.caches.put_request(&key, record).await;
        }
    }

    let now = Utc::now();
    let refresh = match existing {
        Some(record) if record.status == RequestStatus::Pending => {
            // Coalesce: the in-flight work covers this submission too.
            info!(key = %key, id = %record.id, "returning in-flight pending request");
            metrics::counter!("landmarks_submissions_total", "outcome" => "coalesced")
                .increment(1);
            return Ok(SubmissionOutcome {
                id: record.id,
                status: RequestStatus::Pending,
            });
        }
        Some(record) if !record.is_expired(ctx.refresh_horizon, now) => {
            // Idempotent hit on a fresh terminal record; no new fetch.
            info!(key = %key, id = %record.id, status = %record.status, "returning existing request");
            metrics::counter!("landmarks_submissions_total", "outcome" => "idempotent")
                .increment(1);
            return Ok(SubmissionOutcome {
                id: record.id,
                status: record.status,
            });
        }
        Some(record) => {
            // Expired: treat as absent and refresh.
            info!(key = %key, id = %record.id, "existing request expired; refreshing");
            ctx.caches.evict_all(&key).await;
            Some(record.id)
        }
        None => None,
    };

    let record = match ctx.store.create_pending_request(&key, refresh).await {
        Ok(record) => record,
        Err(StoreError::Conflict(_)) => {
            // A racing submitter inserted first; adopt its record.
            let winner = ctx
                .store
                .find_live_request_by_key(&key)
                .await?
                .ok_or_else(|| StoreError::NotFound("request".into()))?;
            ctx.caches.put_request(&key, &winner).await;
            metrics::counter!("landmarks_submissions_total", "outcome" => "coalesced")
                .increment(1);
            return Ok(SubmissionOutcome {
                id: winner.id,
                status: winner.status,
            });
        }
        Err(err) => return Err(err.into()),
    };
    ctx.caches.put_request(&key, &record).await;

    let message = ProcessingMessage::for_request(&record);
    let payload = serde_json::to_vec(&message).map_err(SubmitError::Encode)?;
    if let Err(err) = ctx.queue.enqueue(&record.id.to_string(), Bytes::from(payload)) {
        // Nothing was accepted by the queue, so the PENDING row would be
        // stranded forever; roll it back before surfacing the failure.
        error!(key = %key, id = %record.id, error = %err, "enqueue failed; rolling back pending request");
        if let Err(rollback) = ctx.store.soft_delete_request(record.id).await {
            error!(id = %record.id, error = %rollback, "failed to roll back pending request");
        }
        ctx.caches.evict_request(&key).await;
        return Err(err.into());
    }

    info!(key = %key, id = %record.id, "created pending request");
    metrics::counter!("landmarks_submissions_total", "outcome" => "enqueued").increment(1);
    metrics::gauge!("landmarks_queue_depth").set(ctx.queue.depth() as f64);
    Ok(SubmissionOutcome {
        id: record.id,
        status: RequestStatus::Pending,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LandmarkCaches;
    use crate::model::{CanonicalKey, FetchedLandmark};
    use crate::overpass::{LandmarkSource, OverpassError};
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use chrono::Duration;
    use landmark_cache::CacheConfig;
    use landmark_queue::{DurableQueue, QueueConfig};
    use std::sync::Arc;

    struct NeverFetch;

    #[async_trait]
    impl LandmarkSource for NeverFetch {
        async fn fetch(
            &self,
            _key: &CanonicalKey,
        ) -> Result<Vec<FetchedLandmark>, OverpassError> {
            panic!("submission path must not call the external service");
        }
    }

    fn context() -> ServiceContext {
        context_with_horizon(Duration::days(60))
    }

    fn context_with_horizon(refresh_horizon: Duration) -> ServiceContext {
        ServiceContext {
            store: Arc::new(InMemoryStore::new()),
            caches: LandmarkCaches::new(CacheConfig::default()),
            source: Arc::new(NeverFetch),
            queue: Arc::new(DurableQueue::new("webhook-processing", QueueConfig::default())),
            radius_m: 500,
            refresh_horizon,
        }
    }

    #[tokio::test]
    async fn equivalent_coordinates_coalesce_onto_one_message() {
        let ctx = context();
        // Two raw pairs with the same canonical key.
        let first = submit(&ctx, 48.8584123, 2.2944812).await.expect("first");
        let second = submit(&ctx, 48.8584, 2.2945).await.expect("second");

        assert_eq!(first.id, second.id);
        assert_eq!(second.status, RequestStatus::Pending);
        assert_eq!(ctx.queue.depth(), 1);
    }

    #[tokio::test]
    async fn concurrent_submissions_produce_one_live_record() {
        let ctx = context();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                submit(&ctx, 48.8584123, 2.2944812).await.expect("submit")
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.expect("join").id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(ctx.queue.depth(), 1);
    }

    #[tokio::test]
    async fn invalid_coordinates_are_rejected_before_any_side_effect() {
        let ctx = context();
        let err = submit(&ctx, 123.0, 200.0).await.expect_err("invalid");
        assert!(matches!(err, SubmitError::InvalidInput(_)));
        assert_eq!(ctx.queue.depth(), 0);
    }

    #[tokio::test]
    async fn enqueue_failure_rolls_back_the_pending_record() {
        let mut ctx = context();
        ctx.queue = Arc::new(DurableQueue::new(
            "webhook-processing",
            QueueConfig {
                partitions: 1,
                partition_capacity: 1,
                max_delivery_attempts: 5,
            },
        ));
        submit(&ctx, 1.0, 1.0).await.expect("fills the partition");
        let err = submit(&ctx, 2.0, 2.0).await.expect_err("backlog full");
        assert!(matches!(err, SubmitError::Queue(_)));

        // The key is free again: a later submission may retry from scratch.
        let key = canonicalize(2.0, 2.0, 500).expect("canonical");
        assert!(
            ctx.store
                .find_live_request_by_key(&key)
                .await
                .expect("lookup")
                .is_none()
        );
    }

    #[tokio::test]
    async fn expired_record_is_refreshed_with_a_new_id() {
        // Zero horizon: every existing record is immediately expired.
        let ctx = context_with_horizon(Duration::zero());
        let first = submit(&ctx, 48.8584, 2.2945).await.expect("first");

        // Terminal status so the coalescing rule does not short-circuit.
        ctx.store
            .update_request_status(first.id, RequestStatus::Found, None)
            .await
            .expect("complete");
        ctx.caches.evict_request(&canonicalize(48.8584, 2.2945, 500).expect("key")).await;

        let second = submit(&ctx, 48.8584, 2.2945).await.expect("second");
        assert_ne!(first.id, second.id);
        assert_eq!(second.status, RequestStatus::Pending);

        // Predecessor was soft-deleted by the refresh.
        assert!(
            ctx.store
                .find_request_by_id(first.id)
                .await
                .expect("lookup")
                .is_none()
        );
    }
}
