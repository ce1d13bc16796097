//! Processing workers: drain the queue and run the fetch → persist → cache
//! pipeline for PENDING records.
//!
//! Delivery is at-least-once, so the handler is idempotent with respect to
//! terminal state: a record that is missing or no longer PENDING is simply
//! acknowledged. Two shortcuts run before the external fetch (the landmarks
//! cache, then warm data owned by another live record for the same key), and
//! both complete the request without touching the upstream service. Upstream
//! failures are *recorded* (status ERROR) and acknowledged rather than
//! retried; infrastructure failures leave the message un-acked so the queue
//! redelivers within its bounded attempt budget.
use crate::context::ServiceContext;
use crate::model::{ProcessingMessage, RequestStatus, views};
use crate::store::StoreError;
use bytes::Bytes;
use chrono::Utc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Start the consumer group: `concurrency` workers sharing the queue's
/// partitions so per-request ordering is preserved.
pub fn spawn_workers(ctx: ServiceContext, concurrency: usize) -> Vec<JoinHandle<()>> {
    ctx.queue
        .assignments(concurrency)
        .into_iter()
        .enumerate()
        .map(|(index, partitions)| {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                run_worker(ctx, index, partitions).await;
            })
        })
        .collect()
}

async fn run_worker(ctx: ServiceContext, index: usize, partitions: Vec<u32>) {
    info!(worker = index, ?partitions, "processing worker started");
    while let Some(delivery) = ctx.queue.recv(&partitions).await {
        let message: ProcessingMessage = match serde_json::from_slice(delivery.payload()) {
            Ok(message) => message,
            Err(err) => {
                // Poison payloads would redeliver forever; drop them.
                warn!(worker = index, error = %err, "discarding undecodable processing message");
                delivery.ack();
                continue;
            }
        };
        match process_message(&ctx, &message).await {
            Ok(()) => {
                delivery.ack();
                metrics::counter!("landmarks_worker_messages_total", "outcome" => "done")
                    .increment(1);
            }
            Err(err) => {
                // Infrastructure trouble: best-effort mark the record, keep
                // the message un-acked so the queue redelivers it.
                error!(
                    worker = index,
                    request_id = %message.request_id,
                    error = %err,
                    "processing failed; leaving message for redelivery"
                );
                if let Err(mark) = ctx
                    .store
                    .update_request_status(
                        message.request_id,
                        RequestStatus::Error,
                        Some(err.to_string()),
                    )
                    .await
                {
                    error!(request_id = %message.request_id, error = %mark, "failed to record error status");
                }
                metrics::counter!("landmarks_worker_messages_total", "outcome" => "retried")
                    .increment(1);
                drop(delivery);
            }
        }
        metrics::gauge!("landmarks_queue_depth").set(ctx.queue.depth() as f64);
    }
    info!(worker = index, "processing worker stopped");
}

/// Run one message through the pipeline. `Ok(())` means the message reached a
/// terminal outcome and must be acknowledged; `Err` means infrastructure
/// failed mid-flight and the message should be redelivered.
pub(crate) async fn process_message(
    ctx: &ServiceContext,
    message: &ProcessingMessage,
) -> Result<(), StoreError> {
    let Some(record) = ctx.store.find_request_by_id(message.request_id).await? else {
        warn!(request_id = %message.request_id, "request disappeared before processing");
        return Ok(());
    };
    if record.status != RequestStatus::Pending {
        // Duplicate delivery after a prior completion.
        info!(request_id = %record.id, status = %record.status, "request already processed");
        return Ok(());
    }
    let key = record.key();

    // Shortcut 1: the landmarks cache is already materialized for this key.
    if ctx.caches.landmarks(&key).await.is_some() {
        let stored = ctx.store.landmarks_for_request(record.id).await?;
        if !stored.is_empty() {
            ctx.store
                .update_request_status(record.id, RequestStatus::Found, None)
                .await?;
            ctx.caches.evict_request(&key).await;
            info!(request_id = %record.id, key = %key, "completed from cache");
            return Ok(());
        }
        // Cache entry without rows for this request: fall through to refetch.
        warn!(request_id = %record.id, key = %key, "landmarks cached but none stored for request");
    }

    // Shortcut 2: another live record already materialized this key in the
    // store (cache-missed but DB-warm). Never calls the external service.
    if let Some(warm) = ctx.store.find_live_request_by_key(&key).await? {
        if warm.id != record.id
            && warm.status != RequestStatus::Pending
            && !warm.is_expired(ctx.refresh_horizon, Utc::now())
        {
            let stored = ctx.store.landmarks_for_request(warm.id).await?;
            if !stored.is_empty() {
                let landmark_ids: Vec<_> = stored.iter().map(|landmark| landmark.id).collect();
                ctx.store.attach_landmarks(record.id, &landmark_ids).await?;
                ctx.caches.put_landmarks(&key, &views(&stored)).await;
                ctx.caches.evict_request(&key).await;
                info!(request_id = %record.id, key = %key, donor = %warm.id, "completed from warm store data");
                return Ok(());
            }
        }
    }

    // External fetch.
    match ctx.source.fetch(&key).await {
        Ok(fetched) => {
            metrics::counter!("landmarks_overpass_fetch_total", "result" => "ok").increment(1);
            let count = fetched.len();
            let (saved, landmarks) = ctx.store.record_fetch_result(record.id, fetched).await?;
            ctx.caches.put_landmarks(&key, &views(&landmarks)).await;
            ctx.caches.evict_request(&key).await;
            info!(
                request_id = %saved.id,
                key = %key,
                status = %saved.status,
                count,
                "completed from external fetch"
            );
            Ok(())
        }
        Err(err) => {
            // Upstream failure is a terminal outcome for this record; record
            // it and acknowledge instead of hammering the service.
            metrics::counter!("landmarks_overpass_fetch_total", "result" => "error").increment(1);
            error!(request_id = %record.id, key = %key, error = %err, "external fetch failed");
            ctx.store
                .update_request_status(record.id, RequestStatus::Error, Some(err.to_string()))
                .await?;
            ctx.caches.evict_request(&key).await;
            Ok(())
        }
    }
}

/// Re-enqueue PENDING records that have sat unprocessed past `threshold`.
///
/// A worker crash between dequeue and the status write would otherwise strand
/// a record in PENDING forever: submissions for its key keep coalescing onto
/// a request nobody is working on. Best-effort: store errors are logged and
/// retried on the next tick.
pub fn spawn_pending_sweeper(
    ctx: ServiceContext,
    threshold: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let threshold = chrono::Duration::from_std(threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so a fresh process
        // does not re-enqueue work the workers are about to pick up anyway.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let cutoff = Utc::now() - threshold;
            let stale = match ctx.store.pending_requests_older_than(cutoff).await {
                Ok(stale) => stale,
                Err(err) => {
                    warn!(error = %err, "pending sweep failed; will retry next tick");
                    continue;
                }
            };
            for record in stale {
                let message = ProcessingMessage::for_request(&record);
                let payload = match serde_json::to_vec(&message) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(request_id = %record.id, error = %err, "failed to encode sweep message");
                        continue;
                    }
                };
                match ctx
                    .queue
                    .enqueue(&record.id.to_string(), Bytes::from(payload))
                {
                    Ok(_) => {
                        warn!(request_id = %record.id, requested_at = %record.requested_at, "re-enqueued stale pending request");
                        metrics::counter!("landmarks_pending_requeues_total").increment(1);
                    }
                    Err(err) => {
                        warn!(request_id = %record.id, error = %err, "failed to re-enqueue stale pending request");
                    }
                }
            }
        }
    })
}
