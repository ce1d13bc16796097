// Landmarks service (HTTP)
// -------------------------
// Ingests geographic coordinate events over HTTP, resolves each event into a
// set of nearby OSM landmarks via the Overpass API, and serves the
// materialized results through a cache-fronted persistent store.
//
// Pipeline shape:
// - POST /webhook canonicalizes the coordinates, dedups against the live
//   request for the key, and enqueues a processing message. The caller gets a
//   request id immediately.
// - A worker pool drains the queue with at-least-once semantics and runs the
//   fetch → persist → cache pipeline; a sweeper re-enqueues PENDING records a
//   crashed worker left behind.
// - GET /webhook/{id} and GET /landmarks read cache-first with store fallback
//   and write-through.
//
// Storage is pluggable: in-memory (default) or Postgres when
// LANDMARKS_POSTGRES_URL / DATABASE_URL is set; migrations run at startup.
use anyhow::Context;
use landmarks::app::{AppState, build_router};
use landmarks::cache::LandmarkCaches;
use landmarks::config::{ServiceConfig, StorageBackend};
use landmarks::context::ServiceContext;
use landmarks::overpass::{HttpOverpassClient, LandmarkSource};
use landmarks::store::memory::InMemoryStore;
use landmarks::store::postgres::PostgresStore;
use landmarks::store::LandmarkStore;
use landmarks::{observability, worker};
use landmark_queue::DurableQueue;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let metrics_handle = observability::init_observability();

    let config = ServiceConfig::from_env_or_yaml().context("landmarks config")?;

    let store: Arc<dyn LandmarkStore> = match config.storage {
        StorageBackend::Memory => Arc::new(InMemoryStore::new()),
        StorageBackend::Postgres => {
            let pg = config
                .postgres
                .as_ref()
                .context("postgres configuration missing")?;
            Arc::new(PostgresStore::connect(pg).await?)
        }
    };
    tracing::info!(
        backend = store.backend_name(),
        durable = store.is_durable(),
        "landmark store ready"
    );

    let source: Arc<dyn LandmarkSource> = Arc::new(HttpOverpassClient::new(
        config.overpass_url.clone(),
        config.overpass_timeout(),
        config.overpass_transport_retries,
    ));
    let queue = Arc::new(DurableQueue::new(
        config.queue_topic.clone(),
        config.queue_config(),
    ));
    let context = ServiceContext {
        store,
        caches: LandmarkCaches::new(config.cache_config()),
        source,
        queue,
        radius_m: config.query_radius_meters,
        refresh_horizon: config.refresh_horizon(),
    };

    let workers = worker::spawn_workers(context.clone(), config.worker_concurrency);
    tracing::info!(
        group = %config.consumer_group,
        topic = %config.queue_topic,
        workers = workers.len(),
        "processing consumers started"
    );
    let _sweeper = worker::spawn_pending_sweeper(
        context.clone(),
        config.pending_requeue_threshold(),
        Duration::from_secs(60),
    );

    tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    let state = AppState {
        context,
        webhook_secret: config.webhook_secret.clone().into(),
    };
    let app = build_router(state);

    let addr = config.bind_addr;
    tracing::info!(%addr, "landmarks service listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
