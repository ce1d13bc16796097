//! Shared harness for router-level tests: in-memory store, real queue and
//! workers, and a programmable stub in place of the Overpass client.
use async_trait::async_trait;
use axum::Router;
use chrono::Duration as ChronoDuration;
use landmark_cache::CacheConfig;
use landmark_queue::{DurableQueue, QueueConfig};
use landmarks::app::{AppState, build_router};
use landmarks::cache::LandmarkCaches;
use landmarks::context::ServiceContext;
use landmarks::model::{CanonicalKey, FetchedLandmark, OsmType};
use landmarks::overpass::{LandmarkSource, OverpassError};
use landmarks::store::memory::InMemoryStore;
use landmarks::worker::spawn_workers;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

pub const TEST_SECRET: &str = "supersecret";

/// Scripted stand-in for the external service; counts calls and replays
/// queued responses (defaulting to an empty result set).
pub struct StubSource {
    responses: Mutex<VecDeque<Result<Vec<FetchedLandmark>, OverpassError>>>,
    calls: AtomicUsize,
}

impl StubSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub async fn push(&self, response: Result<Vec<FetchedLandmark>, OverpassError>) {
        self.responses.lock().await.push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LandmarkSource for StubSource {
    async fn fetch(&self, _key: &CanonicalKey) -> Result<Vec<FetchedLandmark>, OverpassError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

pub fn eiffel_tower() -> FetchedLandmark {
    FetchedLandmark {
        osm_type: OsmType::Way,
        osm_id: 5013364,
        name: Some("Eiffel Tower".to_string()),
        lat: 48.8584,
        lng: 2.2945,
        tags: BTreeMap::from([
            ("name".to_string(), "Eiffel Tower".to_string()),
            ("tourism".to_string(), "attraction".to_string()),
        ]),
    }
}

pub struct Harness {
    pub context: ServiceContext,
    pub store: Arc<InMemoryStore>,
    pub source: Arc<StubSource>,
    router: Router,
}

impl Harness {
    pub fn app(&self) -> axum::routing::RouterIntoService<axum::body::Body, ()> {
        self.router.clone().into_service()
    }
}

/// Default harness: 60-day refresh horizon, 3 workers.
pub fn harness() -> Harness {
    harness_with(ChronoDuration::days(60), 3)
}

pub fn harness_with(refresh_horizon: ChronoDuration, workers: usize) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let source = StubSource::new();
    let context = ServiceContext {
        store: store.clone(),
        caches: LandmarkCaches::new(CacheConfig::default()),
        source: source.clone(),
        queue: Arc::new(DurableQueue::new(
            "webhook-processing",
            QueueConfig::default(),
        )),
        radius_m: 500,
        refresh_horizon,
    };
    if workers > 0 {
        spawn_workers(context.clone(), workers);
    }
    let state = AppState {
        context: context.clone(),
        webhook_secret: TEST_SECRET.into(),
    };
    Harness {
        context,
        store,
        source,
        router: build_router(state),
    }
}

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}
