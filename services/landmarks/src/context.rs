//! Shared dependencies threaded through the pipeline.
use crate::cache::LandmarkCaches;
use crate::overpass::LandmarkSource;
use crate::store::LandmarkStore;
use chrono::Duration;
use landmark_queue::DurableQueue;
use std::sync::Arc;

/// Everything the submission coordinator, the workers, and the retrieval
/// service need. Cloning is cheap; all members are shared handles.
#[derive(Clone)]
pub struct ServiceContext {
    pub store: Arc<dyn LandmarkStore>,
    pub caches: LandmarkCaches,
    pub source: Arc<dyn LandmarkSource>,
    pub queue: Arc<DurableQueue>,
    /// Radius attached to every canonical key.
    pub radius_m: u32,
    /// Freshness horizon: records older than this are treated as absent by
    /// new submissions and refreshed.
    pub refresh_horizon: Duration,
}
