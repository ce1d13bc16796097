//! Domain model shared by the pipeline, the store backends, and the API.
mod coords;
mod landmark;
mod request;

pub use coords::{CanonicalKey, InvalidCoordinates, canonicalize};
pub use landmark::{FetchedLandmark, LandmarkRecord, LandmarkView, OsmType, views};
pub use request::{RequestRecord, RequestStatus};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Queue payload produced by the submission coordinator and consumed by the
/// processing workers. Partitioned on `request_id` so duplicate deliveries for
/// one request stay ordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMessage {
    pub request_id: Uuid,
    pub key_lat: f64,
    pub key_lng: f64,
    #[serde(rename = "radius")]
    pub radius_m: u32,
}

impl ProcessingMessage {
    pub fn for_request(record: &RequestRecord) -> Self {
        Self {
            request_id: record.id,
            key_lat: record.key_lat,
            key_lng: record.key_lng,
            radius_m: record.radius_m,
        }
    }

    pub fn key(&self) -> CanonicalKey {
        CanonicalKey {
            key_lat: self.key_lat,
            key_lng: self.key_lng,
            radius_m: self.radius_m,
        }
    }
}
