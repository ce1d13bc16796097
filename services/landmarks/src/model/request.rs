use super::CanonicalKey;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle of a coordinate request. `Pending` is the only non-terminal
/// status; workers never move a record back to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestStatus {
    Pending,
    Found,
    Empty,
    Error,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Found => "FOUND",
            RequestStatus::Empty => "EMPTY",
            RequestStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PENDING" => Ok(RequestStatus::Pending),
            "FOUND" => Ok(RequestStatus::Found),
            "EMPTY" => Ok(RequestStatus::Empty),
            "ERROR" => Ok(RequestStatus::Error),
            other => Err(format!("unknown request status: {other}")),
        }
    }
}

/// Primary aggregate: one row per live canonical key.
///
/// The record is created by the submission coordinator, mutated only by the
/// processing worker (status, error message), and soft-deleted by the refresh
/// protocol. Snapshots of it are cached under the `requests` namespace, hence
/// the serde derives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: Uuid,
    pub key_lat: f64,
    pub key_lng: f64,
    pub radius_m: u32,
    pub status: RequestStatus,
    pub error_message: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RequestRecord {
    pub fn new_pending(key: &CanonicalKey, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key_lat: key.key_lat,
            key_lng: key.key_lng,
            radius_m: key.radius_m,
            status: RequestStatus::Pending,
            error_message: None,
            requested_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn key(&self) -> CanonicalKey {
        CanonicalKey {
            key_lat: self.key_lat,
            key_lng: self.key_lng,
            radius_m: self.radius_m,
        }
    }

    /// Whether the record has aged past the refresh horizon. Expired records
    /// are treated as absent by the submission coordinator.
    pub fn is_expired(&self, horizon: Duration, now: DateTime<Utc>) -> bool {
        now - self.requested_at > horizon
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::canonicalize;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            RequestStatus::Pending,
            RequestStatus::Found,
            RequestStatus::Empty,
            RequestStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<RequestStatus>(), Ok(status));
        }
        assert!("UNKNOWN".parse::<RequestStatus>().is_err());
    }

    #[test]
    fn expiry_compares_against_requested_at() {
        let key = canonicalize(1.0, 2.0, 500).expect("canonical");
        let now = Utc::now();
        let mut record = RequestRecord::new_pending(&key, now);
        assert!(!record.is_expired(Duration::days(60), now));
        record.requested_at = now - Duration::days(61);
        assert!(record.is_expired(Duration::days(60), now));
    }
}
