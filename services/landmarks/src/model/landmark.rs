use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// OSM element kind. Unknown kinds coming back from the upstream service are
/// dropped during parsing rather than stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OsmType {
    Way,
    Relation,
    Node,
}

impl OsmType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OsmType::Way => "way",
            OsmType::Relation => "relation",
            OsmType::Node => "node",
        }
    }
}

impl fmt::Display for OsmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OsmType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "way" => Ok(OsmType::Way),
            "relation" => Ok(OsmType::Relation),
            "node" => Ok(OsmType::Node),
            other => Err(format!("unknown osm type: {other}")),
        }
    }
}

/// One landmark parsed out of an upstream response, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedLandmark {
    pub osm_type: OsmType,
    pub osm_id: i64,
    pub name: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub tags: BTreeMap<String, String>,
}

/// Stored landmark row. Globally identified by `(osm_type, osm_id)` among live
/// rows; association with requests goes through the join table, so one row can
/// serve many requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandmarkRecord {
    pub id: Uuid,
    pub osm_type: OsmType,
    pub osm_id: i64,
    pub name: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub tags: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl LandmarkRecord {
    pub fn from_fetched(fetched: FetchedLandmark, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            osm_type: fetched.osm_type,
            osm_id: fetched.osm_id,
            name: fetched.name,
            lat: fetched.lat,
            lng: fetched.lng,
            tags: fetched.tags,
            created_at: now,
            deleted_at: None,
        }
    }
}

/// Response projection of a landmark, also the payload cached under the
/// `landmarks` namespace.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LandmarkView {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub osm_type: OsmType,
    pub osm_id: i64,
    pub lat: f64,
    pub lng: f64,
    pub tags: BTreeMap<String, String>,
}

impl From<&LandmarkRecord> for LandmarkView {
    fn from(record: &LandmarkRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            osm_type: record.osm_type,
            osm_id: record.osm_id,
            lat: record.lat,
            lng: record.lng,
            tags: record.tags.clone(),
        }
    }
}

pub fn views(records: &[LandmarkRecord]) -> Vec<LandmarkView> {
    records.iter().map(LandmarkView::from).collect()
}
