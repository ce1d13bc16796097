//! Client for the upstream Overpass geospatial query service.
//!
//! Builds the Overpass QL query for tourism attractions around a canonical
//! key, applies the per-call deadline and the bounded transport retry, and
//! parses the response into [`FetchedLandmark`]s. HTTP error statuses are
//! never retried, since a 429/504 from Overpass is not expected to clear within a
//! short retry window.
use crate::model::{CanonicalKey, FetchedLandmark, OsmType};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const TRANSPORT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum OverpassError {
    #[error("overpass request timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to reach overpass: {0}")]
    Transport(String),
    #[error("overpass returned {0}")]
    Status(StatusCode),
    #[error("failed to parse overpass response: {0}")]
    BadResponse(String),
}

/// Seam between the processing worker and the upstream service; tests swap in
/// a programmable stub.
#[async_trait]
pub trait LandmarkSource: Send + Sync {
    async fn fetch(&self, key: &CanonicalKey) -> Result<Vec<FetchedLandmark>, OverpassError>;
}

pub struct HttpOverpassClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    transport_retries: u32,
}

impl HttpOverpassClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration, transport_retries: u32) -> Self {
        let http = reqwest::Client::builder()
            .build()
            .expect("overpass http client");
        Self {
            http,
            base_url: base_url.into(),
            timeout,
            transport_retries,
        }
    }

    fn build_query(key: &CanonicalKey) -> String {
        format!(
            "[out:json];(\
             way[\"tourism\"=\"attraction\"](around:{radius},{lat:.4},{lng:.4});\
             relation[\"tourism\"=\"attraction\"](around:{radius},{lat:.4},{lng:.4});\
             );out center;",
            radius = key.radius_m,
            lat = key.key_lat,
            lng = key.key_lng,
        )
    }

    async fn execute(&self, query: &str) -> Result<String, OverpassError> {
        let url = format!("{}/interpreter", self.base_url.trim_end_matches('/'));
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .http
                .post(&url)
                .timeout(self.timeout)
                .body(query.to_string())
                .send()
                .await;
            match result {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        // Upstream saw the request; retrying in-band won't help.
                        return Err(OverpassError::Status(status));
                    }
                    return response
                        .text()
                        .await
                        .map_err(|err| OverpassError::BadResponse(err.to_string()));
                }
                Err(err) if err.is_timeout() => {
                    return Err(OverpassError::Timeout(self.timeout));
                }
                Err(err) if attempt <= self.transport_retries => {
                    warn!(
                        error = %err,
                        attempt,
                        "transient overpass transport failure; retrying"
                    );
                    sleep(TRANSPORT_RETRY_DELAY).await;
                }
                Err(err) => {
                    return Err(OverpassError::Transport(err.to_string()));
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    elements: Option<Vec<OverpassElement>>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(rename = "type")]
    kind: String,
    id: i64,
    center: Option<ElementCoordinates>,
    lat: Option<f64>,
    lon: Option<f64>,
    tags: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct ElementCoordinates {
    lat: f64,
    lon: f64,
}

fn parse_response(body: &str) -> Result<Vec<FetchedLandmark>, OverpassError> {
    let response: OverpassResponse =
        serde_json::from_str(body).map_err(|err| OverpassError::BadResponse(err.to_string()))?;
    let elements = match response.elements {
        Some(elements) => elements,
        None => {
            warn!("overpass response missing elements array");
            return Ok(Vec::new());
        }
    };

    let mut landmarks = Vec::with_capacity(elements.len());
    for element in elements {
        let Ok(osm_type) = OsmType::from_str(&element.kind.to_lowercase()) else {
            warn!(kind = %element.kind, id = element.id, "dropping element with unknown osm type");
            continue;
        };
        // Ways and relations carry a computed center; nodes carry lat/lon directly.
        let (lat, lng) = match (&element.center, element.lat, element.lon) {
            (Some(center), _, _) => (center.lat, center.lon),
            (None, Some(lat), Some(lon)) => (lat, lon),
            _ => {
                warn!(id = element.id, "dropping element without coordinates");
                continue;
            }
        };
        let mut tags = BTreeMap::new();
        let mut name = None;
        if let Some(raw_tags) = element.tags {
            for (tag_key, value) in raw_tags {
                let value = match value {
                    serde_json::Value::String(text) => text,
                    other => other.to_string(),
                };
                if tag_key == "name" {
                    name = Some(value.clone());
                }
                tags.insert(tag_key, value);
            }
        }
        landmarks.push(FetchedLandmark {
            osm_type,
            osm_id: element.id,
            name,
            lat,
            lng,
            tags,
        });
    }
    Ok(landmarks)
}

#[async_trait]
impl LandmarkSource for HttpOverpassClient {
    async fn fetch(&self, key: &CanonicalKey) -> Result<Vec<FetchedLandmark>, OverpassError> {
        let query = Self::build_query(key);
        debug!(key = %key, "executing overpass query");
        let body = self.execute(&query).await?;
        let landmarks = parse_response(&body)?;
        debug!(key = %key, count = landmarks.len(), "parsed overpass response");
        Ok(landmarks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::canonicalize;
    use httptest::matchers::request;
    use httptest::responders::{json_encoded, status_code};
    use httptest::{Expectation, Server};
    use serde_json::json;

    fn key() -> CanonicalKey {
        canonicalize(48.8584123, 2.2944812, 500).expect("canonical")
    }

    fn client_for(server: &Server) -> HttpOverpassClient {
        HttpOverpassClient::new(server.url_str(""), Duration::from_secs(5), 0)
    }

    #[test]
    fn query_embeds_radius_and_canonical_coordinates() {
        let query = HttpOverpassClient::build_query(&key());
        assert!(query.contains("way[\"tourism\"=\"attraction\"](around:500,48.8584,2.2945)"));
        assert!(query.contains("relation[\"tourism\"=\"attraction\"](around:500,48.8584,2.2945)"));
        assert!(query.ends_with("out center;"));
    }

    #[tokio::test]
    async fn parses_ways_relations_and_nodes() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/interpreter")).respond_with(
                json_encoded(json!({
                    "elements": [
                        {
                            "type": "way",
                            "id": 5013364,
                            "center": {"lat": 48.8584, "lon": 2.2945},
                            "tags": {"name": "Eiffel Tower", "tourism": "attraction"}
                        },
                        {
                            "type": "node",
                            "id": 42,
                            "lat": 48.8585,
                            "lon": 2.2946,
                            "tags": {"tourism": "attraction", "layer": 2}
                        },
                        {
                            "type": "area",
                            "id": 7,
                            "center": {"lat": 1.0, "lon": 1.0}
                        }
                    ]
                })),
            ),
        );

        let landmarks = client_for(&server).fetch(&key()).await.expect("fetch");
        assert_eq!(landmarks.len(), 2);

        assert_eq!(landmarks[0].osm_type, OsmType::Way);
        assert_eq!(landmarks[0].osm_id, 5013364);
        assert_eq!(landmarks[0].name.as_deref(), Some("Eiffel Tower"));
        assert_eq!(landmarks[0].lat, 48.8584);
        assert_eq!(landmarks[0].tags["tourism"], "attraction");

        // Node falls back to element-level coordinates; non-string tag values
        // are stringified.
        assert_eq!(landmarks[1].osm_type, OsmType::Node);
        assert!(landmarks[1].name.is_none());
        assert_eq!(landmarks[1].lat, 48.8585);
        assert_eq!(landmarks[1].tags["layer"], "2");
    }

    #[tokio::test]
    async fn missing_elements_is_an_empty_result() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/interpreter"))
                .respond_with(json_encoded(json!({"version": 0.6}))),
        );
        let landmarks = client_for(&server).fetch(&key()).await.expect("fetch");
        assert!(landmarks.is_empty());
    }

    #[tokio::test]
    async fn http_error_status_is_not_retried() {
        let server = Server::run();
        // `times(1)` would fail the test on a retry.
        server.expect(
            Expectation::matching(request::method_path("POST", "/interpreter"))
                .times(1)
                .respond_with(status_code(504)),
        );
        let client = HttpOverpassClient::new(server.url_str(""), Duration::from_secs(5), 2);
        let err = client.fetch(&key()).await.expect_err("status error");
        assert!(matches!(
            err,
            OverpassError::Status(StatusCode::GATEWAY_TIMEOUT)
        ));
    }

    #[tokio::test]
    async fn malformed_body_is_a_bad_response() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/interpreter"))
                .respond_with(status_code(200).body("not json")),
        );
        let err = client_for(&server).fetch(&key()).await.expect_err("parse error");
        assert!(matches!(err, OverpassError::BadResponse(_)));
    }

    #[tokio::test]
    async fn connection_failure_retries_then_surfaces_transport_error() {
        // Bind a listener, learn its port, and drop it so connections are refused.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let client =
            HttpOverpassClient::new(format!("http://{addr}"), Duration::from_secs(5), 1);
        let started = std::time::Instant::now();
        let err = client.fetch(&key()).await.expect_err("transport error");
        assert!(matches!(err, OverpassError::Transport(_)));
        // One retry means at least one fixed delay elapsed.
        assert!(started.elapsed() >= TRANSPORT_RETRY_DELAY);
    }
}
