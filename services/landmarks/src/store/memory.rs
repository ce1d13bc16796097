//! In-memory implementation of the landmark store.
//!
//! # Purpose
//! Implements [`LandmarkStore`] entirely in memory. It exists for:
//! - local development and tests (no external dependencies)
//! - deployments where durability is not required
//!
//! # Consistency
//! All state lives in one struct behind a single `tokio::sync::RwLock`, so the
//! compound operations (refresh + insert, fetch result + links + status) are
//! atomic with respect to every other operation, the same guarantee the
//! Postgres backend gets from SQL transactions.
//!
//! # Indexes
//! Two secondary maps mirror the partial-unique indexes of the durable schema:
//! `live_keys` (canonical key → live request id) and `live_osm`
//! (`(osm_type, osm_id)` → live landmark id). Soft-deleting a row removes it
//! from the index, freeing the key for a new live row.
use super::{LandmarkStore, StoreError, StoreResult, truncate_error_message};
use crate::model::{
    CanonicalKey, FetchedLandmark, LandmarkRecord, OsmType, RequestRecord, RequestStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    /// All request rows, live and soft-deleted, keyed by id.
    requests: HashMap<Uuid, RequestRecord>,
    /// Canonical key → live request id (partial-unique index twin).
    live_keys: HashMap<String, Uuid>,
    /// All landmark rows, live and soft-deleted, keyed by id.
    landmarks: HashMap<Uuid, LandmarkRecord>,
    /// `(osm_type, osm_id)` → live landmark id (partial-unique index twin).
    live_osm: HashMap<(OsmType, i64), Uuid>,
    /// Request → associated landmark ids, in insertion order.
    links: HashMap<Uuid, Vec<Uuid>>,
}

impl State {
    fn live_request(&self, id: Uuid) -> Option<&RequestRecord> {
        self.requests
            .get(&id)
            .filter(|record| record.deleted_at.is_none())
    }

    fn soft_delete_request_row(&mut self, id: Uuid, now: DateTime<Utc>) -> StoreResult<()> {
        let record = self
            .requests
            .get_mut(&id)
            .filter(|record| record.deleted_at.is_none())
            .ok_or_else(|| StoreError::NotFound("request".into()))?;
        record.deleted_at = Some(now);
        record.updated_at = now;
        let storage_key = record.key().storage_key();
        if self.live_keys.get(&storage_key) == Some(&id) {
            self.live_keys.remove(&storage_key);
        }
        Ok(())
    }

    fn soft_delete_landmark_row(&mut self, id: Uuid, now: DateTime<Utc>) -> StoreResult<()> {
        let record = self
            .landmarks
            .get_mut(&id)
            .filter(|record| record.deleted_at.is_none())
            .ok_or_else(|| StoreError::NotFound("landmark".into()))?;
        record.deleted_at = Some(now);
        let osm_key = (record.osm_type, record.osm_id);
        if self.live_osm.get(&osm_key) == Some(&id) {
            self.live_osm.remove(&osm_key);
        }
        Ok(())
    }

    fn live_landmarks_for(&self, request_id: Uuid) -> Vec<LandmarkRecord> {
        self.links
            .get(&request_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.landmarks.get(id))
                    .filter(|record| record.deleted_at.is_none())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn link(&mut self, request_id: Uuid, landmark_id: Uuid) {
        let links = self.links.entry(request_id).or_default();
        if !links.contains(&landmark_id) {
            links.push(landmark_id);
        }
    }
}

/// Non-durable store used by tests and cache-only deployments.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a record verbatim, bypassing the key index checks. Lets tests
    /// stage states (backdated rows, index anomalies) the public API refuses
    /// to produce.
    #[cfg(test)]
    pub(crate) async fn insert_request_unchecked(&self, record: RequestRecord, index_key: bool) {
        let mut state = self.inner.write().await;
        if index_key && record.deleted_at.is_none() {
            state
                .live_keys
                .insert(record.key().storage_key(), record.id);
        }
        state.requests.insert(record.id, record);
    }

    #[cfg(test)]
    pub(crate) async fn backdate_request(&self, id: Uuid, requested_at: DateTime<Utc>) {
        let mut state = self.inner.write().await;
        if let Some(record) = state.requests.get_mut(&id) {
            record.requested_at = requested_at;
        }
    }
}

#[async_trait]
impl LandmarkStore for InMemoryStore {
    async fn find_live_request_by_key(
        &self,
        key: &CanonicalKey,
    ) -> StoreResult<Option<RequestRecord>> {
        let state = self.inner.read().await;
        let id = state.live_keys.get(&key.storage_key()).copied();
        Ok(id.and_then(|id| state.live_request(id).cloned()))
    }

    async fn find_request_by_id(&self, id: Uuid) -> StoreResult<Option<RequestRecord>> {
        let state = self.inner.read().await;
        Ok(state.live_request(id).cloned())
    }

    async fn create_pending_request(
        &self,
        key: &CanonicalKey,
        refresh: Option<Uuid>,
    ) -> StoreResult<RequestRecord> {
        let mut state = self.inner.write().await;
        let now = Utc::now();
        if let Some(old_id) = refresh {
            // Refresh: retire the expired predecessor and its landmarks so the
            // key index admits the new row.
            let old_landmarks: Vec<Uuid> = state
                .live_landmarks_for(old_id)
                .iter()
                .map(|record| record.id)
                .collect();
            for landmark_id in old_landmarks {
                state.soft_delete_landmark_row(landmark_id, now)?;
            }
            state.soft_delete_request_row(old_id, now)?;
        }
        let storage_key = key.storage_key();
        if state.live_keys.contains_key(&storage_key) {
            return Err(StoreError::Conflict("request exists for key".into()));
        }
        let record = RequestRecord::new_pending(key, now);
        state.live_keys.insert(storage_key, record.id);
        state.requests.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_request_status(
        &self,
        id: Uuid,
        status: RequestStatus,
        error_message: Option<String>,
    ) -> StoreResult<RequestRecord> {
        let mut state = self.inner.write().await;
        let record = state
            .requests
            .get_mut(&id)
            .filter(|record| record.deleted_at.is_none())
            .ok_or_else(|| StoreError::NotFound("request".into()))?;
        record.status = status;
        record.error_message = error_message.map(truncate_error_message);
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn soft_delete_request(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.inner.write().await;
        state.soft_delete_request_row(id, Utc::now())
    }

    async fn soft_delete_landmark(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.inner.write().await;
        state.soft_delete_landmark_row(id, Utc::now())
    }

    async fn landmarks_for_request(&self, request_id: Uuid) -> StoreResult<Vec<LandmarkRecord>> {
        let state = self.inner.read().await;
        Ok(state.live_landmarks_for(request_id))
    }

    async fn find_live_landmark_by_osm(
        &self,
        osm_type: OsmType,
        osm_id: i64,
    ) -> StoreResult<Option<LandmarkRecord>> {
        let state = self.inner.read().await;
        let id = state.live_osm.get(&(osm_type, osm_id)).copied();
        Ok(id
            .and_then(|id| state.landmarks.get(&id))
            .filter(|record| record.deleted_at.is_none())
            .cloned())
    }

    async fn record_fetch_result(
        &self,
        request_id: Uuid,
        fetched: Vec<FetchedLandmark>,
    ) -> StoreResult<(RequestRecord, Vec<LandmarkRecord>)> {
        let mut state = self.inner.write().await;
        let now = Utc::now();
        if state.live_request(request_id).is_none() {
            return Err(StoreError::NotFound("request".into()));
        }
        let status = if fetched.is_empty() {
            RequestStatus::Empty
        } else {
            RequestStatus::Found
        };
        for item in fetched {
            // Reuse the live row with the same global OSM identity instead of
            // violating the partial-unique index.
            let landmark_id = match state.live_osm.get(&(item.osm_type, item.osm_id)) {
                Some(existing) => *existing,
                None => {
                    let record = LandmarkRecord::from_fetched(item, now);
                    let id = record.id;
                    state.live_osm.insert((record.osm_type, record.osm_id), id);
                    state.landmarks.insert(id, record);
                    id
                }
            };
            state.link(request_id, landmark_id);
        }
        let record = state
            .requests
            .get_mut(&request_id)
            .ok_or_else(|| StoreError::NotFound("request".into()))?;
        record.status = status;
        record.error_message = None;
        record.updated_at = now;
        let saved = record.clone();
        let landmarks = state.live_landmarks_for(request_id);
        Ok((saved, landmarks))
    }

    async fn attach_landmarks(
        &self,
        request_id: Uuid,
        landmark_ids: &[Uuid],
    ) -> StoreResult<RequestRecord> {
        let mut state = self.inner.write().await;
        if state.live_request(request_id).is_none() {
            return Err(StoreError::NotFound("request".into()));
        }
        for &landmark_id in landmark_ids {
            if state.landmarks.contains_key(&landmark_id) {
                state.link(request_id, landmark_id);
            }
        }
        let record = state
            .requests
            .get_mut(&request_id)
            .ok_or_else(|| StoreError::NotFound("request".into()))?;
        record.status = RequestStatus::Found;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn pending_requests_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<RequestRecord>> {
        let state = self.inner.read().await;
        Ok(state
            .requests
            .values()
            .filter(|record| {
                record.deleted_at.is_none()
                    && record.status == RequestStatus::Pending
                    && record.requested_at < cutoff
            })
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> StoreResult<()> {
        // In-memory backend is always "healthy" if the process is running.
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
