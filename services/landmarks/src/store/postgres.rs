//! Postgres-backed implementation of the landmark store.
//!
//! # What this module is
//! Implements [`LandmarkStore`] using Postgres (via `sqlx`) as the durable
//! source of truth for request records, landmark rows, and the request ↔
//! landmark association table. The hot cache converges on this store; on any
//! cache miss or eviction the data here is what readers fall back to.
//!
//! # Data model
//! - `request_record`: one row per submitted canonical key, soft-deleted on
//!   refresh. The partial unique index on `(key_lat, key_lng, radius_m) WHERE
//!   deleted_at IS NULL` is the serialization point for racing submitters:
//!   exactly one PENDING insert per key wins, the loser sees a unique
//!   violation and adopts the winner's row.
//! - `landmark_record`: one row per live `(osm_type, osm_id)`; the partial
//!   unique index enforces the global identity.
//! - `request_landmark`: join table associating one physical landmark row
//!   with any number of requests.
//!
//! # Consistency / atomicity
//! The compound operations each run inside one transaction:
//! - refresh + PENDING insert (`create_pending_request`) so the index frees
//!   and re-binds the key atomically;
//! - landmark upsert + linking + status transition (`record_fetch_result`,
//!   `attach_landmarks`) so a request is never FOUND without its landmarks.
//!
//! # Operational notes
//! - Migrations run at startup via `sqlx::migrate!("./migrations")`; if they
//!   fail we fail startup rather than serving against an unknown schema.
//! - Pool acquire timeouts are explicit because hanging forever on an
//!   unhealthy database is unacceptable for the ingest path.
use super::{LandmarkStore, StoreError, StoreResult, truncate_error_message};
use crate::config::PostgresConfig;
use crate::model::{
    CanonicalKey, FetchedLandmark, LandmarkRecord, OsmType, RequestRecord, RequestStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgConnection, PgPool};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Durable store backed by Postgres.
///
/// Safe to share across request handlers and workers; `sqlx` leases pooled
/// connections per statement or transaction.
pub struct PostgresStore {
    pool: PgPool,
}

/// Row shape for `request_record`, mapped separately from the domain type so
/// schema details (text status, i32 radius) stay localized here.
#[derive(Debug, Clone, FromRow)]
struct DbRequest {
    id: Uuid,
    key_lat: f64,
    key_lng: f64,
    radius_m: i32,
    status: String,
    error_message: Option<String>,
    requested_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl DbRequest {
    fn into_domain(self) -> StoreResult<RequestRecord> {
        let status = RequestStatus::from_str(&self.status)
            .map_err(|message| StoreError::Unexpected(anyhow::anyhow!(message)))?;
        Ok(RequestRecord {
            id: self.id,
            key_lat: self.key_lat,
            key_lng: self.key_lng,
            radius_m: self.radius_m as u32,
            status,
            error_message: self.error_message,
            requested_at: self.requested_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

/// Row shape for `landmark_record`; `tags` arrives as JSONB.
#[derive(Debug, Clone, FromRow)]
struct DbLandmark {
    id: Uuid,
    osm_type: String,
    osm_id: i64,
    name: Option<String>,
    lat: f64,
    lng: f64,
    tags: serde_json::Value,
    created_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl DbLandmark {
    fn into_domain(self) -> StoreResult<LandmarkRecord> {
        let osm_type = OsmType::from_str(&self.osm_type)
            .map_err(|message| StoreError::Unexpected(anyhow::anyhow!(message)))?;
        let tags: BTreeMap<String, String> = serde_json::from_value(self.tags)
            .map_err(|err| StoreError::Unexpected(err.into()))?;
        Ok(LandmarkRecord {
            id: self.id,
            osm_type,
            osm_id: self.osm_id,
            name: self.name,
            lat: self.lat,
            lng: self.lng,
            tags,
            created_at: self.created_at,
            deleted_at: self.deleted_at,
        })
    }
}

const REQUEST_COLUMNS: &str =
    "id, key_lat, key_lng, radius_m, status, error_message, requested_at, updated_at, deleted_at";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

fn unexpected(err: sqlx::Error) -> StoreError {
    StoreError::Unexpected(err.into())
}

impl PostgresStore {
    /// Connect, apply pool limits, and run migrations before serving.
    pub async fn connect(pg: &PostgresConfig) -> StoreResult<Self> {
        let connect_options =
            PgConnectOptions::from_str(&pg.url).map_err(|err| StoreError::Unexpected(err.into()))?;
        let pool = PgPoolOptions::new()
            .max_connections(pg.max_connections)
            .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
            .connect_with(connect_options)
            .await
            .map_err(unexpected)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|err| StoreError::Unexpected(err.into()))?;

        Ok(Self { pool })
    }

    async fn fetch_request(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> StoreResult<Option<RequestRecord>> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM request_record WHERE id = $1 AND deleted_at IS NULL"
        );
        let row = sqlx::query_as::<_, DbRequest>(&sql)
            .bind(id)
            .fetch_optional(conn)
            .await
            .map_err(unexpected)?;
        row.map(DbRequest::into_domain).transpose()
    }

    async fn fetch_landmarks(
        conn: &mut PgConnection,
        request_id: Uuid,
    ) -> StoreResult<Vec<LandmarkRecord>> {
        let rows = sqlx::query_as::<_, DbLandmark>(
            r#"SELECT l.id, l.osm_type, l.osm_id, l.name, l.lat, l.lng, l.tags, l.created_at, l.deleted_at
               FROM landmark_record l
               JOIN request_landmark rl ON rl.landmark_id = l.id
               WHERE rl.request_id = $1 AND l.deleted_at IS NULL
               ORDER BY l.created_at, l.id"#,
        )
        .bind(request_id)
        .fetch_all(conn)
        .await
        .map_err(unexpected)?;
        rows.into_iter().map(DbLandmark::into_domain).collect()
    }

    async fn set_status(
        conn: &mut PgConnection,
        id: Uuid,
        status: RequestStatus,
        error_message: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<RequestRecord> {
        let sql = format!(
            "UPDATE request_record SET status = $2, error_message = $3, updated_at = $4
             WHERE id = $1 AND deleted_at IS NULL
             RETURNING {REQUEST_COLUMNS}"
        );
        let row = sqlx::query_as::<_, DbRequest>(&sql)
            .bind(id)
            .bind(status.as_str())
            .bind(error_message.map(truncate_error_message))
            .bind(now)
            .fetch_optional(conn)
            .await
            .map_err(unexpected)?;
        row.map(DbRequest::into_domain)
            .transpose()?
            .ok_or_else(|| StoreError::NotFound("request".into()))
    }

    /// Resolve a fetched landmark to a live row id, inserting when no live row
    /// carries its `(osm_type, osm_id)`. The `ON CONFLICT DO NOTHING` +
    /// re-select handles a concurrent writer racing on the same identity.
    async fn upsert_landmark_row(
        conn: &mut PgConnection,
        item: &FetchedLandmark,
        now: DateTime<Utc>,
    ) -> StoreResult<Uuid> {
        let existing = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM landmark_record
             WHERE osm_type = $1 AND osm_id = $2 AND deleted_at IS NULL",
        )
        .bind(item.osm_type.as_str())
        .bind(item.osm_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(unexpected)?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let tags = serde_json::to_value(&item.tags)
            .map_err(|err| StoreError::Unexpected(err.into()))?;
        sqlx::query(
            r#"INSERT INTO landmark_record (id, osm_type, osm_id, name, lat, lng, tags, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               ON CONFLICT (osm_type, osm_id) WHERE deleted_at IS NULL DO NOTHING"#,
        )
        .bind(Uuid::new_v4())
        .bind(item.osm_type.as_str())
        .bind(item.osm_id)
        .bind(item.name.as_deref())
        .bind(item.lat)
        .bind(item.lng)
        .bind(tags)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(unexpected)?;

        sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM landmark_record
             WHERE osm_type = $1 AND osm_id = $2 AND deleted_at IS NULL",
        )
        .bind(item.osm_type.as_str())
        .bind(item.osm_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| StoreError::NotFound("landmark".into()))
    }

    async fn link_landmark(
        conn: &mut PgConnection,
        request_id: Uuid,
        landmark_id: Uuid,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO request_landmark (request_id, landmark_id)
             VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(request_id)
        .bind(landmark_id)
        .execute(conn)
        .await
        .map_err(unexpected)?;
        Ok(())
    }
}

#[async_trait]
impl LandmarkStore for PostgresStore {
    async fn find_live_request_by_key(
        &self,
        key: &CanonicalKey,
    ) -> StoreResult<Option<RequestRecord>> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM request_record
             WHERE key_lat = $1 AND key_lng = $2 AND radius_m = $3 AND deleted_at IS NULL"
        );
        let row = sqlx::query_as::<_, DbRequest>(&sql)
            .bind(key.key_lat)
            .bind(key.key_lng)
            .bind(key.radius_m as i32)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;
        row.map(DbRequest::into_domain).transpose()
    }

    async fn find_request_by_id(&self, id: Uuid) -> StoreResult<Option<RequestRecord>> {
        let mut conn = self.pool.acquire().await.map_err(unexpected)?;
        Self::fetch_request(&mut conn, id).await
    }

    async fn create_pending_request(
        &self,
        key: &CanonicalKey,
        refresh: Option<Uuid>,
    ) -> StoreResult<RequestRecord> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let now = Utc::now();

        if let Some(old_id) = refresh {
            // Retire the expired predecessor and its landmarks so the partial
            // unique index admits the new PENDING row.
            sqlx::query(
                "UPDATE landmark_record SET deleted_at = $2
                 WHERE deleted_at IS NULL
                   AND id IN (SELECT landmark_id FROM request_landmark WHERE request_id = $1)",
            )
            .bind(old_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

            sqlx::query(
                "UPDATE request_record SET deleted_at = $2, updated_at = $2
                 WHERE id = $1 AND deleted_at IS NULL",
            )
            .bind(old_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        }

        let record = RequestRecord::new_pending(key, now);
        let insert = sqlx::query(
            r#"INSERT INTO request_record
               (id, key_lat, key_lng, radius_m, status, requested_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(record.id)
        .bind(record.key_lat)
        .bind(record.key_lng)
        .bind(record.radius_m as i32)
        .bind(record.status.as_str())
        .bind(record.requested_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await;
        if let Err(err) = insert {
            if is_unique_violation(&err) {
                // Dropping the transaction rolls back the refresh as well; the
                // racing winner keeps the key.
                return Err(StoreError::Conflict("request exists for key".into()));
            }
            return Err(unexpected(err));
        }

        tx.commit().await.map_err(unexpected)?;
        Ok(record)
    }

    async fn update_request_status(
        &self,
        id: Uuid,
        status: RequestStatus,
        error_message: Option<String>,
    ) -> StoreResult<RequestRecord> {
        let mut conn = self.pool.acquire().await.map_err(unexpected)?;
        Self::set_status(&mut conn, id, status, error_message, Utc::now()).await
    }

    async fn soft_delete_request(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE request_record SET deleted_at = $2, updated_at = $2
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("request".into()));
        }
        Ok(())
    }

    async fn soft_delete_landmark(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE landmark_record SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("landmark".into()));
        }
        Ok(())
    }

    async fn landmarks_for_request(&self, request_id: Uuid) -> StoreResult<Vec<LandmarkRecord>> {
        let mut conn = self.pool.acquire().await.map_err(unexpected)?;
        Self::fetch_landmarks(&mut conn, request_id).await
    }

    async fn find_live_landmark_by_osm(
        &self,
        osm_type: OsmType,
        osm_id: i64,
    ) -> StoreResult<Option<LandmarkRecord>> {
        let row = sqlx::query_as::<_, DbLandmark>(
            "SELECT id, osm_type, osm_id, name, lat, lng, tags, created_at, deleted_at
             FROM landmark_record
             WHERE osm_type = $1 AND osm_id = $2 AND deleted_at IS NULL",
        )
        .bind(osm_type.as_str())
        .bind(osm_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        row.map(DbLandmark::into_domain).transpose()
    }

    async fn record_fetch_result(
        &self,
        request_id: Uuid,
        fetched: Vec<FetchedLandmark>,
    ) -> StoreResult<(RequestRecord, Vec<LandmarkRecord>)> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let now = Utc::now();

        if Self::fetch_request(&mut *tx, request_id).await?.is_none() {
            return Err(StoreError::NotFound("request".into()));
        }

        let status = if fetched.is_empty() {
            RequestStatus::Empty
        } else {
            RequestStatus::Found
        };
        for item in &fetched {
            let landmark_id = Self::upsert_landmark_row(&mut *tx, item, now).await?;
            Self::link_landmark(&mut *tx, request_id, landmark_id).await?;
        }
        let record = Self::set_status(&mut *tx, request_id, status, None, now).await?;
        let landmarks = Self::fetch_landmarks(&mut *tx, request_id).await?;

        tx.commit().await.map_err(unexpected)?;
        Ok((record, landmarks))
    }

    async fn attach_landmarks(
        &self,
        request_id: Uuid,
        landmark_ids: &[Uuid],
    ) -> StoreResult<RequestRecord> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let now = Utc::now();
        for &landmark_id in landmark_ids {
            Self::link_landmark(&mut *tx, request_id, landmark_id).await?;
        }
        let record = Self::set_status(&mut *tx, request_id, RequestStatus::Found, None, now).await?;
        tx.commit().await.map_err(unexpected)?;
        Ok(record)
    }

    async fn pending_requests_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<RequestRecord>> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM request_record
             WHERE status = 'PENDING' AND deleted_at IS NULL AND requested_at < $1
             ORDER BY requested_at"
        );
        let rows = sqlx::query_as::<_, DbRequest>(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        rows.into_iter().map(DbRequest::into_domain).collect()
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
