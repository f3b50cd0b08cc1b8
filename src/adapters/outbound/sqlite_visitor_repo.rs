//! SQLite Visitor Repository
//!
//! Implements VisitorRepository on a single SQLite file. Event logs and
//! resolutions are stored as JSON text columns; every write is a single
//! statement or transaction run on the blocking pool.

use crate::domain::entities::{GeoResolution, VisitRecord, Visitor};
use crate::domain::ports::{RepositoryError, VisitorRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS visitors (
    key             TEXT PRIMARY KEY,
    ip              TEXT NOT NULL,
    user_agent      TEXT,
    device_type     TEXT NOT NULL,
    header_location TEXT NOT NULL,
    last_seen_ms    INTEGER NOT NULL,
    events          TEXT NOT NULL,
    geo_location    TEXT
);
CREATE INDEX IF NOT EXISTS idx_visitors_last_seen ON visitors(last_seen_ms);
";

const SELECT_COLUMNS: &str =
    "SELECT key, ip, user_agent, device_type, header_location, last_seen_ms, events, geo_location FROM visitors";

/// SQLite-backed visitor store.
///
/// The handle is opened explicitly and shared by clone; the connection
/// closes when the last clone is dropped.
#[derive(Clone)]
pub struct SqliteVisitorRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteVisitorRepository {
    /// Open (or create) the database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, RepositoryError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T, RepositoryError>
    where
        F: FnOnce(&mut Connection) -> Result<T, RepositoryError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| RepositoryError::Unavailable("connection mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| RepositoryError::Task(e.to_string()))?
    }

    fn load(conn: &Connection, key: &str) -> Result<Option<Visitor>, RepositoryError> {
        let sql = format!("{} WHERE key = ?1", SELECT_COLUMNS);
        let row = conn
            .query_row(&sql, params![key], VisitorRow::from_row)
            .optional()?;
        row.map(VisitorRow::into_visitor).transpose()
    }

    /// Write everything except `geo_location`, which only resolutions touch.
    fn store_profile(conn: &Connection, visitor: &Visitor) -> Result<(), RepositoryError> {
        conn.execute(
            "INSERT INTO visitors (key, ip, user_agent, device_type, header_location, last_seen_ms, events)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(key) DO UPDATE SET
                 ip = excluded.ip,
                 user_agent = excluded.user_agent,
                 device_type = excluded.device_type,
                 header_location = excluded.header_location,
                 last_seen_ms = excluded.last_seen_ms,
                 events = excluded.events",
            params![
                visitor.key,
                visitor.ip,
                visitor.user_agent,
                serde_json::to_string(&visitor.device_type)?,
                serde_json::to_string(&visitor.header_location)?,
                visitor.last_seen.timestamp_millis(),
                serde_json::to_string(&visitor.events)?,
            ],
        )?;
        Ok(())
    }
}

/// Raw column values, decoded outside the rusqlite row callback.
struct VisitorRow {
    key: String,
    ip: String,
    user_agent: Option<String>,
    device_type: String,
    header_location: String,
    last_seen_ms: i64,
    events: String,
    geo_location: Option<String>,
}

impl VisitorRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            ip: row.get(1)?,
            user_agent: row.get(2)?,
            device_type: row.get(3)?,
            header_location: row.get(4)?,
            last_seen_ms: row.get(5)?,
            events: row.get(6)?,
            geo_location: row.get(7)?,
        })
    }

    fn into_visitor(self) -> Result<Visitor, RepositoryError> {
        let geo_location = match self.geo_location {
            Some(json) => Some(serde_json::from_str::<GeoResolution>(&json)?),
            None => None,
        };
        Ok(Visitor {
            key: self.key,
            ip: self.ip,
            user_agent: self.user_agent,
            device_type: serde_json::from_str(&self.device_type)?,
            header_location: serde_json::from_str(&self.header_location)?,
            last_seen: DateTime::<Utc>::from_timestamp_millis(self.last_seen_ms)
                .unwrap_or_default(),
            events: serde_json::from_str(&self.events)?,
            geo_location,
        })
    }
}

#[async_trait]
impl VisitorRepository for SqliteVisitorRepository {
    async fn record_visit(&self, record: VisitRecord) -> Result<(), RepositoryError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let visitor = match Self::load(&tx, &record.key)? {
                Some(mut existing) => {
                    existing.apply(record);
                    existing
                }
                None => Visitor::from_record(record),
            };
            Self::store_profile(&tx, &visitor)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<Visitor>, RepositoryError> {
        let key = key.to_string();
        self.with_conn(move |conn| Self::load(conn, &key)).await
    }

    async fn list(&self) -> Result<Vec<Visitor>, RepositoryError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(SELECT_COLUMNS)?;
            let rows = stmt
                .query_map([], VisitorRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(VisitorRow::into_visitor).collect()
        })
        .await
    }

    async fn set_geo_location(
        &self,
        key: &str,
        ip: &str,
        resolution: &GeoResolution,
    ) -> Result<(), RepositoryError> {
        let key = key.to_string();
        let ip = ip.to_string();
        let geo = serde_json::to_string(resolution)?;

        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE visitors SET geo_location = ?2 WHERE key = ?1",
                params![key, geo],
            )?;
            if updated == 0 {
                let tx = conn.transaction()?;
                Self::store_profile(&tx, &Visitor::bare(key.as_str(), ip))?;
                tx.execute(
                    "UPDATE visitors SET geo_location = ?2 WHERE key = ?1",
                    params![key, geo],
                )?;
                tx.commit()?;
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, RepositoryError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            Ok(conn.execute("DELETE FROM visitors WHERE key = ?1", params![key])? > 0)
        })
        .await
    }

    async fn delete_all(&self) -> Result<usize, RepositoryError> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM visitors", [])?))
            .await
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::domain::entities::{
        DeviceType, EventKind, HeaderLocation, LocationCluster, ProviderOutcome, RawLocation,
        VisitEvent,
    };

    fn record(key: &str, ip: &str, user_agent: &str) -> VisitRecord {
        VisitRecord {
            key: key.to_string(),
            ip: ip.to_string(),
            user_agent: Some(user_agent.to_string()),
            header_location: HeaderLocation {
                country: Some("US".to_string()),
                region: None,
                city: Some("San Mateo".to_string()),
            },
            event: VisitEvent {
                kind: EventKind::Api,
                endpoint: Some("/api/chat".to_string()),
                method: Some("POST".to_string()),
                message: None,
                data: Some(serde_json::json!({"tokens": 42})),
                time: Utc::now(),
            },
        }
    }

    fn resolution(ip: &str) -> GeoResolution {
        let mut loc = RawLocation::new(37.774, -122.419);
        loc.city = Some("San Francisco".to_string());
        let now = Utc::now();
        GeoResolution {
            ip: ip.to_string(),
            isp: Some("Comcast".to_string()),
            organization: Some("Comcast IP Services".to_string()),
            clusters: vec![LocationCluster::seed("ip-api.com", &loc)],
            provider_outcomes: vec![
                ProviderOutcome::success("ip-api.com", now, loc),
                ProviderOutcome::timeout("ipwho.is", now, "request timed out after 7000ms"),
            ],
            resolved_at: now,
        }
    }

    // ===== Persistence Tests =====

    #[tokio::test]
    async fn test_resolution_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("visitors.db");

        {
            let repo = SqliteVisitorRepository::open(&path).unwrap();
            repo.record_visit(record("v1", "73.222.64.204", "Mozilla/5.0 (iPad)"))
                .await
                .unwrap();
            repo.set_geo_location("v1", "73.222.64.204", &resolution("73.222.64.204"))
                .await
                .unwrap();
        }

        let repo = SqliteVisitorRepository::open(&path).unwrap();
        let visitor = repo.get("v1").await.unwrap().unwrap();

        assert_eq!(visitor.device_type, DeviceType::Tablet);
        assert_eq!(visitor.header_location.city.as_deref(), Some("San Mateo"));
        assert_eq!(visitor.events.len(), 1);
        assert_eq!(visitor.events[0].data, Some(serde_json::json!({"tokens": 42})));

        let stored = visitor.geo_location.unwrap();
        assert_eq!(stored.ip, "73.222.64.204");
        assert_eq!(stored.clusters.len(), 1);
        assert_eq!(stored.clusters[0].city.as_deref(), Some("San Francisco"));
        assert_eq!(stored.provider_outcomes.len(), 2);
        assert_eq!(
            stored.provider_outcomes[1].error(),
            Some("request timed out after 7000ms")
        );
    }

    #[tokio::test]
    async fn test_record_visit_keeps_resolution() {
        let repo = SqliteVisitorRepository::open_in_memory().unwrap();
        repo.record_visit(record("v1", "8.8.8.8", "curl/8.0")).await.unwrap();
        repo.set_geo_location("v1", "8.8.8.8", &resolution("8.8.8.8"))
            .await
            .unwrap();
        repo.record_visit(record("v1", "8.8.4.4", "Mozilla/5.0 (iPhone)"))
            .await
            .unwrap();

        let visitor = repo.get("v1").await.unwrap().unwrap();
        assert_eq!(visitor.ip, "8.8.4.4");
        assert_eq!(visitor.device_type, DeviceType::Mobile);
        assert_eq!(visitor.events.len(), 2);
        assert_eq!(visitor.geo_location.unwrap().ip, "8.8.8.8");
    }

    #[tokio::test]
    async fn test_set_geo_location_creates_bare_visitor() {
        let repo = SqliteVisitorRepository::open_in_memory().unwrap();
        repo.set_geo_location("ghost", "1.1.1.1", &resolution("1.1.1.1"))
            .await
            .unwrap();

        let visitor = repo.get("ghost").await.unwrap().unwrap();
        assert_eq!(visitor.ip, "1.1.1.1");
        assert_eq!(visitor.device_type, DeviceType::Unknown);
        assert!(visitor.events.is_empty());
        assert!(visitor.geo_location.is_some());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let repo = SqliteVisitorRepository::open_in_memory().unwrap();
        repo.record_visit(record("a", "8.8.8.8", "x")).await.unwrap();
        repo.record_visit(record("b", "1.1.1.1", "x")).await.unwrap();
        repo.record_visit(record("c", "9.9.9.9", "x")).await.unwrap();

        assert_eq!(repo.list().await.unwrap().len(), 3);
        assert!(repo.delete("b").await.unwrap());
        assert!(!repo.delete("b").await.unwrap());
        assert_eq!(repo.delete_all().await.unwrap(), 2);
        assert!(repo.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_geo_column_is_serialization_error() {
        let repo = SqliteVisitorRepository::open_in_memory().unwrap();
        repo.record_visit(record("v1", "8.8.8.8", "x")).await.unwrap();
        repo.with_conn(|conn| {
            conn.execute("UPDATE visitors SET geo_location = '{oops' WHERE key = 'v1'", [])?;
            Ok(())
        })
        .await
        .unwrap();

        assert!(matches!(
            repo.get("v1").await,
            Err(RepositoryError::Serialization(_))
        ));
    }
}
