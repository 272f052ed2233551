//! Idempotent report persistence. Reports are keyed by `event_key`;
//! insertion is insert-if-absent, so a re-run over already-processed events
//! writes nothing. The SQLite `PRIMARY KEY` carries the uniqueness
//! constraint, making the insert safe even without the pre-check.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::info;

use plumewatch_common::{FacilityName, IncidentReport, NeighborFacility};

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn contains(&self, event_key: &str) -> Result<bool>;

    /// Insert if absent. Returns true when the report was written, false
    /// when the key already existed (the stored report is never touched).
    async fn insert(&self, report: &IncidentReport) -> Result<bool>;

    /// Most recent reports first.
    async fn recent(&self, limit: usize) -> Result<Vec<IncidentReport>>;
}

// --- SQLite ---

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await
            .context("Failed to open report database")?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reports (
                event_key            TEXT PRIMARY KEY,
                facility             TEXT NOT NULL,
                confidence           REAL NOT NULL,
                evidence_citation    TEXT NOT NULL,
                city_district        TEXT,
                cause                TEXT NOT NULL,
                physical_extent      TEXT NOT NULL,
                operational_impact   TEXT NOT NULL,
                emergency_response   TEXT NOT NULL,
                environmental_effect TEXT NOT NULL,
                latitude             REAL,
                longitude            REAL,
                neighbors_json       TEXT NOT NULL,
                source_urls_json     TEXT NOT NULL,
                created_at           TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create reports table")?;
        Ok(())
    }
}

#[async_trait]
impl ReportStore for SqliteStore {
    async fn contains(&self, event_key: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM reports WHERE event_key = ?")
            .bind(event_key)
            .fetch_optional(&self.pool)
            .await
            .context("Existence check failed")?;
        Ok(row.is_some())
    }

    async fn insert(&self, report: &IncidentReport) -> Result<bool> {
        let neighbors_json = serde_json::to_string(&report.neighboring_facilities)
            .context("Failed to serialize neighbors")?;
        let source_urls_json =
            serde_json::to_string(&report.source_urls).context("Failed to serialize source URLs")?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO reports (
                event_key, facility, confidence, evidence_citation, city_district,
                cause, physical_extent, operational_impact, emergency_response,
                environmental_effect, latitude, longitude, neighbors_json,
                source_urls_json, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&report.event_key)
        .bind(report.facility.as_str())
        .bind(report.confidence)
        .bind(&report.evidence_citation)
        .bind(&report.city_district)
        .bind(&report.cause)
        .bind(&report.physical_extent)
        .bind(&report.operational_impact)
        .bind(&report.emergency_response)
        .bind(&report.environmental_effect)
        .bind(report.latitude)
        .bind(report.longitude)
        .bind(&neighbors_json)
        .bind(&source_urls_json)
        .bind(report.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Report insert failed")?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            info!(event_key = report.event_key, "Report persisted");
        }
        Ok(inserted)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<IncidentReport>> {
        let rows = sqlx::query("SELECT * FROM reports ORDER BY created_at DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .context("Report listing failed")?;

        rows.iter()
            .map(|row| {
                let neighbors: Vec<NeighborFacility> =
                    serde_json::from_str(row.get::<String, _>("neighbors_json").as_str())
                        .context("Corrupt neighbors column")?;
                let source_urls: Vec<String> =
                    serde_json::from_str(row.get::<String, _>("source_urls_json").as_str())
                        .context("Corrupt source URLs column")?;
                let created_at = DateTime::parse_from_rfc3339(
                    row.get::<String, _>("created_at").as_str(),
                )
                .context("Corrupt created_at column")?
                .with_timezone(&Utc);

                Ok(IncidentReport {
                    event_key: row.get("event_key"),
                    facility: FacilityName::from(row.get::<String, _>("facility")),
                    confidence: row.get("confidence"),
                    evidence_citation: row.get("evidence_citation"),
                    city_district: row.get("city_district"),
                    cause: row.get("cause"),
                    physical_extent: row.get("physical_extent"),
                    operational_impact: row.get("operational_impact"),
                    emergency_response: row.get("emergency_response"),
                    environmental_effect: row.get("environmental_effect"),
                    latitude: row.get("latitude"),
                    longitude: row.get("longitude"),
                    neighboring_facilities: neighbors,
                    source_urls,
                    created_at,
                })
            })
            .collect()
    }
}

// --- In-memory ---

/// In-memory store with the same insert-if-absent contract. Used by tests
/// and by callers running without persistence.
#[derive(Default)]
pub struct MemoryStore {
    reports: Mutex<HashMap<String, IncidentReport>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().expect("store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn contains(&self, event_key: &str) -> Result<bool> {
        Ok(self
            .reports
            .lock()
            .expect("store lock poisoned")
            .contains_key(event_key))
    }

    async fn insert(&self, report: &IncidentReport) -> Result<bool> {
        let mut reports = self.reports.lock().expect("store lock poisoned");
        if reports.contains_key(&report.event_key) {
            return Ok(false);
        }
        reports.insert(report.event_key.clone(), report.clone());
        Ok(true)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<IncidentReport>> {
        let reports = self.reports.lock().expect("store lock poisoned");
        let mut all: Vec<IncidentReport> = reports.values().cloned().collect();
        all.sort_by_key(|r| std::cmp::Reverse(r.created_at));
        all.truncate(limit);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use plumewatch_common::NOT_STATED;

    fn report(event_key: &str, created_at: DateTime<Utc>) -> IncidentReport {
        IncidentReport {
            event_key: event_key.to_string(),
            facility: FacilityName::Named("XYZ Textile".to_string()),
            confidence: 0.8,
            evidence_citation: "the XYZ Textile plant caught fire".to_string(),
            city_district: Some("Kayseri".to_string()),
            cause: "electrical fault".to_string(),
            physical_extent: NOT_STATED.to_string(),
            operational_impact: NOT_STATED.to_string(),
            emergency_response: NOT_STATED.to_string(),
            environmental_effect: NOT_STATED.to_string(),
            latitude: Some(38.75),
            longitude: Some(35.5),
            neighboring_facilities: Vec::new(),
            source_urls: vec!["https://example.com/a".to_string()],
            created_at,
        }
    }

    #[tokio::test]
    async fn memory_insert_then_contains() {
        let store = MemoryStore::new();
        let r = report("k1", Utc::now());
        assert!(store.insert(&r).await.unwrap());
        assert!(store.contains("k1").await.unwrap());
        assert!(!store.contains("k2").await.unwrap());
    }

    #[tokio::test]
    async fn memory_insert_is_idempotent() {
        let store = MemoryStore::new();
        let first = report("k1", Utc::now());
        let mut second = report("k1", Utc::now());
        second.cause = "a different cause that must not overwrite".to_string();

        assert!(store.insert(&first).await.unwrap());
        assert!(!store.insert(&second).await.unwrap());

        let stored = store.recent(10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].cause, "electrical fault");
    }

    #[tokio::test]
    async fn memory_recent_orders_by_created_at_desc() {
        let store = MemoryStore::new();
        let old = report("old", Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap());
        let fresh = report("fresh", Utc.with_ymd_and_hms(2025, 6, 9, 0, 0, 0).unwrap());
        store.insert(&old).await.unwrap();
        store.insert(&fresh).await.unwrap();

        let listed = store.recent(10).await.unwrap();
        assert_eq!(listed[0].event_key, "fresh");
        assert_eq!(listed[1].event_key, "old");
    }

    #[tokio::test]
    async fn sqlite_roundtrip_and_idempotence() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let r = report("k1", Utc.with_ymd_and_hms(2025, 6, 9, 12, 0, 0).unwrap());

        assert!(store.insert(&r).await.unwrap());
        assert!(!store.insert(&r).await.unwrap(), "second insert is ignored");
        assert!(store.contains("k1").await.unwrap());

        let listed = store.recent(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        let stored = &listed[0];
        assert_eq!(stored.facility, FacilityName::Named("XYZ Textile".to_string()));
        assert_eq!(stored.confidence, 0.8);
        assert_eq!(stored.city_district.as_deref(), Some("Kayseri"));
        assert_eq!(stored.latitude, Some(38.75));
        assert_eq!(stored.source_urls, vec!["https://example.com/a".to_string()]);
        assert_eq!(stored.created_at, r.created_at);
    }

    #[tokio::test]
    async fn sqlite_stores_unresolved_sentinel() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let mut r = report("k2", Utc::now());
        r.facility = FacilityName::Unresolved;
        r.confidence = 0.0;
        r.evidence_citation = String::new();

        store.insert(&r).await.unwrap();
        let listed = store.recent(10).await.unwrap();
        assert_eq!(listed[0].facility, FacilityName::Unresolved);
    }
}
