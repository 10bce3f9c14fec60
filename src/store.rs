//! Record persistence.
//!
//! [`RecordStore`] is the upsert-by-key interface the pipeline writes
//! through. Every write to an existing key bumps its `version`; when the
//! row being replaced carried errors, they are moved into
//! `errors_archive` under `v{version}` so that earlier failures stay
//! visible after a successful retry.
//!
//! - **[`SqliteRecordStore`]** — the `records` table (see [`crate::migrate`]).
//! - **[`InMemoryRecordStore`]** — same semantics behind a `RwLock`, for tests.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::models::{Record, StoredRecord};

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or overwrite the record under `record.key`.
    async fn upsert(&self, record: &Record) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<StoredRecord>>;
}

// ============ SQLite ============

pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn upsert(&self, record: &Record) -> Result<()> {
        let record_json = serde_json::to_string(record)?;
        let errors_json = serde_json::to_string(&record.errors)?;
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO records (key, source_path, parent_path, file_name, file_type, size_bytes,
                content_hash, extraction_status, summary_status, marking, record_json, errors_json,
                errors_archive, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, '{}', 1, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                source_path = excluded.source_path,
                parent_path = excluded.parent_path,
                file_name = excluded.file_name,
                file_type = excluded.file_type,
                size_bytes = excluded.size_bytes,
                content_hash = excluded.content_hash,
                extraction_status = excluded.extraction_status,
                summary_status = excluded.summary_status,
                marking = excluded.marking,
                record_json = excluded.record_json,
                errors_archive = CASE
                    WHEN records.errors_json != '{}'
                    THEN json_set(records.errors_archive, '$.v' || records.version, json(records.errors_json))
                    ELSE records.errors_archive
                END,
                errors_json = excluded.errors_json,
                version = records.version + 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.key)
        .bind(&record.source_path)
        .bind(&record.parent_path)
        .bind(&record.file_name)
        .bind(record.file_type.as_str())
        .bind(record.size_bytes as i64)
        .bind(&record.content_hash)
        .bind(record.extraction_status.as_str())
        .bind(record.summary_status.as_str())
        .bind(record.marking.as_ref().map(|m| m.marking.clone()))
        .bind(&record_json)
        .bind(&errors_json)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upsert of record {} failed", record.key))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredRecord>> {
        let row = sqlx::query(
            "SELECT record_json, errors_archive, version, created_at, updated_at FROM records WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let record_json: String = row.get("record_json");
        let archive_json: String = row.get("errors_archive");
        let record: Record = serde_json::from_str(&record_json)
            .with_context(|| format!("record {} holds invalid JSON", key))?;

        Ok(Some(StoredRecord {
            record,
            version: row.get("version"),
            created_at: ts_to_utc(row.get("created_at")),
            updated_at: ts_to_utc(row.get("updated_at")),
            errors_archive: serde_json::from_str(&archive_json)
                .unwrap_or_else(|_| serde_json::json!({})),
        }))
    }
}

fn ts_to_utc(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

// ============ In-memory ============

/// In-memory store for tests.
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<String, StoredRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every stored record, sorted by source path.
    pub fn all(&self) -> Vec<StoredRecord> {
        let mut all: Vec<StoredRecord> = self
            .records
            .read()
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by(|a, b| a.record.source_path.cmp(&b.record.source_path));
        all
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn upsert(&self, record: &Record) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| anyhow::anyhow!("record store lock poisoned"))?;
        let now = Utc::now();
        match records.get_mut(&record.key) {
            Some(existing) => {
                if !existing.record.errors.is_empty() {
                    let archived = serde_json::to_value(&existing.record.errors)?;
                    if let Some(map) = existing.errors_archive.as_object_mut() {
                        map.insert(format!("v{}", existing.version), archived);
                    }
                }
                existing.record = record.clone();
                existing.version += 1;
                existing.updated_at = now;
            }
            None => {
                records.insert(
                    record.key.clone(),
                    StoredRecord {
                        record: record.clone(),
                        version: 1,
                        created_at: now,
                        updated_at: now,
                        errors_archive: serde_json::json!({}),
                    },
                );
            }
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow::anyhow!("record store lock poisoned"))?;
        Ok(records.get(key).cloned())
    }
}
