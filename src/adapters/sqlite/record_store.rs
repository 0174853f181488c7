//! SQLite adapter for the record store port.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use sqlx::SqlitePool;

use crate::adapters::sqlite::parse_datetime;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::record::kind_from_schema_id;
use crate::domain::models::{NewRecord, Record, RecordQuery, RecordUpdate};
use crate::domain::ports::RecordStore;

#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, record_id: &str) -> DomainResult<Option<Record>> {
        let row: Option<RecordRow> = sqlx::query_as(
            "SELECT record_id, schema_id, kind, payload, version, created_at, updated_at
             FROM records WHERE record_id = ?",
        )
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_record).transpose()
    }

    async fn append_history(
        &self,
        record_id: &str,
        version: i64,
        message: &str,
        skip_validation: bool,
        written_at: &str,
    ) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO record_history (record_id, version, message, skip_validation, written_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record_id)
        .bind(version)
        .bind(message)
        .bind(skip_validation)
        .bind(written_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    record_id: String,
    schema_id: String,
    kind: String,
    payload: String,
    version: i64,
    created_at: String,
    updated_at: String,
}

fn row_to_record(row: RecordRow) -> DomainResult<Record> {
    Ok(Record {
        payload: serde_json::from_str(&row.payload)?,
        record_id: row.record_id,
        schema_id: row.schema_id,
        kind: row.kind,
        version: row.version,
        created_at: parse_datetime(&row.created_at)?,
        updated_at: parse_datetime(&row.updated_at)?,
    })
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get(&self, record_id: &str) -> DomainResult<Option<Record>> {
        self.fetch(record_id).await
    }

    async fn create(&self, new: NewRecord) -> DomainResult<Record> {
        let kind = kind_from_schema_id(&new.schema_id);
        let payload = serde_json::to_string(&new.payload)?;
        let now = timestamp();

        let result = sqlx::query(
            "INSERT INTO records
             (record_id, schema_id, kind, payload, version, message, skip_validation, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7, ?7)
             ON CONFLICT(record_id) DO NOTHING",
        )
        .bind(&new.record_id)
        .bind(&new.schema_id)
        .bind(&kind)
        .bind(&payload)
        .bind(&new.message)
        .bind(new.skip_validation)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::CreateFailed {
                entity: kind,
                id: new.record_id,
                reason: "record already exists".to_string(),
            });
        }

        self.append_history(&new.record_id, 1, &new.message, new.skip_validation, &now)
            .await?;

        self.fetch(&new.record_id).await?.ok_or(DomainError::CreateFailed {
            entity: kind,
            id: new.record_id,
            reason: "record vanished after insert".to_string(),
        })
    }

    async fn update(&self, update: RecordUpdate) -> DomainResult<Record> {
        let payload = serde_json::to_string(&update.payload)?;
        let now = timestamp();

        // Single statement so the version check and the write are atomic.
        let result = sqlx::query(
            "UPDATE records
             SET payload = ?2, schema_id = ?3, kind = ?4, message = ?5, skip_validation = ?6,
                 version = version + 1, updated_at = ?7
             WHERE record_id = ?1 AND (?8 IS NULL OR version = ?8)",
        )
        .bind(&update.record_id)
        .bind(&payload)
        .bind(&update.schema_id)
        .bind(kind_from_schema_id(&update.schema_id))
        .bind(&update.message)
        .bind(update.skip_validation)
        .bind(&now)
        .bind(update.expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match (self.fetch(&update.record_id).await?, update.expected_version) {
                (Some(existing), Some(expected)) => Err(DomainError::Conflict {
                    id: update.record_id,
                    expected,
                    actual: existing.version,
                }),
                _ => Err(DomainError::UpdateFailed {
                    entity: kind_from_schema_id(&update.schema_id),
                    id: update.record_id,
                    reason: "record does not exist".to_string(),
                }),
            };
        }

        let record = self.fetch(&update.record_id).await?.ok_or_else(|| {
            DomainError::UpdateFailed {
                entity: kind_from_schema_id(&update.schema_id),
                id: update.record_id.clone(),
                reason: "record vanished after update".to_string(),
            }
        })?;
        self.append_history(
            &record.record_id,
            record.version,
            &update.message,
            update.skip_validation,
            &now,
        )
        .await?;
        Ok(record)
    }

    async fn list(&self, query: RecordQuery) -> DomainResult<Vec<Record>> {
        let limit = query
            .limit
            .map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));

        let rows: Vec<RecordRow> = sqlx::query_as(
            "SELECT record_id, schema_id, kind, payload, version, created_at, updated_at
             FROM records WHERE kind = ? ORDER BY created_at, record_id LIMIT ?",
        )
        .bind(&query.kind)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_record).collect()
    }
}
