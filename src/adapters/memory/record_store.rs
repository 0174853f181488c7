//! In-process record store.
//!
//! Used by tests and `--ephemeral` runs. Shared between several engine
//! instances it behaves like a single store seen by several processes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::record::kind_from_schema_id;
use crate::domain::models::{NewRecord, Record, RecordQuery, RecordUpdate};
use crate::domain::ports::RecordStore;

/// One accepted write, kept for inspection in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteJournalEntry {
    pub record_id: String,
    pub kind: String,
    pub message: String,
    pub skip_validation: bool,
}

#[derive(Default)]
pub struct InMemoryRecordStore {
    records: RwLock<BTreeMap<String, Record>>,
    journal: RwLock<Vec<WriteJournalEntry>>,
    fail_writes: AtomicBool,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent create/update fail with a store error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    /// Writes accepted so far, oldest first.
    pub async fn journal(&self) -> Vec<WriteJournalEntry> {
        self.journal.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn check_writable(&self, record_id: &str) -> DomainResult<()> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(DomainError::Store(format!(
                "write rejected for {record_id}: store unavailable"
            )));
        }
        Ok(())
    }

    async fn journal_write(&self, record: &Record, message: &str, skip_validation: bool) {
        self.journal.write().await.push(WriteJournalEntry {
            record_id: record.record_id.clone(),
            kind: record.kind.clone(),
            message: message.to_string(),
            skip_validation,
        });
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get(&self, record_id: &str) -> DomainResult<Option<Record>> {
        Ok(self.records.read().await.get(record_id).cloned())
    }

    async fn create(&self, new: NewRecord) -> DomainResult<Record> {
        self.check_writable(&new.record_id)?;

        let mut records = self.records.write().await;
        if records.contains_key(&new.record_id) {
            return Err(DomainError::CreateFailed {
                entity: kind_from_schema_id(&new.schema_id),
                id: new.record_id,
                reason: "record already exists".to_string(),
            });
        }

        let now = Utc::now();
        let record = Record {
            kind: kind_from_schema_id(&new.schema_id),
            record_id: new.record_id.clone(),
            schema_id: new.schema_id,
            payload: new.payload,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        records.insert(new.record_id, record.clone());
        drop(records);

        self.journal_write(&record, &new.message, new.skip_validation).await;
        Ok(record)
    }

    async fn update(&self, update: RecordUpdate) -> DomainResult<Record> {
        self.check_writable(&update.record_id)?;

        let mut records = self.records.write().await;
        let Some(existing) = records.get_mut(&update.record_id) else {
            return Err(DomainError::UpdateFailed {
                entity: kind_from_schema_id(&update.schema_id),
                id: update.record_id,
                reason: "record does not exist".to_string(),
            });
        };

        if let Some(expected) = update.expected_version {
            if existing.version != expected {
                return Err(DomainError::Conflict {
                    id: update.record_id,
                    expected,
                    actual: existing.version,
                });
            }
        }

        existing.payload = update.payload;
        existing.schema_id = update.schema_id;
        existing.version += 1;
        existing.updated_at = Utc::now();
        let record = existing.clone();
        drop(records);

        self.journal_write(&record, &update.message, update.skip_validation)
            .await;
        Ok(record)
    }

    async fn list(&self, query: RecordQuery) -> DomainResult<Vec<Record>> {
        let records = self.records.read().await;
        let mut matching: Vec<Record> = records
            .values()
            .filter(|r| r.kind == query.kind)
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.record_id.cmp(&b.record_id))
        });
        if let Some(limit) = query.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::RecordKind;
    use serde_json::json;

    fn new_record(id: &str) -> NewRecord {
        NewRecord {
            record_id: id.to_string(),
            schema_id: RecordKind::ExecutionRun.schema_id(),
            payload: json!({"id": id}),
            message: "create".to_string(),
            skip_validation: false,
        }
    }

    #[tokio::test]
    async fn test_create_get_and_duplicate() {
        let store = InMemoryRecordStore::new();
        let created = store.create(new_record("EXR-1")).await.unwrap();
        assert_eq!(created.version, 1);
        assert_eq!(created.kind, "execution-run");

        let fetched = store.get("EXR-1").await.unwrap().unwrap();
        assert_eq!(fetched.payload["id"], "EXR-1");

        let dup = store.create(new_record("EXR-1")).await;
        assert!(matches!(dup, Err(DomainError::CreateFailed { .. })));
    }

    #[tokio::test]
    async fn test_optimistic_concurrency() {
        let store = InMemoryRecordStore::new();
        store.create(new_record("EXR-1")).await.unwrap();

        let update = |expected| RecordUpdate {
            record_id: "EXR-1".into(),
            schema_id: RecordKind::ExecutionRun.schema_id(),
            payload: json!({"id": "EXR-1", "n": 2}),
            message: "update".into(),
            skip_validation: false,
            expected_version: expected,
        };

        let updated = store.update(update(Some(1))).await.unwrap();
        assert_eq!(updated.version, 2);

        let stale = store.update(update(Some(1))).await;
        assert!(matches!(
            stale,
            Err(DomainError::Conflict { expected: 1, actual: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_list_by_kind_with_limit() {
        let store = InMemoryRecordStore::new();
        for id in ["EXR-1", "EXR-2", "EXR-3"] {
            store.create(new_record(id)).await.unwrap();
        }
        let mut other = new_record("INC-1");
        other.schema_id = RecordKind::ExecutionIncident.schema_id();
        store.create(other).await.unwrap();

        let runs = store
            .list(RecordQuery::kind(RecordKind::ExecutionRun).with_limit(2))
            .await
            .unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.kind == "execution-run"));
    }

    #[tokio::test]
    async fn test_fail_writes() {
        let store = InMemoryRecordStore::new();
        store.set_fail_writes(true);
        assert!(matches!(
            store.create(new_record("EXR-1")).await,
            Err(DomainError::Store(_))
        ));
        store.set_fail_writes(false);
        assert!(store.create(new_record("EXR-1")).await.is_ok());
        assert_eq!(store.journal().await.len(), 1);
    }
}
