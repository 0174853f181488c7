use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    NewRecord, Record, RecordEntity, RecordQuery, RecordUpdate, Stored,
};

/// Repository port for the versioned record store.
///
/// The store owns validation; callers only choose whether it is skipped.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Get a record by id
    async fn get(&self, record_id: &str) -> DomainResult<Option<Record>>;

    /// Create a new record, failing if the id already exists
    async fn create(&self, record: NewRecord) -> DomainResult<Record>;

    /// Replace a record's payload, honouring `expected_version` when set
    async fn update(&self, update: RecordUpdate) -> DomainResult<Record>;

    /// List records of a kind, oldest first
    async fn list(&self, query: RecordQuery) -> DomainResult<Vec<Record>>;
}

/// Typed access to [`RecordStore`] for [`RecordEntity`] types.
#[derive(Clone)]
pub struct EntityStore {
    inner: Arc<dyn RecordStore>,
}

impl EntityStore {
    pub fn new(inner: Arc<dyn RecordStore>) -> Self {
        Self { inner }
    }

    /// The untyped store underneath.
    pub fn raw(&self) -> &Arc<dyn RecordStore> {
        &self.inner
    }

    pub async fn get<T: RecordEntity>(&self, record_id: &str) -> DomainResult<Option<Stored<T>>> {
        let Some(record) = self.inner.get(record_id).await? else {
            return Ok(None);
        };
        let entity = serde_json::from_value(record.payload)?;
        Ok(Some(Stored {
            entity,
            version: record.version,
        }))
    }

    /// Like [`get`](Self::get) but a missing record is a not-found error.
    pub async fn require<T: RecordEntity>(
        &self,
        entity_name: &'static str,
        record_id: &str,
    ) -> DomainResult<Stored<T>> {
        self.get(record_id)
            .await?
            .ok_or_else(|| DomainError::not_found(entity_name, record_id))
    }

    pub async fn create<T: RecordEntity>(&self, entity: &T, message: &str) -> DomainResult<i64> {
        let record = self
            .inner
            .create(NewRecord {
                record_id: entity.record_id().to_string(),
                schema_id: T::KIND.schema_id(),
                payload: serde_json::to_value(entity)?,
                message: message.to_string(),
                skip_validation: T::INTERNAL,
            })
            .await?;
        Ok(record.version)
    }

    pub async fn save<T: RecordEntity>(
        &self,
        entity: &T,
        expected_version: Option<i64>,
        message: &str,
    ) -> DomainResult<i64> {
        let record = self
            .inner
            .update(RecordUpdate {
                record_id: entity.record_id().to_string(),
                schema_id: T::KIND.schema_id(),
                payload: serde_json::to_value(entity)?,
                message: message.to_string(),
                skip_validation: T::INTERNAL,
                expected_version,
            })
            .await?;
        Ok(record.version)
    }

    /// Create the record if missing, otherwise overwrite it.
    pub async fn upsert<T: RecordEntity>(&self, entity: &T, message: &str) -> DomainResult<i64> {
        if self.inner.get(entity.record_id()).await?.is_some() {
            self.save(entity, None, message).await
        } else {
            self.create(entity, message).await
        }
    }

    /// List all entities of `T`'s kind. Records that fail to decode are
    /// skipped so one malformed record cannot stall a scan.
    pub async fn list<T: RecordEntity>(&self, limit: Option<usize>) -> DomainResult<Vec<T>> {
        let mut query = RecordQuery::kind(T::KIND);
        query.limit = limit;
        let records = self.inner.list(query).await?;

        let mut entities = Vec::with_capacity(records.len());
        for record in records {
            match serde_json::from_value::<T>(record.payload) {
                Ok(entity) => entities.push(entity),
                Err(e) => warn!(
                    record_id = %record.record_id,
                    kind = T::KIND.as_str(),
                    error = %e,
                    "skipping undecodable record"
                ),
            }
        }
        Ok(entities)
    }
}
