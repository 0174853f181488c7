//! Generic records exchanged with the record store.
//!
//! The store is an external collaborator that only knows about schema ids,
//! record ids and JSON payloads. Everything typed lives on top of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kinds of records the execution engine reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    RobotPlan,
    PlannedRun,
    ExecutionRun,
    ExecutionTask,
    InstrumentLog,
    WorkerLease,
    ExecutionIncident,
    AdapterHealth,
    EventGraph,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RobotPlan => "robot-plan",
            Self::PlannedRun => "planned-run",
            Self::ExecutionRun => "execution-run",
            Self::ExecutionTask => "execution-task",
            Self::InstrumentLog => "instrument-log",
            Self::WorkerLease => "worker-lease",
            Self::ExecutionIncident => "execution-incident",
            Self::AdapterHealth => "adapter-health",
            Self::EventGraph => "event-graph",
        }
    }

    /// Schema id used when writing records of this kind.
    pub fn schema_id(&self) -> String {
        format!("lab/{}.schema.json", self.as_str())
    }
}

/// Derive the record kind string from a schema id such as
/// `lab/execution-run.schema.json`.
pub fn kind_from_schema_id(schema_id: &str) -> String {
    let file = schema_id.rsplit('/').next().unwrap_or(schema_id);
    file.split('.').next().unwrap_or(file).to_string()
}

/// A stored record as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub record_id: String,
    pub schema_id: String,
    pub kind: String,
    pub payload: Value,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a record.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub record_id: String,
    pub schema_id: String,
    pub payload: Value,
    pub message: String,
    pub skip_validation: bool,
}

/// Input for replacing a record's payload.
#[derive(Debug, Clone)]
pub struct RecordUpdate {
    pub record_id: String,
    pub schema_id: String,
    pub payload: Value,
    pub message: String,
    pub skip_validation: bool,
    /// When set, the update only applies if the stored version matches.
    pub expected_version: Option<i64>,
}

/// Query for listing records of a kind.
#[derive(Debug, Clone)]
pub struct RecordQuery {
    pub kind: String,
    pub limit: Option<usize>,
}

impl RecordQuery {
    pub fn kind(kind: RecordKind) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A typed entity persisted as a record.
pub trait RecordEntity: Serialize + serde::de::DeserializeOwned + Send + Sync {
    /// Record kind for this entity.
    const KIND: RecordKind;

    /// Internal bookkeeping records are written with validation bypassed.
    const INTERNAL: bool = false;

    /// Identifier of this entity in the store.
    fn record_id(&self) -> &str;
}

/// A typed entity together with the store version it was read at.
#[derive(Debug, Clone)]
pub struct Stored<T> {
    pub entity: T,
    pub version: i64,
}

/// Generate a prefixed record identifier, e.g. `EXR-3f2a...`.
pub fn new_record_id(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", id[..16].to_uppercase())
}
