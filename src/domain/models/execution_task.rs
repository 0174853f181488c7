//! Execution task domain model.
//!
//! Tasks are units of remote work pulled by out-of-process executors. All
//! progress reports carry a per-task sequence number; only strictly
//! increasing sequences are applied.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::execution_run::RunStatus;
use super::record::{RecordEntity, RecordKind};

/// Default wire contract version for tasks.
pub const TASK_CONTRACT_VERSION: &str = "execution-task/v1";

/// Status of an execution task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Claimed,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Claimed => "claimed",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "claimed" => Some(Self::Claimed),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Final status reported by an executor on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    Completed,
    Failed,
    Canceled,
}

impl FinalStatus {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "completed" | "succeeded" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "canceled" | "cancelled" => Some(Self::Canceled),
            _ => None,
        }
    }

    pub fn task_status(&self) -> TaskStatus {
        match self {
            Self::Completed => TaskStatus::Completed,
            Self::Failed | Self::Canceled => TaskStatus::Failed,
        }
    }

    pub fn run_status(&self) -> RunStatus {
        match self {
            Self::Completed => RunStatus::Completed,
            Self::Failed => RunStatus::Failed,
            Self::Canceled => RunStatus::Canceled,
        }
    }
}

/// A unit of remote work derived from an execution run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionTask {
    pub id: String,
    pub execution_run_id: String,
    pub robot_plan_id: String,
    pub adapter_id: String,
    pub target_platform: String,
    pub status: TaskStatus,
    pub contract_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_sequence: u64,
    #[serde(default)]
    pub runtime_parameters: Value,
    #[serde(default)]
    pub artifact_refs: Vec<Value>,
    #[serde(default)]
    pub executor_id: Option<String>,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub claim_count: u32,
    #[serde(default)]
    pub progress: Option<Value>,
    #[serde(default)]
    pub failure: Option<Value>,
    #[serde(default)]
    pub external: Option<Value>,
    #[serde(default)]
    pub final_status: Option<FinalStatus>,
}

impl ExecutionTask {
    /// Whether an executor may claim this task right now.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            TaskStatus::Queued => true,
            TaskStatus::Claimed | TaskStatus::Running => {
                self.lease_expires_at.is_some_and(|expiry| expiry <= now)
            }
            TaskStatus::Completed | TaskStatus::Failed => false,
        }
    }
}

impl RecordEntity for ExecutionTask {
    const KIND: RecordKind = RecordKind::ExecutionTask;

    fn record_id(&self) -> &str {
        &self.id
    }
}

/// A log line reported by an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub message: String,
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

fn default_level() -> String {
    "info".to_string()
}

impl LogEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: default_level(),
            code: None,
            data: None,
            timestamp: Some(Utc::now()),
        }
    }
}

/// Accumulated executor logs for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentLog {
    pub id: String,
    pub task_id: String,
    pub execution_run_id: String,
    pub entries: Vec<LogEntry>,
    /// Sequence of the last report whose entries were appended.
    #[serde(default)]
    pub last_sequence: u64,
    pub updated_at: DateTime<Utc>,
}

impl InstrumentLog {
    pub fn id_for_task(task_id: &str) -> String {
        format!("LOG-{task_id}")
    }
}

impl RecordEntity for InstrumentLog {
    const KIND: RecordKind = RecordKind::InstrumentLog;
    const INTERNAL: bool = true;

    fn record_id(&self) -> &str {
        &self.id
    }
}

/// Outcome of a sequenced progress report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressAck {
    pub accepted: bool,
    pub task_id: String,
    pub last_sequence: u64,
    pub status: TaskStatus,
}
