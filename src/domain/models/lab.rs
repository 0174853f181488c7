//! Lab records the engine reads or derives: robot plans, adapter health,
//! and materialized event graphs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::execution_run::ExecutionMode;
use super::record::{RecordEntity, RecordKind};

/// Compiled, device-targeted plan. Read-only for the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotPlan {
    pub id: String,
    pub target_platform: String,
    #[serde(default)]
    pub adapter_id: Option<String>,
    #[serde(default)]
    pub planned_run_id: Option<String>,
    #[serde(default)]
    pub execution_mode: Option<ExecutionMode>,
    #[serde(default)]
    pub instructions: Vec<Value>,
}

impl RobotPlan {
    /// Adapter responsible for this plan; defaults to the target platform.
    pub fn adapter(&self) -> &str {
        self.adapter_id.as_deref().unwrap_or(&self.target_platform)
    }
}

impl RecordEntity for RobotPlan {
    const KIND: RecordKind = RecordKind::RobotPlan;

    fn record_id(&self) -> &str {
        &self.id
    }
}

/// Planned-run states the engine writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannedRunState {
    Executing,
    Completed,
    Failed,
    Canceled,
}

impl PlannedRunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Down => "down",
        }
    }

    pub fn is_unhealthy(&self) -> bool {
        !matches!(self, Self::Healthy)
    }
}

/// Latest health probe result for one adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterHealth {
    pub id: String,
    pub adapter_id: String,
    pub status: HealthStatus,
    #[serde(default)]
    pub detail: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl AdapterHealth {
    pub fn id_for(adapter_id: &str) -> String {
        format!("AHL-{adapter_id}")
    }
}

impl RecordEntity for AdapterHealth {
    const KIND: RecordKind = RecordKind::AdapterHealth;

    fn record_id(&self) -> &str {
        &self.id
    }
}

/// Result event graph derived once from a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventGraph {
    pub id: String,
    pub execution_run_id: String,
    pub robot_plan_id: String,
    #[serde(default)]
    pub planned_run_id: Option<String>,
    pub events: Vec<Value>,
    pub created_at: DateTime<Utc>,
}

impl RecordEntity for EventGraph {
    const KIND: RecordKind = RecordKind::EventGraph;

    fn record_id(&self) -> &str {
        &self.id
    }
}
