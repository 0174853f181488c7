//! Execution run domain model.
//!
//! An execution run is one attempt to execute a robot plan. Retries form a
//! chain through `parent_execution_run_ref`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::failure::{FailureClass, FailureClassification};
use super::record::{RecordEntity, RecordKind};

/// Lifecycle status of an execution run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "running" => Some(Self::Running),
            "completed" | "succeeded" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "canceled" | "cancelled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Execution backend discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Spawned bridge process, re-invoked for status and cancel.
    Sidecar,
    /// Single-call HTTP bridge.
    DirectHttp,
    /// Create-then-start HTTP API with remote polling.
    TwoStepHttp,
    /// In-process simulation.
    Simulator,
    /// Work queued for an out-of-process executor.
    RemoteExecutor,
}

impl ExecutionMode {
    pub const ALL: [ExecutionMode; 5] = [
        Self::Sidecar,
        Self::DirectHttp,
        Self::TwoStepHttp,
        Self::Simulator,
        Self::RemoteExecutor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sidecar => "sidecar",
            Self::DirectHttp => "direct_http",
            Self::TwoStepHttp => "two_step_http",
            Self::Simulator => "simulator",
            Self::RemoteExecutor => "remote_executor",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "sidecar" | "sidecar_process" => Some(Self::Sidecar),
            "direct_http" | "http" => Some(Self::DirectHttp),
            "two_step_http" | "two_step" => Some(Self::TwoStepHttp),
            "simulator" | "simulate" => Some(Self::Simulator),
            "remote_executor" | "executor" | "queued" => Some(Self::RemoteExecutor),
            _ => None,
        }
    }

    /// Whether status for this mode comes from polling a remote run API that
    /// can legitimately still be queued or running after a local failure.
    pub fn is_remote_polling(&self) -> bool {
        matches!(self, Self::TwoStepHttp)
    }
}

/// One attempt to execute a robot plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRun {
    pub id: String,
    pub robot_plan_id: String,
    #[serde(default)]
    pub planned_run_id: Option<String>,
    pub adapter_id: String,
    pub status: RunStatus,
    pub mode: ExecutionMode,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub attempt: u32,
    #[serde(default)]
    pub parent_execution_run_ref: Option<String>,
    #[serde(default)]
    pub failure_class: Option<FailureClass>,
    #[serde(default)]
    pub failure_code: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub retry_recommended: Option<bool>,
    /// Administrative marker set by the retry worker once the attempt cap
    /// is reached. Not a status.
    #[serde(default)]
    pub retry_exhausted: bool,
    #[serde(default)]
    pub retry_exhausted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub external_run_id: Option<String>,
    #[serde(default)]
    pub external_protocol_id: Option<String>,
    #[serde(default)]
    pub execution_task_id: Option<String>,
    #[serde(default)]
    pub last_status_raw: Option<String>,
    #[serde(default)]
    pub last_polled_at: Option<DateTime<Utc>>,
    /// First poll at which the remote status could not be mapped.
    #[serde(default)]
    pub unknown_status_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_exit_code: Option<i32>,
    #[serde(default)]
    pub last_stderr: Option<String>,
    #[serde(default)]
    pub raw_data_path: Option<String>,
    #[serde(default)]
    pub cancellation_requested_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancel_response: Option<Value>,
    #[serde(default)]
    pub materialized_event_graph_id: Option<String>,
    #[serde(default)]
    pub runtime_parameters: Value,
    #[serde(default)]
    pub artifacts: Vec<Value>,
    #[serde(default)]
    pub measurements: Vec<Value>,
}

impl ExecutionRun {
    /// Create a new running attempt.
    pub fn new(
        id: String,
        robot_plan_id: impl Into<String>,
        adapter_id: impl Into<String>,
        mode: ExecutionMode,
    ) -> Self {
        Self {
            id,
            robot_plan_id: robot_plan_id.into(),
            planned_run_id: None,
            adapter_id: adapter_id.into(),
            status: RunStatus::Running,
            mode,
            started_at: Utc::now(),
            completed_at: None,
            attempt: 1,
            parent_execution_run_ref: None,
            failure_class: None,
            failure_code: None,
            failure_reason: None,
            retry_recommended: None,
            retry_exhausted: false,
            retry_exhausted_at: None,
            external_run_id: None,
            external_protocol_id: None,
            execution_task_id: None,
            last_status_raw: None,
            last_polled_at: None,
            unknown_status_since: None,
            last_exit_code: None,
            last_stderr: None,
            raw_data_path: None,
            cancellation_requested_at: None,
            cancel_response: None,
            materialized_event_graph_id: None,
            runtime_parameters: Value::Null,
            artifacts: Vec::new(),
            measurements: Vec::new(),
        }
    }

    /// Make this run a retry of `parent`.
    pub fn as_retry_of(mut self, parent: &ExecutionRun) -> Self {
        self.attempt = parent.attempt + 1;
        self.parent_execution_run_ref = Some(parent.id.clone());
        self.planned_run_id.clone_from(&parent.planned_run_id);
        self.runtime_parameters = parent.runtime_parameters.clone();
        self
    }

    /// Attach a failure classification.
    pub fn apply_failure(&mut self, classification: &FailureClassification) {
        self.failure_class = Some(classification.failure_class);
        self.failure_code = Some(classification.failure_code.clone());
        self.failure_reason = Some(classification.reason.clone());
        self.retry_recommended = Some(classification.retry_recommended);
    }

    /// Whether the retry worker may consider this run.
    pub fn is_retry_candidate(&self) -> bool {
        self.status == RunStatus::Failed
            && self.failure_class == Some(FailureClass::Transient)
            && self.retry_recommended != Some(false)
            && !self.retry_exhausted
    }
}

impl RecordEntity for ExecutionRun {
    const KIND: RecordKind = RecordKind::ExecutionRun;

    fn record_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing_aliases() {
        assert_eq!(ExecutionMode::from_str("two-step"), Some(ExecutionMode::TwoStepHttp));
        assert_eq!(ExecutionMode::from_str("SIDECAR"), Some(ExecutionMode::Sidecar));
        assert_eq!(ExecutionMode::from_str("ftp"), None);
        for mode in ExecutionMode::ALL {
            assert_eq!(ExecutionMode::from_str(mode.as_str()), Some(mode));
        }
    }

    #[test]
    fn test_retry_of_increments_attempt() {
        let parent = ExecutionRun::new("EXR-1".into(), "RP-1", "ot2", ExecutionMode::Sidecar);
        let child = ExecutionRun::new("EXR-2".into(), "RP-1", "ot2", ExecutionMode::Sidecar)
            .as_retry_of(&parent);
        assert_eq!(child.attempt, 2);
        assert_eq!(child.parent_execution_run_ref.as_deref(), Some("EXR-1"));
    }

    #[test]
    fn test_payload_uses_camel_case() {
        let run = ExecutionRun::new("EXR-1".into(), "RP-1", "ot2", ExecutionMode::DirectHttp);
        let value = serde_json::to_value(&run).unwrap();
        assert_eq!(value["robotPlanId"], "RP-1");
        assert_eq!(value["mode"], "direct_http");
        assert_eq!(value["status"], "running");
    }
}
