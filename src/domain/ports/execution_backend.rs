use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ExecutionMode, ExecutionRun, HealthStatus, RemoteRunState, RobotPlan};

/// Everything a backend needs to start executing a plan.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Id the execution run will be stored under.
    pub run_id: String,
    pub adapter_id: String,
    pub plan: RobotPlan,
    pub runtime_parameters: Value,
    pub attempt: u32,
}

/// What the backend reported back on submit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    /// False when the bridge refused or failed the submission.
    pub accepted: bool,
    pub external_run_id: Option<String>,
    pub external_protocol_id: Option<String>,
    pub execution_task_id: Option<String>,
    pub status_raw: Option<String>,
    pub exit_code: Option<i32>,
    pub stderr: Option<String>,
}

impl SubmitOutcome {
    pub fn accepted(external_run_id: Option<String>, status_raw: impl Into<String>) -> Self {
        Self {
            accepted: true,
            external_run_id,
            status_raw: Some(status_raw.into()),
            ..Default::default()
        }
    }

    pub fn rejected(status_raw: impl Into<String>) -> Self {
        Self {
            accepted: false,
            status_raw: Some(status_raw.into()),
            ..Default::default()
        }
    }
}

/// Authoritative status observed at the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStatus {
    pub status_raw: String,
    pub state: RemoteRunState,
    pub raw_data_path: Option<String>,
    pub exit_code: Option<i32>,
    pub stderr: Option<String>,
}

impl RemoteStatus {
    pub fn from_raw(status_raw: impl Into<String>) -> Self {
        let status_raw = status_raw.into();
        Self {
            state: RemoteRunState::normalize(&status_raw),
            status_raw,
            raw_data_path: None,
            exit_code: None,
            stderr: None,
        }
    }
}

/// Result of asking a bridge to cancel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOutcome {
    pub confirmed: bool,
    pub response: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthProbe {
    pub status: HealthStatus,
    pub detail: Option<String>,
}

/// One execution backend per [`ExecutionMode`].
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// The mode this backend handles
    fn mode(&self) -> ExecutionMode;

    /// Start executing a plan
    async fn submit(&self, request: &SubmitRequest) -> DomainResult<SubmitOutcome>;

    /// Query the authoritative status of a run
    async fn status(&self, run: &ExecutionRun) -> DomainResult<RemoteStatus>;

    /// Ask the bridge to cancel a run
    async fn cancel(&self, run: &ExecutionRun) -> DomainResult<CancelOutcome>;

    /// Probe the bridge for an adapter
    async fn health(&self, adapter_id: &str) -> DomainResult<HealthProbe>;
}
