//! In-process simulator. Every run completes immediately.

use async_trait::async_trait;
use serde_json::json;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ExecutionMode, ExecutionRun, HealthStatus};
use crate::domain::ports::{
    CancelOutcome, ExecutionBackend, HealthProbe, RemoteStatus, SubmitOutcome, SubmitRequest,
};

use super::bridge_run_id;

#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatorBackend;

impl SimulatorBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExecutionBackend for SimulatorBackend {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Simulator
    }

    async fn submit(&self, request: &SubmitRequest) -> DomainResult<SubmitOutcome> {
        Ok(SubmitOutcome::accepted(
            Some(format!("SIM-{}", request.run_id)),
            "completed",
        ))
    }

    async fn status(&self, run: &ExecutionRun) -> DomainResult<RemoteStatus> {
        let mut status = RemoteStatus::from_raw("completed");
        status.raw_data_path = Some(format!("sim://{}/raw.json", bridge_run_id(run)));
        Ok(status)
    }

    async fn cancel(&self, run: &ExecutionRun) -> DomainResult<CancelOutcome> {
        Ok(CancelOutcome {
            confirmed: true,
            response: json!({"simulated": true, "runId": bridge_run_id(run)}),
        })
    }

    async fn health(&self, _adapter_id: &str) -> DomainResult<HealthProbe> {
        Ok(HealthProbe {
            status: HealthStatus::Healthy,
            detail: Some("simulated".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::RemoteRunState;

    #[tokio::test]
    async fn test_simulated_run_succeeds() {
        let mut run = ExecutionRun::new("EXR-3".into(), "RP-3", "ot2", ExecutionMode::Simulator);
        run.external_run_id = Some("SIM-EXR-3".into());
        let status = SimulatorBackend::new().status(&run).await.unwrap();
        assert_eq!(status.state, RemoteRunState::Succeeded);
        assert_eq!(status.raw_data_path.as_deref(), Some("sim://SIM-EXR-3/raw.json"));
    }
}
