//! Execution orchestration: submit robot plans, retry, cancel, inspect.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::adapters::backends::{AdapterDirectory, BackendRegistry};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    new_record_id, AdapterHealth, ExecutionMode, ExecutionRun, FailureSignals, HealthStatus,
    PlannedRunState, RobotPlan, RunStatus,
};
use crate::domain::ports::{AttemptLauncher, EntityStore, SubmitOutcome, SubmitRequest};
use crate::services::failure_classifier::classify;
use crate::services::run_completion::RunCompletion;

/// Execution history of one robot plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanExecutionStatus {
    pub robot_plan_id: String,
    pub attempts: usize,
    pub latest: Option<ExecutionRun>,
    pub runs: Vec<RunDigest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDigest {
    pub id: String,
    pub attempt: u32,
    pub status: RunStatus,
    pub failure_code: Option<String>,
}

#[derive(Clone)]
pub struct ExecutionOrchestrator {
    store: EntityStore,
    completion: RunCompletion,
    backends: BackendRegistry,
    adapters: AdapterDirectory,
}

impl ExecutionOrchestrator {
    pub fn new(
        store: EntityStore,
        completion: RunCompletion,
        backends: BackendRegistry,
        adapters: AdapterDirectory,
    ) -> Self {
        Self {
            store,
            completion,
            backends,
            adapters,
        }
    }

    /// Mode a plan runs under. The adapter's simulation toggle wins over
    /// everything else, then an explicit override, then the plan, then
    /// the adapter's configured mode.
    pub fn resolve_mode(&self, plan: &RobotPlan, mode_override: Option<ExecutionMode>) -> DomainResult<ExecutionMode> {
        let adapter = self.adapters.get(plan.adapter());
        if adapter.is_some_and(|a| a.simulate) {
            return Ok(ExecutionMode::Simulator);
        }
        mode_override
            .or(plan.execution_mode)
            .or_else(|| adapter.map(|a| a.effective_mode()))
            .ok_or_else(|| {
                DomainError::BadRequest(format!(
                    "no execution mode for robot plan {} (adapter {} is not configured)",
                    plan.id,
                    plan.adapter()
                ))
            })
    }

    /// Submit a robot plan and track it as a new execution run.
    ///
    /// A contract violation from the bridge aborts before any run is
    /// stored. A refused or failed submission is stored as a failed run.
    #[instrument(skip(self, runtime_parameters))]
    pub async fn execute_robot_plan(
        &self,
        robot_plan_id: &str,
        mode_override: Option<ExecutionMode>,
        runtime_parameters: Option<Value>,
    ) -> DomainResult<ExecutionRun> {
        let plan = self
            .store
            .require::<RobotPlan>("robot plan", robot_plan_id)
            .await?
            .entity;
        let mode = self.resolve_mode(&plan, mode_override)?;
        self.launch(&plan, mode, runtime_parameters.unwrap_or(Value::Null), None)
            .await
    }

    async fn launch(
        &self,
        plan: &RobotPlan,
        mode: ExecutionMode,
        runtime_parameters: Value,
        parent: Option<&ExecutionRun>,
    ) -> DomainResult<ExecutionRun> {
        let backend = self.backends.get(mode)?;
        let mut run = ExecutionRun::new(new_record_id("EXR"), &plan.id, plan.adapter(), mode);
        run.planned_run_id.clone_from(&plan.planned_run_id);
        if let Some(parent) = parent {
            run = run.as_retry_of(parent);
        }
        run.runtime_parameters = runtime_parameters;

        let request = SubmitRequest {
            run_id: run.id.clone(),
            adapter_id: run.adapter_id.clone(),
            plan: plan.clone(),
            runtime_parameters: run.runtime_parameters.clone(),
            attempt: run.attempt,
        };

        let outcome = match backend.submit(&request).await {
            Ok(outcome) => outcome,
            Err(e @ DomainError::ContractViolation(_)) => {
                warn!(run_id = %run.id, robot_plan_id = %plan.id, error = %e, "bridge broke the contract on submit");
                return Err(e);
            }
            Err(e) => {
                warn!(run_id = %run.id, robot_plan_id = %plan.id, error = %e, "submit failed");
                SubmitOutcome {
                    stderr: Some(e.to_string()),
                    ..SubmitOutcome::rejected("error")
                }
            }
        };

        run.external_run_id.clone_from(&outcome.external_run_id);
        run.external_protocol_id.clone_from(&outcome.external_protocol_id);
        run.execution_task_id.clone_from(&outcome.execution_task_id);
        run.last_status_raw.clone_from(&outcome.status_raw);
        run.last_exit_code = outcome.exit_code;
        run.last_stderr.clone_from(&outcome.stderr);

        let stored = self.completion.runs().create(&run).await?;
        if outcome.accepted {
            self.completion
                .planned_runs()
                .propagate(&stored.entity, PlannedRunState::Executing)
                .await;
            info!(
                run_id = %run.id,
                robot_plan_id = %plan.id,
                mode = mode.as_str(),
                attempt = run.attempt,
                external_run_id = run.external_run_id.as_deref().unwrap_or(""),
                "execution run started"
            );
            return Ok(stored.entity);
        }

        let mut signals = FailureSignals::default().with_mode(mode);
        signals.exit_code = outcome.exit_code;
        signals.status_raw.clone_from(&outcome.status_raw);
        signals.stderr.clone_from(&outcome.stderr);
        let classification = classify(&signals);
        self.completion
            .finish(stored, RunStatus::Failed, Some(&classification), "Submission failed")
            .await
    }

    /// Cancel the running execution of a robot plan.
    ///
    /// The bridge is always asked first; the run is canceled whether or
    /// not the bridge confirms.
    #[instrument(skip(self))]
    pub async fn cancel_robot_plan(&self, robot_plan_id: &str) -> DomainResult<ExecutionRun> {
        let running = self
            .completion
            .runs()
            .list_for_plan(robot_plan_id)
            .await?
            .into_iter()
            .rev()
            .find(|run| run.status == RunStatus::Running)
            .ok_or_else(|| {
                DomainError::BadRequest(format!("robot plan {robot_plan_id} has no running execution"))
            })?;

        let backend = self.backends.get(running.mode)?;
        let (confirmed, response) = match backend.cancel(&running).await {
            Ok(outcome) => (outcome.confirmed, outcome.response),
            Err(e) => {
                warn!(run_id = %running.id, error = %e, "bridge cancel call failed");
                (false, json!({"error": e.to_string()}))
            }
        };

        let mut stored = self.completion.runs().require(&running.id).await?;
        if stored.entity.status.is_terminal() {
            info!(run_id = %running.id, status = stored.entity.status.as_str(), "run settled before cancel landed");
            return Ok(stored.entity);
        }
        stored.entity.cancellation_requested_at = Some(Utc::now());
        stored.entity.cancel_response = Some(json!({"confirmed": confirmed, "response": response}));
        self.completion
            .finish(stored, RunStatus::Canceled, None, "Execution canceled")
            .await
    }

    pub async fn execution_status(&self, robot_plan_id: &str) -> DomainResult<PlanExecutionStatus> {
        let runs = self.completion.runs().list_for_plan(robot_plan_id).await?;
        Ok(PlanExecutionStatus {
            robot_plan_id: robot_plan_id.to_string(),
            attempts: runs.len(),
            runs: runs
                .iter()
                .map(|run| RunDigest {
                    id: run.id.clone(),
                    attempt: run.attempt,
                    status: run.status,
                    failure_code: run.failure_code.clone(),
                })
                .collect(),
            latest: runs.last().cloned(),
        })
    }

    /// Probe every configured adapter and store the results.
    pub async fn probe_adapter_health(&self) -> DomainResult<Vec<AdapterHealth>> {
        let mut results = Vec::new();
        for adapter_id in self.adapters.ids() {
            let Some(config) = self.adapters.get(adapter_id) else {
                continue;
            };
            let probe = match self.backends.get(config.effective_mode()) {
                Ok(backend) => backend.health(adapter_id).await,
                Err(e) => Err(e),
            };
            let (status, detail) = match probe {
                Ok(probe) => (probe.status, probe.detail),
                Err(e) => (HealthStatus::Down, Some(e.to_string())),
            };

            let health = AdapterHealth {
                id: AdapterHealth::id_for(adapter_id),
                adapter_id: adapter_id.to_string(),
                status,
                detail,
                checked_at: Utc::now(),
            };
            self.store
                .upsert(&health, &format!("Adapter {adapter_id} is {}", status.as_str()))
                .await?;
            if status.is_unhealthy() {
                warn!(adapter_id, status = status.as_str(), "adapter unhealthy");
            }
            results.push(health);
        }
        Ok(results)
    }
}

#[async_trait]
impl AttemptLauncher for ExecutionOrchestrator {
    async fn launch_retry(&self, parent: &ExecutionRun) -> DomainResult<ExecutionRun> {
        let plan = self
            .store
            .require::<RobotPlan>("robot plan", &parent.robot_plan_id)
            .await?
            .entity;
        self.launch(&plan, parent.mode, parent.runtime_parameters.clone(), Some(parent))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::backends::SimulatorBackend;
    use crate::adapters::memory::InMemoryRecordStore;
    use crate::domain::models::failure::codes;
    use crate::domain::models::{AdapterConfig, FailureClass};
    use crate::domain::ports::{
        CancelOutcome, ExecutionBackend, HealthProbe, RemoteStatus,
    };
    use std::collections::BTreeMap;
    use std::sync::Arc;

    struct RefusingBackend;

    #[async_trait]
    impl ExecutionBackend for RefusingBackend {
        fn mode(&self) -> ExecutionMode {
            ExecutionMode::Sidecar
        }

        async fn submit(&self, _request: &SubmitRequest) -> DomainResult<SubmitOutcome> {
            Ok(SubmitOutcome {
                exit_code: Some(137),
                stderr: Some("killed".into()),
                ..SubmitOutcome::rejected("failed")
            })
        }

        async fn status(&self, _run: &ExecutionRun) -> DomainResult<RemoteStatus> {
            Err(DomainError::ExecutionFailed("unreachable".into()))
        }

        async fn cancel(&self, _run: &ExecutionRun) -> DomainResult<CancelOutcome> {
            Err(DomainError::ExecutionFailed("unreachable".into()))
        }

        async fn health(&self, _adapter_id: &str) -> DomainResult<HealthProbe> {
            Err(DomainError::ExecutionFailed("unreachable".into()))
        }
    }

    /// Accepts submissions but cannot be reached to cancel them.
    struct DeafToCancelBackend;

    #[async_trait]
    impl ExecutionBackend for DeafToCancelBackend {
        fn mode(&self) -> ExecutionMode {
            ExecutionMode::DirectHttp
        }

        async fn submit(&self, request: &SubmitRequest) -> DomainResult<SubmitOutcome> {
            Ok(SubmitOutcome::accepted(Some(format!("HTTP-{}", request.run_id)), "running"))
        }

        async fn status(&self, _run: &ExecutionRun) -> DomainResult<RemoteStatus> {
            Ok(RemoteStatus::from_raw("running"))
        }

        async fn cancel(&self, _run: &ExecutionRun) -> DomainResult<CancelOutcome> {
            Err(DomainError::ExecutionFailed("connection refused".into()))
        }

        async fn health(&self, _adapter_id: &str) -> DomainResult<HealthProbe> {
            Err(DomainError::ExecutionFailed("connection refused".into()))
        }
    }

    async fn setup() -> ExecutionOrchestrator {
        let store = EntityStore::new(Arc::new(InMemoryRecordStore::new()));
        store
            .create(
                &RobotPlan {
                    id: "RP-1".into(),
                    target_platform: "ot2".into(),
                    adapter_id: None,
                    planned_run_id: None,
                    execution_mode: None,
                    instructions: vec![json!({"op": "transfer"})],
                },
                "plan",
            )
            .await
            .unwrap();

        let mut adapters = BTreeMap::new();
        adapters.insert("ot2".to_string(), AdapterConfig::new(ExecutionMode::Simulator));
        let backends = BackendRegistry::new()
            .with(Arc::new(SimulatorBackend::new()))
            .with(Arc::new(RefusingBackend))
            .with(Arc::new(DeafToCancelBackend));
        ExecutionOrchestrator::new(
            store.clone(),
            RunCompletion::new(store),
            backends,
            AdapterDirectory::new(adapters),
        )
    }

    #[tokio::test]
    async fn test_execute_and_retry_chain() {
        let orchestrator = setup().await;
        let first = orchestrator.execute_robot_plan("RP-1", None, None).await.unwrap();
        assert_eq!(first.status, RunStatus::Running);
        assert_eq!(first.mode, ExecutionMode::Simulator);
        assert_eq!(first.external_run_id, Some(format!("SIM-{}", first.id)));

        let retry = orchestrator.launch_retry(&first).await.unwrap();
        assert_eq!(retry.attempt, 2);
        assert_eq!(retry.parent_execution_run_ref.as_deref(), Some(first.id.as_str()));

        let status = orchestrator.execution_status("RP-1").await.unwrap();
        assert_eq!(status.attempts, 2);
    }

    #[tokio::test]
    async fn test_refused_submit_stores_failed_run() {
        let orchestrator = setup().await;
        let run = orchestrator
            .execute_robot_plan("RP-1", Some(ExecutionMode::Sidecar), None)
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.failure_class, Some(FailureClass::Terminal));
        assert_eq!(run.failure_code.as_deref(), Some(codes::PROCESS_FATAL));
    }

    #[tokio::test]
    async fn test_cancel_records_bridge_confirmation() {
        let orchestrator = setup().await;
        orchestrator
            .execute_robot_plan("RP-1", None, None)
            .await
            .unwrap();

        let canceled = orchestrator.cancel_robot_plan("RP-1").await.unwrap();
        assert_eq!(canceled.status, RunStatus::Canceled);
        assert!(canceled.cancellation_requested_at.is_some());
        assert_eq!(canceled.cancel_response.unwrap()["confirmed"], true);

        let err = orchestrator.cancel_robot_plan("RP-1").await.unwrap_err();
        assert_eq!(err.code(), "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_cancel_without_bridge_confirmation() {
        let orchestrator = setup().await;
        let run = orchestrator
            .execute_robot_plan("RP-1", Some(ExecutionMode::DirectHttp), None)
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Running);

        let canceled = orchestrator.cancel_robot_plan("RP-1").await.unwrap();
        assert_eq!(canceled.status, RunStatus::Canceled);
        assert!(canceled.cancellation_requested_at.is_some());
        let response = canceled.cancel_response.unwrap();
        assert_eq!(response["confirmed"], false);
        assert!(response["response"]["error"]
            .as_str()
            .unwrap()
            .contains("connection refused"));
    }

    #[tokio::test]
    async fn test_unknown_plan_is_not_found() {
        let orchestrator = setup().await;
        let err = orchestrator.execute_robot_plan("RP-404", None, None).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
