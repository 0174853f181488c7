//! Claim, run and report loop of an executor.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::domain::errors::DomainResult;
use crate::domain::models::failure::codes;
use crate::domain::models::{ExecutionTask, ExecutorConfig, FinalStatus, ProgressAck, TaskStatus};
use crate::executor::api::ExecutionTaskApi;
use crate::executor::runner::{RunnerRegistry, TaskOutcome};
use crate::services::task_service::{
    AppendLogsRequest, ClaimRequest, CompleteRequest, HeartbeatRequest, StatusUpdateRequest,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimCycleReport {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    /// Tasks abandoned because the orchestrator refused a report.
    pub rejected: usize,
    pub errors: usize,
}

enum TaskResult {
    Finished(FinalStatus),
    Rejected,
}

pub struct ClaimLoop {
    api: Arc<dyn ExecutionTaskApi>,
    runners: RunnerRegistry,
    config: ExecutorConfig,
}

impl ClaimLoop {
    pub fn new(api: Arc<dyn ExecutionTaskApi>, runners: RunnerRegistry, config: ExecutorConfig) -> Self {
        Self { api, runners, config }
    }

    pub fn executor_id(&self) -> &str {
        &self.config.executor_id
    }

    /// Claim once and process every claimed task to completion.
    pub async fn poll_once(&self) -> DomainResult<ClaimCycleReport> {
        let tasks = self
            .api
            .claim(&ClaimRequest {
                executor_id: self.config.executor_id.clone(),
                capabilities: self.config.capabilities.clone(),
                max_tasks: self.config.max_tasks,
                lease_duration_ms: Some(self.config.lease_duration_ms),
            })
            .await?;

        let mut report = ClaimCycleReport {
            claimed: tasks.len(),
            ..ClaimCycleReport::default()
        };
        for task in tasks {
            let span = info_span!("execution_task", task_id = %task.id, run_id = %task.execution_run_id);
            match self.process(&task).instrument(span).await {
                Ok(TaskResult::Finished(FinalStatus::Completed)) => report.completed += 1,
                Ok(TaskResult::Finished(_)) => report.failed += 1,
                Ok(TaskResult::Rejected) => report.rejected += 1,
                Err(e) => {
                    error!(task_id = %task.id, error = %e, "task reporting failed");
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }

    /// Poll every `poll_interval_ms` until `stop` flips to true.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        let mut timer = interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(executor_id = %self.config.executor_id, "executor claim loop started");

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match self.poll_once().await {
                        Ok(report) if report.claimed > 0 => {
                            info!(
                                claimed = report.claimed,
                                completed = report.completed,
                                failed = report.failed,
                                rejected = report.rejected,
                                "claim cycle finished"
                            );
                        }
                        Ok(_) => debug!("no claimable tasks"),
                        Err(e) => warn!(error = %e, "claim cycle failed"),
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        info!(executor_id = %self.config.executor_id, "executor claim loop stopped");
    }

    async fn process(&self, task: &ExecutionTask) -> DomainResult<TaskResult> {
        let task_id = task.id.as_str();
        let executor_id = self.config.executor_id.clone();
        // A reclaimed task keeps the sequence of the previous holder.
        let mut sequence = task.last_sequence;

        sequence += 1;
        let ack = self
            .api
            .heartbeat(
                task_id,
                &HeartbeatRequest {
                    executor_id: executor_id.clone(),
                    sequence,
                    status: Some(TaskStatus::Running),
                    progress: Some(json!({"state": "starting"})),
                },
            )
            .await?;
        if !accepted(&ack) {
            return Ok(TaskResult::Rejected);
        }

        let outcome = match self.runners.get(&task.adapter_id) {
            Ok(runner) => {
                debug!(runner = runner.name(), adapter_id = %task.adapter_id, "running task");
                runner.run(task).await
            }
            Err(e) => Err(e),
        };
        let outcome = outcome.unwrap_or_else(|e| {
            warn!(error = %e, "task runner failed");
            TaskOutcome::failed(json!({
                "code": codes::EXECUTOR_EXCEPTION,
                "class": "transient",
                "message": e.to_string(),
            }))
        });

        if !outcome.logs.is_empty() {
            sequence += 1;
            let ack = self
                .api
                .append_logs(
                    task_id,
                    &AppendLogsRequest {
                        executor_id: executor_id.clone(),
                        sequence,
                        entries: outcome.logs.clone(),
                    },
                )
                .await?;
            if !accepted(&ack) {
                return Ok(TaskResult::Rejected);
            }
        }

        sequence += 1;
        let ack = self
            .api
            .update_status(
                task_id,
                &StatusUpdateRequest {
                    executor_id: executor_id.clone(),
                    sequence,
                    status: outcome.final_status.task_status(),
                    failure: outcome.failure.clone(),
                    external: outcome.external.clone(),
                },
            )
            .await?;
        if !accepted(&ack) {
            return Ok(TaskResult::Rejected);
        }

        sequence += 1;
        let ack = self
            .api
            .complete(
                task_id,
                &CompleteRequest {
                    executor_id,
                    sequence,
                    final_status: outcome.final_status,
                    artifacts: outcome.artifacts,
                    measurements: outcome.measurements,
                },
            )
            .await?;
        if !accepted(&ack) {
            return Ok(TaskResult::Rejected);
        }
        Ok(TaskResult::Finished(outcome.final_status))
    }
}

fn accepted(ack: &ProgressAck) -> bool {
    if !ack.accepted {
        warn!(
            task_id = %ack.task_id,
            last_sequence = ack.last_sequence,
            status = ack.status.as_str(),
            "orchestrator refused report, abandoning task"
        );
    }
    ack.accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryRecordStore;
    use crate::domain::errors::DomainError;
    use crate::domain::models::{FailureClass, RobotPlan, RunStatus};
    use crate::domain::ports::EntityStore;
    use crate::executor::api::InProcessTaskApi;
    use crate::executor::runner::TaskRunner;
    use crate::services::task_service::ExecutionTaskService;
    use crate::services::ExecutionRunStore;
    use async_trait::async_trait;

    struct Exploding;

    #[async_trait]
    impl TaskRunner for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }

        async fn run(&self, _task: &ExecutionTask) -> DomainResult<TaskOutcome> {
            Err(DomainError::ExecutionFailed("deck door open".into()))
        }
    }

    async fn setup() -> (EntityStore, ExecutionTaskService) {
        let store = EntityStore::new(Arc::new(InMemoryRecordStore::new()));
        store
            .create(
                &RobotPlan {
                    id: "RP-1".into(),
                    target_platform: "ot2".into(),
                    adapter_id: None,
                    planned_run_id: None,
                    execution_mode: None,
                    instructions: Vec::new(),
                },
                "plan",
            )
            .await
            .unwrap();
        let tasks = ExecutionTaskService::new(store.clone());
        (store, tasks)
    }

    fn config() -> ExecutorConfig {
        ExecutorConfig {
            executor_id: "exec-1".into(),
            capabilities: vec!["ot2".into()],
            max_tasks: 4,
            lease_duration_ms: 60_000,
            poll_interval_ms: 50,
        }
    }

    #[tokio::test]
    async fn test_simulated_task_completes_run() {
        let (store, tasks) = setup().await;
        let queued = tasks.create_queued_task("RP-1", None, None).await.unwrap();

        let claim_loop = ClaimLoop::new(
            Arc::new(InProcessTaskApi::new(tasks.clone())),
            RunnerRegistry::default(),
            config(),
        );
        let report = claim_loop.poll_once().await.unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.completed, 1);

        let task = tasks.get_task(&queued.task_id).await.unwrap();
        assert_eq!(task.final_status, Some(FinalStatus::Completed));
        assert_eq!(task.last_sequence, 4);
        assert_eq!(tasks.get_logs(&queued.task_id).await.unwrap().unwrap().entries.len(), 2);

        let run = ExecutionRunStore::new(store).require(&queued.execution_run_id).await.unwrap().entity;
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.external_run_id, Some(format!("SIM-{}", queued.execution_run_id)));
    }

    #[tokio::test]
    async fn test_runner_error_fails_task_as_transient() {
        let (store, tasks) = setup().await;
        let queued = tasks.create_queued_task("RP-1", None, None).await.unwrap();

        let claim_loop = ClaimLoop::new(
            Arc::new(InProcessTaskApi::new(tasks.clone())),
            RunnerRegistry::empty().with("ot2", Arc::new(Exploding)),
            config(),
        );
        let report = claim_loop.poll_once().await.unwrap();
        assert_eq!(report.failed, 1);

        let task = tasks.get_task(&queued.task_id).await.unwrap();
        assert_eq!(task.failure.as_ref().unwrap()["code"], codes::EXECUTOR_EXCEPTION);

        let run = ExecutionRunStore::new(store).require(&queued.execution_run_id).await.unwrap().entity;
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.failure_class, Some(FailureClass::Transient));
        assert_eq!(run.failure_code.as_deref(), Some(codes::EXECUTOR_EXCEPTION));
    }

    #[tokio::test]
    async fn test_nothing_to_claim_for_other_capabilities() {
        let (_store, tasks) = setup().await;
        tasks.create_queued_task("RP-1", None, None).await.unwrap();

        let mut other = config();
        other.capabilities = vec!["hamilton".into()];
        let claim_loop = ClaimLoop::new(Arc::new(InProcessTaskApi::new(tasks)), RunnerRegistry::default(), other);
        assert_eq!(claim_loop.poll_once().await.unwrap(), ClaimCycleReport::default());
    }

    #[tokio::test]
    async fn test_loop_stops_on_signal() {
        let (_store, tasks) = setup().await;
        let claim_loop = Arc::new(ClaimLoop::new(
            Arc::new(InProcessTaskApi::new(tasks)),
            RunnerRegistry::default(),
            config(),
        ));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn({
            let claim_loop = claim_loop.clone();
            async move { claim_loop.run(stop_rx).await }
        });
        tokio::time::sleep(Duration::from_millis(120)).await;
        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
