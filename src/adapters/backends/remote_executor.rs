//! Backend for plans executed by out-of-process executors.
//!
//! Submitting queues an execution task; executors claim it and report
//! progress through the task protocol, and the run status is read back
//! from the task.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ExecutionMode, ExecutionRun, FinalStatus, HealthStatus, TaskStatus};
use crate::domain::ports::{
    CancelOutcome, ExecutionBackend, HealthProbe, RemoteStatus, SubmitOutcome, SubmitRequest,
};
use crate::services::task_service::ExecutionTaskService;

pub struct RemoteExecutorBackend {
    tasks: ExecutionTaskService,
}

impl RemoteExecutorBackend {
    pub fn new(tasks: ExecutionTaskService) -> Self {
        Self { tasks }
    }
}

fn status_raw(status: TaskStatus, final_status: Option<FinalStatus>) -> &'static str {
    match (final_status, status) {
        (Some(FinalStatus::Completed), _) => "succeeded",
        (Some(FinalStatus::Failed), _) => "failed",
        (Some(FinalStatus::Canceled), _) => "canceled",
        (None, TaskStatus::Queued) => "queued",
        (None, TaskStatus::Claimed | TaskStatus::Running) => "running",
        (None, TaskStatus::Completed) => "succeeded",
        (None, TaskStatus::Failed) => "failed",
    }
}

#[async_trait]
impl ExecutionBackend for RemoteExecutorBackend {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::RemoteExecutor
    }

    async fn submit(&self, request: &SubmitRequest) -> DomainResult<SubmitOutcome> {
        let task = self
            .tasks
            .enqueue(&request.run_id, &request.plan, request.runtime_parameters.clone())
            .await?;
        debug!(run_id = %request.run_id, task_id = %task.id, "remote execution queued");
        Ok(SubmitOutcome {
            execution_task_id: Some(task.id),
            ..SubmitOutcome::accepted(None, "queued")
        })
    }

    async fn status(&self, run: &ExecutionRun) -> DomainResult<RemoteStatus> {
        let Some(task_id) = run.execution_task_id.as_deref() else {
            return Ok(RemoteStatus::from_raw("missing_task"));
        };
        let task = self.tasks.get_task(task_id).await?;

        let mut status = RemoteStatus::from_raw(status_raw(task.status, task.final_status));
        status.stderr = task
            .failure
            .as_ref()
            .and_then(|f| f.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string);
        status.raw_data_path = task
            .external
            .as_ref()
            .and_then(|e| e.get("rawDataPath"))
            .and_then(|p| p.as_str())
            .map(str::to_string);
        Ok(status)
    }

    async fn cancel(&self, run: &ExecutionRun) -> DomainResult<CancelOutcome> {
        let Some(task_id) = run.execution_task_id.as_deref() else {
            return Ok(CancelOutcome {
                confirmed: false,
                response: json!({"detail": "run has no execution task"}),
            });
        };
        let task = self
            .tasks
            .cancel_task(task_id, &format!("execution run {} canceled", run.id))
            .await?;
        Ok(CancelOutcome {
            // Only our cancel closes a task as canceled; any other final
            // status means the executor finished first.
            confirmed: task.final_status == Some(FinalStatus::Canceled),
            response: json!({
                "executionTaskId": task.id,
                "taskStatus": task.status.as_str(),
                "finalStatus": task.final_status,
            }),
        })
    }

    async fn health(&self, _adapter_id: &str) -> DomainResult<HealthProbe> {
        Ok(HealthProbe {
            status: HealthStatus::Healthy,
            detail: Some("tasks are pulled by executors".to_string()),
        })
    }
}
