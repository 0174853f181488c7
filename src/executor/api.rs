//! Orchestrator-facing calls an executor makes.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ExecutionTask, ProgressAck};
use crate::services::task_service::{
    AppendLogsRequest, ClaimRequest, CompleteRequest, ExecutionTaskService, HeartbeatRequest,
    StatusUpdateRequest,
};

/// The task protocol as seen from an executor.
#[async_trait]
pub trait ExecutionTaskApi: Send + Sync {
    async fn claim(&self, request: &ClaimRequest) -> DomainResult<Vec<ExecutionTask>>;

    async fn heartbeat(&self, task_id: &str, request: &HeartbeatRequest) -> DomainResult<ProgressAck>;

    async fn append_logs(&self, task_id: &str, request: &AppendLogsRequest) -> DomainResult<ProgressAck>;

    async fn update_status(&self, task_id: &str, request: &StatusUpdateRequest) -> DomainResult<ProgressAck>;

    async fn complete(&self, task_id: &str, request: &CompleteRequest) -> DomainResult<ProgressAck>;
}

/// Calls an [`ExecutionTaskService`] in the same process.
#[derive(Clone)]
pub struct InProcessTaskApi {
    tasks: ExecutionTaskService,
}

impl InProcessTaskApi {
    pub fn new(tasks: ExecutionTaskService) -> Self {
        Self { tasks }
    }
}

#[async_trait]
impl ExecutionTaskApi for InProcessTaskApi {
    async fn claim(&self, request: &ClaimRequest) -> DomainResult<Vec<ExecutionTask>> {
        self.tasks.claim_tasks(request).await
    }

    async fn heartbeat(&self, task_id: &str, request: &HeartbeatRequest) -> DomainResult<ProgressAck> {
        self.tasks.heartbeat(task_id, request).await
    }

    async fn append_logs(&self, task_id: &str, request: &AppendLogsRequest) -> DomainResult<ProgressAck> {
        self.tasks.append_logs(task_id, request).await
    }

    async fn update_status(&self, task_id: &str, request: &StatusUpdateRequest) -> DomainResult<ProgressAck> {
        self.tasks.update_status(task_id, request).await
    }

    async fn complete(&self, task_id: &str, request: &CompleteRequest) -> DomainResult<ProgressAck> {
        self.tasks.complete(task_id, request).await
    }
}
