use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ExecutionRun, WorkerId};

/// The unit of work a leased background worker runs once per tick.
#[async_trait]
pub trait WorkerUnit: Send + Sync {
    fn worker_id(&self) -> WorkerId;

    /// Run one tick and return a JSON summary of what happened.
    async fn run_tick(&self) -> DomainResult<Value>;
}

/// Starts a new attempt for a failed execution run.
#[async_trait]
pub trait AttemptLauncher: Send + Sync {
    async fn launch_retry(&self, parent: &ExecutionRun) -> DomainResult<ExecutionRun>;
}
