//! Execution run persistence.
//!
//! A thin layer over the record store for [`ExecutionRun`]: load, create,
//! status transitions and failure/retry metadata. Every read-modify-write
//! goes through the version it was read at.

use std::collections::HashSet;

use chrono::Utc;
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ExecutionRun, FailureClassification, RunStatus, Stored,
};
use crate::domain::ports::EntityStore;

const ENTITY: &str = "execution run";

#[derive(Clone)]
pub struct ExecutionRunStore {
    store: EntityStore,
}

impl ExecutionRunStore {
    pub fn new(store: EntityStore) -> Self {
        Self { store }
    }

    pub async fn get(&self, run_id: &str) -> DomainResult<Option<Stored<ExecutionRun>>> {
        self.store.get(run_id).await
    }

    pub async fn require(&self, run_id: &str) -> DomainResult<Stored<ExecutionRun>> {
        self.store.require(ENTITY, run_id).await
    }

    pub async fn create(&self, run: &ExecutionRun) -> DomainResult<Stored<ExecutionRun>> {
        let message = match &run.parent_execution_run_ref {
            Some(parent) => format!("Create execution run {} (retry of {parent})", run.id),
            None => format!("Create execution run {}", run.id),
        };
        let version = self.store.create(run, &message).await?;
        debug!(run_id = %run.id, attempt = run.attempt, "execution run created");
        Ok(Stored {
            entity: run.clone(),
            version,
        })
    }

    /// Write back a run read at `stored.version`.
    pub async fn save(&self, stored: &Stored<ExecutionRun>, message: &str) -> DomainResult<i64> {
        self.store
            .save(&stored.entity, Some(stored.version), message)
            .await
    }

    /// Read, mutate and write back a run in one step.
    pub async fn update<F>(&self, run_id: &str, message: &str, mutate: F) -> DomainResult<ExecutionRun>
    where
        F: FnOnce(&mut ExecutionRun) -> DomainResult<()> + Send,
    {
        let mut stored = self.require(run_id).await?;
        mutate(&mut stored.entity)?;
        stored.version = self.save(&stored, message).await?;
        Ok(stored.entity)
    }

    pub async fn list(&self) -> DomainResult<Vec<ExecutionRun>> {
        self.store.list(None).await
    }

    pub async fn list_running(&self) -> DomainResult<Vec<ExecutionRun>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|run| run.status == RunStatus::Running)
            .collect())
    }

    /// Runs for a robot plan, newest attempt last.
    pub async fn list_for_plan(&self, robot_plan_id: &str) -> DomainResult<Vec<ExecutionRun>> {
        let mut runs: Vec<_> = self
            .list()
            .await?
            .into_iter()
            .filter(|run| run.robot_plan_id == robot_plan_id)
            .collect();
        runs.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then(a.attempt.cmp(&b.attempt))
                .then(a.id.cmp(&b.id))
        });
        Ok(runs)
    }

    pub async fn latest_for_plan(&self, robot_plan_id: &str) -> DomainResult<Option<ExecutionRun>> {
        Ok(self.list_for_plan(robot_plan_id).await?.pop())
    }
}

/// Move a run to `status`, stamping `completed_at` on terminal states.
pub fn transition(run: &mut ExecutionRun, status: RunStatus) -> DomainResult<()> {
    if run.status.is_terminal() && run.status != status {
        return Err(DomainError::BadRequest(format!(
            "execution run {} is already {}",
            run.id,
            run.status.as_str()
        )));
    }
    run.status = status;
    if status.is_terminal() && run.completed_at.is_none() {
        run.completed_at = Some(Utc::now());
    }
    Ok(())
}

/// Fail a run with a classification.
pub fn fail(run: &mut ExecutionRun, classification: &FailureClassification) -> DomainResult<()> {
    transition(run, RunStatus::Failed)?;
    run.apply_failure(classification);
    Ok(())
}

/// Ids of runs that have at least one retry child.
pub fn parent_ids(runs: &[ExecutionRun]) -> HashSet<String> {
    runs.iter()
        .filter_map(|run| run.parent_execution_run_ref.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryRecordStore;
    use crate::domain::models::failure::codes;
    use crate::domain::models::{ExecutionMode, FailureClass};
    use std::sync::Arc;

    fn store() -> ExecutionRunStore {
        ExecutionRunStore::new(EntityStore::new(Arc::new(InMemoryRecordStore::new())))
    }

    fn run(id: &str) -> ExecutionRun {
        ExecutionRun::new(id.into(), "RP-1", "ot2", ExecutionMode::Sidecar)
    }

    #[tokio::test]
    async fn test_create_and_update() {
        let runs = store();
        runs.create(&run("EXR-1")).await.unwrap();

        let updated = runs
            .update("EXR-1", "complete", |run| transition(run, RunStatus::Completed))
            .await
            .unwrap();
        assert_eq!(updated.status, RunStatus::Completed);
        assert!(updated.completed_at.is_some());

        let stored = runs.require("EXR-1").await.unwrap();
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_stale_save_conflicts() {
        let runs = store();
        let stored = runs.create(&run("EXR-1")).await.unwrap();
        runs.save(&stored, "first").await.unwrap();
        let err = runs.save(&stored, "second").await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[tokio::test]
    async fn test_require_missing() {
        let err = store().require("EXR-404").await.unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn test_terminal_runs_do_not_change_status() {
        let mut r = run("EXR-1");
        transition(&mut r, RunStatus::Canceled).unwrap();
        assert!(transition(&mut r, RunStatus::Completed).is_err());
        assert!(transition(&mut r, RunStatus::Canceled).is_ok());
    }

    #[test]
    fn test_fail_applies_classification() {
        let mut r = run("EXR-1");
        let c = FailureClassification::new(FailureClass::Terminal, false, codes::PROCESS_FATAL, "killed");
        fail(&mut r, &c).unwrap();
        assert_eq!(r.status, RunStatus::Failed);
        assert_eq!(r.failure_code.as_deref(), Some("PROCESS_FATAL"));
        assert_eq!(r.retry_recommended, Some(false));
    }

    #[tokio::test]
    async fn test_latest_for_plan_and_parents() {
        let runs = store();
        let first = run("EXR-1");
        let second = run("EXR-2").as_retry_of(&first);
        runs.create(&first).await.unwrap();
        runs.create(&second).await.unwrap();
        runs.create(&ExecutionRun::new("EXR-3".into(), "RP-2", "ot2", ExecutionMode::Sidecar))
            .await
            .unwrap();

        let latest = runs.latest_for_plan("RP-1").await.unwrap().unwrap();
        assert_eq!(latest.id, "EXR-2");

        let parents = parent_ids(&runs.list().await.unwrap());
        assert!(parents.contains("EXR-1"));
        assert_eq!(parents.len(), 1);
    }
}
