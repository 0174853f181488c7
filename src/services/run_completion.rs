//! Terminal transitions of execution runs.
//!
//! Every terminal transition goes through [`RunCompletion::finish`], which
//! materializes the event graph on success and propagates the new state to
//! the owning planned run.

use serde_json::Value;
use tracing::{info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    ExecutionRun, FailureClassification, PlannedRunState, RecordUpdate, RunStatus, Stored,
};
use crate::domain::ports::EntityStore;
use crate::services::event_graph::EventGraphMaterializer;
use crate::services::execution_run_store::{self, ExecutionRunStore};

#[derive(Clone)]
pub struct RunCompletion {
    runs: ExecutionRunStore,
    materializer: EventGraphMaterializer,
    planned_runs: PlannedRunSync,
}

impl RunCompletion {
    pub fn new(store: EntityStore) -> Self {
        Self {
            runs: ExecutionRunStore::new(store.clone()),
            materializer: EventGraphMaterializer::new(store.clone()),
            planned_runs: PlannedRunSync::new(store),
        }
    }

    pub fn runs(&self) -> &ExecutionRunStore {
        &self.runs
    }

    pub fn materializer(&self) -> &EventGraphMaterializer {
        &self.materializer
    }

    pub fn planned_runs(&self) -> &PlannedRunSync {
        &self.planned_runs
    }

    /// Move a stored run to a terminal `status` and persist it.
    ///
    /// `classification` is applied for failures.
    pub async fn finish(
        &self,
        mut stored: Stored<ExecutionRun>,
        status: RunStatus,
        classification: Option<&FailureClassification>,
        message: &str,
    ) -> DomainResult<ExecutionRun> {
        match (status, classification) {
            (RunStatus::Failed, Some(c)) => execution_run_store::fail(&mut stored.entity, c)?,
            _ => execution_run_store::transition(&mut stored.entity, status)?,
        }
        if status == RunStatus::Completed {
            self.materializer.materialize(&mut stored.entity).await?;
        }
        stored.version = self.runs.save(&stored, message).await?;

        info!(
            run_id = %stored.entity.id,
            status = status.as_str(),
            failure_code = stored.entity.failure_code.as_deref().unwrap_or(""),
            "execution run finished"
        );

        if let Some(state) = planned_state_for(status) {
            self.planned_runs.propagate(&stored.entity, state).await;
        }
        Ok(stored.entity)
    }
}

fn planned_state_for(status: RunStatus) -> Option<PlannedRunState> {
    match status {
        RunStatus::Running => None,
        RunStatus::Completed => Some(PlannedRunState::Completed),
        RunStatus::Failed => Some(PlannedRunState::Failed),
        RunStatus::Canceled => Some(PlannedRunState::Canceled),
    }
}

/// Writes execution state onto planned-run records.
///
/// Planned runs are owned elsewhere, so only the `state` and
/// `executionRunId` fields of the raw payload are patched.
#[derive(Clone)]
pub struct PlannedRunSync {
    store: EntityStore,
}

impl PlannedRunSync {
    pub fn new(store: EntityStore) -> Self {
        Self { store }
    }

    /// Best-effort: failures are logged and never fail the run transition.
    pub async fn propagate(&self, run: &ExecutionRun, state: PlannedRunState) {
        let Some(planned_run_id) = run.planned_run_id.as_deref() else {
            return;
        };
        if let Err(e) = self.patch(planned_run_id, run, state).await {
            warn!(
                run_id = %run.id,
                planned_run_id,
                state = state.as_str(),
                error = %e,
                "failed to propagate state to planned run"
            );
        }
    }

    async fn patch(&self, planned_run_id: &str, run: &ExecutionRun, state: PlannedRunState) -> DomainResult<()> {
        let Some(record) = self.store.raw().get(planned_run_id).await? else {
            warn!(planned_run_id, run_id = %run.id, "planned run not found, skipping propagation");
            return Ok(());
        };

        let mut payload = record.payload;
        if let Value::Object(fields) = &mut payload {
            fields.insert("state".to_string(), Value::String(state.as_str().to_string()));
            fields.insert("executionRunId".to_string(), Value::String(run.id.clone()));
        }

        self.store
            .raw()
            .update(RecordUpdate {
                record_id: record.record_id,
                schema_id: record.schema_id,
                payload,
                message: format!("Planned run {} {} via {}", planned_run_id, state.as_str(), run.id),
                skip_validation: false,
                expected_version: Some(record.version),
            })
            .await?;
        Ok(())
    }
}
