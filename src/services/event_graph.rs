//! Result event graph materialization.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{EventGraph, ExecutionRun, RobotPlan, RunStatus};
use crate::domain::ports::EntityStore;

/// Derives the event graph of a completed run, at most once per run.
///
/// The graph id is derived from the run id, so two processes racing on
/// the same run converge on one record.
#[derive(Clone)]
pub struct EventGraphMaterializer {
    store: EntityStore,
}

impl EventGraphMaterializer {
    pub fn new(store: EntityStore) -> Self {
        Self { store }
    }

    pub fn graph_id_for(run_id: &str) -> String {
        format!("EVG-{}", run_id.strip_prefix("EXR-").unwrap_or(run_id))
    }

    /// Materialize the graph for `run` and set `materialized_event_graph_id`.
    /// The caller persists the run.
    pub async fn materialize(&self, run: &mut ExecutionRun) -> DomainResult<String> {
        if let Some(existing) = &run.materialized_event_graph_id {
            debug!(run_id = %run.id, graph_id = %existing, "event graph already materialized");
            return Ok(existing.clone());
        }
        if run.status != RunStatus::Completed {
            return Err(DomainError::BadRequest(format!(
                "execution run {} is {}, only completed runs are materialized",
                run.id,
                run.status.as_str()
            )));
        }

        let graph_id = Self::graph_id_for(&run.id);
        if self.store.get::<EventGraph>(&graph_id).await?.is_none() {
            let plan = self.store.get::<RobotPlan>(&run.robot_plan_id).await?;
            let graph = EventGraph {
                id: graph_id.clone(),
                execution_run_id: run.id.clone(),
                robot_plan_id: run.robot_plan_id.clone(),
                planned_run_id: run.planned_run_id.clone(),
                events: build_events(run, plan.as_ref().map(|p| &p.entity)),
                created_at: Utc::now(),
            };
            self.store
                .create(&graph, &format!("Materialize event graph for {}", run.id))
                .await?;
            info!(run_id = %run.id, graph_id = %graph_id, events = graph.events.len(), "event graph materialized");
        }

        run.materialized_event_graph_id = Some(graph_id.clone());
        Ok(graph_id)
    }
}

fn build_events(run: &ExecutionRun, plan: Option<&RobotPlan>) -> Vec<Value> {
    let mut events = vec![json!({
        "type": "run_started",
        "executionRunId": run.id,
        "at": run.started_at,
        "attempt": run.attempt,
    })];

    if let Some(plan) = plan {
        events.extend(plan.instructions.iter().enumerate().map(|(index, instruction)| {
            json!({
                "type": "instruction_executed",
                "index": index,
                "instruction": instruction,
            })
        }));
    }

    events.extend(run.measurements.iter().map(|m| json!({"type": "measurement", "data": m})));
    events.extend(run.artifacts.iter().map(|a| json!({"type": "artifact", "data": a})));
    if let Some(path) = &run.raw_data_path {
        events.push(json!({"type": "raw_data", "rawDataPath": path}));
    }

    events.push(json!({
        "type": "run_completed",
        "executionRunId": run.id,
        "at": run.completed_at,
    }));
    events
}
