//! End-to-end execution flows through the wired engine.

mod common;

use std::time::Duration;

use serde_json::json;

use common::{http_adapter, memory_engine, seed_plan, test_config};
use labexec::domain::models::failure::codes;
use labexec::domain::models::{
    AdapterConfig, EventGraph, ExecutionMode, FailureClass, RunStatus, WorkerId,
};
use labexec::Engine;

fn simulated_engine() -> Engine {
    let mut config = test_config();
    let mut ot2 = AdapterConfig::new(ExecutionMode::Sidecar);
    ot2.simulate = true;
    config.adapters.insert("ot2".to_string(), ot2);
    memory_engine(config)
}

#[tokio::test]
async fn test_simulated_run_completes_on_first_poll() {
    let engine = simulated_engine();
    seed_plan(&engine, "RP-1", "ot2").await;

    let run = engine
        .orchestrator
        .execute_robot_plan("RP-1", None, Some(json!({"plateCount": 2})))
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.mode, ExecutionMode::Simulator);
    assert_eq!(run.external_run_id, Some(format!("SIM-{}", run.id)));

    let summary = engine.poller.poll_all().await.unwrap();
    assert_eq!(summary.polled, 1);
    assert_eq!(summary.completed, 1);

    let finished = engine.runs.require(&run.id).await.unwrap().entity;
    assert_eq!(finished.status, RunStatus::Completed);
    assert!(finished.completed_at.is_some());
    let graph_id = finished.materialized_event_graph_id.expect("event graph id");
    let graph = engine.store.get::<EventGraph>(&graph_id).await.unwrap().unwrap();
    assert_eq!(graph.entity.execution_run_id, run.id);

    // Terminal runs are not polled again.
    let summary = engine.poller.poll_all().await.unwrap();
    assert_eq!(summary.polled, 0);
}

#[tokio::test]
async fn test_unknown_status_fails_once_stale() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/runs")
        .with_status(200)
        .with_body(r#"{"runId": "H-77", "status": "accepted"}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/runs/H-77")
        .with_status(200)
        .with_body(r#"{"status": "recalibrating"}"#)
        .expect_at_least(1)
        .create_async()
        .await;

    let mut config = test_config();
    config.execution.strict_contracts = false;
    config.execution.max_run_duration_ms = 0;
    config.execution.stale_unknown_ms = 1;
    config
        .adapters
        .insert("hamilton".to_string(), http_adapter(ExecutionMode::DirectHttp, &server.url()));
    let engine = memory_engine(config);
    seed_plan(&engine, "RP-2", "hamilton").await;

    let run = engine.orchestrator.execute_robot_plan("RP-2", None, None).await.unwrap();
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.external_run_id.as_deref(), Some("H-77"));

    tokio::time::sleep(Duration::from_millis(20)).await;
    let summary = engine.poller.poll_all().await.unwrap();
    assert_eq!(summary.stale_unknown_failed, 1);
    assert_eq!(summary.timed_out, 0);

    let failed = engine.runs.require(&run.id).await.unwrap().entity;
    assert_eq!(failed.status, RunStatus::Failed);
    assert_eq!(failed.failure_class, Some(FailureClass::Unknown));
    assert_eq!(failed.failure_code.as_deref(), Some(codes::STALE_UNKNOWN_STATUS));
    assert_eq!(failed.retry_recommended, Some(false));
    assert_eq!(failed.last_status_raw.as_deref(), Some("recalibrating"));

    // Unknown-class failures are never retried.
    let tick = engine.workers.run_once(WorkerId::RetryWorker).await.unwrap();
    assert_eq!(tick.summary.unwrap()["retried"], 0);
}

#[tokio::test]
async fn test_refused_submit_is_retried_until_exhausted() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/runs")
        .with_status(500)
        .with_body("bridge exploded")
        .create_async()
        .await;

    let mut config = test_config();
    config.execution.max_retry_attempts = 2;
    config
        .adapters
        .insert("hamilton".to_string(), http_adapter(ExecutionMode::DirectHttp, &server.url()));
    let engine = memory_engine(config);
    seed_plan(&engine, "RP-3", "hamilton").await;

    let first = engine.orchestrator.execute_robot_plan("RP-3", None, None).await.unwrap();
    assert_eq!(first.status, RunStatus::Failed);
    assert_eq!(first.failure_class, Some(FailureClass::Transient));
    assert_eq!(first.failure_code.as_deref(), Some(codes::GENERIC_EXECUTION_FAILURE));
    assert_eq!(first.last_status_raw.as_deref(), Some("failed"));

    let tick = engine.workers.run_once(WorkerId::RetryWorker).await.unwrap();
    assert_eq!(tick.summary.as_ref().unwrap()["retried"], 1);

    let status = engine.orchestrator.execution_status("RP-3").await.unwrap();
    assert_eq!(status.attempts, 2);
    let second = status.latest.unwrap();
    assert_eq!(second.attempt, 2);
    assert_eq!(second.parent_execution_run_ref.as_deref(), Some(first.id.as_str()));
    assert_eq!(second.status, RunStatus::Failed);

    // The first run has a child now; the second one is at the cap.
    let tick = engine.workers.run_once(WorkerId::RetryWorker).await.unwrap();
    let summary = tick.summary.unwrap();
    assert_eq!(summary["retried"], 0);
    assert_eq!(summary["exhaustedMarked"], 1);
    assert!(engine.runs.require(&second.id).await.unwrap().entity.retry_exhausted);

    // Exhaustion surfaces as an incident exactly once.
    let scan = engine.incidents.scan().await.unwrap();
    assert_eq!(scan.created, 1);
    let again = engine.incidents.scan().await.unwrap();
    assert_eq!(again.created, 0);
}

#[tokio::test]
async fn test_strict_contract_violation_stores_no_run() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/runs")
        .with_status(200)
        .with_body(r#"{"runId": "H-1"}"#)
        .create_async()
        .await;

    let mut config = test_config();
    config
        .adapters
        .insert("hamilton".to_string(), http_adapter(ExecutionMode::DirectHttp, &server.url()));
    let engine = memory_engine(config);
    seed_plan(&engine, "RP-4", "hamilton").await;

    let err = engine
        .orchestrator
        .execute_robot_plan("RP-4", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONTRACT_VIOLATION");
    assert!(engine.runs.list_for_plan("RP-4").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_running_simulated_run() {
    let engine = simulated_engine();
    seed_plan(&engine, "RP-5", "ot2").await;
    let run = engine.orchestrator.execute_robot_plan("RP-5", None, None).await.unwrap();

    let canceled = engine.orchestrator.cancel_robot_plan("RP-5").await.unwrap();
    assert_eq!(canceled.id, run.id);
    assert_eq!(canceled.status, RunStatus::Canceled);
    assert!(canceled.cancellation_requested_at.is_some());
    assert_eq!(canceled.cancel_response.unwrap()["confirmed"], true);

    let err = engine.orchestrator.cancel_robot_plan("RP-5").await.unwrap_err();
    assert_eq!(err.code(), "BAD_REQUEST");
}

#[tokio::test]
async fn test_operations_snapshot_counts() {
    let engine = simulated_engine();
    seed_plan(&engine, "RP-6", "ot2").await;
    engine.orchestrator.execute_robot_plan("RP-6", None, None).await.unwrap();
    engine.orchestrator.execute_robot_plan("RP-6", None, None).await.unwrap();
    engine.poller.poll_all().await.unwrap();

    let snapshot = engine.operations.snapshot().await.unwrap();
    assert_eq!(snapshot.total_runs, 2);
    assert_eq!(snapshot.runs_by_status.get("completed"), Some(&2));
    assert_eq!(snapshot.retry_candidates, 0);
    assert_eq!(snapshot.open_incidents, 0);
}
