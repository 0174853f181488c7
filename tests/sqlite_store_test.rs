//! The engine over a file-backed SQLite record store.

mod common;

use common::{seed_plan, test_config};
use labexec::domain::models::{AdapterConfig, Config, ExecutionMode, RunStatus, WorkerId};
use labexec::Engine;

fn sqlite_config(dir: &tempfile::TempDir) -> Config {
    let mut config = test_config();
    config.database.path = dir
        .path()
        .join("nested/labexec.db")
        .to_string_lossy()
        .into_owned();
    let mut sim = AdapterConfig::new(ExecutionMode::Simulator);
    sim.simulate = true;
    config.adapters.insert("sim".to_string(), sim);
    config
}

#[tokio::test]
async fn test_runs_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = sqlite_config(&dir);

    let run_id = {
        let engine = Engine::open(config.clone(), false).await.unwrap();
        seed_plan(&engine, "RP-1", "sim").await;
        let run = engine.orchestrator.execute_robot_plan("RP-1", None, None).await.unwrap();
        engine.poller.poll_all().await.unwrap();
        run.id
    };
    assert!(dir.path().join("nested/labexec.db").exists());

    let reopened = Engine::open(config, false).await.unwrap();
    let stored = reopened.runs.require(&run_id).await.unwrap();
    assert_eq!(stored.entity.status, RunStatus::Completed);
    assert!(stored.version >= 2);

    let status = reopened.orchestrator.execution_status("RP-1").await.unwrap();
    assert_eq!(status.attempts, 1);
}

#[tokio::test]
async fn test_worker_lease_persists_in_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(sqlite_config(&dir), false).await.unwrap();

    engine
        .workers
        .start(WorkerId::ExecutionPoller, Some(60_000), false)
        .await
        .unwrap();
    engine.workers.stop_all(true).await;

    let leases = engine.workers.list_leases().await.unwrap();
    assert_eq!(leases.len(), 1);
    assert_eq!(leases[0].worker_id, WorkerId::ExecutionPoller);
    assert!(!leases[0].running);

    let status = engine.workers.status(WorkerId::ExecutionPoller).await.unwrap();
    assert!(!status.degraded);
}

#[tokio::test]
async fn test_ephemeral_engine_leaves_no_database() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(sqlite_config(&dir), true).await.unwrap();
    seed_plan(&engine, "RP-2", "sim").await;
    engine.orchestrator.execute_robot_plan("RP-2", None, None).await.unwrap();

    assert!(!dir.path().join("nested").exists());
}
