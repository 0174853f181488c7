//! Common test utilities for integration tests
//!
//! Provides shared fixtures used across multiple integration test files.

#![allow(dead_code)]

use std::sync::Arc;

use labexec::adapters::{InMemoryRecordStore, ReqwestHttpFetcher, TokioProcessRunner};
use labexec::domain::models::{AdapterConfig, Config, ExecutionMode, RobotPlan};
use labexec::domain::ports::RecordStore;
use labexec::Engine;

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Config with no autostarted workers and no adapters.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.workers.execution_poller.autostart = false;
    config.workers.retry_worker.autostart = false;
    config.workers.incident_scanner.autostart = false;
    config
}

/// An HTTP adapter pointing at `base_url`.
pub fn http_adapter(mode: ExecutionMode, base_url: &str) -> AdapterConfig {
    let mut adapter = AdapterConfig::new(mode);
    adapter.base_url = Some(base_url.to_string());
    adapter.timeout_ms = 2_000;
    adapter
}

/// Engine over a fresh in-memory record store.
pub fn memory_engine(config: Config) -> Engine {
    engine_over(config, Arc::new(InMemoryRecordStore::new()))
}

pub fn engine_over(config: Config, records: Arc<dyn RecordStore>) -> Engine {
    Engine::new(
        config,
        records,
        Arc::new(ReqwestHttpFetcher::new()),
        Arc::new(TokioProcessRunner::new()),
    )
}

pub fn plan(id: &str, adapter_id: &str) -> RobotPlan {
    RobotPlan {
        id: id.to_string(),
        target_platform: adapter_id.to_string(),
        adapter_id: None,
        planned_run_id: None,
        execution_mode: None,
        instructions: vec![serde_json::json!({"op": "aspirate", "volumeUl": 50})],
    }
}

pub async fn seed_plan(engine: &Engine, id: &str, adapter_id: &str) -> RobotPlan {
    let plan = plan(id, adapter_id);
    engine
        .store
        .create(&plan, "Seed robot plan")
        .await
        .expect("failed to seed plan");
    plan
}
