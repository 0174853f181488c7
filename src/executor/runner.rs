//! Task runners and their registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ExecutionTask, FinalStatus, LogEntry};

/// What a runner reports back for one task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub final_status: FinalStatus,
    pub logs: Vec<LogEntry>,
    pub artifacts: Vec<Value>,
    pub measurements: Vec<Value>,
    /// Adapter-side ids, e.g. `externalRunId`.
    pub external: Option<Value>,
    /// Failure hint for a failed outcome.
    pub failure: Option<Value>,
}

impl TaskOutcome {
    pub fn completed() -> Self {
        Self {
            final_status: FinalStatus::Completed,
            logs: Vec::new(),
            artifacts: Vec::new(),
            measurements: Vec::new(),
            external: None,
            failure: None,
        }
    }

    pub fn failed(failure: Value) -> Self {
        Self {
            final_status: FinalStatus::Failed,
            failure: Some(failure),
            ..Self::completed()
        }
    }
}

/// Drives one task on an instrument.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, task: &ExecutionTask) -> DomainResult<TaskOutcome>;
}

/// Completes every task immediately with a synthetic raw-data artifact.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedRunner;

#[async_trait]
impl TaskRunner for SimulatedRunner {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn run(&self, task: &ExecutionTask) -> DomainResult<TaskOutcome> {
        let raw_data_path = format!("sim://{}/raw.json", task.id);
        let mut outcome = TaskOutcome::completed();
        outcome.logs = vec![
            LogEntry::info(format!("simulated run on {}", task.target_platform)),
            LogEntry::info("simulated run finished"),
        ];
        outcome.artifacts = vec![json!({"kind": "raw-data", "uri": raw_data_path})];
        outcome.external = Some(json!({
            "externalRunId": format!("SIM-{}", task.execution_run_id),
            "rawDataPath": raw_data_path,
        }));
        Ok(outcome)
    }
}

/// Runners keyed by adapter id, with a fallback for unknown adapters.
#[derive(Clone)]
pub struct RunnerRegistry {
    runners: HashMap<String, Arc<dyn TaskRunner>>,
    fallback: Option<Arc<dyn TaskRunner>>,
}

impl Default for RunnerRegistry {
    fn default() -> Self {
        Self::empty().with_fallback(Arc::new(SimulatedRunner))
    }
}

impl RunnerRegistry {
    /// Registry with no runners and no fallback.
    pub fn empty() -> Self {
        Self {
            runners: HashMap::new(),
            fallback: None,
        }
    }

    pub fn register(&mut self, adapter_id: impl Into<String>, runner: Arc<dyn TaskRunner>) {
        self.runners.insert(adapter_id.into(), runner);
    }

    pub fn with(mut self, adapter_id: impl Into<String>, runner: Arc<dyn TaskRunner>) -> Self {
        self.register(adapter_id, runner);
        self
    }

    pub fn with_fallback(mut self, runner: Arc<dyn TaskRunner>) -> Self {
        self.fallback = Some(runner);
        self
    }

    pub fn get(&self, adapter_id: &str) -> DomainResult<Arc<dyn TaskRunner>> {
        self.runners
            .get(adapter_id)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| DomainError::not_found("task runner", adapter_id))
    }

    /// Adapter ids with a dedicated runner, sorted.
    pub fn adapter_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.runners.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl TaskRunner for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(&self, _task: &ExecutionTask) -> DomainResult<TaskOutcome> {
            Ok(TaskOutcome::completed())
        }
    }

    #[test]
    fn test_registry_prefers_dedicated_runner() {
        let registry = RunnerRegistry::default().with("hamilton", Arc::new(Named("hamilton")));
        assert_eq!(registry.get("hamilton").unwrap().name(), "hamilton");
        assert_eq!(registry.get("ot2").unwrap().name(), "simulated");
        assert_eq!(registry.adapter_ids(), vec!["hamilton".to_string()]);
    }

    #[test]
    fn test_empty_registry_has_no_fallback() {
        let err = RunnerRegistry::empty().get("ot2").err().unwrap();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
