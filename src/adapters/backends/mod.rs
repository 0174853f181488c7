//! Execution backends, one per [`ExecutionMode`].

pub mod direct_http;
pub mod remote_executor;
pub mod sidecar;
pub mod simulator;
pub mod two_step_http;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AdapterConfig, Config, ExecutionMode, ExecutionRun};
use crate::domain::ports::{ExecutionBackend, HttpFetcher, ProcessRunner};
use crate::services::bridge_contract::BridgeContractParser;
use crate::services::task_service::ExecutionTaskService;

pub use direct_http::DirectHttpBackend;
pub use remote_executor::RemoteExecutorBackend;
pub use sidecar::SidecarBackend;
pub use simulator::SimulatorBackend;
pub use two_step_http::TwoStepHttpBackend;

/// Adapter settings shared by all backends.
#[derive(Debug, Clone, Default)]
pub struct AdapterDirectory {
    adapters: Arc<BTreeMap<String, AdapterConfig>>,
}

impl AdapterDirectory {
    pub fn new(adapters: BTreeMap<String, AdapterConfig>) -> Self {
        Self {
            adapters: Arc::new(adapters),
        }
    }

    pub fn get(&self, adapter_id: &str) -> Option<&AdapterConfig> {
        self.adapters.get(adapter_id)
    }

    pub fn require(&self, adapter_id: &str) -> DomainResult<&AdapterConfig> {
        self.get(adapter_id)
            .ok_or_else(|| DomainError::not_found("adapter", adapter_id))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    /// Base URL of an adapter, without a trailing slash.
    pub fn base_url(&self, adapter_id: &str) -> DomainResult<String> {
        self.require(adapter_id)?
            .base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/').to_string())
            .ok_or_else(|| DomainError::BadRequest(format!("adapter {adapter_id} has no base_url")))
    }
}

/// Expand `{baseUrl}` and `{runId}` in a URL template.
pub fn render_url(template: &str, base_url: &str, run_id: &str) -> String {
    template
        .replace("{baseUrl}", base_url)
        .replace("{runId}", run_id)
}

/// Id the bridge knows the run by.
pub fn bridge_run_id(run: &ExecutionRun) -> &str {
    run.external_run_id.as_deref().unwrap_or(&run.id)
}

pub(crate) fn adapter_timeout(adapter: &AdapterConfig) -> Duration {
    Duration::from_millis(adapter.timeout_ms)
}

/// Response body as JSON when it parses, as a string otherwise.
pub(crate) fn body_value(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}

/// Backends keyed by execution mode.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<ExecutionMode, Arc<dyn ExecutionBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend: Arc<dyn ExecutionBackend>) {
        self.backends.insert(backend.mode(), backend);
    }

    pub fn with(mut self, backend: Arc<dyn ExecutionBackend>) -> Self {
        self.register(backend);
        self
    }

    pub fn get(&self, mode: ExecutionMode) -> DomainResult<Arc<dyn ExecutionBackend>> {
        self.backends.get(&mode).cloned().ok_or_else(|| {
            DomainError::BadRequest(format!("no execution backend registered for mode {}", mode.as_str()))
        })
    }

    pub fn modes(&self) -> Vec<ExecutionMode> {
        let mut modes: Vec<_> = self.backends.keys().copied().collect();
        modes.sort_by_key(ExecutionMode::as_str);
        modes
    }

    /// All five backends wired from configuration.
    pub fn from_config(
        config: &Config,
        fetcher: Arc<dyn HttpFetcher>,
        runner: Arc<dyn ProcessRunner>,
        tasks: ExecutionTaskService,
    ) -> Self {
        let adapters = AdapterDirectory::new(config.adapters.clone());
        let parser = BridgeContractParser::new(config.execution.strict_contracts);
        let bridge = HttpBridge::new(fetcher, adapters.clone(), parser.clone());

        Self::new()
            .with(Arc::new(DirectHttpBackend::new(bridge.clone())))
            .with(Arc::new(TwoStepHttpBackend::new(bridge)))
            .with(Arc::new(SidecarBackend::new(
                runner,
                adapters,
                parser,
                Duration::from_millis(config.execution.sidecar_cancel_timeout_ms),
            )))
            .with(Arc::new(SimulatorBackend::new()))
            .with(Arc::new(RemoteExecutorBackend::new(tasks)))
    }
}

/// HTTP plumbing shared by the HTTP backends.
#[derive(Clone)]
pub struct HttpBridge {
    pub fetcher: Arc<dyn HttpFetcher>,
    pub adapters: AdapterDirectory,
    pub parser: BridgeContractParser,
}

impl HttpBridge {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, adapters: AdapterDirectory, parser: BridgeContractParser) -> Self {
        Self {
            fetcher,
            adapters,
            parser,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_url() {
        assert_eq!(
            render_url("{baseUrl}/runs/{runId}/status", "http://bridge:31950", "R-7"),
            "http://bridge:31950/runs/R-7/status"
        );
    }

    #[test]
    fn test_base_url_trims_slash() {
        let mut adapters = BTreeMap::new();
        let mut ot2 = AdapterConfig::new(ExecutionMode::TwoStepHttp);
        ot2.base_url = Some("http://ot2.local:31950/".into());
        adapters.insert("ot2".to_string(), ot2);
        adapters.insert("bare".to_string(), AdapterConfig::new(ExecutionMode::DirectHttp));
        let directory = AdapterDirectory::new(adapters);

        assert_eq!(directory.base_url("ot2").unwrap(), "http://ot2.local:31950");
        assert_eq!(directory.base_url("bare").unwrap_err().code(), "BAD_REQUEST");
        assert_eq!(directory.base_url("nope").unwrap_err().code(), "NOT_FOUND");
    }

    #[test]
    fn test_registry_lookup() {
        let registry = BackendRegistry::new().with(Arc::new(SimulatorBackend::new()));
        assert!(registry.get(ExecutionMode::Simulator).is_ok());
        assert!(registry.get(ExecutionMode::Sidecar).is_err());
        assert_eq!(registry.modes(), vec![ExecutionMode::Simulator]);
    }
}
