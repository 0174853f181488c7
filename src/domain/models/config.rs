use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::execution_run::ExecutionMode;
use super::worker_lease::WorkerId;

/// Main configuration structure for labexec
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Run supervision and retry policy
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Background worker intervals and leases
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Adapter bridges keyed by adapter id
    #[serde(default)]
    pub adapters: BTreeMap<String, AdapterConfig>,

    /// Out-of-process executor settings
    #[serde(default)]
    pub executor: ExecutorConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".labexec/labexec.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Rotation: daily, hourly, never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Run supervision and retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExecutionConfig {
    /// Reject bridge payloads that do not match the versioned contract
    #[serde(default = "default_true")]
    pub strict_contracts: bool,

    /// Maximum run duration before the poller times a run out (0 disables)
    #[serde(default = "default_max_run_duration_ms")]
    pub max_run_duration_ms: u64,

    /// How long a remote status may stay unrecognised before failing the run
    #[serde(default = "default_stale_unknown_ms")]
    pub stale_unknown_ms: u64,

    /// Attempt cap across a retry chain
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Retry candidates handled per retry-worker tick
    #[serde(default = "default_retry_batch_limit")]
    pub retry_batch_limit: usize,

    /// Timeout for cancel-flavoured sidecar invocations
    #[serde(default = "default_sidecar_cancel_timeout_ms")]
    pub sidecar_cancel_timeout_ms: u64,

    /// Worker error streak that opens an incident
    #[serde(default = "default_worker_error_threshold")]
    pub worker_error_threshold: u32,
}

const fn default_true() -> bool {
    true
}

const fn default_max_run_duration_ms() -> u64 {
    6 * 60 * 60 * 1000
}

const fn default_stale_unknown_ms() -> u64 {
    15 * 60 * 1000
}

const fn default_max_retry_attempts() -> u32 {
    3
}

const fn default_retry_batch_limit() -> usize {
    10
}

const fn default_sidecar_cancel_timeout_ms() -> u64 {
    15_000
}

const fn default_worker_error_threshold() -> u32 {
    3
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            strict_contracts: true,
            max_run_duration_ms: default_max_run_duration_ms(),
            stale_unknown_ms: default_stale_unknown_ms(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_batch_limit: default_retry_batch_limit(),
            sidecar_cancel_timeout_ms: default_sidecar_cancel_timeout_ms(),
            worker_error_threshold: default_worker_error_threshold(),
        }
    }
}

/// Interval and lease settings for one worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    pub interval_ms: u64,

    /// Overrides the default lease TTL of `max(30s, 3 x interval)`
    #[serde(default)]
    pub lease_ttl_ms: Option<u64>,

    /// Start this worker when serving
    #[serde(default = "default_true")]
    pub autostart: bool,
}

impl WorkerConfig {
    fn with_interval(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            lease_ttl_ms: None,
            autostart: true,
        }
    }
}

/// Background worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkersConfig {
    #[serde(default = "default_poller")]
    pub execution_poller: WorkerConfig,

    #[serde(default = "default_retry_worker")]
    pub retry_worker: WorkerConfig,

    #[serde(default = "default_incident_scanner")]
    pub incident_scanner: WorkerConfig,
}

fn default_poller() -> WorkerConfig {
    WorkerConfig::with_interval(5_000)
}

fn default_retry_worker() -> WorkerConfig {
    WorkerConfig::with_interval(30_000)
}

fn default_incident_scanner() -> WorkerConfig {
    WorkerConfig::with_interval(60_000)
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            execution_poller: default_poller(),
            retry_worker: default_retry_worker(),
            incident_scanner: default_incident_scanner(),
        }
    }
}

impl WorkersConfig {
    pub fn for_worker(&self, worker_id: WorkerId) -> &WorkerConfig {
        match worker_id {
            WorkerId::ExecutionPoller => &self.execution_poller,
            WorkerId::RetryWorker => &self.retry_worker,
            WorkerId::IncidentScanner => &self.incident_scanner,
        }
    }
}

/// Bridge settings for one adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AdapterConfig {
    /// Execution backend for this adapter
    pub mode: ExecutionMode,

    #[serde(default)]
    pub base_url: Option<String>,

    /// Submit path appended to the base URL
    #[serde(default = "default_submit_path")]
    pub submit_path: String,

    /// Status URL, `{baseUrl}` and `{runId}` are substituted
    #[serde(default)]
    pub status_url_template: Option<String>,

    /// Cancel URL, `{baseUrl}` and `{runId}` are substituted
    #[serde(default)]
    pub cancel_url_template: Option<String>,

    #[serde(default)]
    pub health_path: Option<String>,

    /// Extra headers sent with every bridge request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub sidecar_command: Option<String>,

    #[serde(default)]
    pub sidecar_args: Vec<String>,

    #[serde(default)]
    pub sidecar_cwd: Option<String>,

    #[serde(default = "default_adapter_timeout_ms")]
    pub timeout_ms: u64,

    /// Route this adapter to the in-process simulator
    #[serde(default)]
    pub simulate: bool,

    /// Outbound request rate limit
    #[serde(default)]
    pub requests_per_second: Option<u32>,
}

fn default_submit_path() -> String {
    "/runs".to_string()
}

const fn default_adapter_timeout_ms() -> u64 {
    30_000
}

impl AdapterConfig {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            base_url: None,
            submit_path: default_submit_path(),
            status_url_template: None,
            cancel_url_template: None,
            health_path: None,
            headers: BTreeMap::new(),
            sidecar_command: None,
            sidecar_args: Vec::new(),
            sidecar_cwd: None,
            timeout_ms: default_adapter_timeout_ms(),
            simulate: false,
            requests_per_second: None,
        }
    }

    /// Mode after applying the simulation toggle.
    pub fn effective_mode(&self) -> ExecutionMode {
        if self.simulate {
            ExecutionMode::Simulator
        } else {
            self.mode
        }
    }
}

/// Out-of-process executor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExecutorConfig {
    #[serde(default = "default_executor_id")]
    pub executor_id: String,

    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<String>,

    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,

    #[serde(default = "default_lease_duration_ms")]
    pub lease_duration_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_executor_id() -> String {
    "labexec-executor-01".to_string()
}

fn default_capabilities() -> Vec<String> {
    vec!["simulator".to_string()]
}

const fn default_max_tasks() -> usize {
    1
}

const fn default_lease_duration_ms() -> u64 {
    60_000
}

const fn default_poll_interval_ms() -> u64 {
    2_000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            executor_id: default_executor_id(),
            capabilities: default_capabilities(),
            max_tasks: default_max_tasks(),
            lease_duration_ms: default_lease_duration_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}
