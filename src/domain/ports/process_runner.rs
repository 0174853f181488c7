use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::errors::DomainResult;

/// Exit code reported when a process was killed on timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Spawn-and-wait request.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<String>,
    pub stdin: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Process primitive used by sidecar backends.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion. A process still alive at `timeout` is killed and
    /// reported with `timed_out = true`.
    async fn run(&self, spec: ProcessSpec) -> DomainResult<ProcessOutput>;
}
