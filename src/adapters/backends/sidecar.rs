//! Sidecar bridge: one spawned process per operation.
//!
//! The configured command is invoked as `<command> <args..> <operation>`
//! with a JSON request on stdin; stdout carries the bridge response.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AdapterConfig, BridgeOperation, ExecutionMode, ExecutionRun, HealthStatus};
use crate::domain::ports::{
    CancelOutcome, ExecutionBackend, HealthProbe, ProcessOutput, ProcessRunner, ProcessSpec,
    RemoteStatus, SubmitOutcome, SubmitRequest,
};
use crate::services::bridge_contract::BridgeContractParser;

use super::{adapter_timeout, body_value, bridge_run_id, AdapterDirectory};

pub struct SidecarBackend {
    runner: Arc<dyn ProcessRunner>,
    adapters: AdapterDirectory,
    parser: BridgeContractParser,
    cancel_timeout: Duration,
}

impl SidecarBackend {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        adapters: AdapterDirectory,
        parser: BridgeContractParser,
        cancel_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            adapters,
            parser,
            cancel_timeout,
        }
    }

    async fn invoke(
        &self,
        adapter_id: &str,
        operation: &str,
        input: &Value,
        timeout: Option<Duration>,
    ) -> DomainResult<ProcessOutput> {
        let adapter = self.adapters.require(adapter_id)?;
        let command = adapter.sidecar_command.clone().ok_or_else(|| {
            DomainError::BadRequest(format!("adapter {adapter_id} has no sidecar_command"))
        })?;

        let mut args = adapter.sidecar_args.clone();
        args.push(operation.to_string());
        let mut env = BTreeMap::new();
        env.insert("LABEXEC_ADAPTER_ID".to_string(), adapter_id.to_string());
        env.insert("LABEXEC_OPERATION".to_string(), operation.to_string());

        debug!(adapter_id, operation, command = %command, "invoking sidecar");
        self.runner
            .run(ProcessSpec {
                command,
                args,
                env,
                cwd: adapter.sidecar_cwd.clone(),
                stdin: Some(input.to_string()),
                timeout: timeout.unwrap_or_else(|| adapter_timeout(adapter)),
            })
            .await
    }

    fn adapter(&self, adapter_id: &str) -> DomainResult<&AdapterConfig> {
        self.adapters.require(adapter_id)
    }
}

fn run_input(run: &ExecutionRun) -> Value {
    json!({
        "runId": bridge_run_id(run),
        "executionRunId": run.id,
        "adapterId": run.adapter_id,
        "robotPlanId": run.robot_plan_id,
    })
}

fn failed_status(output: &ProcessOutput) -> &'static str {
    if output.timed_out {
        "timeout"
    } else {
        "failed"
    }
}

#[async_trait]
impl ExecutionBackend for SidecarBackend {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Sidecar
    }

    async fn submit(&self, request: &SubmitRequest) -> DomainResult<SubmitOutcome> {
        let input = json!({
            "runId": request.run_id,
            "adapterId": request.adapter_id,
            "robotPlanId": request.plan.id,
            "targetPlatform": request.plan.target_platform,
            "instructions": request.plan.instructions,
            "runtimeParameters": request.runtime_parameters,
            "attempt": request.attempt,
        });
        let output = self.invoke(&request.adapter_id, "submit", &input, None).await?;

        if !output.success() {
            warn!(
                adapter_id = %request.adapter_id,
                exit_code = output.exit_code,
                timed_out = output.timed_out,
                "sidecar submit failed"
            );
            return Ok(SubmitOutcome {
                exit_code: Some(output.exit_code),
                stderr: Some(output.stderr.clone()),
                ..SubmitOutcome::rejected(failed_status(&output))
            });
        }

        let parsed = self
            .parser
            .parse(BridgeOperation::Submit, &request.adapter_id, &output.stdout)?;
        Ok(SubmitOutcome {
            exit_code: Some(output.exit_code),
            ..SubmitOutcome::accepted(
                parsed.run_id,
                parsed.status.unwrap_or_else(|| "submitted".to_string()),
            )
        })
    }

    async fn status(&self, run: &ExecutionRun) -> DomainResult<RemoteStatus> {
        let output = self
            .invoke(&run.adapter_id, "status", &run_input(run), None)
            .await?;
        if !output.success() {
            return Err(DomainError::ExecutionFailed(format!(
                "sidecar status for {} exited with {}: {}",
                run.id,
                output.exit_code,
                output.stderr.trim()
            )));
        }

        let parsed = self
            .parser
            .parse(BridgeOperation::Status, &run.adapter_id, &output.stdout)?;
        let mut status = RemoteStatus::from_raw(parsed.status.unwrap_or_default());
        status.raw_data_path = parsed.raw_data_path;
        status.exit_code = Some(output.exit_code);
        if !output.stderr.trim().is_empty() {
            status.stderr = Some(output.stderr);
        }
        Ok(status)
    }

    async fn cancel(&self, run: &ExecutionRun) -> DomainResult<CancelOutcome> {
        let output = self
            .invoke(&run.adapter_id, "cancel", &run_input(run), Some(self.cancel_timeout))
            .await?;
        let confirmed = output.success()
            && self
                .parser
                .parse(BridgeOperation::Cancel, &run.adapter_id, &output.stdout)
                .is_ok();
        Ok(CancelOutcome {
            confirmed,
            response: json!({
                "exitCode": output.exit_code,
                "timedOut": output.timed_out,
                "stdout": body_value(&output.stdout),
                "stderr": output.stderr,
            }),
        })
    }

    async fn health(&self, adapter_id: &str) -> DomainResult<HealthProbe> {
        self.adapter(adapter_id)?;
        let output = match self
            .invoke(adapter_id, "health", &json!({"adapterId": adapter_id}), None)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                return Ok(HealthProbe {
                    status: HealthStatus::Down,
                    detail: Some(e.to_string()),
                })
            }
        };
        Ok(if output.success() {
            HealthProbe {
                status: HealthStatus::Healthy,
                detail: None,
            }
        } else {
            HealthProbe {
                status: HealthStatus::Degraded,
                detail: Some(format!("exit {}: {}", output.exit_code, output.stderr.trim())),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::process::TokioProcessRunner;
    use crate::domain::models::{RemoteRunState, RobotPlan, BRIDGE_CONTRACT_VERSION};
    use crate::domain::ports::TIMEOUT_EXIT_CODE;

    fn backend(script: &str, timeout_ms: u64) -> SidecarBackend {
        let mut adapter = AdapterConfig::new(ExecutionMode::Sidecar);
        adapter.sidecar_command = Some("sh".into());
        adapter.sidecar_args = vec!["-c".into(), script.into(), "sidecar".into()];
        adapter.timeout_ms = timeout_ms;
        let mut adapters = BTreeMap::new();
        adapters.insert("integra".to_string(), adapter);
        SidecarBackend::new(
            Arc::new(TokioProcessRunner::default().with_terminate_grace(Duration::from_millis(200))),
            AdapterDirectory::new(adapters),
            BridgeContractParser::strict(),
            Duration::from_millis(500),
        )
    }

    fn request() -> SubmitRequest {
        SubmitRequest {
            run_id: "EXR-5".into(),
            adapter_id: "integra".into(),
            plan: RobotPlan {
                id: "RP-5".into(),
                target_platform: "integra".into(),
                adapter_id: None,
                planned_run_id: None,
                execution_mode: None,
                instructions: vec![],
            },
            runtime_parameters: json!({}),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_submit_parses_stdout_envelope() {
        let script = format!(
            r#"cat >/dev/null; echo '{{"contractVersion":"{BRIDGE_CONTRACT_VERSION}","adapterId":"integra","operation":"'"$1"'","result":{{"runId":"S-1","status":"queued"}}}}'"#
        );
        let outcome = backend(&script, 5_000).submit(&request()).await.unwrap();
        assert!(outcome.accepted);
        assert_eq!(outcome.external_run_id.as_deref(), Some("S-1"));
        assert_eq!(outcome.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_submit_nonzero_exit_is_rejection() {
        let outcome = backend("echo 'device offline' >&2; exit 2", 5_000)
            .submit(&request())
            .await
            .unwrap();
        assert!(!outcome.accepted);
        assert_eq!(outcome.exit_code, Some(2));
        assert_eq!(outcome.status_raw.as_deref(), Some("failed"));
        assert!(outcome.stderr.unwrap().contains("device offline"));
    }

    #[tokio::test]
    async fn test_submit_timeout_reports_timeout_status() {
        let outcome = backend("exec sleep 30", 200).submit(&request()).await.unwrap();
        assert!(!outcome.accepted);
        assert_eq!(outcome.exit_code, Some(TIMEOUT_EXIT_CODE));
        assert_eq!(outcome.status_raw.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_status_operation_argument() {
        let script = format!(
            r#"cat >/dev/null; echo '{{"contractVersion":"{BRIDGE_CONTRACT_VERSION}","adapterId":"integra","operation":"'"$1"'","result":{{"status":"succeeded"}}}}'"#
        );
        let run = ExecutionRun::new("EXR-5".into(), "RP-5", "integra", ExecutionMode::Sidecar);
        let status = backend(&script, 5_000).status(&run).await.unwrap();
        assert_eq!(status.state, RemoteRunState::Succeeded);
    }

    #[tokio::test]
    async fn test_missing_command_is_bad_request() {
        let mut adapters = BTreeMap::new();
        adapters.insert("bare".to_string(), AdapterConfig::new(ExecutionMode::Sidecar));
        let backend = SidecarBackend::new(
            Arc::new(TokioProcessRunner::default()),
            AdapterDirectory::new(adapters),
            BridgeContractParser::strict(),
            Duration::from_secs(1),
        );
        let run = ExecutionRun::new("EXR-5".into(), "RP-5", "bare", ExecutionMode::Sidecar);
        assert_eq!(backend.status(&run).await.unwrap_err().code(), "BAD_REQUEST");
        assert_eq!(backend.health("bare").await.unwrap().status, HealthStatus::Down);
    }
}
