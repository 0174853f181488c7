//! Single-call HTTP bridge backend.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{BridgeOperation, ExecutionMode, ExecutionRun, HealthStatus};
use crate::domain::ports::{
    CancelOutcome, ExecutionBackend, HealthProbe, HttpRequest, RemoteStatus, SubmitOutcome,
    SubmitRequest,
};

use super::{adapter_timeout, body_value, bridge_run_id, render_url, HttpBridge};

const DEFAULT_STATUS_TEMPLATE: &str = "{baseUrl}/runs/{runId}";
const DEFAULT_CANCEL_TEMPLATE: &str = "{baseUrl}/runs/{runId}/cancel";
const DEFAULT_HEALTH_PATH: &str = "/health";

pub struct DirectHttpBackend {
    bridge: HttpBridge,
}

impl DirectHttpBackend {
    pub fn new(bridge: HttpBridge) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl ExecutionBackend for DirectHttpBackend {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::DirectHttp
    }

    async fn submit(&self, request: &SubmitRequest) -> DomainResult<SubmitOutcome> {
        let adapter = self.bridge.adapters.require(&request.adapter_id)?;
        let base_url = self.bridge.adapters.base_url(&request.adapter_id)?;
        let url = format!("{base_url}{}", adapter.submit_path);

        let body = json!({
            "runId": request.run_id,
            "adapterId": request.adapter_id,
            "robotPlanId": request.plan.id,
            "targetPlatform": request.plan.target_platform,
            "instructions": request.plan.instructions,
            "runtimeParameters": request.runtime_parameters,
            "attempt": request.attempt,
        });
        let response = self
            .bridge
            .fetcher
            .fetch(HttpRequest::post_json(url, &body, adapter_timeout(adapter)).with_headers(&adapter.headers))
            .await?;

        if !response.is_success() {
            warn!(adapter_id = %request.adapter_id, status = response.status, "bridge refused submit");
            return Ok(SubmitOutcome {
                stderr: Some(format!("HTTP {}: {}", response.status, response.body)),
                ..SubmitOutcome::rejected("failed")
            });
        }

        let parsed = self
            .bridge
            .parser
            .parse(BridgeOperation::Submit, &request.adapter_id, &response.body)?;
        debug!(adapter_id = %request.adapter_id, legacy = parsed.legacy, "submit accepted");
        Ok(SubmitOutcome::accepted(
            parsed.run_id,
            parsed.status.unwrap_or_else(|| "submitted".to_string()),
        ))
    }

    async fn status(&self, run: &ExecutionRun) -> DomainResult<RemoteStatus> {
        let adapter = self.bridge.adapters.require(&run.adapter_id)?;
        let base_url = self.bridge.adapters.base_url(&run.adapter_id)?;
        let template = adapter
            .status_url_template
            .as_deref()
            .unwrap_or(DEFAULT_STATUS_TEMPLATE);
        let url = render_url(template, &base_url, bridge_run_id(run));

        let response = self
            .bridge
            .fetcher
            .fetch(HttpRequest::get(url, adapter_timeout(adapter)).with_headers(&adapter.headers))
            .await?;
        if !response.is_success() {
            return Err(crate::domain::errors::DomainError::ExecutionFailed(format!(
                "status query for {} returned HTTP {}",
                run.id, response.status
            )));
        }

        let parsed = self
            .bridge
            .parser
            .parse(BridgeOperation::Status, &run.adapter_id, &response.body)?;
        let mut status = RemoteStatus::from_raw(parsed.status.unwrap_or_default());
        status.raw_data_path = parsed.raw_data_path;
        Ok(status)
    }

    async fn cancel(&self, run: &ExecutionRun) -> DomainResult<CancelOutcome> {
        let adapter = self.bridge.adapters.require(&run.adapter_id)?;
        let base_url = self.bridge.adapters.base_url(&run.adapter_id)?;
        let template = adapter
            .cancel_url_template
            .as_deref()
            .unwrap_or(DEFAULT_CANCEL_TEMPLATE);
        let url = render_url(template, &base_url, bridge_run_id(run));

        let body = json!({"runId": bridge_run_id(run)});
        let response = self
            .bridge
            .fetcher
            .fetch(HttpRequest::post_json(url, &body, adapter_timeout(adapter)).with_headers(&adapter.headers))
            .await?;

        let confirmed = response.is_success()
            && self
                .bridge
                .parser
                .parse(BridgeOperation::Cancel, &run.adapter_id, &response.body)
                .is_ok();
        Ok(CancelOutcome {
            confirmed,
            response: json!({"httpStatus": response.status, "body": body_value(&response.body)}),
        })
    }

    async fn health(&self, adapter_id: &str) -> DomainResult<HealthProbe> {
        let adapter = self.bridge.adapters.require(adapter_id)?;
        let base_url = self.bridge.adapters.base_url(adapter_id)?;
        let path = adapter.health_path.as_deref().unwrap_or(DEFAULT_HEALTH_PATH);
        Ok(probe_http(&self.bridge, &format!("{base_url}{path}"), adapter).await)
    }
}

/// GET a health endpoint: 2xx healthy, other statuses degraded,
/// unreachable down.
pub(crate) async fn probe_http(
    bridge: &HttpBridge,
    url: &str,
    adapter: &crate::domain::models::AdapterConfig,
) -> HealthProbe {
    match bridge
        .fetcher
        .fetch(HttpRequest::get(url, adapter_timeout(adapter)).with_headers(&adapter.headers))
        .await
    {
        Ok(response) if response.is_success() => HealthProbe {
            status: HealthStatus::Healthy,
            detail: None,
        },
        Ok(response) => HealthProbe {
            status: HealthStatus::Degraded,
            detail: Some(format!("HTTP {}", response.status)),
        },
        Err(e) => HealthProbe {
            status: HealthStatus::Down,
            detail: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::backends::AdapterDirectory;
    use crate::adapters::http::ReqwestHttpFetcher;
    use crate::domain::models::{AdapterConfig, RemoteRunState, RobotPlan, BRIDGE_CONTRACT_VERSION};
    use crate::services::bridge_contract::BridgeContractParser;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn backend(base_url: &str, strict: bool) -> DirectHttpBackend {
        let mut adapter = AdapterConfig::new(ExecutionMode::DirectHttp);
        adapter.base_url = Some(base_url.to_string());
        adapter.status_url_template = Some("{baseUrl}/api/runs/{runId}/status".into());
        let mut adapters = BTreeMap::new();
        adapters.insert("hamilton".to_string(), adapter);
        DirectHttpBackend::new(HttpBridge::new(
            Arc::new(ReqwestHttpFetcher::new()),
            AdapterDirectory::new(adapters),
            BridgeContractParser::new(strict),
        ))
    }

    fn request() -> SubmitRequest {
        SubmitRequest {
            run_id: "EXR-1".into(),
            adapter_id: "hamilton".into(),
            plan: RobotPlan {
                id: "RP-1".into(),
                target_platform: "hamilton".into(),
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
    async fn test_submit_strict_envelope() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/runs")
            .with_status(200)
            .with_body(
                json!({
                    "contractVersion": BRIDGE_CONTRACT_VERSION,
                    "adapterId": "hamilton",
                    "operation": "submit",
                    "result": {"runId": "H-1", "status": "queued"},
                })
                .to_string(),
            )
            .create_async()
            .await;

        let outcome = backend(&server.url(), true).submit(&request()).await.unwrap();
        mock.assert_async().await;
        assert!(outcome.accepted);
        assert_eq!(outcome.external_run_id.as_deref(), Some("H-1"));
        assert_eq!(outcome.status_raw.as_deref(), Some("queued"));
    }

    #[tokio::test]
    async fn test_submit_legacy_payload_rejected_in_strict_mode() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/runs")
            .with_status(200)
            .with_body(r#"{"runId": "H-1", "status": "queued"}"#)
            .create_async()
            .await;

        let err = backend(&server.url(), true).submit(&request()).await.unwrap_err();
        assert_eq!(err.code(), "CONTRACT_VIOLATION");

        let outcome = backend(&server.url(), false).submit(&request()).await.unwrap();
        assert_eq!(outcome.external_run_id.as_deref(), Some("H-1"));
    }

    #[tokio::test]
    async fn test_submit_http_error_is_rejection() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/runs")
            .with_status(503)
            .with_body("temporarily unavailable")
            .create_async()
            .await;

        let outcome = backend(&server.url(), true).submit(&request()).await.unwrap();
        assert!(!outcome.accepted);
        assert!(outcome.stderr.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_status_uses_template() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/runs/H-1/status")
            .with_status(200)
            .with_body(r#"{"run": {"status": "succeeded", "rawDataPath": "/data/H-1.csv"}}"#)
            .create_async()
            .await;

        let mut run = ExecutionRun::new("EXR-1".into(), "RP-1", "hamilton", ExecutionMode::DirectHttp);
        run.external_run_id = Some("H-1".into());
        let status = backend(&server.url(), false).status(&run).await.unwrap();
        assert_eq!(status.state, RemoteRunState::Succeeded);
        assert_eq!(status.raw_data_path.as_deref(), Some("/data/H-1.csv"));
    }

    #[tokio::test]
    async fn test_health_statuses() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/health").with_status(500).create_async().await;
        let probe = backend(&server.url(), true).health("hamilton").await.unwrap();
        assert_eq!(probe.status, HealthStatus::Degraded);
    }
}
