//! Two-step HTTP bridge: create a run, then start it with a play action.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{BridgeOperation, ExecutionMode, ExecutionRun};
use crate::domain::ports::{
    CancelOutcome, ExecutionBackend, HealthProbe, HttpRequest, RemoteStatus, SubmitOutcome,
    SubmitRequest,
};

use super::direct_http::probe_http;
use super::{adapter_timeout, body_value, bridge_run_id, render_url, HttpBridge};

const DEFAULT_STATUS_TEMPLATE: &str = "{baseUrl}/runs/{runId}";
const ACTIONS_TEMPLATE: &str = "{baseUrl}/runs/{runId}/actions";
const DEFAULT_HEALTH_PATH: &str = "/health";

pub struct TwoStepHttpBackend {
    bridge: HttpBridge,
}

impl TwoStepHttpBackend {
    pub fn new(bridge: HttpBridge) -> Self {
        Self { bridge }
    }

    async fn post_action(
        &self,
        adapter_id: &str,
        remote_run_id: &str,
        action: &str,
    ) -> DomainResult<crate::domain::ports::HttpResponse> {
        let adapter = self.bridge.adapters.require(adapter_id)?;
        let base_url = self.bridge.adapters.base_url(adapter_id)?;
        let url = render_url(ACTIONS_TEMPLATE, &base_url, remote_run_id);
        let body = json!({"data": {"actionType": action}});
        self.bridge
            .fetcher
            .fetch(HttpRequest::post_json(url, &body, adapter_timeout(adapter)).with_headers(&adapter.headers))
            .await
    }
}

#[async_trait]
impl ExecutionBackend for TwoStepHttpBackend {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::TwoStepHttp
    }

    async fn submit(&self, request: &SubmitRequest) -> DomainResult<SubmitOutcome> {
        let adapter = self.bridge.adapters.require(&request.adapter_id)?;
        let base_url = self.bridge.adapters.base_url(&request.adapter_id)?;

        let body = json!({
            "data": {
                "runId": request.run_id,
                "robotPlanId": request.plan.id,
                "instructions": request.plan.instructions,
                "runtimeParameters": request.runtime_parameters,
                "attempt": request.attempt,
            }
        });
        let created = self
            .bridge
            .fetcher
            .fetch(
                HttpRequest::post_json(format!("{base_url}{}", adapter.submit_path), &body, adapter_timeout(adapter))
                    .with_headers(&adapter.headers),
            )
            .await?;
        if !created.is_success() {
            warn!(adapter_id = %request.adapter_id, status = created.status, "bridge refused run creation");
            return Ok(SubmitOutcome {
                stderr: Some(format!("HTTP {}: {}", created.status, created.body)),
                ..SubmitOutcome::rejected("failed")
            });
        }

        let parsed = self
            .bridge
            .parser
            .parse(BridgeOperation::Submit, &request.adapter_id, &created.body)?;
        let Some(remote_run_id) = parsed.run_id else {
            return Err(DomainError::ExecutionFailed(format!(
                "bridge {} created a run without an id",
                request.adapter_id
            )));
        };

        let started = self.post_action(&request.adapter_id, &remote_run_id, "play").await?;
        if !started.is_success() {
            warn!(
                adapter_id = %request.adapter_id,
                remote_run_id = %remote_run_id,
                status = started.status,
                "bridge refused play action"
            );
            return Ok(SubmitOutcome {
                external_run_id: Some(remote_run_id),
                stderr: Some(format!("HTTP {}: {}", started.status, started.body)),
                ..SubmitOutcome::rejected("failed")
            });
        }

        debug!(adapter_id = %request.adapter_id, remote_run_id = %remote_run_id, "run created and started");
        Ok(SubmitOutcome::accepted(
            Some(remote_run_id),
            parsed.status.unwrap_or_else(|| "running".to_string()),
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
            return Err(DomainError::ExecutionFailed(format!(
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
        let response = self
            .post_action(&run.adapter_id, bridge_run_id(run), "stop")
            .await?;
        Ok(CancelOutcome {
            confirmed: response.is_success(),
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
