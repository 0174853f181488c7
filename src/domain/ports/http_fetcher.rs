use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::errors::DomainResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

/// Outbound HTTP request to a bridge.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout,
        }
    }

    pub fn post_json(url: impl Into<String>, body: &serde_json::Value, timeout: Duration) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers,
            body: Some(body.to_string()),
            timeout,
        }
    }

    pub fn with_headers(mut self, headers: &BTreeMap<String, String>) -> Self {
        for (k, v) in headers {
            self.headers.insert(k.clone(), v.clone());
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP fetch primitive used by bridge backends.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    /// Perform a request. Non-2xx responses are returned, not raised;
    /// transport failures and timeouts are errors.
    async fn fetch(&self, request: HttpRequest) -> DomainResult<HttpResponse>;
}
