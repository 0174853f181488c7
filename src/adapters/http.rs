//! reqwest-backed HTTP fetcher for adapter bridges.
//!
//! Outbound calls are rate limited per bridge base URL with a
//! fixed-window token bucket, configured from each adapter's
//! `requests_per_second`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::Mutex;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::AdapterConfig;
use crate::domain::ports::{HttpFetcher, HttpMethod, HttpRequest, HttpResponse};

/// Fixed-window token bucket.
///
/// Allows up to `capacity` requests per `window`; an exhausted bucket makes
/// [`acquire`](RateLimiter::acquire) sleep until the window rolls over.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    tokens: u32,
    window: Duration,
    window_start: Instant,
}

impl RateLimiter {
    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            tokens: capacity,
            window,
            window_start: Instant::now(),
        }
    }

    pub fn per_second(requests_per_second: u32) -> Self {
        Self::new(requests_per_second, Duration::from_secs(1))
    }

    pub async fn acquire(&mut self) {
        let elapsed = self.window_start.elapsed();
        if elapsed >= self.window {
            self.tokens = self.capacity;
            self.window_start = Instant::now();
        }

        if self.tokens > 0 {
            self.tokens -= 1;
            return;
        }

        let remaining = self.window.saturating_sub(elapsed);
        tracing::debug!(
            sleep_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
            "bridge rate limit reached, sleeping"
        );
        tokio::time::sleep(remaining).await;
        self.tokens = self.capacity - 1;
        self.window_start = Instant::now();
    }
}

/// [`HttpFetcher`] over a shared `reqwest::Client`.
#[derive(Clone, Default)]
pub struct ReqwestHttpFetcher {
    http: Client,
    /// Limiters keyed by URL prefix.
    limiters: Arc<BTreeMap<String, Arc<Mutex<RateLimiter>>>>,
}

impl ReqwestHttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a fetcher with one limiter per adapter that sets both a base
    /// URL and `requests_per_second`.
    pub fn from_adapters(adapters: &BTreeMap<String, AdapterConfig>) -> Self {
        let limiters = adapters
            .values()
            .filter_map(|adapter| {
                let base_url = adapter.base_url.as_ref()?;
                let rps = adapter.requests_per_second?;
                Some((
                    base_url.trim_end_matches('/').to_string(),
                    Arc::new(Mutex::new(RateLimiter::per_second(rps))),
                ))
            })
            .collect();
        Self {
            http: Client::new(),
            limiters: Arc::new(limiters),
        }
    }

    fn limiter_for(&self, url: &str) -> Option<&Arc<Mutex<RateLimiter>>> {
        self.limiters
            .iter()
            .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, limiter)| limiter)
    }
}

#[async_trait]
impl HttpFetcher for ReqwestHttpFetcher {
    async fn fetch(&self, request: HttpRequest) -> DomainResult<HttpResponse> {
        if let Some(limiter) = self.limiter_for(&request.url) {
            limiter.lock().await.acquire().await;
        }

        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .http
            .request(method, &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            let kind = if e.is_timeout() { "timeout" } else { "transport error" };
            DomainError::ExecutionFailed(format!("{kind} calling {}: {e}", request.url))
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            DomainError::ExecutionFailed(format!("failed to read response from {}: {e}", request.url))
        })?;

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ExecutionMode;

    #[tokio::test]
    async fn test_fetch_returns_non_success_status() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/runs/R-1")
            .with_status(503)
            .with_body("busy")
            .create_async()
            .await;

        let fetcher = ReqwestHttpFetcher::new();
        let response = fetcher
            .fetch(HttpRequest::get(
                format!("{}/runs/R-1", server.url()),
                Duration::from_secs(5),
            ))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, 503);
        assert_eq!(response.body, "busy");
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_post_sends_headers_and_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/runs")
            .match_header("x-api-key", "secret")
            .match_body(mockito::Matcher::Json(serde_json::json!({"planId": "RP-1"})))
            .with_status(201)
            .with_body("{}")
            .create_async()
            .await;

        let mut headers = BTreeMap::new();
        headers.insert("x-api-key".to_string(), "secret".to_string());
        let request = HttpRequest::post_json(
            format!("{}/runs", server.url()),
            &serde_json::json!({"planId": "RP-1"}),
            Duration::from_secs(5),
        )
        .with_headers(&headers);

        let response = ReqwestHttpFetcher::new().fetch(request).await.unwrap();
        mock.assert_async().await;
        assert!(response.is_success());
    }

    #[test]
    fn test_limiter_matches_longest_prefix() {
        let mut adapters = BTreeMap::new();
        let mut a = AdapterConfig::new(ExecutionMode::DirectHttp);
        a.base_url = Some("http://bridge.local/".into());
        a.requests_per_second = Some(2);
        adapters.insert("a".to_string(), a);
        let mut b = AdapterConfig::new(ExecutionMode::DirectHttp);
        b.base_url = Some("http://other.local".into());
        adapters.insert("b".to_string(), b);

        let fetcher = ReqwestHttpFetcher::from_adapters(&adapters);
        assert!(fetcher.limiter_for("http://bridge.local/runs").is_some());
        assert!(fetcher.limiter_for("http://other.local/runs").is_none());
    }

    #[tokio::test]
    async fn test_rate_limiter_consumes_tokens() {
        let mut limiter = RateLimiter::new(2, Duration::from_millis(50));
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(limiter.tokens, 0);
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
