//! HTTP gateways used by provider agents.
//!
//! `HttpGateway::call(endpoint, method, body)` is the one operation.  The
//! `Rest` backend talks to a real base URL through `reqwest`; `Dummy` echoes
//! the request back so the full bus round-trip can be exercised without a
//! network or an API key.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, trace};

use crate::config::GatewayConfig;
use crate::services::ServiceError;

#[derive(Debug, Clone)]
pub enum HttpGateway {
    Rest(RestGateway),
    Dummy(DummyGateway),
}

impl HttpGateway {
    pub async fn call(&self, endpoint: &str, method: &str, body: Option<Value>) -> Result<Value, ServiceError> {
        match self {
            HttpGateway::Rest(g) => g.call(endpoint, method, body).await,
            HttpGateway::Dummy(g) => g.call(endpoint, method, body).await,
        }
    }

    /// Reachability probe.  Any HTTP status counts as reachable.
    pub async fn ping(&self) -> Result<(), ServiceError> {
        match self {
            HttpGateway::Rest(g) => g.ping().await,
            HttpGateway::Dummy(_) => Ok(()),
        }
    }
}

// ── Rate limiter ──────────────────────────────────────────────────────────────

/// Enforces a minimum interval between consecutive calls.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval: Duration,
    last: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, last: Arc::new(Mutex::new(None)) }
    }

    /// Wait until the interval since the previous call has elapsed.
    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.min_interval;
            if ready_at > Instant::now() {
                trace!(wait_ms = (ready_at - Instant::now()).as_millis() as u64, "rate limited");
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

// ── Rest ──────────────────────────────────────────────────────────────────────

/// `reqwest` client bound to one base URL.  Cheap to clone.
#[derive(Debug, Clone)]
pub struct RestGateway {
    client: Client,
    base_url: String,
    auth_header: Option<String>,
    api_key: Option<String>,
    limiter: RateLimiter,
}

impl RestGateway {
    /// `api_key` comes from the env var named in config, never from TOML.
    /// Sent as `Authorization: Bearer <key>` unless `auth_header` names a
    /// different header, in which case the raw key is sent there.
    pub fn new(config: &GatewayConfig, api_key: Option<String>) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ServiceError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_header: config.auth_header.clone(),
            api_key,
            limiter: RateLimiter::new(config.min_interval),
        })
    }

    pub fn url_for(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.api_key, &self.auth_header) {
            (None, _) => req,
            (Some(key), None) => req.bearer_auth(key),
            (Some(key), Some(header)) => req.header(header.as_str(), key.as_str()),
        }
    }

    pub async fn call(&self, endpoint: &str, method: &str, body: Option<Value>) -> Result<Value, ServiceError> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ServiceError::InvalidParams(format!("unsupported HTTP method: {method}")))?;
        let url = self.url_for(endpoint);

        self.limiter.acquire().await;
        debug!(%method, %url, has_body = body.is_some(), "gateway request");

        let mut req = self.authorize(self.client.request(method, &url));
        if let Some(body) = &body {
            req = req.json(body);
        }

        let response = req.send().await.map_err(|e| {
            error!(%url, error = %e, "gateway request failed (transport)");
            ServiceError::Request(e.to_string())
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ServiceError::Request(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            error!(%status, %url, "gateway returned HTTP error");
            return Err(ServiceError::Http { status: status.as_u16(), body: text });
        }

        trace!(%url, len = text.len(), "gateway response");
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    pub async fn ping(&self) -> Result<(), ServiceError> {
        self.authorize(self.client.head(&self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|_| ())
            .map_err(|e| ServiceError::Request(format!("unreachable: {e}")))
    }
}

// ── Dummy ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct DummyGateway;

impl DummyGateway {
    pub async fn call(&self, endpoint: &str, method: &str, body: Option<Value>) -> Result<Value, ServiceError> {
        Ok(json!({
            "echo": {
                "endpoint": endpoint,
                "method": method.to_ascii_uppercase(),
                "body": body,
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayKind;

    fn rest_config(base_url: &str, auth_header: Option<&str>) -> GatewayConfig {
        GatewayConfig {
            kind: GatewayKind::Http,
            base_url: base_url.to_string(),
            api_key_env: None,
            auth_header: auth_header.map(str::to_string),
            min_interval: Duration::ZERO,
            timeout_seconds: 5,
        }
    }

    #[tokio::test]
    async fn dummy_echoes_request() {
        let g = HttpGateway::Dummy(DummyGateway);
        let v = g.call("/items", "post", Some(json!({ "a": 1 }))).await.unwrap();
        assert_eq!(v["echo"]["endpoint"], "/items");
        assert_eq!(v["echo"]["method"], "POST");
        assert_eq!(v["echo"]["body"]["a"], 1);
        assert!(g.ping().await.is_ok());
    }

    #[test]
    fn url_joins_without_double_slash() {
        let g = RestGateway::new(&rest_config("https://api.example.com/", None), None).unwrap();
        assert_eq!(g.url_for("/v1/items"), "https://api.example.com/v1/items");
        assert_eq!(g.url_for("v1/items"), "https://api.example.com/v1/items");
    }

    #[test]
    fn auth_header_defaults_to_bearer() {
        let g = RestGateway::new(&rest_config("https://api.example.com", None), Some("k1".into())).unwrap();
        let req = g.authorize(g.client.get("https://api.example.com")).build().unwrap();
        assert_eq!(req.headers()["authorization"], "Bearer k1");

        let g = RestGateway::new(&rest_config("https://api.example.com", Some("x-api-key")), Some("k2".into())).unwrap();
        let req = g.authorize(g.client.get("https://api.example.com")).build().unwrap();
        assert_eq!(req.headers()["x-api-key"], "k2");
        assert!(req.headers().get("authorization").is_none());
    }

    #[tokio::test]
    async fn invalid_method_is_rejected_before_sending() {
        let g = RestGateway::new(&rest_config("http://127.0.0.1:9", None), None).unwrap();
        let err = g.call("/x", "not a method", None).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidParams(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limiter_spaces_calls() {
        let limiter = RateLimiter::new(Duration::from_millis(500));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limiter_does_not_wait_after_idle() {
        let limiter = RateLimiter::new(Duration::from_millis(500));
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        let before = Instant::now();
        limiter.acquire().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }
}
