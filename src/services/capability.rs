//! Capability registry — local resources and third-party adapters reachable
//! through `execute(capability_id, action, params, owner_id)`.
//!
//! Two capabilities are built in:
//!
//! | id                 | actions                         |
//! |--------------------|---------------------------------|
//! | `device-clipboard` | `getClipboard`, `setClipboard`  |
//! | `web-reader`       | `fetchContent`                  |

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::debug;

use crate::services::ServiceError;

pub const CLIPBOARD: &str = "device-clipboard";
pub const WEB_READER: &str = "web-reader";

/// Largest body `fetchContent` returns, in characters.
const MAX_FETCH_CHARS: usize = 100_000;

/// Listing entry returned by [`CapabilityRegistry::list`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CapabilityInfo {
    pub id: String,
    pub actions: Vec<String>,
}

// ── Capability enum ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Capability {
    Clipboard(ClipboardCapability),
    Web(WebCapability),
}

impl Capability {
    pub fn clipboard() -> Self {
        Capability::Clipboard(ClipboardCapability::default())
    }

    pub fn web(timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Capability::Web(WebCapability::new(timeout)?))
    }

    pub fn id(&self) -> &'static str {
        match self {
            Capability::Clipboard(_) => CLIPBOARD,
            Capability::Web(_) => WEB_READER,
        }
    }

    pub fn actions(&self) -> &'static [&'static str] {
        match self {
            Capability::Clipboard(_) => &["getClipboard", "setClipboard"],
            Capability::Web(_) => &["fetchContent"],
        }
    }

    async fn execute(&self, action: &str, params: &Value, owner_id: &str) -> Result<Value, ServiceError> {
        match (self, action) {
            (Capability::Clipboard(c), "getClipboard") => Ok(c.get(owner_id).await),
            (Capability::Clipboard(c), "setClipboard") => {
                let content = text_param(params, "content")?;
                c.set(owner_id, content).await;
                Ok(json!({ "written": true }))
            }
            (Capability::Web(w), "fetchContent") => w.fetch(text_param(params, "url")?).await,
            _ => Err(ServiceError::UnknownAction {
                capability: self.id().to_string(),
                action: action.to_string(),
            }),
        }
    }
}

fn text_param<'a>(params: &'a Value, field: &str) -> Result<&'a str, ServiceError> {
    params
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ServiceError::InvalidParams(format!("'{field}' must be a string")))
}

// ── Registry ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    entries: BTreeMap<&'static str, Capability>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.entries.insert(capability.id(), capability);
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn list(&self) -> Vec<CapabilityInfo> {
        self.entries
            .values()
            .map(|c| CapabilityInfo {
                id: c.id().to_string(),
                actions: c.actions().iter().map(|a| a.to_string()).collect(),
            })
            .collect()
    }

    pub async fn execute(
        &self,
        capability_id: &str,
        action: &str,
        params: &Value,
        owner_id: &str,
    ) -> Result<Value, ServiceError> {
        let capability = self
            .entries
            .get(capability_id)
            .ok_or_else(|| ServiceError::UnknownCapability(capability_id.to_string()))?;
        debug!(capability = %capability_id, %action, %owner_id, "executing capability");
        capability.execute(action, params, owner_id).await
    }
}

// ── Clipboard ─────────────────────────────────────────────────────────────────

/// Per-owner clipboard slots.
#[derive(Debug, Clone, Default)]
pub struct ClipboardCapability {
    slots: Arc<RwLock<HashMap<String, String>>>,
}

impl ClipboardCapability {
    async fn get(&self, owner_id: &str) -> Value {
        let slots = self.slots.read().await;
        json!({ "content": slots.get(owner_id).cloned().unwrap_or_default() })
    }

    async fn set(&self, owner_id: &str, content: &str) {
        self.slots.write().await.insert(owner_id.to_string(), content.to_string());
    }
}

// ── Web reader ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct WebCapability {
    client: Client,
}

impl WebCapability {
    pub fn new(timeout: Duration) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn fetch(&self, url: &str) -> Result<Value, ServiceError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| ServiceError::InvalidParams(format!("invalid url '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ServiceError::InvalidParams(format!("unsupported url scheme: {}", parsed.scheme())));
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| ServiceError::Request(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::Request(format!("failed to read body: {e}")))?;
        if !status.is_success() {
            return Err(ServiceError::Http { status: status.as_u16(), body });
        }

        let content: String = body.chars().take(MAX_FETCH_CHARS).collect();
        Ok(json!({
            "url": url,
            "title": extract_title(&content),
            "content": content,
        }))
    }
}

/// Text of the first `<title>` element, if any.
fn extract_title(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let open = lower.find("<title")?;
    let start = open + lower[open..].find('>')? + 1;
    let end = start + lower[start..].find("</title")?;
    let title = html[start..end].trim();
    (!title.is_empty()).then(|| title.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::new()
            .with(Capability::clipboard())
            .with(Capability::web(Duration::from_secs(1)).unwrap())
    }

    #[tokio::test]
    async fn clipboard_is_per_owner() {
        let reg = registry();
        reg.execute(CLIPBOARD, "setClipboard", &json!({ "content": "hi" }), "u1").await.unwrap();

        let mine = reg.execute(CLIPBOARD, "getClipboard", &json!({}), "u1").await.unwrap();
        assert_eq!(mine["content"], "hi");
        let theirs = reg.execute(CLIPBOARD, "getClipboard", &json!({}), "u2").await.unwrap();
        assert_eq!(theirs["content"], "");
    }

    #[tokio::test]
    async fn set_requires_content() {
        let err = registry()
            .execute(CLIPBOARD, "setClipboard", &json!({}), "u1")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn unknown_capability_and_action() {
        let reg = registry();
        assert!(matches!(
            reg.execute("nope", "x", &json!({}), "u1").await.unwrap_err(),
            ServiceError::UnknownCapability(_)
        ));
        assert!(matches!(
            reg.execute(CLIPBOARD, "fetchContent", &json!({}), "u1").await.unwrap_err(),
            ServiceError::UnknownAction { .. }
        ));
    }

    #[tokio::test]
    async fn fetch_rejects_non_http_urls() {
        let reg = registry();
        let err = reg
            .execute(WEB_READER, "fetchContent", &json!({ "url": "file:///etc/passwd" }), "u1")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidParams(_)));
        let err = reg
            .execute(WEB_READER, "fetchContent", &json!({ "url": "not a url" }), "u1")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidParams(_)));
    }

    #[test]
    fn list_is_sorted_by_id() {
        let ids: Vec<_> = registry().list().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![CLIPBOARD, WEB_READER]);
    }

    #[test]
    fn title_extraction() {
        assert_eq!(
            extract_title("<html><head><TITLE> Hello </TITLE></head></html>").as_deref(),
            Some("Hello")
        );
        assert_eq!(extract_title("<p>no title</p>"), None);
    }
}
