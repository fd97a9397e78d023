//! Device agent — clipboard, URL reading and sharing on the user's device.
//!
//! Owns no resources itself: clipboard and web access go through the
//! capability agent, and fetched pages are filed with the knowledge agent,
//! both via `request_agent`.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::AgentError;
use crate::services::capability::{CLIPBOARD, WEB_READER};
use crate::subsystems::agents::{Agent, AgentContext, HandleFuture, payload_as, require_text};
use crate::supervisor::message::{AgentResponse, Message};

pub const NAME: &str = "device";
const LABEL: &str = "DeviceAgent";

const CAPABILITY_AGENT: &str = "capability";
const KNOWLEDGE_AGENT: &str = "knowledge";

const CLIPBOARD_TIMEOUT: Duration = Duration::from_secs(5);
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest page excerpt stored as a knowledge answer.
const MAX_SAVED_CHARS: usize = 4_000;

pub struct DeviceAgent;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ClipboardAction {
    Get,
    Set,
}

#[derive(Debug, Deserialize)]
struct ClipboardArgs {
    action: ClipboardAction,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReadUrl {
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct Share {
    #[serde(default)]
    content: String,
    #[serde(default)]
    kind: Option<String>,
}

enum Command {
    Clipboard(ClipboardArgs),
    ReadUrl(ReadUrl),
    Share(Share),
}

impl Command {
    fn parse(message: Message) -> Result<Option<Self>, AgentError> {
        let kind = message.kind.as_str();
        let payload = message.payload;
        Ok(Some(match kind {
            "trigger_clipboard_action" => {
                if payload.as_ref().and_then(|p| p.get("action")).is_none() {
                    return Err(AgentError::invalid(format!("action is required for {kind}.")));
                }
                Command::Clipboard(payload_as(kind, payload)?)
            }
            "read_url" => Command::ReadUrl(payload_as(kind, payload)?),
            "share_content" => Command::Share(payload_as(kind, payload)?),
            _ => return Ok(None),
        }))
    }
}

impl Agent for DeviceAgent {
    fn name(&self) -> &str {
        NAME
    }

    fn handle(self: Arc<Self>, message: Message, ctx: AgentContext) -> HandleFuture {
        Box::pin(async move { self.dispatch(message, ctx).await })
    }
}

impl DeviceAgent {
    async fn dispatch(&self, message: Message, ctx: AgentContext) -> Result<AgentResponse, AgentError> {
        let kind = message.kind.clone();
        let Some(command) = Command::parse(message)? else {
            return Ok(AgentResponse::unknown_type(LABEL, &kind));
        };
        if let Err(unauthenticated) = ctx.owner_id() {
            return Ok(unauthenticated);
        }

        match command {
            Command::Clipboard(args) => clipboard(&ctx, args).await,
            Command::ReadUrl(args) => {
                require_text(&args.url, "url", &kind)?;
                read_url(&ctx, &args.url).await
            }
            Command::Share(args) => {
                require_text(&args.content, "content", &kind)?;
                let kind = args.kind.unwrap_or_else(|| "text".to_string());
                info!(%kind, len = args.content.len(), "content shared");
                Ok(AgentResponse::ok(json!({
                    "shared": true,
                    "kind": kind,
                    "length": args.content.chars().count(),
                })))
            }
        }
    }
}

async fn clipboard(ctx: &AgentContext, args: ClipboardArgs) -> Result<AgentResponse, AgentError> {
    let action = match args.action {
        ClipboardAction::Get => "getClipboard",
        ClipboardAction::Set => "setClipboard",
    };
    execute_capability(ctx, CLIPBOARD, action, json!({ "content": args.content }), CLIPBOARD_TIMEOUT).await
}

async fn read_url(ctx: &AgentContext, url: &str) -> Result<AgentResponse, AgentError> {
    let fetched = execute_capability(ctx, WEB_READER, "fetchContent", json!({ "url": url }), FETCH_TIMEOUT).await?;
    let page = match fetched.into_result() {
        Ok(page) => page.unwrap_or(Value::Null),
        Err(error) => return Ok(AgentResponse::fail(format!("Failed to read {url}: {error}"))),
    };

    let title = page.get("title").and_then(Value::as_str).unwrap_or(url).to_string();
    let excerpt: String = page
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .chars()
        .take(MAX_SAVED_CHARS)
        .collect();

    if !ctx.has_agent(KNOWLEDGE_AGENT) {
        debug!(%url, "knowledge agent not running — page not saved");
        return Ok(AgentResponse::ok(json!({ "url": url, "title": title, "saved": false })));
    }

    let saved = ctx
        .request_agent(
            KNOWLEDGE_AGENT,
            "save_knowledge",
            json!({ "question": title, "answer": excerpt, "source": url, "tags": ["web"] }),
        )
        .await?;
    Ok(match saved.into_result() {
        Ok(record) => AgentResponse::ok(json!({
            "url": url,
            "title": title,
            "saved": true,
            "recordId": record.as_ref().and_then(|r| r.get("id")).cloned(),
        })),
        Err(error) => AgentResponse::fail(format!("Read {url} but could not save it: {error}")),
    })
}

async fn execute_capability(
    ctx: &AgentContext,
    capability_id: &str,
    action: &str,
    params: Value,
    timeout: Duration,
) -> Result<AgentResponse, AgentError> {
    if !ctx.has_agent(CAPABILITY_AGENT) {
        return Err(AgentError::Unavailable(CAPABILITY_AGENT.to_string()));
    }
    ctx.request_agent_with_timeout(
        CAPABILITY_AGENT,
        "execute_capability",
        json!({ "capabilityId": capability_id, "action": action, "params": params }),
        timeout,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use crate::services::SystemContext;
    use crate::subsystems::agents::Requester;
    use crate::subsystems::agents::capability::CapabilityAgent;
    use crate::supervisor::AgentSystem;

    fn start(owner: Option<&str>, with_capability: bool) -> (AgentSystem, Requester) {
        let mut system = AgentSystem::new(SystemContext::in_memory(owner), BusConfig::default());
        system.spawn(Arc::new(DeviceAgent)).unwrap();
        if with_capability {
            system.spawn(Arc::new(CapabilityAgent)).unwrap();
        }
        let client = system.client("test").unwrap();
        (system, client)
    }

    #[tokio::test]
    async fn clipboard_goes_through_capability_agent() {
        let (system, client) = start(Some("u1"), true);
        let set = client
            .request_agent(NAME, "trigger_clipboard_action", json!({ "action": "set", "content": "hello" }))
            .await
            .unwrap();
        assert!(set.success, "{set:?}");

        let get = client
            .request_agent(NAME, "trigger_clipboard_action", json!({ "action": "get" }))
            .await
            .unwrap();
        assert_eq!(get.data.unwrap()["content"], "hello");
        system.shutdown().await;
    }

    #[tokio::test]
    async fn clipboard_requires_action() {
        let (system, client) = start(Some("u1"), true);
        let r = client.request_agent(NAME, "trigger_clipboard_action", json!({})).await.unwrap();
        assert_eq!(r.error.as_deref(), Some("action is required for trigger_clipboard_action."));
        system.shutdown().await;
    }

    #[tokio::test]
    async fn missing_capability_agent_is_reported() {
        let (system, client) = start(Some("u1"), false);
        let r = client
            .request_agent(NAME, "trigger_clipboard_action", json!({ "action": "get" }))
            .await
            .unwrap();
        assert_eq!(r.error.as_deref(), Some("agent 'capability' is not available"));
        system.shutdown().await;
    }

    #[tokio::test]
    async fn read_url_without_web_reader_fails_cleanly() {
        // The in-memory context has no web-reader capability.
        let (system, client) = start(Some("u1"), true);
        let r = client
            .request_agent(NAME, "read_url", json!({ "url": "https://example.com" }))
            .await
            .unwrap();
        assert!(!r.success);
        assert!(r.error.unwrap().contains("capability not found: web-reader"));
        system.shutdown().await;
    }

    #[tokio::test]
    async fn share_content_acknowledges() {
        let (system, client) = start(Some("u1"), false);
        let r = client
            .request_agent(NAME, "share_content", json!({ "content": "abc", "kind": "link" }))
            .await
            .unwrap();
        let data = r.data.unwrap();
        assert_eq!(data["shared"], true);
        assert_eq!(data["kind"], "link");
        assert_eq!(data["length"], 3);
        system.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_type_is_reported_even_without_owner() {
        let (system, client) = start(None, false);
        let r = client.request_agent(NAME, "vibrate", json!({})).await.unwrap();
        assert_eq!(r.error.as_deref(), Some("Unknown message type for DeviceAgent: vibrate"));
        system.shutdown().await;
    }
}
