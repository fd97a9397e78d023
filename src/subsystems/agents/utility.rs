//! Utility agent — small self-contained helpers (dates, text effects, ids).

use std::sync::Arc;

use chrono::Local;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::error::AgentError;
use crate::subsystems::agents::{Agent, AgentContext, HandleFuture, payload_as, require_text};
use crate::supervisor::message::{AgentResponse, Message};

pub const NAME: &str = "utility";
const LABEL: &str = "UtilityAgent";

const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct UtilityAgent;

#[derive(Debug, Deserialize)]
struct InsertDate {
    #[serde(default)]
    format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApplyTextEffect {
    #[serde(default)]
    text: String,
    #[serde(default)]
    effect: String,
}

enum Command {
    InsertDate(InsertDate),
    ApplyTextEffect(ApplyTextEffect),
    GenerateId,
}

impl Command {
    fn parse(message: Message) -> Result<Option<Self>, AgentError> {
        let kind = message.kind.as_str();
        Ok(Some(match kind {
            "insert_date" => Command::InsertDate(payload_as(kind, message.payload)?),
            "apply_text_effect" => Command::ApplyTextEffect(payload_as(kind, message.payload)?),
            "generate_id" => Command::GenerateId,
            _ => return Ok(None),
        }))
    }
}

impl Agent for UtilityAgent {
    fn name(&self) -> &str {
        NAME
    }

    fn handle(self: Arc<Self>, message: Message, _ctx: AgentContext) -> HandleFuture {
        Box::pin(async move { self.dispatch(message) })
    }
}

impl UtilityAgent {
    fn dispatch(&self, message: Message) -> Result<AgentResponse, AgentError> {
        let kind = message.kind.clone();
        let Some(command) = Command::parse(message)? else {
            return Ok(AgentResponse::unknown_type(LABEL, &kind));
        };

        match command {
            Command::InsertDate(args) => insert_date(args.format.as_deref()),
            Command::ApplyTextEffect(args) => {
                require_text(&args.text, "text", &kind)?;
                require_text(&args.effect, "effect", &kind)?;
                let output = apply_effect(&args.text, &args.effect)?;
                Ok(AgentResponse::ok(json!({
                    "output": output,
                    "message": format!("Applied text effect: {}", args.effect),
                })))
            }
            Command::GenerateId => Ok(AgentResponse::ok(json!({ "id": Uuid::new_v4().to_string() }))),
        }
    }
}

fn insert_date(format: Option<&str>) -> Result<AgentResponse, AgentError> {
    use std::fmt::Write as _;

    let format = format.filter(|f| !f.trim().is_empty()).unwrap_or(DEFAULT_DATE_FORMAT);
    let mut date = String::new();
    // chrono reports a bad specifier as a fmt::Error while rendering.
    write!(date, "{}", Local::now().format(format))
        .map_err(|_| AgentError::invalid(format!("invalid date format: {format}")))?;
    debug!(%format, "date inserted");
    Ok(AgentResponse::ok(json!({
        "date": date,
        "message": format!("Inserted date: {date}"),
    })))
}

fn apply_effect(text: &str, effect: &str) -> Result<String, AgentError> {
    Ok(match effect {
        "bold" => format!("**{text}**"),
        "italic" => format!("*{text}*"),
        "underline" => format!("<u>{text}</u>"),
        "strikethrough" => format!("~~{text}~~"),
        "code" => format!("`{text}`"),
        "uppercase" => text.to_uppercase(),
        "lowercase" => text.to_lowercase(),
        other => return Err(AgentError::invalid(format!("unknown text effect: {other}"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use crate::services::SystemContext;
    use crate::supervisor::AgentSystem;

    async fn system() -> (AgentSystem, crate::subsystems::agents::Requester) {
        let mut system = AgentSystem::new(SystemContext::in_memory(None), BusConfig::default());
        system.spawn(Arc::new(UtilityAgent)).unwrap();
        let client = system.client("test").unwrap();
        (system, client)
    }

    #[test]
    fn effects() {
        assert_eq!(apply_effect("hi", "bold").unwrap(), "**hi**");
        assert_eq!(apply_effect("hi", "underline").unwrap(), "<u>hi</u>");
        assert_eq!(apply_effect("Hi", "uppercase").unwrap(), "HI");
        assert!(apply_effect("hi", "sparkle").is_err());
    }

    #[tokio::test]
    async fn apply_text_effect_round_trip() {
        let (system, client) = system().await;
        let r = client
            .request_agent(NAME, "apply_text_effect", json!({ "text": "hi", "effect": "italic" }))
            .await
            .unwrap();
        assert!(r.success);
        assert_eq!(r.data.unwrap()["output"], "*hi*");
        system.shutdown().await;
    }

    #[tokio::test]
    async fn missing_text_is_a_failure_response() {
        let (system, client) = system().await;
        let r = client
            .request_agent(NAME, "apply_text_effect", json!({ "effect": "bold" }))
            .await
            .unwrap();
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("text is required for apply_text_effect."));
        system.shutdown().await;
    }

    #[tokio::test]
    async fn insert_date_honours_format() {
        let (system, client) = system().await;
        let r = client.request_agent(NAME, "insert_date", json!({ "format": "%Y" })).await.unwrap();
        let date = r.data.unwrap()["date"].as_str().unwrap().to_string();
        assert_eq!(date.len(), 4);
        assert!(date.chars().all(|c| c.is_ascii_digit()));
        system.shutdown().await;
    }

    #[tokio::test]
    async fn generate_id_is_unique() {
        let (system, client) = system().await;
        let a = client.request_agent(NAME, "generate_id", json!({})).await.unwrap();
        let b = client.request_agent(NAME, "generate_id", json!({})).await.unwrap();
        assert_ne!(a.data.unwrap()["id"], b.data.unwrap()["id"]);
        system.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_type_names_agent() {
        let (system, client) = system().await;
        let r = client.request_agent(NAME, "qr_generate", json!({})).await.unwrap();
        assert_eq!(r.error.as_deref(), Some("Unknown message type for UtilityAgent: qr_generate"));
        system.shutdown().await;
    }
}
