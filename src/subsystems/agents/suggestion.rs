//! Suggestion agent — proactive suggestions from the user's knowledge.
//!
//! Answers `get_suggestions` directly, and listens for the
//! `context_changed` broadcast so UIs can receive `suggestions_updated`
//! without asking.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::subsystems::agents::{Agent, AgentContext, HandleFuture, payload_as};
use crate::supervisor::message::{AgentResponse, Message};

pub const NAME: &str = "suggestion";
const LABEL: &str = "SuggestionAgent";

/// Broadcast this agent listens to.
pub const CONTEXT_CHANGED: &str = "context_changed";
/// Broadcast this agent emits.
pub const SUGGESTIONS_UPDATED: &str = "suggestions_updated";

const KNOWLEDGE_AGENT: &str = "knowledge";
const DEFAULT_LIMIT: usize = 5;
const SNIPPET_CHARS: usize = 120;

#[derive(Default)]
pub struct SuggestionAgent {
    /// Context of the last `suggestions_updated` broadcast.
    last_context: Mutex<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    context: String,
    #[serde(default)]
    limit: Option<usize>,
}

impl Agent for SuggestionAgent {
    fn name(&self) -> &str {
        NAME
    }

    fn subscriptions(&self) -> &'static [&'static str] {
        &[CONTEXT_CHANGED]
    }

    fn handle(self: Arc<Self>, message: Message, ctx: AgentContext) -> HandleFuture {
        Box::pin(async move { self.dispatch(message, ctx).await })
    }
}

impl SuggestionAgent {
    async fn dispatch(&self, message: Message, ctx: AgentContext) -> Result<AgentResponse, AgentError> {
        let kind = message.kind.as_str();
        match kind {
            "get_suggestions" => {
                let req: Request = payload_as(kind, message.payload.clone())?;
                let suggestions = self.suggest(&ctx, &req).await;
                Ok(AgentResponse::ok(suggestions))
            }
            CONTEXT_CHANGED => {
                let req: Request = payload_as(kind, message.payload.clone())?;
                if self.is_current(&req.context) {
                    debug!(context = %req.context, "context unchanged, no update");
                    return Ok(AgentResponse::ok_empty());
                }
                let suggestions = self.suggest(&ctx, &req).await;
                // Failed lookups stay retryable for the same context.
                if suggestions.get("knowledgeError").is_none() {
                    self.remember(&req.context);
                }
                ctx.publish(Message::new(SUGGESTIONS_UPDATED).with_payload(json!({
                    "context": req.context,
                    "suggestions": suggestions["suggestions"],
                })));
                Ok(AgentResponse::ok_empty())
            }
            other => Ok(AgentResponse::unknown_type(LABEL, other)),
        }
    }

    fn is_current(&self, context: &str) -> bool {
        let last = self.last_context.lock().unwrap_or_else(PoisonError::into_inner);
        last.as_deref() == Some(context)
    }

    fn remember(&self, context: &str) {
        *self.last_context.lock().unwrap_or_else(PoisonError::into_inner) = Some(context.to_string());
    }

    /// Knowledge failures degrade to an empty list with `knowledgeError` set.
    async fn suggest(&self, ctx: &AgentContext, req: &Request) -> Value {
        let context = req.context.trim();
        if context.is_empty() {
            return json!({ "suggestions": [] });
        }
        if !ctx.has_agent(KNOWLEDGE_AGENT) {
            let error = AgentError::Unavailable(KNOWLEDGE_AGENT.to_string()).to_string();
            debug!(%context, "knowledge agent not running");
            return json!({ "suggestions": [], "knowledgeError": error });
        }
        let limit = req.limit.unwrap_or(DEFAULT_LIMIT);

        let response = ctx
            .request_agent(KNOWLEDGE_AGENT, "query_knowledge", json!({ "query": context, "limit": limit }))
            .await;

        let records = match response.map(AgentResponse::into_result) {
            Ok(Ok(Some(Value::Array(records)))) => records,
            Ok(Ok(_)) => Vec::new(),
            Ok(Err(error)) => {
                warn!(%error, "knowledge query failed");
                return json!({ "suggestions": [], "knowledgeError": error });
            }
            Err(e) => {
                warn!(error = %e, "knowledge unreachable");
                return json!({ "suggestions": [], "knowledgeError": e.to_string() });
            }
        };

        let suggestions: Vec<Value> = records.iter().map(to_suggestion).collect();
        debug!(%context, count = suggestions.len(), "suggestions built");
        json!({ "suggestions": suggestions })
    }
}

fn to_suggestion(record: &Value) -> Value {
    let snippet: String = record["answer"]
        .as_str()
        .unwrap_or_default()
        .chars()
        .take(SNIPPET_CHARS)
        .collect();
    json!({
        "id": record["id"],
        "title": record["question"],
        "snippet": snippet,
        "source": record["source"],
    })
}
