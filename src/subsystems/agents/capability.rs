//! Capability agent — single entry point to the capability registry.
//!
//! Other agents reach local resources and third-party adapters by sending
//! `execute_capability` here rather than holding the registry themselves.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::AgentError;
use crate::subsystems::agents::{Agent, AgentContext, HandleFuture, payload_as, require_text};
use crate::supervisor::message::{AgentResponse, Message};

pub const NAME: &str = "capability";
const LABEL: &str = "CapabilityAgent";

pub struct CapabilityAgent;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteCapability {
    #[serde(default)]
    pub capability_id: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub params: Value,
}

impl Agent for CapabilityAgent {
    fn name(&self) -> &str {
        NAME
    }

    fn handle(self: Arc<Self>, message: Message, ctx: AgentContext) -> HandleFuture {
        Box::pin(async move { self.dispatch(message, ctx).await })
    }
}

impl CapabilityAgent {
    async fn dispatch(&self, message: Message, ctx: AgentContext) -> Result<AgentResponse, AgentError> {
        let kind = message.kind.as_str();
        if !matches!(kind, "execute_capability" | "list_capabilities") {
            return Ok(AgentResponse::unknown_type(LABEL, kind));
        }
        let owner = match ctx.owner_id() {
            Ok(owner) => owner,
            Err(unauthenticated) => return Ok(unauthenticated),
        };
        let capabilities = &ctx.system().capabilities;

        if kind == "list_capabilities" {
            return Ok(AgentResponse::ok(json!(capabilities.list())));
        }
        let args: ExecuteCapability = payload_as(kind, message.payload.clone())?;
        require_text(&args.capability_id, "capabilityId", kind)?;
        require_text(&args.action, "action", kind)?;
        let result = capabilities
            .execute(&args.capability_id, &args.action, &args.params, owner)
            .await?;
        Ok(AgentResponse::ok(result))
    }
}
