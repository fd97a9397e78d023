//! Provider agents — one per configured HTTP gateway, named after it.
//!
//! Each serialises calls to its gateway through its own mailbox, so the
//! gateway's rate limit is honoured without callers coordinating.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::AgentError;
use crate::subsystems::agents::{Agent, AgentContext, HandleFuture, payload_as, require_text};
use crate::supervisor::message::{AgentResponse, Message};

pub struct ProviderAgent {
    gateway: String,
    label: String,
}

impl ProviderAgent {
    pub fn new(gateway: &str) -> Self {
        Self {
            gateway: gateway.to_string(),
            label: format!("ProviderAgent({gateway})"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallApi {
    #[serde(default)]
    endpoint: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl Agent for ProviderAgent {
    fn name(&self) -> &str {
        &self.gateway
    }

    fn init(&self, ctx: &AgentContext) -> Result<(), AgentError> {
        ctx.system()
            .gateway(&self.gateway)
            .map(|_| ())
            .map_err(AgentError::from)
    }

    fn handle(self: Arc<Self>, message: Message, ctx: AgentContext) -> HandleFuture {
        Box::pin(async move { self.dispatch(message, ctx).await })
    }
}

impl ProviderAgent {
    async fn dispatch(&self, message: Message, ctx: AgentContext) -> Result<AgentResponse, AgentError> {
        let kind = message.kind.as_str();
        match kind {
            "call_api" => {
                let call: CallApi = payload_as(kind, message.payload.clone())?;
                require_text(&call.endpoint, "endpoint", kind)?;
                let gateway = ctx.system().gateway(&self.gateway)?;
                debug!(gateway = %self.gateway, endpoint = %call.endpoint, method = %call.method, "calling api");
                let data = gateway.call(&call.endpoint, &call.method, call.body).await?;
                Ok(AgentResponse::ok(data))
            }
            "ping" => {
                let gateway = ctx.system().gateway(&self.gateway)?;
                gateway.ping().await?;
                Ok(AgentResponse::ok(json!({ "gateway": self.gateway, "reachable": true })))
            }
            other => Ok(AgentResponse::unknown_type(&self.label, other)),
        }
    }
}
