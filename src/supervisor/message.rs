//! Bus message envelope and the response shape carried by `agent_response`.
//!
//! A [`Message`] is the only unit that travels over the
//! [`MessageBus`](crate::supervisor::bus::MessageBus).  Request/response is
//! layered on top by the correlation id: a request carries one, and the
//! recipient's drain loop answers with an [`AGENT_RESPONSE`] message that
//! copies it and wraps an [`AgentResponse`] as payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Message type used for every correlated reply.
pub const AGENT_RESPONSE: &str = "agent_response";

// ── Message ───────────────────────────────────────────────────────────────────

/// A command or event routed by the bus.
///
/// `recipient` addresses one agent; when absent the message is a broadcast
/// delivered to topic subscribers.  `sender` is assigned by the runtime and
/// is never read from inbound JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Command/event discriminator (`"type"` on the wire).
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub(crate) sender: Option<String>,
    /// Set by `request_agent`; cancelled when the requester stops waiting.
    #[serde(skip)]
    pub(crate) cancel: Option<CancellationToken>,
}

impl Message {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), ..Self::default() }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Address the message to a single agent.
    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub(crate) fn from_agent(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub(crate) fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Name of the originating agent, if the runtime assigned one.
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient.is_none()
    }

    pub fn is_response(&self) -> bool {
        self.kind == AGENT_RESPONSE
    }

    /// `true` once the requester has given up on this message.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Build the reply to a correlated request.
    ///
    /// Addressed back to the requester when known; otherwise broadcast so
    /// external `agent_response` subscribers can observe it.
    pub(crate) fn response(
        correlation_id: String,
        sender: &str,
        reply_to: Option<String>,
        response: &AgentResponse,
    ) -> Self {
        Self {
            kind: AGENT_RESPONSE.to_string(),
            payload: Some(response.to_value()),
            correlation_id: Some(correlation_id),
            recipient: reply_to,
            sender: Some(sender.to_string()),
            cancel: None,
        }
    }
}

// ── AgentResponse ─────────────────────────────────────────────────────────────

/// Outcome of handling a request.
///
/// Well-formed responses carry `error` iff `success` is false.  Use the
/// constructors; [`AgentResponse::normalize`] repairs anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentResponse {
    pub fn ok(data: Value) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    pub fn ok_empty() -> Self {
        Self { success: true, data: None, error: None }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(error.into()) }
    }

    /// The structured failure every agent returns for a type it does not know.
    pub fn unknown_type(agent: &str, kind: &str) -> Self {
        Self::fail(format!("Unknown message type for {agent}: {kind}"))
    }

    pub fn is_well_formed(&self) -> bool {
        if self.success {
            self.error.is_none()
        } else {
            self.error.as_deref().is_some_and(|e| !e.trim().is_empty())
        }
    }

    /// Convert an invariant-violating response into a failure naming `agent`.
    pub fn normalize(self, agent: &str) -> Self {
        if self.is_well_formed() {
            self
        } else {
            Self::fail(format!("agent '{agent}' returned a malformed response"))
        }
    }

    /// Decode the payload of an inbound `agent_response`.
    ///
    /// A missing or undecodable payload becomes a failure naming `sender`.
    pub fn from_payload(payload: Option<Value>, sender: Option<&str>) -> Self {
        let sender = sender.unwrap_or("unknown");
        match payload {
            Some(value) => serde_json::from_value::<AgentResponse>(value)
                .map(|r| r.normalize(sender))
                .unwrap_or_else(|e| {
                    Self::fail(format!("malformed agent_response payload from '{sender}': {e}"))
                }),
            None => Self::fail(format!("empty agent_response payload from '{sender}'")),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// `Ok(data)` on success, `Err(error)` on failure.
    pub fn into_result(self) -> Result<Option<Value>, String> {
        if self.success {
            Ok(self.data)
        } else {
            Err(self.error.unwrap_or_else(|| "unknown error".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_format_is_camel_case_with_type_tag() {
        let msg = Message::new("query_knowledge")
            .with_payload(json!({ "query": "rust" }))
            .to("knowledge")
            .with_correlation_id("abc");
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "query_knowledge");
        assert_eq!(v["correlationId"], "abc");
        assert_eq!(v["recipient"], "knowledge");
        assert!(v.get("sender").is_none());
    }

    #[test]
    fn sender_is_not_accepted_from_json() {
        let msg: Message = serde_json::from_value(json!({
            "type": "noop",
            "sender": "impostor",
        }))
        .unwrap();
        assert_eq!(msg.sender(), None);
        assert!(msg.is_broadcast());
    }

    #[test]
    fn response_message_copies_correlation_id() {
        let resp = AgentResponse::ok(json!({ "x": 1 }));
        let msg = Message::response("abc".into(), "knowledge", Some("device".into()), &resp);
        assert!(msg.is_response());
        assert_eq!(msg.correlation_id.as_deref(), Some("abc"));
        assert_eq!(msg.sender(), Some("knowledge"));
        assert_eq!(msg.recipient.as_deref(), Some("device"));
        assert_eq!(msg.payload, Some(json!({ "success": true, "data": { "x": 1 } })));
    }

    #[test]
    fn unknown_type_names_agent_and_type() {
        let r = AgentResponse::unknown_type("UtilityAgent", "bogus");
        assert!(!r.success);
        let err = r.error.unwrap();
        assert!(err.contains("UtilityAgent"));
        assert!(err.contains("bogus"));
    }

    #[test]
    fn normalize_repairs_failure_without_error() {
        let r = AgentResponse { success: false, data: None, error: None }.normalize("device");
        assert!(!r.success);
        assert!(r.error.unwrap().contains("device"));
    }

    #[test]
    fn normalize_repairs_success_with_error() {
        let r = AgentResponse { success: true, data: None, error: Some("boom".into()) };
        assert!(!r.is_well_formed());
        assert!(!r.normalize("utility").success);
    }

    #[test]
    fn normalize_keeps_well_formed() {
        let r = AgentResponse::ok(json!(1));
        assert_eq!(r.clone().normalize("a"), r);
    }

    #[test]
    fn from_payload_rejects_garbage() {
        let r = AgentResponse::from_payload(Some(json!("nope")), Some("knowledge"));
        assert!(!r.success);
        assert!(r.error.unwrap().contains("knowledge"));

        let r = AgentResponse::from_payload(None, None);
        assert!(!r.success);
    }

    #[test]
    fn into_result_splits_outcome() {
        assert_eq!(AgentResponse::ok(json!(2)).into_result(), Ok(Some(json!(2))));
        assert_eq!(AgentResponse::fail("x").into_result(), Err("x".to_string()));
    }

    #[test]
    fn cancelled_token_marks_message() {
        let token = CancellationToken::new();
        let msg = Message::new("noop").with_cancel(token.clone());
        assert!(!msg.is_cancelled());
        token.cancel();
        assert!(msg.is_cancelled());
    }
}
