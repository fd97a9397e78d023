//! Application-wide error types.
//!
//! [`AppError`] covers startup and lifecycle failures (config, logging,
//! registration).  [`AgentError`] is the fault type that lives inside the
//! agent boundary: handlers return it, the drain loop converts it into a
//! `success: false` response, and `request_agent` uses it for timeouts.

use thiserror::Error;

use crate::services::ServiceError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Faults raised inside an agent's `handle` or by `request_agent`.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A required payload field is missing or has the wrong shape.
    #[error("{0}")]
    InvalidRequest(String),

    /// An external collaborator (persistence, HTTP, capability) failed.
    #[error("{0}")]
    Collaborator(String),

    /// No matching `agent_response` arrived before the deadline.
    #[error("request to agent '{recipient}' timed out after {elapsed_ms}ms")]
    Timeout { recipient: String, elapsed_ms: u64 },

    /// The pending entry was dropped (system shutting down) before settling.
    #[error("request to agent '{recipient}' was cancelled before a response arrived")]
    Cancelled { recipient: String },

    /// A collaborating agent is not registered.
    #[error("agent '{0}' is not available")]
    Unavailable(String),
}

impl AgentError {
    pub fn invalid(message: impl Into<String>) -> Self {
        AgentError::InvalidRequest(message.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, AgentError::Timeout { .. })
    }
}

impl From<ServiceError> for AgentError {
    fn from(e: ServiceError) -> Self {
        AgentError::Collaborator(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_error_display() {
        let e = AppError::Config("missing field".into());
        assert!(e.to_string().contains("config error"));
        assert!(e.to_string().contains("missing field"));
    }

    #[test]
    fn registry_error_display() {
        let e = AppError::Registry("duplicate agent: echo".into());
        assert!(e.to_string().contains("duplicate agent: echo"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let e: AppError = io_err.into();
        assert!(e.to_string().contains("io error"));
        let _: &dyn Error = &e;
    }

    #[test]
    fn timeout_names_recipient_and_elapsed() {
        let e = AgentError::Timeout { recipient: "agentX".into(), elapsed_ms: 50 };
        let msg = e.to_string();
        assert!(msg.contains("agentX"));
        assert!(msg.contains("50ms"));
        assert!(e.is_timeout());
    }

    #[test]
    fn invalid_request_displays_bare_message() {
        let e = AgentError::invalid("query is required for query_knowledge.");
        assert_eq!(e.to_string(), "query is required for query_knowledge.");
        assert!(!e.is_timeout());
    }

    #[test]
    fn service_error_becomes_collaborator_fault() {
        let e: AgentError = ServiceError::Storage("disk full".into()).into();
        assert!(matches!(e, AgentError::Collaborator(ref m) if m.contains("disk full")));
    }
}
