//! Component info — status snapshots of registered agents.
//!
//! [`AgentInfo`] is built from the lock-free counters each
//! [`AgentHandle`](crate::subsystems::agents::AgentHandle) keeps, so taking a
//! snapshot never waits on a drain loop.

use serde::{Deserialize, Serialize};

// ── AgentStatus ───────────────────────────────────────────────────────────────

/// Runtime state of an agent's drain loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Mailbox empty, waiting for the next message.
    Idle,
    /// A `handle` call is in flight.
    Processing,
    /// Response-only endpoint; never drains a queue.
    Client,
    /// The drain loop has exited.
    Stopped,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Processing => "processing",
            AgentStatus::Client => "client",
            AgentStatus::Stopped => "stopped",
        }
    }

    pub fn is_client(&self) -> bool {
        matches!(self, AgentStatus::Client)
    }
}

// ── AgentInfo ─────────────────────────────────────────────────────────────────

/// Point-in-time view of one registered endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    pub status: AgentStatus,
    /// Messages waiting in the mailbox.
    pub queued: usize,
    /// Messages fully handled since start.
    pub handled: u64,
    /// Outstanding `request_agent` calls issued by this agent.
    pub pending_requests: usize,
    /// Broadcast types this agent subscribed to.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub subscriptions: Vec<String>,
}

impl AgentInfo {
    /// One-line human summary used by the stdio adapter.
    pub fn summary(&self) -> String {
        format!(
            "{} [{}] queued={} handled={} pending={}",
            self.name,
            self.status.as_str(),
            self.queued,
            self.handled,
            self.pending_requests
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serialises_lowercase() {
        let v = serde_json::to_value(AgentStatus::Processing).unwrap();
        assert_eq!(v, "processing");
    }

    #[test]
    fn summary_includes_counters() {
        let info = AgentInfo {
            name: "knowledge".into(),
            status: AgentStatus::Idle,
            queued: 2,
            handled: 7,
            pending_requests: 1,
            subscriptions: vec![],
        };
        let s = info.summary();
        assert!(s.starts_with("knowledge [idle]"));
        assert!(s.contains("queued=2"));
        assert!(s.contains("handled=7"));
        assert!(s.contains("pending=1"));
    }
}
