//! Pending-request table and correlation ids.
//!
//! One [`PendingRequests`] per agent.  Each outstanding `request_agent` call
//! owns exactly one entry; the entry is removed by whichever happens first:
//! the matching `agent_response` ([`PendingRequests::settle`]), the timeout
//! ([`PendingRequests::expire`]), or the caller dropping its future
//! ([`PendingGuard`]).  Settlement is therefore at-most-once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use uuid::Uuid;

use crate::supervisor::message::AgentResponse;

struct PendingEntry {
    recipient: String,
    reply_tx: oneshot::Sender<AgentResponse>,
    cancel: CancellationToken,
    issued_at: Instant,
}

pub struct PendingRequests {
    owner: String,
    counter: AtomicU64,
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingRequests {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            counter: AtomicU64::new(0),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// `"<owner>-><recipient>:<type>:<n>:<rand>"` is readable in logs, unique
    /// per owner by the counter, and unlikely to collide across restarts.
    pub fn next_correlation_id(&self, recipient: &str, kind: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let random = Uuid::new_v4().simple().to_string();
        format!("{}->{recipient}:{kind}:{n}:{}", self.owner, &random[..8])
    }

    pub(crate) fn register(
        &self,
        correlation_id: &str,
        recipient: &str,
        cancel: CancellationToken,
    ) -> oneshot::Receiver<AgentResponse> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let entry = PendingEntry {
            recipient: recipient.to_string(),
            reply_tx,
            cancel,
            issued_at: Instant::now(),
        };
        self.lock().insert(correlation_id.to_string(), entry);
        reply_rx
    }

    /// Resolve the entry for `correlation_id`.  Returns `false` when no entry
    /// exists (already timed out, or never issued by this owner).
    pub fn settle(&self, correlation_id: &str, response: AgentResponse) -> bool {
        let Some(entry) = self.lock().remove(correlation_id) else {
            return false;
        };
        trace!(
            owner = %self.owner,
            recipient = %entry.recipient,
            %correlation_id,
            elapsed_ms = entry.issued_at.elapsed().as_millis() as u64,
            "pending request settled"
        );
        // The receiver may already be gone if the caller was dropped
        // between the timeout firing and this call.
        let _ = entry.reply_tx.send(response);
        true
    }

    /// Remove the entry on timeout and cancel the outstanding request.
    pub(crate) fn expire(&self, correlation_id: &str) -> bool {
        match self.lock().remove(correlation_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, correlation_id: &str) -> bool {
        self.lock().contains_key(correlation_id)
    }

    /// Cancel and drop every entry; waiting callers see a closed channel.
    pub(crate) fn cancel_all(&self) {
        for (_, entry) in self.lock().drain() {
            entry.cancel.cancel();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes its entry when dropped, covering callers that abandon the wait.
pub(crate) struct PendingGuard<'a> {
    pending: &'a PendingRequests,
    correlation_id: &'a str,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(pending: &'a PendingRequests, correlation_id: &'a str) -> Self {
        Self { pending, correlation_id }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.expire(self.correlation_id);
    }
}
