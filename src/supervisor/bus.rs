//! Message bus — fire-and-forget delivery between agents.
//!
//! [`MessageBus::send`] never blocks and never fails back to the caller:
//!
//! - `recipient` set   → resolved through the [`Registry`] and handed to
//!   [`AgentHandle::receive`].  An unknown recipient is logged and dropped;
//!   a waiting requester only learns about it through its timeout.
//! - `recipient` unset → broadcast to every subscriber whose [`Topic`]
//!   matches the message type.  Agents subscribe to the types they declare
//!   in [`Agent::subscriptions`](crate::subsystems::agents::Agent::subscriptions);
//!   external code subscribes with [`MessageBus::subscribe`].
//!
//! Delivery is in-memory and at-most-once.  There is no ordering between
//! recipients of a broadcast, nor between different agents.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::subsystems::agents::AgentHandle;
use crate::supervisor::message::Message;
use crate::supervisor::registry::Registry;

// ── Topic ─────────────────────────────────────────────────────────────────────

/// Broadcast filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    /// Every broadcast.
    All,
    /// Broadcasts whose `type` equals the given string.
    Type(String),
}

impl Topic {
    pub fn of(kind: impl Into<String>) -> Self {
        Topic::Type(kind.into())
    }

    pub fn matches(&self, kind: &str) -> bool {
        match self {
            Topic::All => true,
            Topic::Type(t) => t == kind,
        }
    }
}

// ── Subscription ──────────────────────────────────────────────────────────────

/// Receiving end of an external broadcast subscription.
///
/// Dropping it is enough to unsubscribe; the bus prunes closed sinks on the
/// next matching broadcast.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

enum Sink {
    Agent(AgentHandle),
    Channel(mpsc::UnboundedSender<Message>),
}

struct Subscriber {
    id: u64,
    topic: Topic,
    sink: Sink,
}

// ── MessageBus ────────────────────────────────────────────────────────────────

/// Process-wide router.  Clone freely; clones share the same tables.
#[derive(Clone)]
pub struct MessageBus {
    registry: Registry,
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
    next_id: Arc<AtomicU64>,
}

impl MessageBus {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            subscribers: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Deliver `message` to its recipient, or broadcast it.
    pub fn send(&self, message: Message) {
        debug!(
            kind = %message.kind,
            recipient = message.recipient.as_deref().unwrap_or("broadcast"),
            correlation_id = message.correlation_id.as_deref().unwrap_or("-"),
            sender = message.sender().unwrap_or("-"),
            "bus send"
        );

        let Some(recipient) = message.recipient.clone() else {
            self.broadcast(message);
            return;
        };

        match self.registry.get_agent(&recipient) {
            Some(handle) => handle.receive(message),
            None => warn!(
                %recipient,
                kind = %message.kind,
                correlation_id = message.correlation_id.as_deref().unwrap_or("-"),
                "unknown recipient — message dropped"
            ),
        }
    }

    /// Subscribe to broadcasts matching `topic`.
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.add_subscriber(topic, Sink::Channel(tx));
        Subscription { id, rx }
    }

    /// Route broadcasts matching `topic` into an agent's mailbox.
    pub(crate) fn subscribe_agent(&self, topic: Topic, handle: AgentHandle) -> u64 {
        self.add_subscriber(topic, Sink::Agent(handle))
    }

    /// Remove a subscription by id.  Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut subs = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drop every agent subscription (used at shutdown).
    pub(crate) fn clear_agent_subscriptions(&self) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|s| matches!(s.sink, Sink::Channel(_)));
    }

    fn add_subscriber(&self, topic: Topic, sink: Sink) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(id, ?topic, "subscriber added");
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber { id, topic, sink });
        id
    }

    fn broadcast(&self, message: Message) {
        let mut closed = Vec::new();
        let mut delivered = 0usize;
        {
            let subs = self.subscribers.read().unwrap_or_else(PoisonError::into_inner);
            for sub in subs.iter().filter(|s| s.topic.matches(&message.kind)) {
                match &sub.sink {
                    Sink::Agent(handle) => {
                        handle.receive(message.clone());
                        delivered += 1;
                    }
                    Sink::Channel(tx) => {
                        if tx.send(message.clone()).is_ok() {
                            delivered += 1;
                        } else {
                            closed.push(sub.id);
                        }
                    }
                }
            }
        }

        if !closed.is_empty() {
            trace!(count = closed.len(), "pruning closed subscriptions");
            self.subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|s| !closed.contains(&s.id));
        }

        if delivered == 0 {
            debug!(kind = %message.kind, "broadcast had no subscribers");
        } else {
            trace!(kind = %message.kind, delivered, "broadcast delivered");
        }
    }
}
