//! Agents subsystem — the agent contract and its mailbox machinery.
//!
//! [`Agent`] is the extension trait: each concrete agent implements a single
//! `handle` entry point over a closed set of message types.  The runtime
//! gives every spawned agent:
//!
//! - an [`AgentHandle`] (cheap clone) whose [`AgentHandle::receive`] appends
//!   to a private FIFO mailbox, drained by exactly one task (see `runner`);
//! - a pending-request table, so `request_agent` can wait for the
//!   `agent_response` that carries its correlation id;
//! - an [`AgentContext`] per handled message, exposing the shared
//!   [`SystemContext`] and the request/response primitive.
//!
//! Built-in agents are compiled in per cargo feature and constructed by
//! [`build`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::AgentError;
use crate::services::SystemContext;
use crate::supervisor::bus::MessageBus;
use crate::supervisor::component_info::{AgentInfo, AgentStatus};
use crate::supervisor::message::{AgentResponse, Message};

pub mod pending;
pub(crate) mod runner;

#[cfg(feature = "plugin-capability")]
pub mod capability;
#[cfg(feature = "plugin-device")]
pub mod device;
#[cfg(feature = "plugin-knowledge")]
pub mod knowledge;
#[cfg(feature = "plugin-provider")]
pub mod provider;
#[cfg(feature = "plugin-suggestion")]
pub mod suggestion;
#[cfg(feature = "plugin-utility")]
pub mod utility;

use pending::{PendingGuard, PendingRequests};

/// Default deadline for `request_agent` when config does not override it.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Boxed future returned by [`Agent::handle`].
pub type HandleFuture =
    Pin<Box<dyn Future<Output = Result<AgentResponse, AgentError>> + Send + 'static>>;

// ── Agent trait ───────────────────────────────────────────────────────────────

/// A named, sequentially-processing unit.
///
/// `handle` receives `Arc<Self>` so implementations can move shared state
/// into the returned `'static` future.  Errors returned from it (and panics
/// inside it) are converted into `success: false` responses by the runtime;
/// an unrecognised type should return [`AgentResponse::unknown_type`].
pub trait Agent: Send + Sync + 'static {
    /// Unique routing name (e.g. `"knowledge"`).
    fn name(&self) -> &str;

    /// Broadcast message types this agent wants delivered to its mailbox.
    fn subscriptions(&self) -> &'static [&'static str] {
        &[]
    }

    /// Called once after registration, before the first message.
    fn init(&self, _ctx: &AgentContext) -> Result<(), AgentError> {
        Ok(())
    }

    fn handle(self: Arc<Self>, message: Message, ctx: AgentContext) -> HandleFuture;
}

// ── AgentHandle ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct AgentStats {
    pub(crate) queued: AtomicUsize,
    pub(crate) processing: AtomicBool,
    pub(crate) handled: AtomicU64,
    pub(crate) stopped: AtomicBool,
}

/// Addressable side of an agent: mailbox sender plus pending-request table.
///
/// A handle without a mailbox is a *client*: a response-only endpoint used by
/// code outside any agent (adapters, timers, tests) to issue requests.
#[derive(Clone)]
pub struct AgentHandle {
    name: Arc<str>,
    mailbox: Option<mpsc::UnboundedSender<Message>>,
    pending: Arc<PendingRequests>,
    stats: Arc<AgentStats>,
    subscriptions: Vec<String>,
}

impl AgentHandle {
    pub(crate) fn with_mailbox(
        name: &str,
        subscriptions: &[&str],
    ) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            name: Arc::from(name),
            mailbox: Some(tx),
            pending: Arc::new(PendingRequests::new(name)),
            stats: Arc::new(AgentStats::default()),
            subscriptions: subscriptions.iter().map(|s| s.to_string()).collect(),
        };
        (handle, rx)
    }

    /// Response-only endpoint named `name`.
    pub fn client(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            mailbox: None,
            pending: Arc::new(PendingRequests::new(name)),
            stats: Arc::new(AgentStats::default()),
            subscriptions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_client(&self) -> bool {
        self.mailbox.is_none()
    }

    /// Accept a message without blocking.
    ///
    /// `agent_response` messages settle this agent's pending table directly
    /// instead of queueing, so a handler awaiting a reply can never be stuck
    /// behind it.  Everything else is appended to the mailbox in arrival
    /// order.
    pub fn receive(&self, message: Message) {
        if message.is_response() {
            self.handle_agent_response(message);
            return;
        }

        let Some(mailbox) = &self.mailbox else {
            warn!(agent = %self.name, kind = %message.kind, "client endpoint does not accept requests — message dropped");
            return;
        };

        self.stats.queued.fetch_add(1, Ordering::SeqCst);
        if mailbox.send(message).is_err() {
            self.stats.queued.fetch_sub(1, Ordering::SeqCst);
            warn!(agent = %self.name, "mailbox closed — message dropped");
        } else {
            trace!(agent = %self.name, queued = self.stats.queued.load(Ordering::SeqCst), "message enqueued");
        }
    }

    fn handle_agent_response(&self, message: Message) {
        let Some(correlation_id) = message.correlation_id.as_deref() else {
            warn!(agent = %self.name, sender = message.sender().unwrap_or("-"), "agent_response without correlation id — discarded");
            return;
        };
        let response = AgentResponse::from_payload(message.payload.clone(), message.sender());
        if !self.pending.settle(correlation_id, response) {
            debug!(
                agent = %self.name,
                %correlation_id,
                sender = message.sender().unwrap_or("-"),
                "no pending request for response (late or spurious) — discarded"
            );
        }
    }

    pub(crate) fn pending(&self) -> &Arc<PendingRequests> {
        &self.pending
    }

    pub(crate) fn stats(&self) -> &Arc<AgentStats> {
        &self.stats
    }

    pub fn info(&self) -> AgentInfo {
        let status = if self.mailbox.is_none() {
            AgentStatus::Client
        } else if self.stats.stopped.load(Ordering::SeqCst) {
            AgentStatus::Stopped
        } else if self.stats.processing.load(Ordering::SeqCst) {
            AgentStatus::Processing
        } else {
            AgentStatus::Idle
        };
        AgentInfo {
            name: self.name.to_string(),
            status,
            queued: self.stats.queued.load(Ordering::SeqCst),
            handled: self.stats.handled.load(Ordering::SeqCst),
            pending_requests: self.pending.len(),
            subscriptions: self.subscriptions.clone(),
        }
    }
}

// ── Requester ─────────────────────────────────────────────────────────────────

/// The request/response primitive, bound to one endpoint's identity.
#[derive(Clone)]
pub struct Requester {
    name: Arc<str>,
    bus: MessageBus,
    pending: Arc<PendingRequests>,
    default_timeout: Duration,
}

impl Requester {
    pub(crate) fn new(handle: &AgentHandle, bus: MessageBus, default_timeout: Duration) -> Self {
        Self {
            name: handle.name.clone(),
            bus,
            pending: handle.pending.clone(),
            default_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Outstanding requests issued by this endpoint.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// `true` if `name` is registered; callers use this to skip requests
    /// that could only time out.
    pub fn has_agent(&self, name: &str) -> bool {
        self.bus.registry().contains(name)
    }

    /// Send `kind` to `recipient` and wait for its response with the
    /// configured default timeout.
    pub async fn request_agent(
        &self,
        recipient: &str,
        kind: &str,
        payload: Value,
    ) -> Result<AgentResponse, AgentError> {
        self.request_agent_with_timeout(recipient, kind, payload, self.default_timeout).await
    }

    /// As [`Requester::request_agent`] with an explicit deadline.
    ///
    /// Resolves with the recipient's response whether it succeeded or not;
    /// callers inspect `success`.  Fails only with
    /// [`AgentError::Timeout`] or, during shutdown, [`AgentError::Cancelled`].
    pub async fn request_agent_with_timeout(
        &self,
        recipient: &str,
        kind: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<AgentResponse, AgentError> {
        let correlation_id = self.pending.next_correlation_id(recipient, kind);
        let cancel = CancellationToken::new();
        let reply_rx = self.pending.register(&correlation_id, recipient, cancel.clone());
        let _guard = PendingGuard::new(&self.pending, &correlation_id);

        let message = Message::new(kind)
            .with_payload(payload)
            .to(recipient)
            .with_correlation_id(correlation_id.clone())
            .from_agent(self.name.as_ref())
            .with_cancel(cancel);

        debug!(sender = %self.name, %recipient, %kind, %correlation_id, timeout_ms = timeout.as_millis() as u64, "request issued");
        let started = Instant::now();
        self.bus.send(message);

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(response)) => {
                trace!(%correlation_id, success = response.success, "response received");
                Ok(response)
            }
            Ok(Err(_)) => Err(AgentError::Cancelled { recipient: recipient.to_string() }),
            Err(_) => {
                self.pending.expire(&correlation_id);
                let elapsed_ms = started.elapsed().as_millis() as u64;
                warn!(sender = %self.name, %recipient, %kind, %correlation_id, elapsed_ms, "request timed out");
                Err(AgentError::Timeout { recipient: recipient.to_string(), elapsed_ms })
            }
        }
    }

    /// Broadcast (or address) a message stamped with this endpoint as sender.
    pub fn publish(&self, message: Message) {
        self.bus.send(message.from_agent(self.name.as_ref()));
    }
}

// ── AgentContext ──────────────────────────────────────────────────────────────

/// Everything a handler may touch while processing one message.
#[derive(Clone)]
pub struct AgentContext {
    requester: Requester,
    system: Arc<SystemContext>,
    cancel: CancellationToken,
}

impl AgentContext {
    pub(crate) fn new(requester: Requester, system: Arc<SystemContext>, cancel: CancellationToken) -> Self {
        Self { requester, system, cancel }
    }

    pub fn name(&self) -> &str {
        self.requester.name()
    }

    pub fn system(&self) -> &SystemContext {
        &self.system
    }

    pub fn requester(&self) -> &Requester {
        &self.requester
    }

    pub fn has_agent(&self, name: &str) -> bool {
        self.requester.has_agent(name)
    }

    pub async fn request_agent(
        &self,
        recipient: &str,
        kind: &str,
        payload: Value,
    ) -> Result<AgentResponse, AgentError> {
        self.requester.request_agent(recipient, kind, payload).await
    }

    pub async fn request_agent_with_timeout(
        &self,
        recipient: &str,
        kind: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<AgentResponse, AgentError> {
        self.requester
            .request_agent_with_timeout(recipient, kind, payload, timeout)
            .await
    }

    pub fn publish(&self, message: Message) {
        self.requester.publish(message);
    }

    /// Cancelled when the requester of the current message stops waiting.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The acting user, or the "not authenticated" failure agents return.
    pub fn owner_id(&self) -> Result<&str, AgentResponse> {
        self.system
            .owner_id
            .as_deref()
            .ok_or_else(|| AgentResponse::fail("User not authenticated."))
    }
}

// ── Payload helpers ───────────────────────────────────────────────────────────

/// Deserialize a message payload into `T`, mapping any mismatch to the
/// uniform bad-request fault.
pub fn payload_as<T: DeserializeOwned>(kind: &str, payload: Option<Value>) -> Result<T, AgentError> {
    let value = payload.unwrap_or_else(|| Value::Object(Default::default()));
    serde_json::from_value(value).map_err(|e| AgentError::invalid(format!("invalid payload for {kind}: {e}")))
}

/// Require a non-empty string, naming the field and message type on failure.
pub fn require_text(value: &str, field: &str, kind: &str) -> Result<(), AgentError> {
    if value.trim().is_empty() {
        Err(AgentError::invalid(format!("{field} is required for {kind}.")))
    } else {
        Ok(())
    }
}

// ── Factory ───────────────────────────────────────────────────────────────────

/// Construct every compiled-in agent the config enables.
pub fn build(config: &crate::config::Config) -> Vec<Arc<dyn Agent>> {
    let mut agents: Vec<Arc<dyn Agent>> = Vec::new();

    #[cfg(feature = "plugin-knowledge")]
    agents.push(Arc::new(knowledge::KnowledgeAgent));

    #[cfg(feature = "plugin-capability")]
    agents.push(Arc::new(capability::CapabilityAgent));

    #[cfg(feature = "plugin-device")]
    agents.push(Arc::new(device::DeviceAgent));

    #[cfg(feature = "plugin-utility")]
    agents.push(Arc::new(utility::UtilityAgent));

    #[cfg(feature = "plugin-suggestion")]
    agents.push(Arc::new(suggestion::SuggestionAgent::default()));

    #[cfg(feature = "plugin-provider")]
    for gateway in config.gateways.keys() {
        agents.push(Arc::new(provider::ProviderAgent::new(gateway)));
    }

    agents.retain(|a| config.agents.is_enabled(a.name()));
    agents
}
