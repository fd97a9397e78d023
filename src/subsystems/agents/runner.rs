//! Drain loop — the one task that owns an agent's mailbox receiver.
//!
//! Because a single task receives from the mailbox and awaits each handler
//! before the next `recv`, messages to one agent are handled strictly in
//! arrival order and never concurrently.  Different agents run on
//! independent tasks and interleave freely.
//!
//! Supervision policy: every fault inside `handle` (error, panic, malformed
//! response) is contained here and turned into a `success: false` response.
//! Only faults in the loop itself escape, and the subsystem runtime logs
//! those and keeps the other agents running.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::services::SystemContext;
use crate::subsystems::agents::{Agent, AgentContext, AgentStats, Requester};
use crate::supervisor::message::{AgentResponse, Message};

pub(crate) struct Runner {
    pub(crate) agent: Arc<dyn Agent>,
    pub(crate) mailbox: mpsc::UnboundedReceiver<Message>,
    pub(crate) requester: Requester,
    pub(crate) system: Arc<SystemContext>,
    pub(crate) stats: Arc<AgentStats>,
}

impl Runner {
    /// Process messages until `shutdown` is cancelled, then handle whatever
    /// was already queued and exit (drain-and-stop).
    pub(crate) async fn run(mut self, shutdown: CancellationToken) {
        let name = self.agent.name().to_string();
        debug!(agent = %name, "drain loop started");

        loop {
            let message = tokio::select! {
                biased;

                msg = self.mailbox.recv() => match msg {
                    Some(m) => m,
                    None => break,
                },

                _ = shutdown.cancelled() => break,
            };
            self.process(message).await;
        }

        self.mailbox.close();
        let mut drained = 0usize;
        while let Ok(message) = self.mailbox.try_recv() {
            self.process(message).await;
            drained += 1;
        }

        self.stats.stopped.store(true, Ordering::SeqCst);
        info!(agent = %name, drained, "drain loop stopped");
    }

    async fn process(&self, message: Message) {
        self.stats.queued.fetch_sub(1, Ordering::SeqCst);
        let name = self.agent.name().to_string();
        let kind = message.kind.clone();
        let correlation_id = message.correlation_id.clone();
        let reply_to = message.sender().map(str::to_owned);

        if message.is_cancelled() {
            debug!(agent = %name, %kind, correlation_id = correlation_id.as_deref().unwrap_or("-"), "requester gave up before dequeue — skipped");
            return;
        }

        self.stats.processing.store(true, Ordering::SeqCst);
        trace!(agent = %name, %kind, "handling message");

        let cancel = message.cancel.clone().unwrap_or_default();
        let ctx = AgentContext::new(self.requester.clone(), self.system.clone(), cancel.clone());
        let mut task = tokio::spawn(self.agent.clone().handle(message, ctx));

        let joined = tokio::select! {
            joined = &mut task => Some(joined),
            _ = cancel.cancelled() => {
                task.abort();
                None
            }
        };

        let response = match joined {
            None => {
                info!(agent = %name, %kind, correlation_id = correlation_id.as_deref().unwrap_or("-"), "request cancelled — handler aborted");
                self.finish();
                return;
            }
            Some(Ok(Ok(response))) => {
                if !response.is_well_formed() {
                    warn!(agent = %name, %kind, "handler returned a malformed response");
                }
                response.normalize(&name)
            }
            Some(Ok(Err(e))) => {
                warn!(agent = %name, %kind, error = %e, "handler failed");
                AgentResponse::fail(e.to_string())
            }
            Some(Err(join_err)) => {
                error!(agent = %name, %kind, error = %join_err, "handler panicked");
                AgentResponse::fail(format!("agent '{name}' failed internally while handling {kind}"))
            }
        };

        match correlation_id {
            Some(id) => {
                let reply = Message::response(id, &name, reply_to, &response);
                self.requester.bus().send(reply);
            }
            None => trace!(agent = %name, %kind, success = response.success, "fire-and-forget message — no response sent"),
        }

        self.finish();
    }

    fn finish(&self) {
        self.stats.processing.store(false, Ordering::SeqCst);
        self.stats.handled.fetch_add(1, Ordering::SeqCst);
    }
}
