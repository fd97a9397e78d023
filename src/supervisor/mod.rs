//! Supervisor — owns the registry, the bus, and every agent's lifecycle.
//!
//! [`AgentSystem`] is the factory and single source of truth for one running
//! set of agents.  It is an explicit value: tests build a fresh one each, and
//! the binary builds exactly one at startup.
//!
//! Lifecycle: `new` → `spawn` each agent (startup only) → traffic →
//! [`AgentSystem::shutdown`], which drains every mailbox and stops.

pub mod adapters;
pub mod bus;
pub mod component_info;
pub mod message;
pub mod registry;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::BusConfig;
use crate::error::AppError;
use crate::services::SystemContext;
use crate::subsystems::agents::runner::Runner;
use crate::subsystems::agents::{Agent, AgentContext, AgentHandle, Requester};
use crate::subsystems::runtime::AgentTasks;

use bus::{MessageBus, Topic};
use component_info::AgentInfo;
use registry::Registry;

pub struct AgentSystem {
    registry: Registry,
    bus: MessageBus,
    system: Arc<SystemContext>,
    tasks: AgentTasks,
    request_timeout: Duration,
}

impl AgentSystem {
    pub fn new(system: SystemContext, bus_config: BusConfig) -> Self {
        let registry = Registry::new();
        let bus = MessageBus::new(registry.clone());
        Self {
            registry,
            bus,
            system: Arc::new(system),
            tasks: AgentTasks::new(CancellationToken::new()),
            request_timeout: bus_config.request_timeout,
        }
    }

    /// Register `agent`, subscribe its declared topics, run `init`, and start
    /// its drain loop.  Must be called from within a Tokio runtime.
    pub fn spawn(&mut self, agent: Arc<dyn Agent>) -> Result<AgentHandle, AppError> {
        let name = agent.name().to_string();
        let (handle, mailbox) = AgentHandle::with_mailbox(&name, agent.subscriptions());
        self.registry.insert(handle.clone())?;

        for kind in agent.subscriptions() {
            self.bus.subscribe_agent(Topic::of(*kind), handle.clone());
        }

        let requester = Requester::new(&handle, self.bus.clone(), self.request_timeout);
        let init_ctx = AgentContext::new(requester.clone(), self.system.clone(), CancellationToken::new());
        if let Err(e) = agent.init(&init_ctx) {
            warn!(agent = %name, error = %e, "agent init failed — agent stays registered");
        }

        let runner = Runner {
            agent,
            mailbox,
            requester,
            system: self.system.clone(),
            stats: handle.stats().clone(),
        };
        self.tasks.spawn(&name, move |shutdown| runner.run(shutdown));

        info!(agent = %name, "agent started");
        Ok(handle)
    }

    /// Register a response-only endpoint and return its requester.
    ///
    /// Lets code outside any agent (adapters, timers, tests) issue
    /// `request_agent` calls and receive the replies.
    pub fn client(&self, name: &str) -> Result<Requester, AppError> {
        let handle = AgentHandle::client(name);
        self.registry.insert(handle.clone())?;
        Ok(Requester::new(&handle, self.bus.clone(), self.request_timeout))
    }

    /// Requester acting as an already-registered endpoint.
    pub fn requester(&self, name: &str) -> Option<Requester> {
        self.registry
            .get_agent(name)
            .map(|h| Requester::new(&h, self.bus.clone(), self.request_timeout))
    }

    pub fn get_agent(&self, name: &str) -> Option<AgentHandle> {
        self.registry.get_agent(name)
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn system(&self) -> &Arc<SystemContext> {
        &self.system
    }

    pub fn snapshot(&self) -> Vec<AgentInfo> {
        self.registry.snapshot()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.tasks.shutdown_token()
    }

    /// Drain-and-stop.
    ///
    /// Every drain loop finishes the messages already in its mailbox and
    /// exits; then agent subscriptions and the registry are cleared and any
    /// still-pending request is cancelled.
    pub async fn shutdown(self) {
        info!(agents = self.registry.len(), "agent system shutting down");
        let panicked = self.tasks.shutdown().await;
        if panicked > 0 {
            warn!(panicked, "some drain loops ended by panic");
        }
        self.bus.clear_agent_subscriptions();
        for name in self.registry.names() {
            if let Some(handle) = self.registry.get_agent(&name) {
                handle.pending().cancel_all();
            }
        }
        self.registry.clear();
        info!("agent system stopped");
    }
}
