//! External collaborators available to agents.
//!
//! Each collaborator is an enum over concrete backends and every value is a
//! cheap clone over shared state.  Adding a backend = new variant + new match
//! arm.
//!
//! [`SystemContext`] bundles them and is handed (behind an `Arc`) to every
//! agent through its [`AgentContext`](crate::subsystems::agents::AgentContext).

pub mod capability;
pub mod gateway;
pub mod persistence;

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::{Config, GatewayKind, PersistenceBackend};
use capability::{Capability, CapabilityRegistry};
use gateway::{DummyGateway, HttpGateway, RestGateway};
use persistence::PersistenceService;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("capability not found: {0}")]
    UnknownCapability(String),
    #[error("capability '{capability}' has no action '{action}'")]
    UnknownAction { capability: String, action: String },
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error("gateway not configured: {0}")]
    UnknownGateway(String),
}

// ── SystemContext ─────────────────────────────────────────────────────────────

/// Shared collaborator surface passed to every agent.
#[derive(Debug, Clone)]
pub struct SystemContext {
    /// Acting user; `None` means unauthenticated.
    pub owner_id: Option<String>,
    pub persistence: PersistenceService,
    pub capabilities: CapabilityRegistry,
    /// HTTP gateways by configured name.
    pub gateways: BTreeMap<String, HttpGateway>,
}

impl SystemContext {
    /// Everything in memory, no network gateways.  Used by tests and as the
    /// fallback when nothing is configured.
    pub fn in_memory(owner_id: Option<&str>) -> Self {
        Self {
            owner_id: owner_id.map(str::to_string),
            persistence: PersistenceService::memory(),
            capabilities: CapabilityRegistry::new().with(Capability::clipboard()),
            gateways: BTreeMap::new(),
        }
    }

    pub fn with_gateway(mut self, name: impl Into<String>, gateway: HttpGateway) -> Self {
        self.gateways.insert(name.into(), gateway);
        self
    }

    pub fn gateway(&self, name: &str) -> Result<&HttpGateway, ServiceError> {
        self.gateways
            .get(name)
            .ok_or_else(|| ServiceError::UnknownGateway(name.to_string()))
    }

    /// Build collaborators from resolved config.
    pub fn from_config(config: &Config) -> Result<Self, ServiceError> {
        let persistence = match config.persistence.backend {
            PersistenceBackend::Memory => PersistenceService::memory(),
            PersistenceBackend::File => PersistenceService::open_file(&config.persistence.path)?,
        };

        let web = Capability::web(config.bus.request_timeout)?;
        let capabilities = CapabilityRegistry::new()
            .with(Capability::clipboard())
            .with(web);

        let mut gateways = BTreeMap::new();
        for (name, g) in &config.gateways {
            let gateway = match g.kind {
                GatewayKind::Dummy => HttpGateway::Dummy(DummyGateway),
                GatewayKind::Http => {
                    let api_key = g.api_key_env.as_deref().and_then(|var| std::env::var(var).ok());
                    if g.api_key_env.is_some() && api_key.is_none() {
                        info!(gateway = %name, "api key env var not set — calls will be unauthenticated");
                    }
                    HttpGateway::Rest(RestGateway::new(g, api_key)?)
                }
            };
            debug!(gateway = %name, kind = ?g.kind, "gateway configured");
            gateways.insert(name.clone(), gateway);
        }

        Ok(Self {
            owner_id: config.owner_id.clone(),
            persistence,
            capabilities,
            gateways,
        })
    }
}
