//! Supervisor transport adapters.
//!
//! Adapters translate external I/O into bus traffic.  Each registers a
//! client endpoint (see [`AgentSystem::client`]) so it can issue
//! `request_agent` calls without being an agent itself.

#[cfg(feature = "adapter-stdio")]
pub mod stdio;

use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::error::AppError;
use crate::supervisor::AgentSystem;

/// Start the adapters enabled in `config`.  Returns their task handles.
pub fn start(config: &Config, system: &AgentSystem) -> Result<Vec<JoinHandle<()>>, AppError> {
    #[allow(unused_mut)]
    let mut handles = Vec::new();

    #[cfg(feature = "adapter-stdio")]
    if config.stdio_adapter {
        handles.push(stdio::start(system)?);
    }

    if handles.is_empty() {
        info!(stdio = config.stdio_adapter, agents = system.registry().len(), "no inbound adapters running — waiting for ctrl-c");
    }
    Ok(handles)
}
