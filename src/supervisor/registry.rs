//! Agent registry — the single name → handle table.
//!
//! The registry is an explicit value owned by one
//! [`AgentSystem`](crate::supervisor::AgentSystem) and shared (cheap clone)
//! with the bus.  Writes happen at startup and shutdown; steady-state traffic
//! only takes the read lock.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::error::AppError;
use crate::subsystems::agents::AgentHandle;
use crate::supervisor::component_info::AgentInfo;

#[derive(Clone, Default)]
pub struct Registry {
    agents: Arc<RwLock<HashMap<String, AgentHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` under its name.  Names are unique process-wide.
    pub fn insert(&self, handle: AgentHandle) -> Result<(), AppError> {
        let mut agents = self.agents.write().unwrap_or_else(PoisonError::into_inner);
        let name = handle.name().to_string();
        if agents.contains_key(&name) {
            return Err(AppError::Registry(format!("agent already registered: {name}")));
        }
        debug!(agent = %name, "agent registered");
        agents.insert(name, handle);
        Ok(())
    }

    /// Look up an agent by name.
    pub fn get_agent(&self, name: &str) -> Option<AgentHandle> {
        let agents = self.agents.read().unwrap_or_else(PoisonError::into_inner);
        let found = agents.get(name).cloned();
        if found.is_none() {
            debug!(agent = %name, "agent not found in registry");
        }
        found
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.agents.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Status of every registered endpoint, sorted by name.
    pub fn snapshot(&self) -> Vec<AgentInfo> {
        let mut infos: Vec<AgentInfo> = self
            .agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(AgentHandle::info)
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Drop every handle.  Pending requests owned by them are released.
    pub(crate) fn clear(&self) {
        let mut agents = self.agents.write().unwrap_or_else(PoisonError::into_inner);
        if !agents.is_empty() {
            warn!(count = agents.len(), "clearing agent registry");
        }
        agents.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup() {
        let reg = Registry::new();
        reg.insert(AgentHandle::client("alpha")).unwrap();
        assert!(reg.contains("alpha"));
        assert_eq!(reg.get_agent("alpha").map(|h| h.name().to_string()), Some("alpha".into()));
        assert!(reg.get_agent("beta").is_none());
    }

    #[test]
    fn duplicate_name_rejected() {
        let reg = Registry::new();
        reg.insert(AgentHandle::client("alpha")).unwrap();
        let err = reg.insert(AgentHandle::client("alpha")).unwrap_err();
        assert!(err.to_string().contains("already registered"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn names_and_snapshot_are_sorted() {
        let reg = Registry::new();
        for n in ["zeta", "alpha", "mid"] {
            reg.insert(AgentHandle::client(n)).unwrap();
        }
        assert_eq!(reg.names(), vec!["alpha", "mid", "zeta"]);
        let snap: Vec<String> = reg.snapshot().into_iter().map(|i| i.name).collect();
        assert_eq!(snap, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn clones_share_the_table() {
        let reg = Registry::new();
        let other = reg.clone();
        reg.insert(AgentHandle::client("alpha")).unwrap();
        assert!(other.contains("alpha"));
        other.clear();
        assert!(reg.is_empty());
    }
}
