//! Agent task runtime — spawns drain loops and supervises them.
//!
//! # Task model
//!
//! Each spawned agent gets one Tokio task running its drain loop.  All of
//! them share the system-wide shutdown [`CancellationToken`]; cancelling it
//! asks every loop to finish the messages it already holds and exit.
//!
//! # Supervision
//!
//! A drain loop that panics is logged and does not cancel its siblings.
//! Faults inside `handle` are contained by the loop itself, so a panic here
//! stops only that agent.

use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// The set of running drain loops.
pub struct AgentTasks {
    set: JoinSet<String>,
    shutdown: CancellationToken,
}

impl AgentTasks {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self { set: JoinSet::new(), shutdown }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn the drain loop for `agent`.  The future receives a clone of the
    /// shared shutdown token.
    pub fn spawn<F, Fut>(&mut self, agent: &str, run: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = agent.to_string();
        debug!(agent = %name, "spawning drain loop");
        let fut = run(self.shutdown.clone());
        self.set.spawn(async move {
            fut.await;
            name
        });
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Cancel the shutdown token and wait for every loop to exit.
    ///
    /// Returns the number of loops that ended by panicking.
    pub async fn shutdown(mut self) -> usize {
        self.shutdown.cancel();
        let mut panicked = 0usize;
        while let Some(res) = self.set.join_next().await {
            match res {
                Ok(name) => debug!(agent = %name, "drain loop joined"),
                Err(e) => {
                    error!("drain loop panicked: {e}");
                    panicked += 1;
                }
            }
        }
        info!(panicked, "all drain loops stopped");
        panicked
    }
}
