//! Subsystem modules: the agents themselves and the task runtime that
//! drives their drain loops.

pub mod agents;
pub mod runtime;
