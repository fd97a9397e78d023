// Library root: the agent runtime, its collaborators, and the concrete
// agents.  The binary entry point is src/main.rs.

pub mod config;
pub mod error;
pub mod logger;
pub mod services;
pub mod subsystems;
pub mod supervisor;

pub use error::{AgentError, AppError};
pub use services::SystemContext;
pub use subsystems::agents::{Agent, AgentContext, AgentHandle, HandleFuture, Requester};
pub use supervisor::AgentSystem;
pub use supervisor::message::{AgentResponse, Message};
