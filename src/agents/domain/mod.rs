//! Domain types for the agent runtime
//!
//! Agents, tool bindings, threads and the messages they hold.

mod agent;
mod document;
mod ids;
mod message;
mod response;
mod tool_call;

pub use agent::*;
pub use document::*;
pub use ids::*;
pub use message::*;
pub use response::*;
pub use tool_call::*;
