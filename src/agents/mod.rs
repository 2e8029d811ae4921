//! Agent delegation and thread memory runtime
//!
//! A primary agent answers user turns and may delegate to sub-agents, call
//! external APIs, search uploaded documents or search the web. Every turn
//! runs on a named thread whose log is kept in order.
//!
//! ## Architecture
//!
//! - `domain/` - Core types (Agent, Thread, Message, ToolBinding, TurnChunk)
//! - `hosting/` - Remote agent-hosting backends with streaming completions
//! - `tools/` - Tool registry, OpenAPI invocation and web search
//! - `memory/` - History windowing strategies
//! - `router` - The delegation loop that executes one turn
//! - `service` - The façade used by the REPL and the REST layer

pub mod bootstrap;
pub mod domain;
pub mod error;
pub mod hosting;
pub mod indexer;
pub mod memory;
pub mod prompts;
pub mod registry;
pub mod router;
pub mod service;
pub mod threads;
pub mod tools;

#[cfg(test)]
mod registry_test;

// Re-export commonly used types
pub use domain::*;
pub use error::*;
pub use indexer::DocumentIndexer;
pub use prompts::PromptCatalog;
pub use registry::AgentRegistry;
pub use router::{DelegationRouter, RouterConfig};
pub use service::ChatService;
pub use threads::ThreadStore;
pub use tools::ToolRegistry;
