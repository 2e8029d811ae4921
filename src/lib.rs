//! # Real Analyst
//!
//! Agent-delegation and thread-memory runtime for real-estate analysis.
//!
//! A primary investment advisor agent answers on named threads and delegates
//! to zoning and valuation sub-agents exposed to it as tools. Sub-agents can
//! call OpenAPI-described services, search the web, or search documents
//! uploaded for them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use real_analyst::agents::ChatService;
//! use real_analyst::config::Settings;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::new()?;
//!     let service = ChatService::from_settings(&settings).await?;
//!
//!     service.create_thread("deal-123").await?;
//!     let reply = service.send_message("deal-123", "Can I build a duplex at 12 Oak St?").await?;
//!     println!("{}", reply.content);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **agents**: domain types, hosting backends, registries, router and service
//! - **config**: layered settings and validation
//! - **cli**: command line and interactive shell
//! - **api**: optional REST layer

pub mod agents;
pub mod api;
pub mod cli;
pub mod config;
