//! Conversation windowing
//!
//! Decides which part of a thread's log is replayed to the model. The stored
//! log is never touched; only the request sent to the hosting service shrinks.

mod strategy;

pub use strategy::*;

use serde::{Deserialize, Serialize};

/// History windowing strategies
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MemoryStrategy {
    /// Replay the whole log
    #[default]
    Full,
    /// Sliding window of most recent messages
    SlidingWindow {
        /// Number of messages to keep
        size: usize,
    },
    /// Keep first N messages + last M messages
    FirstLast {
        /// Number of initial messages to keep
        first: usize,
        /// Number of recent messages to keep
        last: usize,
    },
}
