//! Memory management strategies for conversation history

use super::MemoryStrategy;
use crate::agents::domain::{Message, MessageRole};

/// Apply a memory strategy to a thread log
pub fn apply_strategy(messages: &[Message], strategy: &MemoryStrategy) -> Vec<Message> {
    match strategy {
        MemoryStrategy::Full => messages.to_vec(),
        MemoryStrategy::SlidingWindow { size } => apply_sliding_window(messages, *size),
        MemoryStrategy::FirstLast { first, last } => apply_first_last(messages, *first, *last),
    }
}

/// Keep only the last N messages
fn apply_sliding_window(messages: &[Message], window_size: usize) -> Vec<Message> {
    let take_from = messages.len().saturating_sub(window_size);
    skip_leading_results(&messages[take_from..]).to_vec()
}

/// Keep first N messages and last M messages
fn apply_first_last(messages: &[Message], first_count: usize, last_count: usize) -> Vec<Message> {
    if messages.len() <= first_count + last_count {
        return messages.to_vec();
    }

    let mut result = Vec::new();
    result.extend(drop_trailing_calls(&messages[..first_count]).iter().cloned());

    let last_start = messages.len().saturating_sub(last_count);
    result.extend(skip_leading_results(&messages[last_start..]).iter().cloned());

    result
}

/// A window must not open with a result whose call was cut off
fn skip_leading_results(messages: &[Message]) -> &[Message] {
    let start = messages
        .iter()
        .position(|m| m.role != MessageRole::ToolResult)
        .unwrap_or(messages.len());
    &messages[start..]
}

/// Nor close with a call whose result was cut off
fn drop_trailing_calls(messages: &[Message]) -> &[Message] {
    let end = messages
        .iter()
        .rposition(|m| m.role != MessageRole::ToolCall)
        .map_or(0, |i| i + 1);
    &messages[..end]
}
