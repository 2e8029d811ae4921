//! Bounded exponential backoff for idempotent remote calls

use backoff::ExponentialBackoffBuilder;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::warn;

use crate::agents::error::{RemoteError, RemoteResult};

/// Retry policy for reads and model calls. Mutating calls are never retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_interval_ms() -> u64 {
    500
}

fn default_max_interval_ms() -> u64 {
    8_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Short intervals, for tests and local backends
    pub fn fast(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_interval_ms: 1,
            max_interval_ms: 5,
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or the retry budget is spent
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> RemoteResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RemoteResult<T>>,
{
    let schedule = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(policy.initial_interval_ms))
        .with_max_interval(Duration::from_millis(policy.max_interval_ms))
        .with_max_elapsed_time(None)
        .build();

    let attempts = AtomicU32::new(0);
    let max_retries = policy.max_retries;

    backoff::future::retry_notify(
        schedule,
        || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            let fut = op();
            async move {
                match fut.await {
                    Ok(value) => Ok(value),
                    Err(err) if err.is_transient() && attempt < max_retries => {
                        Err(backoff::Error::transient(err))
                    }
                    Err(err) => Err(backoff::Error::permanent(err)),
                }
            }
        },
        |err: RemoteError, wait: Duration| {
            warn!(operation, error = %err, wait_ms = wait.as_millis() as u64, "Retrying remote call");
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = with_retry(&RetryPolicy::fast(3), "list_agents", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RemoteError::Timeout)
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: RemoteResult<()> = with_retry(&RetryPolicy::fast(2), "complete", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::Network("reset".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(RemoteError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: RemoteResult<()> = with_retry(&RetryPolicy::fast(5), "get_agent", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::Authentication("bad key".into()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
