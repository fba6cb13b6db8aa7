//! Generic retry-with-backoff helper.
//!
//! Shared by the PLC connection pool's reconnect path (§4.2) and the Oracle
//! writer's batch retry path (§4.7). One implementation, two call sites, per
//! the design note in SPEC_FULL.md §9 ("encapsulate in a small reusable
//! helper parameterized by attempts and delay sequence"). Grounded on the
//! teacher's `ReconnectionStrategy::reconnect` in `health/mod.rs`.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Runs `attempt` up to `delays.len() + 1` times, sleeping for `delays[i]`
/// between attempt `i` and `i + 1`. Returns the first `Ok`, or the last
/// `Err` if every attempt fails. `should_retry` lets the caller distinguish
/// retryable failures (e.g. Oracle-class errors) from ones that should
/// abort immediately.
pub async fn with_backoff<T, E, F, Fut, R>(
    delays: &[Duration],
    mut attempt: F,
    should_retry: R,
) -> Result<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let mut last_err = None;
    for (i, delay) in delays.iter().copied().chain(std::iter::once(Duration::ZERO)).enumerate() {
        if i > 0 {
            let prev_delay = delays[i - 1];
            tokio::time::sleep(prev_delay).await;
        }
        match attempt(i).await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let retry = should_retry(&e) && i < delays.len();
                if retry {
                    warn!(attempt = i + 1, "attempt failed, will retry");
                }
                last_err = Some(e);
                if !retry {
                    break;
                }
            }
        }
        let _ = delay;
    }
    Err(last_err.expect("at least one attempt was made"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let calls = AtomicUsize::new(0);
        let result: Result<i32, &str> = with_backoff(
            &[Duration::from_millis(1), Duration::from_millis(1)],
            |_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(42) }
            },
            |_e: &&str| true,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let calls = AtomicUsize::new(0);
        let result: Result<i32, &str> = with_backoff(
            &[Duration::from_millis(1), Duration::from_millis(1)],
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err("transient")
                    } else {
                        Ok(7)
                    }
                }
            },
            |_e: &&str| true,
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_when_should_retry_false() {
        let calls = AtomicUsize::new(0);
        let result: Result<i32, &str> = with_backoff(
            &[Duration::from_millis(1), Duration::from_millis(1)],
            |_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal") }
            },
            |_e: &&str| false,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_all_retries() {
        let calls = AtomicUsize::new(0);
        let result: Result<i32, &str> = with_backoff(
            &[Duration::from_millis(1), Duration::from_millis(1)],
            |_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("always fails") }
            },
            |_e: &&str| true,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
