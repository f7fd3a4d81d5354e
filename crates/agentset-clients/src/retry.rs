//! Shared retry/backoff helper for the HTTP collaborator clients (spec.md
//! §5, §8): up to 3 attempts, exponential backoff starting at 1s. Only
//! transport failures and 5xx-shaped outcomes are retried; callers decide
//! what counts as retryable by returning `Err(RetryOutcome::Retryable)` vs.
//! `Err(RetryOutcome::Fatal)`.

use std::future::Future;
use std::time::Duration;

pub const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

pub enum RetryOutcome<E> {
    Retryable(E),
    Fatal(E),
}

/// Calls `f` up to `MAX_ATTEMPTS` times, waiting `INITIAL_BACKOFF * 2^n`
/// between attempts, stopping early on a `Fatal` error.
pub async fn with_retry<T, E, F, Fut>(f: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, RetryOutcome<E>>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(RetryOutcome::Fatal(e)) => return Err(e),
            Err(RetryOutcome::Retryable(e)) => {
                if attempt >= MAX_ATTEMPTS {
                    return Err(e);
                }
                let backoff = INITIAL_BACKOFF * 2u32.pow(attempt - 1);
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_retry(|| async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(RetryOutcome::Retryable("transient"))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_immediately_on_fatal() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_retry(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RetryOutcome::Fatal("bad request"))
        })
        .await;
        assert_eq!(result, Err("bad request"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_retry(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RetryOutcome::Retryable("still down"))
        })
        .await;
        assert_eq!(result, Err("still down"));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }
}
