//! Exponential backoff for retryable collaborator failures.

use enrich_core::{EnrichError, EnrichResult, RetryConfig};
use std::future::Future;
use std::time::Duration;

fn retry_delay(policy: &RetryConfig, attempt: u32, err: &EnrichError) -> Option<Duration> {
    let EnrichError::Provider(provider_err) = err else {
        return None;
    };
    if !provider_err.is_retryable() || attempt >= policy.max_retries {
        return None;
    }
    let backoff = policy.backoff_for(attempt);
    match provider_err {
        enrich_core::ProviderError::RateLimited { retry_after_ms, .. } if *retry_after_ms > 0 => {
            Some(backoff.max(Duration::from_millis(*retry_after_ms as u64)))
        }
        _ => Some(backoff),
    }
}

/// Run `op`, retrying retryable provider errors per `policy`.
/// Non-retryable errors and the final failure are returned unchanged.
pub async fn with_retry<T, F, Fut>(policy: &RetryConfig, mut op: F) -> EnrichResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EnrichResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => match retry_delay(policy, attempt, &err) {
                Some(delay) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying collaborator call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrich_core::{GridError, ProviderError};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn server_error() -> EnrichError {
        EnrichError::Provider(ProviderError::RequestFailed {
            provider: "test".to_string(),
            status: 503,
            message: "unavailable".to_string(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryConfig::default(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(server_error())
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: EnrichResult<()> = with_retry(&RetryConfig::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(server_error()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: EnrichResult<()> = with_retry(&RetryConfig::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EnrichError::Grid(GridError::NoRows)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rate_limit_honors_retry_after() {
        let err = EnrichError::Provider(ProviderError::RateLimited {
            provider: "p".to_string(),
            retry_after_ms: 5_000,
        });
        let delay = retry_delay(&RetryConfig::default(), 0, &err);
        assert_eq!(delay, Some(Duration::from_millis(5_000)));
    }
}
