//! Rate limiting, timeouts and retry logic for remote calls
//!
//! Retries live at the call sites (directory listing, name extraction,
//! companion downloads), never inside pipeline stage logic.

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use tracing::warn;

use crate::error::{Result, SyncError};

/// Direct (unkeyed) limiter shared by every request against one server
pub type DirectLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Configuration for rate limiting
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per second
    pub requests_per_second: u32,
    /// Burst capacity (allows short bursts above the rate)
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 5,
            burst_size: 10,
        }
    }
}

impl RateLimitConfig {
    pub fn build(&self) -> DirectLimiter {
        let quota = Quota::per_second(
            NonZeroU32::new(self.requests_per_second).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(self.burst_size).unwrap_or(NonZeroU32::MIN));
        Arc::new(RateLimiter::direct(quota))
    }
}

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Initial backoff duration
    pub initial_interval: Duration,
    /// Maximum backoff duration
    pub max_interval: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Create an ExponentialBackoff from this config. Attempts are bounded by
    /// `max_attempts`, not by elapsed time.
    pub fn to_backoff(&self) -> backoff::ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_multiplier(self.multiplier)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Execute an async operation with retry logic.
///
/// Only errors for which [`SyncError::is_retryable`] holds are re-attempted;
/// the last error is returned once attempts are exhausted.
pub async fn retry_async<T, Fut, F>(
    mut operation: F,
    config: &RetryConfig,
    operation_name: &str,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0;
    let mut backoff = config.to_backoff();

    loop {
        attempts += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                if attempts >= config.max_attempts {
                    warn!(
                        operation = %operation_name,
                        attempts = attempts,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                match backoff.next_backoff() {
                    Some(duration) => {
                        warn!(
                            operation = %operation_name,
                            attempt = attempts,
                            error = %e,
                            retry_in_ms = duration.as_millis() as u64,
                            "Operation failed, retrying"
                        );
                        tokio::time::sleep(duration).await;
                    }
                    None => return Err(e),
                }
            }
        }
    }
}

/// Bound a call by `limit`, mapping expiry to the caller's error.
pub async fn with_timeout<T, Fut>(
    limit: Duration,
    future: Fut,
    on_timeout: impl FnOnce() -> SyncError,
) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(RetryConfig::none().max_attempts, 1);
    }

    #[test]
    fn test_limiter_allows_configured_burst() {
        let limiter = RateLimitConfig {
            requests_per_second: 1,
            burst_size: 2,
        }
        .build();
        tokio_test::block_on(async {
            limiter.until_ready().await;
            limiter.until_ready().await;
        });
        assert!(limiter.check().is_err());
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = retry_async(
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(SyncError::RemoteUnavailable("reset".into()))
                } else {
                    Ok(7)
                }
            },
            &fast(),
            "test",
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_async(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::RemoteUnavailable("down".into()))
            },
            &fast(),
            "test",
        )
        .await;
        assert!(matches!(result, Err(SyncError::RemoteUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_skips_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_async(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::RemoteNotFound("/gone".into()))
            },
            &fast(),
            "test",
        )
        .await;
        assert!(matches!(result, Err(SyncError::RemoteNotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_timeout_maps_expiry() {
        let result: Result<()> = with_timeout(
            Duration::from_millis(5),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            || SyncError::ExtractionTimeout(Duration::from_millis(5)),
        )
        .await;
        assert!(matches!(result, Err(SyncError::ExtractionTimeout(_))));
    }
}
