use std::{future::Future, time::Duration};

use metrics::counter;
use tracing::warn;

use crate::RecordsError;

/// Bounded exponential backoff applied around records API calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt (0 disables retrying).
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn exponential(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    /// Delay before the given retry (1-indexed): `base * 2^(retry - 1)`, capped.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(retry - 1);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Runs `attempt` until it succeeds, fails permanently, or the retry
    /// budget is spent. Only transient errors are retried.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        mut attempt: F,
    ) -> Result<T, RecordsError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RecordsError>>,
    {
        let mut retry = 0;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && retry < self.max_retries => {
                    retry += 1;
                    let delay = self.delay_for_retry(retry);
                    warn!(
                        stage = "records",
                        operation,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient records failure, retrying"
                    );
                    counter!("records_retries_total", "operation" => operation).increment(1);
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn unavailable() -> RecordsError {
        RecordsError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: "busy".into(),
        }
    }

    #[test]
    fn delays_grow_exponentially_and_cap() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for_retry(0), Duration::ZERO);
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_retry(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_retry(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for_retry(40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let policy = RetryPolicy::exponential(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let result = policy
            .run("test", || {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call < 2 {
                        Err(unavailable())
                    } else {
                        Ok(call)
                    }
                }
            })
            .await
            .expect("eventually succeeds");
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() {
        let policy = RetryPolicy::exponential(2, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(unavailable()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(RecordsError::Status {
                        status: StatusCode::UNAUTHORIZED,
                        body: "denied".into(),
                    })
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
