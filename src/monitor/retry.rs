use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Bounded exponential backoff: delays `base, base*m, base*m^2, ...`
/// between at most `max_attempts` attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .checked_pow(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// All delays that a fully exhausted run would sleep, in order.
    pub fn delays(&self) -> Vec<Duration> {
        (1..self.max_attempts).map(|a| self.delay_after(a)).collect()
    }
}

/// Run `operation` until it succeeds, returns an error `is_retryable` rejects,
/// or the policy's attempt budget is spent. The last error is returned.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    label: &str,
    is_retryable: R,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retryable(&err) || attempt >= policy.max_attempts {
                    return Err(err);
                }
                let delay = policy.delay_after(attempt);
                log::warn!(
                    "⏳ {} failed (attempt {}/{}): {} - retrying in {}ms",
                    label,
                    attempt,
                    policy.max_attempts,
                    err,
                    delay.as_millis()
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_delays_grow_geometrically() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100), 3);
        assert_eq!(
            policy.delays(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(300),
                Duration::from_millis(900),
            ]
        );
    }

    #[test]
    fn test_single_attempt_has_no_delays() {
        let policy = RetryPolicy::new(0, Duration::from_millis(100), 2);
        assert_eq!(policy.max_attempts, 1);
        assert!(policy.delays().is_empty());
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), 2);
        let calls = Cell::new(0);

        let result: Result<(), String> = retry_with_backoff(&policy, "op", |_| true, || {
            calls.set(calls.get() + 1);
            async { Err("busy".to_string()) }
        })
        .await;

        assert_eq!(result, Err("busy".to_string()));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1), 2);
        let calls = Cell::new(0);

        let result: Result<(), String> = retry_with_backoff(&policy, "op", |_| false, || {
            calls.set(calls.get() + 1);
            async { Err("denied".to_string()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1), 2);
        let calls = Cell::new(0);

        let result: Result<u32, String> = retry_with_backoff(&policy, "op", |_| true, || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n < 3 {
                    Err("locked".to_string())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(3));
    }
}
