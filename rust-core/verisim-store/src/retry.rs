// SPDX-License-Identifier: PMPL-1.0-or-later
//! Retry with exponential backoff and jitter.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Backoff policy: base 100 ms doubling per attempt, capped at 10 s, with
/// +/-25 % jitter, up to 3 attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            cap: Duration::from_secs(10),
            max_attempts: 3,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given (1-indexed) retry attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.cap);
        let jitter_span = exp.as_secs_f64() * self.jitter;
        let offset: f64 = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
        Duration::from_secs_f64((exp.as_secs_f64() + offset).max(0.0))
    }
}

/// Run `op`, retrying recoverable errors per the policy. Non-recoverable
/// errors and exhausted attempts surface the last error unchanged.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    is_recoverable: R,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && is_recoverable(&err) => {
                let delay = policy.delay_for(attempt);
                debug!(attempt, ?delay, "retrying after recoverable error");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(20), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_band() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let d = policy.delay_for(1).as_secs_f64();
            assert!((0.075..=0.125).contains(&d), "delay {d} outside jitter band");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_recoverable_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_with_backoff(
            &RetryPolicy::default(),
            |_| true,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient")
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_recoverable_fails_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_with_backoff(
            &RetryPolicy::default(),
            |_| false,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal") }
            },
        )
        .await;
        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
