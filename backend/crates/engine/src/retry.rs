use std::future::Future;
use std::time::Duration;

use crate::clock::Clock;

/// Outcome of one poll attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus<T> {
    Ready(T),
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("still pending after {attempts} attempts")]
pub struct PollExhausted {
    pub attempts: u32,
}

/// Attempt budget and spacing for polling loops and transient-error retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub backoff_factor: f64,
    pub max_interval: Duration,
}

impl RetryPolicy {
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            interval,
            backoff_factor: 1.0,
            max_interval: interval,
        }
    }

    pub fn exponential(
        initial: Duration,
        factor: f64,
        max_interval: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            max_attempts,
            interval: initial,
            backoff_factor: factor,
            max_interval,
        }
    }

    /// Backoff for transient HTTP failures: 2s, 4s, 8s ... capped at 30s.
    pub fn http_backoff(max_retries: u32) -> Self {
        Self::exponential(
            Duration::from_secs(2),
            2.0,
            Duration::from_secs(30),
            max_retries + 1,
        )
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let secs = self.interval.as_secs_f64() * exp;
        if !secs.is_finite() || secs >= self.max_interval.as_secs_f64() {
            return self.max_interval;
        }
        Duration::from_secs_f64(secs)
    }

    /// Call `attempt` until it reports `Ready`, sleeping between attempts.
    /// Errors from `attempt` end the loop immediately.
    pub async fn poll<C, T, E, F, Fut>(&self, clock: &C, mut attempt: F) -> Result<T, E>
    where
        C: Clock + ?Sized,
        E: From<PollExhausted>,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<PollStatus<T>, E>>,
    {
        for n in 1..=self.max_attempts {
            if let PollStatus::Ready(value) = attempt(n).await? {
                return Ok(value);
            }
            if n < self.max_attempts {
                clock.sleep(self.delay_for(n)).await;
            }
        }
        Err(PollExhausted {
            attempts: self.max_attempts,
        }
        .into())
    }
}
