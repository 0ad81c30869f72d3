//! Retry policy and the `with_retry` combinator shared by the HTTP fetcher
//! and the DAG runner.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Exponential backoff with symmetric jitter.
///
/// The delay after failed attempt `n` (1-based) is
/// `min(base_delay * multiplier^(n-1), max_delay)`, then scaled by a random
/// factor in `[1 - jitter, 1 + jitter]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Values below 1 behave as 1.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Fraction of the delay, e.g. `0.2` for ±20%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Backoff before the attempt following `failed_attempt`, without jitter.
    pub fn base_delay(&self, failed_attempt: u32) -> Duration {
        let exp = failed_attempt.saturating_sub(1).min(64) as i32;
        let raw = self.base_delay_ms as f64 * self.multiplier.max(1.0).powi(exp);
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Backoff before the attempt following `failed_attempt`, with jitter.
    pub fn delay(&self, failed_attempt: u32) -> Duration {
        let base = self.base_delay(failed_attempt);
        let jitter = self.jitter.clamp(0.0, 0.99);
        if jitter == 0.0 {
            return base;
        }
        let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
        base.mul_f64(factor)
    }
}

/// Terminal failure of [`with_retry`].
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every allowed attempt failed with a retryable error.
    Exhausted { attempts: u32, last: E },
    /// An attempt failed with an error the caller marked non-retryable.
    Aborted { attempt: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::Aborted { attempt, .. } => *attempt,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted { error, .. } => error,
        }
    }
}

/// Runs `op` until it succeeds, returns a non-retryable error, or the policy
/// runs out of attempts.
///
/// `op` receives the 1-based attempt number. `observe` is called after every
/// failed attempt with the delay before the next one, or `None` when no
/// further attempt will be made.
pub async fn with_retry<T, E, Op, Fut, R, O>(
    policy: &RetryPolicy,
    mut op: Op,
    retryable: R,
    mut observe: O,
) -> Result<T, RetryError<E>>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    O: FnMut(u32, &E, Option<Duration>),
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !retryable(&error) {
                    observe(attempt, &error, None);
                    return Err(RetryError::Aborted { attempt, error });
                }
                if attempt >= max_attempts {
                    observe(attempt, &error, None);
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: error,
                    });
                }
                let delay = policy.delay(attempt);
                observe(attempt, &error, Some(delay));
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
