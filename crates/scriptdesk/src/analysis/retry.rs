//! Bounded exponential backoff for language-model calls.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rate limiting, connectivity, upstream server errors.
    Transient,
    /// Bad request, authentication, malformed reply.
    Permanent,
}

/// Errors that can tell the retry loop what kind they are.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

/// Backoff policy passed to the analysis client.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total calls including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Growth factor applied per retry.
    pub multiplier: f64,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(4),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Policy that never sleeps, for tests and local tooling.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }
}

/// The final error of a retried operation and how many calls were made.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub error: E,
    pub attempts: u32,
}

/// Runs `op` until it succeeds, fails with a permanent error, or the policy
/// runs out of attempts. Each retry is logged with its delay.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, Exhausted<E>>
where
    E: Classify + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.kind() == ErrorKind::Transient && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                log::info!(
                    "Retrying {} after {:.1}s (attempt {}/{} failed: {})",
                    label,
                    delay.as_secs_f64(),
                    attempt,
                    max_attempts,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.kind() == ErrorKind::Transient {
                    log::warn!("{} failed after {} attempts: {}", label, attempt, e);
                }
                return Err(Exhausted { error: e, attempts: attempt });
            }
        }
    }
}
