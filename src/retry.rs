//! Fixed-delay retry for client runs and whole batches.
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;

/// Extra attempts after the first, with a fixed pause between attempts.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay_seconds: u64,
}

impl RetryPolicy {
    pub const fn new(retries: u32, delay_seconds: u64) -> Self {
        Self {
            retries,
            delay_seconds,
        }
    }

    pub const fn none() -> Self {
        Self::new(0, 0)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// Run `op` until it succeeds or the policy is exhausted.
///
/// `op` receives the 1-based attempt number. The last error is returned
/// unchanged; earlier ones are logged as warnings.
pub fn retry<T, E, F>(
    policy: RetryPolicy,
    label: &str,
    sleep: &dyn Fn(Duration),
    mut op: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts => {
                tracing::warn!(
                    label,
                    attempt,
                    max_attempts,
                    delay_seconds = policy.delay_seconds,
                    error = %err,
                    "attempt failed, retrying"
                );
                sleep(policy.delay());
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
