//! Bounded retry with a fixed delay.
//!
//! Extraction runs on blocking worker threads, so waiting goes through a
//! [`Clock`] instead of `tokio::time`. Tests swap in a clock that only
//! records the requested delays.

use crate::services::config::RetryPolicy;
use std::fmt::Display;
use std::time::Duration;

pub trait Clock: Send + Sync {
    fn sleep(&self, delay: Duration);
}

/// Real wall-clock sleeping.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// Run `op` until it succeeds or `policy.max_attempts` tries are used up.
///
/// `op` receives the 1-based attempt number. The last error is returned
/// unchanged when every attempt failed.
pub fn attempt<T, E, F>(policy: &RetryPolicy, clock: &dyn Clock, what: &str, mut op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut tries = 1;

    loop {
        match op(tries) {
            Ok(value) => return Ok(value),
            Err(e) if tries < max_attempts => {
                log::warn!(
                    "{what} failed ({e}), retry {}/{} in {:?}",
                    tries,
                    max_attempts - 1,
                    policy.delay()
                );
                clock.sleep(policy.delay());
                tries += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
#[path = "tests/retry_tests.rs"]
mod tests;
