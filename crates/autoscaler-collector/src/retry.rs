//! Bounded exponential backoff for transient external errors. Shared by
//! the metrics-read and orchestrator-write paths.

use autoscaler_common::{Result, RunnerError};
use rand::Rng;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Run `op` up to `max_attempts` times, sleeping with jittered
    /// exponential backoff between attempts. Only retries errors for which
    /// `is_transient` returns true; any other error (or the last attempt's
    /// transient error) is returned immediately.
    pub fn run<T>(&self, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if attempt + 1 >= self.max_attempts || !is_transient(&e) => return Err(e),
                Err(_) => {
                    let backoff = self.base_delay.saturating_mul(1 << attempt).min(self.max_delay);
                    let jitter_ms = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 4 + 1);
                    thread::sleep(backoff + Duration::from_millis(jitter_ms));
                    attempt += 1;
                }
            }
        }
    }
}

fn is_transient(err: &RunnerError) -> bool {
    matches!(err, RunnerError::TransientExternal(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn retries_transient_until_success() {
        let policy = RetryPolicy { max_attempts: 5, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(4) };
        let calls = Cell::new(0);
        let result = policy.run(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 { Err(RunnerError::TransientExternal("timeout".into())) } else { Ok(42) }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let policy = RetryPolicy { max_attempts: 2, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(2) };
        let calls = Cell::new(0);
        let result: Result<()> = policy.run(|| {
            calls.set(calls.get() + 1);
            Err(RunnerError::TransientExternal("still down".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn non_transient_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let calls = Cell::new(0);
        let result: Result<()> = policy.run(|| {
            calls.set(calls.get() + 1);
            Err(RunnerError::Configuration("missing SLO".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
