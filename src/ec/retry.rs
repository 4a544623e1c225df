use std::thread;
use std::time::Duration;

use log::warn;

use super::error::EcResult;

/// Bounded retry with a fixed backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }

    /// Runs `op` until it succeeds, fails with a non-transient error, or the
    /// retry budget is spent. `op` receives the zero-based attempt number.
    /// `on_failure` sees every failed attempt, including the last.
    pub fn run<T, F, L>(&self, mut op: F, mut on_failure: L) -> EcResult<T>
    where
        F: FnMut(u32) -> EcResult<T>,
        L: FnMut(u32),
    {
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    on_failure(attempt);
                    if !err.is_transient() || attempt >= self.retries {
                        return Err(err);
                    }
                    warn!(
                        "ec attempt {}/{} failed ({}); retrying in {:?}",
                        attempt + 1,
                        self.attempts(),
                        err,
                        self.backoff
                    );
                    attempt += 1;
                    thread::sleep(self.backoff);
                }
            }
        }
    }
}
