//! Bounded retry on rate-limit signals, and the sheet writer built on it.
//!
//! A rate-limited call is retried after a fixed pause, up to
//! `max_attempts` calls in total; any other error is returned at once.

use crate::sheet::{CellRef, CellUpdate, Sheet, SheetError};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum RetryError<E: std::error::Error + 'static> {
    #[error("{operation}: still rate limited after {attempts} attempts")]
    Exhausted {
        operation: String,
        attempts: u32,
        #[source]
        last: E,
    },
    #[error(transparent)]
    Fatal(E),
}

/// Blocking pause between attempts. Swapped for a recorder in tests.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls, including the first.
    pub max_attempts: u32,
    /// Fixed pause after each retryable failure.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails with a non-retryable error, or has
    /// been called `max_attempts` times. The pause happens between attempts,
    /// never after the last one.
    pub fn run<T, E, F, R>(
        &self,
        operation: &str,
        sleeper: &dyn Sleeper,
        is_retryable: R,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut() -> Result<T, E>,
        R: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op() {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if !is_retryable(&err) => return Err(RetryError::Fatal(err)),
                Err(err) if attempt >= max_attempts => {
                    tracing::error!(operation, attempts = attempt, error = %err, "retries exhausted");
                    return Err(RetryError::Exhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        last: err,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        operation,
                        attempt,
                        backoff_secs = self.backoff.as_secs_f64(),
                        error = %err,
                        "rate limit exceeded, retrying after backoff"
                    );
                    sleeper.sleep(self.backoff);
                }
            }
        }
    }
}

/// Sheet writes wrapped in a [`RetryPolicy`] that retries on rate limits.
pub struct RateLimitedWriter<S: Sleeper = ThreadSleeper> {
    policy: RetryPolicy,
    sleeper: S,
}

impl RateLimitedWriter<ThreadSleeper> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, sleeper: ThreadSleeper }
    }
}

impl<S: Sleeper> RateLimitedWriter<S> {
    pub fn with_sleeper(policy: RetryPolicy, sleeper: S) -> Self {
        Self { policy, sleeper }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    pub fn write_cell<Sh>(&self, sheet: &mut Sh, cell: CellRef, value: &str) -> Result<(), RetryError<SheetError>>
    where
        Sh: Sheet + ?Sized,
    {
        self.policy.run("write cell", &self.sleeper, SheetError::is_rate_limit, || {
            sheet.write_cell(cell, value)
        })
    }

    pub fn write_batch<Sh>(&self, sheet: &mut Sh, updates: &[CellUpdate]) -> Result<(), RetryError<SheetError>>
    where
        Sh: Sheet + ?Sized,
    {
        self.policy.run("write batch", &self.sleeper, SheetError::is_rate_limit, || {
            sheet.write_batch(updates)
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_always_rate_limited_exhausts_after_max_attempts() {
        let writer = writer();
        let mut sheet = FlakySheet { rate_limited_writes: usize::MAX, ..Default::default() };

        let err = writer.write_cell(&mut sheet, CellRef::new(2, 2), "x").unwrap_err();

        assert_eq!(sheet.write_calls, 5);
        assert_eq!(*writer.sleeper().sleeps.borrow(), vec![Duration::from_secs(60); 4]);
        match err {
            RetryError::Exhausted { attempts, last, .. } => {
                assert_eq!(attempts, 5);
                assert!(last.is_rate_limit());
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(sheet.inner.get(2, 2), "");
    }

    #[test]
    fn test_recovers_after_transient_rate_limit() {
        let writer = writer();
        let mut sheet = FlakySheet { rate_limited_writes: 2, ..Default::default() };

        writer.write_cell(&mut sheet, CellRef::new(2, 2), "x").unwrap();

        assert_eq!(sheet.write_calls, 3);
        assert_eq!(writer.sleeper().sleeps.borrow().len(), 2);
        assert_eq!(sheet.inner.get(2, 2), "x");
    }

    #[test]
    fn test_other_errors_propagate_without_retry() {
        let writer = writer();
        let mut sheet = FlakySheet {
            fail_with: Some(SheetError::Api { status: 403, message: "forbidden".into() }),
            ..Default::default()
        };

        let err = writer.write_batch(&mut sheet, &[CellUpdate::new(1, 1, "a")]).unwrap_err();

        assert_eq!(sheet.write_calls, 1);
        assert!(writer.sleeper().sleeps.borrow().is_empty());
        assert!(matches!(err, RetryError::Fatal(SheetError::Api { status: 403, .. })));
    }

    #[test]
    fn test_policy_with_custom_budget() {
        let policy = RetryPolicy { max_attempts: 2, backoff: Duration::from_millis(5) };
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let result: Result<(), RetryError<SheetError>> =
            policy.run("probe", &sleeper, SheetError::is_rate_limit, || {
                calls += 1;
                Err(SheetError::RateLimited("slow down".into()))
            });

        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 2, .. })));
        assert_eq!(calls, 2);
        assert_eq!(*sleeper.sleeps.borrow(), vec![Duration::from_millis(5)]);
    }
}
