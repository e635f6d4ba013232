//! Bounded retry with a fixed backoff table
//!
//! Both retry layers use this module: request-level retries inside the HTTP
//! client, and run-level retries inside the scheduler. Delays come from a
//! fixed table (1s, 3s, 5s by default); when retries outnumber the table the
//! last delay repeats.

use crate::error::RetryableError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default delays between attempts, in milliseconds
pub const DEFAULT_BACKOFF_MS: [u64; 3] = [1000, 3000, 5000];

/// Fixed backoff delay table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    delays: Vec<Duration>,
}

impl BackoffSchedule {
    /// Build a schedule from millisecond delays
    pub fn from_millis(delays_ms: &[u64]) -> Self {
        Self {
            delays: delays_ms.iter().copied().map(Duration::from_millis).collect(),
        }
    }

    /// Delay to wait after the failed attempt with the given zero-based index
    ///
    /// An empty table means no delay.
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        match self.delays.last() {
            None => Duration::ZERO,
            Some(last) => self
                .delays
                .get(retry_index as usize)
                .copied()
                .unwrap_or(*last),
        }
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::from_millis(&DEFAULT_BACKOFF_MS)
    }
}

/// Final result of a retried operation together with how many attempts it took
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    /// Outcome of the last attempt
    pub result: T,
    /// Number of attempts made (at least 1 unless cancelled before the first)
    pub attempts: u32,
}

/// Why a cancellable retry loop stopped without success
#[derive(Debug, Clone, PartialEq)]
pub enum RetryFailure<E> {
    /// The last attempt failed and no retries remain (or the error was permanent)
    Failed(E),
    /// The cancellation token fired mid-attempt or mid-backoff
    Cancelled,
}

/// Retry manager with a fixed backoff table
#[derive(Debug, Clone)]
pub struct RetryManager {
    max_retries: u32,
    backoff: BackoffSchedule,
}

impl RetryManager {
    /// Create a retry manager allowing `max_retries` extra attempts
    pub fn new(max_retries: u32, backoff: BackoffSchedule) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Retry manager with default backoff table
    pub fn with_retries(max_retries: u32) -> Self {
        Self::new(max_retries, BackoffSchedule::default())
    }

    /// Maximum extra attempts
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Backoff table in use
    pub fn backoff(&self) -> &BackoffSchedule {
        &self.backoff
    }

    /// Execute an async operation, retrying retryable errors
    ///
    /// Runs at most `1 + max_retries` attempts. A non-retryable error ends
    /// the loop immediately.
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Attempted<Result<T, E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + std::fmt::Display,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(err) => {
                    let retries_used = attempt - 1;
                    if !err.is_retryable() || retries_used >= self.max_retries {
                        if err.is_retryable() {
                            warn!(
                                attempts = attempt,
                                max_retries = self.max_retries,
                                error = %err,
                                "Max retries exhausted"
                            );
                        }
                        return Attempted {
                            result: Err(err),
                            attempts: attempt,
                        };
                    }

                    let backoff = self.backoff.delay_for(retries_used);
                    debug!(
                        attempt,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Retrying after transient error"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Execute an async operation that can be abandoned through `cancel`
    ///
    /// Cancellation interrupts both an in-flight attempt and a backoff wait.
    /// `on_backoff(attempt, delay, &err)` fires before each backoff wait.
    pub async fn execute_cancellable<F, Fut, T, E, H>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
        mut on_backoff: H,
    ) -> Attempted<Result<T, RetryFailure<E>>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + std::fmt::Display,
        H: FnMut(u32, Duration, &E),
    {
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Attempted {
                    result: Err(RetryFailure::Cancelled),
                    attempts: attempt,
                };
            }

            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Attempted {
                        result: Err(RetryFailure::Cancelled),
                        attempts: attempt,
                    };
                }
                result = operation(attempt) => result,
            };

            let err = match result {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(err) => err,
            };

            let retries_used = attempt - 1;
            if !err.is_retryable() || retries_used >= self.max_retries {
                return Attempted {
                    result: Err(RetryFailure::Failed(err)),
                    attempts: attempt,
                };
            }

            let backoff = self.backoff.delay_for(retries_used);
            on_backoff(attempt, backoff, &err);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Attempted {
                        result: Err(RetryFailure::Cancelled),
                        attempts: attempt,
                    };
                }
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }
}
