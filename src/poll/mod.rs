//! Retry/Poll Engine
//!
//! Bounded-time polling of a predicate over a fallible operation. Every
//! failure of the operation counts as "not yet satisfied"; only the caller
//! decides whether running out of time is fatal.
//!
//! Attempt `k` starts at `(k - 1) * interval` on an otherwise idle clock. An
//! attempt is only made while the elapsed time is within the timeout, so a
//! predicate first satisfied on attempt `k` yields success exactly when that
//! attempt started no later than the deadline.

mod http;

pub use http::{ObservedResponse, ResponseCondition, get_once, get_request};

use std::fmt::{Debug, Display};
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::error::HarnessError;

/// Default fixed delay between attempts
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

/// What the last attempt produced when a poll did not succeed
#[derive(Debug)]
pub enum Observation<T, E> {
    /// The operation returned a value that failed the predicate
    Unsatisfied(T),
    /// The operation itself failed (connection refused, 5xx, ...)
    Failed(E),
}

/// Result of one bounded-time predicate evaluation
#[derive(Debug)]
pub enum PollOutcome<T, E> {
    Satisfied {
        value: T,
        attempts: u32,
        elapsed: Duration,
    },
    TimedOut {
        attempts: u32,
        elapsed: Duration,
        last: Option<Observation<T, E>>,
    },
}

impl<T, E> PollOutcome<T, E> {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Satisfied { attempts, .. } | Self::TimedOut { attempts, .. } => *attempts,
        }
    }
}

impl<T: Debug, E: Display> PollOutcome<T, E> {
    /// Turn a timed-out outcome into `HarnessError::Timeout` for `operation`
    pub fn into_result(self, operation: &str) -> Result<T, HarnessError> {
        match self {
            Self::Satisfied { value, .. } => Ok(value),
            Self::TimedOut {
                attempts,
                elapsed,
                last,
            } => Err(HarnessError::Timeout {
                operation: operation.to_string(),
                elapsed,
                attempts,
                last: describe(last.as_ref()),
            }),
        }
    }
}

fn describe<T: Debug, E: Display>(last: Option<&Observation<T, E>>) -> String {
    match last {
        None => "no attempt made".to_string(),
        Some(Observation::Unsatisfied(value)) => format!("{:?}", value),
        Some(Observation::Failed(e)) => format!("error: {}", e),
    }
}

/// Invoke `operation` until `predicate` accepts its value or `timeout`
/// elapses, sleeping `interval` between attempts.
///
/// At least one attempt is always made. An in-flight attempt is never
/// cancelled; if it finishes after the deadline its result is discarded.
pub async fn poll_until<T, E, F, Fut, P>(
    mut operation: F,
    mut predicate: P,
    timeout: Duration,
    interval: Duration,
) -> PollOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&T) -> bool,
{
    let start = Instant::now();
    let mut attempts = 0u32;
    let mut last = None;

    loop {
        // the first attempt counts as starting at zero whatever the clock says
        let started_at = if attempts == 0 {
            Duration::ZERO
        } else {
            start.elapsed()
        };
        if attempts > 0 && started_at > timeout {
            return PollOutcome::TimedOut {
                attempts,
                elapsed: started_at,
                last,
            };
        }

        attempts += 1;
        match operation().await {
            Ok(value) if predicate(&value) && started_at <= timeout => {
                return PollOutcome::Satisfied {
                    value,
                    attempts,
                    elapsed: start.elapsed(),
                };
            }
            Ok(value) => {
                trace!(attempt = attempts, "Predicate not yet satisfied");
                last = Some(Observation::Unsatisfied(value));
            }
            Err(e) => {
                trace!(attempt = attempts, "Attempt failed, retrying");
                last = Some(Observation::Failed(e));
            }
        }

        if start.elapsed() + interval > timeout {
            return PollOutcome::TimedOut {
                attempts,
                elapsed: start.elapsed(),
                last,
            };
        }
        tokio::time::sleep(interval).await;
    }
}
