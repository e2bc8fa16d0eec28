//! Poll-until-ready primitive
//!
//! Bridges the eventually-consistent cluster API into a sequential flow:
//! a probe is evaluated on a fixed interval until it reports ready, the
//! timeout elapses, or the caller cancels.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default interval between probe evaluations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// A single-use wait: what we are waiting for, for how long, and how often to look
#[derive(Debug, Clone, PartialEq)]
pub struct WaitCondition {
    /// Human-readable description, carried into timeout/cancel errors
    pub reason: String,
    /// Maximum cumulative time to keep probing
    pub timeout: Duration,
    /// Pause between two probe evaluations
    pub interval: Duration,
}

impl WaitCondition {
    /// Create a condition polled every [`DEFAULT_POLL_INTERVAL`]
    pub fn new(reason: impl Into<String>, timeout: Duration) -> Self {
        Self {
            reason: reason.into(),
            timeout,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the polling interval
    pub fn every(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Failure reported by a single probe evaluation
#[derive(Debug)]
pub enum ProbeError<E> {
    /// The observed system is not there yet (object missing, connection refused).
    /// Counted as "not ready" and retried on the next tick.
    Transient(String),

    /// Retrying cannot help. Ends the wait immediately.
    Terminal(E),
}

/// Why a wait ended without the condition becoming true
#[derive(Debug, Error)]
pub enum WaitError<E> {
    #[error("timed out after {timeout:?} {reason}")]
    Timeout { reason: String, timeout: Duration },

    #[error("cancelled while {reason}")]
    Cancelled { reason: String },

    #[error("{reason}: {error}")]
    Failed { reason: String, error: E },
}

/// Evaluate `probe` until it returns `Ok(true)`
///
/// # Behavior
/// - `Ok(true)` returns success right away, no further evaluations
/// - `Ok(false)` and `Err(ProbeError::Transient)` count as "not ready yet"
/// - `Err(ProbeError::Terminal)` ends the wait with [`WaitError::Failed`]
/// - once the elapsed time reaches `condition.timeout` after an unsuccessful
///   evaluation, the wait ends with [`WaitError::Timeout`]
/// - cancelling `cancel` ends the wait with [`WaitError::Cancelled`], also when
///   a probe is in flight
///
/// The probe is evaluated once immediately, then every `condition.interval`,
/// so a never-ready probe times out between `timeout` and `timeout + interval`.
/// A probe still running at `timeout + interval` is abandoned and counts as
/// not ready, which keeps that bound for slow or hung probes too.
pub async fn wait_until<F, Fut, E>(
    condition: &WaitCondition,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<(), WaitError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, ProbeError<E>>>,
{
    let cancelled = || WaitError::Cancelled {
        reason: condition.reason.clone(),
    };

    let started = Instant::now();
    let cutoff = started + condition.timeout + condition.interval;
    let mut attempts: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        attempts += 1;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            outcome = timeout_at(cutoff, probe()) => outcome,
        };

        match outcome {
            Err(_elapsed) => {
                debug!(reason = %condition.reason, attempts, "Probe abandoned at deadline");
            }
            Ok(Ok(true)) => {
                debug!(
                    reason = %condition.reason,
                    attempts,
                    elapsed = ?started.elapsed(),
                    "Condition met"
                );
                return Ok(());
            }
            Ok(Ok(false)) => {
                debug!(reason = %condition.reason, attempts, "Condition not met yet");
            }
            Ok(Err(ProbeError::Transient(message))) => {
                debug!(
                    reason = %condition.reason,
                    attempts,
                    error = %message,
                    "Probe failed transiently, will retry"
                );
            }
            Ok(Err(ProbeError::Terminal(error))) => {
                return Err(WaitError::Failed {
                    reason: condition.reason.clone(),
                    error,
                });
            }
        }

        if started.elapsed() >= condition.timeout {
            return Err(WaitError::Timeout {
                reason: condition.reason.clone(),
                timeout: condition.timeout,
            });
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            _ = sleep(condition.interval) => {}
        }
    }
}

#[cfg(test)]
#[path = "wait_test.rs"]
mod tests;
