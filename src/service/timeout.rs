//! Client-facing deadlines for state-changing operations.
//!
//! The guarded work runs on its own task. The caller races that task
//! against the deadline; when the deadline wins the caller gets
//! [`BrokerError::Timeout`] but the task keeps running to completion. A
//! reconciler then awaits the abandoned task and logs how it ended, so a
//! late write is never silent.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::BrokerError;

/// Counters kept by [`RequestTimeoutGuard`].
#[derive(Debug, Default)]
pub struct GuardStats {
    /// Operations that finished before the deadline.
    pub completed: AtomicU64,
    /// Operations whose caller received a timeout.
    pub timed_out: AtomicU64,
    /// Abandoned operations that later succeeded.
    pub late_completed: AtomicU64,
    /// Abandoned operations that later failed or panicked.
    pub late_failed: AtomicU64,
}

/// Point-in-time copy of [`GuardStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuardStatsSnapshot {
    /// See [`GuardStats::completed`].
    pub completed: u64,
    /// See [`GuardStats::timed_out`].
    pub timed_out: u64,
    /// See [`GuardStats::late_completed`].
    pub late_completed: u64,
    /// See [`GuardStats::late_failed`].
    pub late_failed: u64,
}

/// Runs work with a bounded client-visible latency.
#[derive(Debug, Clone)]
pub struct RequestTimeoutGuard {
    deadline: Duration,
    stats: Arc<GuardStats>,
}

impl RequestTimeoutGuard {
    /// Creates a guard with the given deadline.
    #[must_use]
    pub fn new(deadline: Duration) -> Self {
        Self {
            deadline,
            stats: Arc::new(GuardStats::default()),
        }
    }

    /// The configured deadline.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Current counter values.
    #[must_use]
    pub fn stats(&self) -> GuardStatsSnapshot {
        GuardStatsSnapshot {
            completed: self.stats.completed.load(Ordering::Relaxed),
            timed_out: self.stats.timed_out.load(Ordering::Relaxed),
            late_completed: self.stats.late_completed.load(Ordering::Relaxed),
            late_failed: self.stats.late_failed.load(Ordering::Relaxed),
        }
    }

    /// Runs `work` on a new task and waits at most the deadline for it.
    ///
    /// The work is never cancelled. A timeout means the outcome is unknown.
    ///
    /// # Errors
    ///
    /// Returns the work's own error, [`BrokerError::Timeout`] when the
    /// deadline elapses first, or [`BrokerError::Internal`] if the task
    /// panicked.
    pub async fn run<F, T>(&self, operation: &'static str, work: F) -> Result<T, BrokerError>
    where
        F: Future<Output = Result<T, BrokerError>> + Send + 'static,
        T: Send + 'static,
    {
        let mut handle = tokio::spawn(work);

        match tokio::time::timeout(self.deadline, &mut handle).await {
            Ok(joined) => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                joined.map_err(|e| BrokerError::Internal(format!("{operation} task failed: {e}")))?
            }
            Err(_) => {
                self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                let after_ms = u64::try_from(self.deadline.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(operation, after_ms, "deadline elapsed, operation continues in background");

                let stats = Arc::clone(&self.stats);
                tokio::spawn(async move {
                    match handle.await {
                        Ok(Ok(_)) => {
                            stats.late_completed.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(operation, abandoned = true, "timed-out operation completed");
                        }
                        Ok(Err(err)) => {
                            stats.late_failed.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(operation, abandoned = true, error = %err, "timed-out operation failed");
                        }
                        Err(err) => {
                            stats.late_failed.fetch_add(1, Ordering::Relaxed);
                            tracing::error!(operation, abandoned = true, error = %err, "timed-out operation panicked");
                        }
                    }
                });

                Err(BrokerError::Timeout {
                    operation,
                    after_ms,
                })
            }
        }
    }
}
