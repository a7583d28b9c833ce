//! Periodic retirement of expired events.
//!
//! The sweeper is the only actor that changes an event's status without a
//! user action. Each tick asks the store for active events whose end date
//! has passed and moves each one to `Done` with a conditional update, so
//! racing a request-driven completion is harmless.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::domain::EventStatus;
use crate::error::BrokerError;
use crate::persistence::EntityStore;

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    /// Moves the clock to `at`.
    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: chrono::Duration) {
        self.millis
            .fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired active events found.
    pub examined: usize,
    /// Events moved to `Done` by this tick.
    pub expired: usize,
    /// Events whose update failed.
    pub failed: usize,
}

/// Retires expired events on a fixed interval.
#[derive(Debug, Clone)]
pub struct LifecycleSweeper {
    store: Arc<dyn EntityStore>,
    clock: Arc<dyn Clock>,
}

impl LifecycleSweeper {
    /// Creates a sweeper reading time from `clock`.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Runs one sweep.
    ///
    /// A failure on one event is logged and counted; the remaining events
    /// are still processed.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] only if the expired-event query fails.
    pub async fn tick(&self) -> Result<SweepReport, BrokerError> {
        let now = self.clock.now();
        let expired = self.store.expired_active_events(now).await?;
        let mut report = SweepReport {
            examined: expired.len(),
            ..SweepReport::default()
        };

        for event in expired {
            match self
                .store
                .transition_event(event.id, EventStatus::Active, EventStatus::Done)
                .await
            {
                Ok(true) => {
                    report.expired += 1;
                    tracing::info!(event_id = %event.id, end_date = ?event.end_date, "event expired");
                }
                Ok(false) => {
                    tracing::debug!(event_id = %event.id, "event left active state before sweep");
                }
                Err(err) => {
                    report.failed += 1;
                    tracing::error!(event_id = %event.id, error = %err, "failed to expire event");
                }
            }
        }
        Ok(report)
    }

    /// Starts sweeping every `interval` until the handle is shut down.
    ///
    /// The first sweep runs immediately. Missed ticks are skipped.
    #[must_use]
    pub fn spawn(self, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => match self.tick().await {
                        Ok(report) if report.examined > 0 => {
                            tracing::debug!(?report, "sweep finished");
                        }
                        Ok(_) => {}
                        Err(err) => tracing::error!(error = %err, "sweep failed"),
                    },
                }
            }
            tracing::info!("lifecycle sweeper stopped");
        });

        tracing::info!(interval_ms = interval.as_millis() as u64, "lifecycle sweeper started");
        SweeperHandle {
            shutdown: Some(shutdown_tx),
            join,
        }
    }
}

/// Owns a running sweeper task.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stops the sweeper after its current tick and waits for it.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(err) = (&mut self.join).await {
            tracing::warn!(error = %err, "sweeper task ended abnormally");
        }
    }

    /// Returns `true` once the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
