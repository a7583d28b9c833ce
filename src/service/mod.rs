//! Service layer: business logic orchestration.
//!
//! [`TransactionStateMachine`] is the centre. Every transition goes through
//! the [`CapacityManager`] for slots, the [`NotificationEmitter`] for the
//! counter-party and, on help events, the [`NeedAggregator`].
//! [`LifecycleSweeper`] retires expired events on its own timer, and
//! [`RequestTimeoutGuard`] bounds how long an API caller waits.

pub mod capacity;
pub mod events;
pub mod needs;
pub mod notifier;
pub mod statistics;
pub mod sweeper;
pub mod timeout;
pub mod transitions;

pub use capacity::CapacityManager;
pub use events::{EventDetails, EventDraft, EventService};
pub use needs::{FoldedNeeds, NeedAggregator};
pub use notifier::NotificationEmitter;
pub use statistics::{ComparedCount, DailyRequests, EventStatistics, StatisticsService};
pub use sweeper::{Clock, LifecycleSweeper, ManualClock, SweepReport, SweeperHandle, SystemClock};
pub use timeout::{GuardStats, GuardStatsSnapshot, RequestTimeoutGuard};
pub use transitions::{
    ProofFile, TransactionDetails, TransactionStateMachine, TransitionOutcome,
    UpdateStatusRequest,
};
