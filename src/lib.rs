//! # relief-broker
//!
//! REST and WebSocket service that brokers help between community members.
//!
//! An author publishes an event (a *help* request with quantified needs, or
//! a *proposal* offering help) with a fixed number of concurrent responder
//! slots. Each response is a transaction that holds one slot from creation
//! until it closes. Both parties move their own side of the transaction
//! forward; every transition notifies the other side.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP, WebSocket)
//!     │
//!     ├── REST Handlers (api/)
//!     ├── WS Handler (ws/)
//!     │
//!     ├── RequestTimeoutGuard (service/)
//!     ├── EventService, TransactionStateMachine, StatisticsService (service/)
//!     ├── CapacityManager, NeedAggregator, NotificationEmitter (service/)
//!     ├── LifecycleSweeper (service/, background task)
//!     │
//!     ├── NotificationBus (domain/)
//!     │
//!     └── EntityStore: MemoryStore | PostgresStore (persistence/)
//! ```
//!
//! Slot accounting and the two-sided status check are enforced by
//! conditional writes in the store, so concurrent requests never
//! overbook an event or apply two transitions from the same state.

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;
pub mod ws;
