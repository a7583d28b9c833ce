//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::config::BrokerConfig;
use crate::domain::NotificationBus;
use crate::persistence::{EntityStore, FileStorage};
use crate::service::{
    CapacityManager, EventService, NotificationEmitter, RequestTimeoutGuard, StatisticsService,
    TransactionStateMachine,
};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Event creation, capacity and reads.
    pub events: Arc<EventService>,
    /// Transaction transitions.
    pub transactions: Arc<TransactionStateMachine>,
    /// Author statistics.
    pub statistics: Arc<StatisticsService>,
    /// Notification emission and the read side.
    pub notifier: NotificationEmitter,
    /// Deadline for state-changing calls.
    pub guard: RequestTimeoutGuard,
    /// Live notification feed for WebSocket clients.
    pub notification_bus: NotificationBus,
}

impl AppState {
    /// Wires every service over the given store and file storage.
    #[must_use]
    pub fn new(
        config: &BrokerConfig,
        store: Arc<dyn EntityStore>,
        files: Arc<dyn FileStorage>,
    ) -> Self {
        let notification_bus = NotificationBus::new(config.notification_bus_capacity);
        let notifier = NotificationEmitter::new(Arc::clone(&store), notification_bus.clone());
        let transactions = TransactionStateMachine::new(
            Arc::clone(&store),
            files,
            CapacityManager::new(Arc::clone(&store)),
            notifier.clone(),
        );

        Self {
            events: Arc::new(EventService::new(
                Arc::clone(&store),
                config.max_active_events_per_user,
            )),
            transactions: Arc::new(transactions),
            statistics: Arc::new(StatisticsService::new(store)),
            notifier,
            guard: RequestTimeoutGuard::new(config.request_timeout()),
            notification_bus,
        }
    }
}
