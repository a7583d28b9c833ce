//! In-process [`EntityStore`] backed by ordered maps.
//!
//! All four tables sit behind one [`tokio::sync::RwLock`]. Each trait
//! method takes the lock once, so every conditional update is atomic
//! with respect to every other call, matching the per-statement
//! atomicity the PostgreSQL store gets from the database.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::EntityStore;
use crate::domain::{
    Event, EventId, EventStatus, MemberId, Need, NeedId, NeedIncrement, NewEvent, NewNeed,
    NewNotification, NewTransaction, Notification, NotificationId, StatusSnapshot, Transaction,
    TransactionId, TransactionPatch, TransactionStatus,
};
use crate::error::BrokerError;

#[derive(Debug, Default)]
struct Tables {
    events: BTreeMap<EventId, Event>,
    transactions: BTreeMap<TransactionId, Transaction>,
    needs: BTreeMap<NeedId, Need>,
    notifications: BTreeMap<NotificationId, Notification>,
    next_id: i64,
    #[cfg(test)]
    faults: Faults,
}

impl Tables {
    #[cfg(test)]
    fn interleave_write(&mut self, id: TransactionId) {
        let Some((_, statuses)) = self.faults.interleave_write.filter(|(target, _)| *target == id)
        else {
            return;
        };
        self.faults.interleave_write = None;
        if let Some(tx) = self.transactions.get_mut(&id) {
            tx.transaction_status = statuses.transaction_status;
            tx.responder_status = statuses.responder_status;
        }
    }

    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn live_event_mut(&mut self, id: EventId) -> Result<&mut Event, BrokerError> {
        self.events
            .get_mut(&id)
            .filter(|e| e.status != EventStatus::Deleted)
            .ok_or_else(|| BrokerError::not_found("event", id))
    }

    fn insert_needs(
        &mut self,
        event_id: EventId,
        transaction_id: Option<TransactionId>,
        needs: Vec<NewNeed>,
    ) {
        for need in needs {
            let id = NeedId::new(self.next_id());
            self.needs.insert(
                id,
                Need {
                    id,
                    event_id,
                    transaction_id,
                    title: need.title,
                    amount: need.amount,
                    unit: need.unit,
                    received: 0.0,
                    received_total: 0.0,
                },
            );
        }
    }
}

/// Failure injection for exercising compensation paths in tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct Faults {
    pub(crate) fail_transaction_insert: bool,
    pub(crate) fail_notifications: bool,
    pub(crate) fail_event_status: Option<EventId>,
    /// Statuses a concurrent writer sets on this transaction just before
    /// the next conditional update of it. Fires once.
    pub(crate) interleave_write: Option<(TransactionId, StatusSnapshot)>,
}

/// In-memory entity store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored transactions.
    pub async fn transaction_count(&self) -> usize {
        self.tables.read().await.transactions.len()
    }

    /// Every stored notification in insertion order.
    pub async fn all_notifications(&self) -> Vec<Notification> {
        self.tables
            .read()
            .await
            .notifications
            .values()
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub(crate) async fn with_faults(&self, f: impl FnOnce(&mut Faults)) {
        f(&mut self.tables.write().await.faults);
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn create_event(
        &self,
        event: NewEvent,
        needs: Vec<NewNeed>,
    ) -> Result<Event, BrokerError> {
        let mut tables = self.tables.write().await;
        let id = EventId::new(tables.next_id());
        let stored = Event {
            id,
            kind: event.kind,
            author_id: event.author_id,
            title: event.title,
            description: event.description,
            status: EventStatus::Active,
            created_at: Utc::now(),
            end_date: event.end_date,
            max_concurrent_requests: event.max_concurrent_requests,
            remaining_helps: event.max_concurrent_requests,
        };
        tables.events.insert(id, stored.clone());
        tables.insert_needs(id, None, needs);
        Ok(stored)
    }

    async fn get_event(&self, id: EventId) -> Result<Event, BrokerError> {
        self.tables
            .read()
            .await
            .events
            .get(&id)
            .filter(|e| e.status != EventStatus::Deleted)
            .cloned()
            .ok_or_else(|| BrokerError::not_found("event", id))
    }

    async fn count_active_events(&self, author_id: MemberId) -> Result<u32, BrokerError> {
        let tables = self.tables.read().await;
        let count = tables
            .events
            .values()
            .filter(|e| e.author_id == author_id && e.status == EventStatus::Active)
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn try_reserve_slot(&self, id: EventId) -> Result<bool, BrokerError> {
        let mut tables = self.tables.write().await;
        let event = tables.live_event_mut(id)?;
        if event.remaining_helps == 0 {
            return Ok(false);
        }
        event.remaining_helps -= 1;
        Ok(true)
    }

    async fn release_slots(&self, id: EventId, n: u32) -> Result<(), BrokerError> {
        let mut tables = self.tables.write().await;
        let event = tables
            .events
            .get_mut(&id)
            .ok_or_else(|| BrokerError::not_found("event", id))?;
        event.remaining_helps = event
            .remaining_helps
            .saturating_add(n)
            .min(event.max_concurrent_requests);
        Ok(())
    }

    async fn resize_capacity(
        &self,
        id: EventId,
        new_max: u32,
    ) -> Result<Option<Event>, BrokerError> {
        let mut tables = self.tables.write().await;
        let event = tables.live_event_mut(id)?;
        let occupied = event.occupied_slots();
        if new_max < occupied {
            return Ok(None);
        }
        event.max_concurrent_requests = new_max;
        event.remaining_helps = new_max - occupied;
        Ok(Some(event.clone()))
    }

    async fn transition_event(
        &self,
        id: EventId,
        from: EventStatus,
        to: EventStatus,
    ) -> Result<bool, BrokerError> {
        let mut tables = self.tables.write().await;
        #[cfg(test)]
        if tables.faults.fail_event_status == Some(id) {
            return Err(BrokerError::Storage("injected event update failure".to_string()));
        }
        let event = tables
            .events
            .get_mut(&id)
            .ok_or_else(|| BrokerError::not_found("event", id))?;
        if event.status != from {
            return Ok(false);
        }
        event.status = to;
        Ok(true)
    }

    async fn expired_active_events(&self, now: DateTime<Utc>) -> Result<Vec<Event>, BrokerError> {
        let tables = self.tables.read().await;
        Ok(tables
            .events
            .values()
            .filter(|e| e.is_expired_at(now))
            .cloned()
            .collect())
    }

    async fn create_transaction(
        &self,
        tx: NewTransaction,
        pledges: Vec<NewNeed>,
    ) -> Result<Transaction, BrokerError> {
        let mut tables = self.tables.write().await;
        #[cfg(test)]
        if tables.faults.fail_transaction_insert {
            return Err(BrokerError::Storage("injected insert failure".to_string()));
        }
        let duplicate = tables.transactions.values().any(|t| {
            t.event_id == tx.event_id && t.creator_id == tx.creator_id && !t.is_closed()
        });
        if duplicate {
            return Err(BrokerError::DuplicateTransaction {
                event_id: tx.event_id,
            });
        }

        let id = TransactionId::new(tables.next_id());
        let stored = Transaction {
            id,
            creator_id: tx.creator_id,
            event_id: tx.event_id,
            event_kind: tx.event_kind,
            created_at: Utc::now(),
            completed_at: None,
            comment: tx.comment,
            report_url: None,
            transaction_status: TransactionStatus::Waiting,
            responder_status: TransactionStatus::NotStarted,
        };
        tables.transactions.insert(id, stored.clone());
        tables.insert_needs(tx.event_id, Some(id), pledges);
        Ok(stored)
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, BrokerError> {
        self.tables
            .read()
            .await
            .transactions
            .get(&id)
            .cloned()
            .ok_or_else(|| BrokerError::not_found("transaction", id))
    }

    async fn find_open_transaction(
        &self,
        event_id: EventId,
        responder_id: MemberId,
    ) -> Result<Option<Transaction>, BrokerError> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .values()
            .find(|t| t.event_id == event_id && t.creator_id == responder_id && !t.is_closed())
            .cloned())
    }

    async fn update_transaction_if(
        &self,
        id: TransactionId,
        expected: StatusSnapshot,
        patch: TransactionPatch,
    ) -> Result<Option<Transaction>, BrokerError> {
        let mut tables = self.tables.write().await;
        #[cfg(test)]
        tables.interleave_write(id);

        let current = tables
            .transactions
            .get(&id)
            .ok_or_else(|| BrokerError::not_found("transaction", id))?;
        if current.snapshot() != expected {
            return Ok(None);
        }
        if let Some(foreign) = patch.pledges.iter().find(|p| {
            tables
                .needs
                .get(&p.id)
                .is_none_or(|stored| stored.transaction_id != Some(id))
        }) {
            return Err(BrokerError::not_found("need", foreign.id));
        }

        for pledge in &patch.pledges {
            if let Some(stored) = tables.needs.get_mut(&pledge.id) {
                stored.received = pledge.received;
            }
        }
        let tx = tables
            .transactions
            .get_mut(&id)
            .ok_or_else(|| BrokerError::not_found("transaction", id))?;
        patch.apply_to(tx);
        Ok(Some(tx.clone()))
    }

    async fn transactions_for_author(
        &self,
        author_id: MemberId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, BrokerError> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .values()
            .filter(|t| t.created_at >= from && t.created_at < to)
            .filter(|t| {
                tables
                    .events
                    .get(&t.event_id)
                    .is_some_and(|e| e.author_id == author_id)
            })
            .cloned()
            .collect())
    }

    async fn needs_by_event(&self, event_id: EventId) -> Result<Vec<Need>, BrokerError> {
        let tables = self.tables.read().await;
        Ok(tables
            .needs
            .values()
            .filter(|n| n.event_id == event_id && n.transaction_id.is_none())
            .cloned()
            .collect())
    }

    async fn needs_by_transaction(&self, tx_id: TransactionId) -> Result<Vec<Need>, BrokerError> {
        let tables = self.tables.read().await;
        Ok(tables
            .needs
            .values()
            .filter(|n| n.transaction_id == Some(tx_id))
            .cloned()
            .collect())
    }

    async fn add_received_totals(&self, increments: &[NeedIncrement]) -> Result<(), BrokerError> {
        let mut tables = self.tables.write().await;
        if let Some(missing) = increments
            .iter()
            .find(|inc| !tables.needs.contains_key(&inc.need_id))
        {
            return Err(BrokerError::not_found("need", missing.need_id));
        }
        for inc in increments {
            if let Some(stored) = tables.needs.get_mut(&inc.need_id) {
                stored.received_total += inc.delta;
            }
        }
        Ok(())
    }

    async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, BrokerError> {
        let mut tables = self.tables.write().await;
        #[cfg(test)]
        if tables.faults.fail_notifications {
            return Err(BrokerError::Storage(
                "injected notification failure".to_string(),
            ));
        }
        let id = NotificationId::new(tables.next_id());
        let stored = Notification {
            id,
            event_kind: notification.event_kind,
            event_id: notification.event_id,
            transaction_id: notification.transaction_id,
            action: notification.action,
            new_status: notification.new_status,
            member_id: notification.member_id,
            is_read: false,
            created_at: Utc::now(),
        };
        tables.notifications.insert(id, stored.clone());
        Ok(stored)
    }

    async fn notifications_for_member(
        &self,
        member_id: MemberId,
    ) -> Result<Vec<Notification>, BrokerError> {
        let tables = self.tables.read().await;
        Ok(tables
            .notifications
            .values()
            .rev()
            .filter(|n| n.member_id == member_id)
            .cloned()
            .collect())
    }

    async fn mark_notifications_read(
        &self,
        member_id: MemberId,
        ids: &[NotificationId],
    ) -> Result<u64, BrokerError> {
        let mut tables = self.tables.write().await;
        let mut changed = 0;
        for id in ids {
            if let Some(n) = tables.notifications.get_mut(id)
                && n.member_id == member_id
                && !n.is_read
            {
                n.is_read = true;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::domain::EventKind;

    fn new_event(max: u32) -> NewEvent {
        NewEvent {
            kind: EventKind::Proposal,
            author_id: MemberId::new(1),
            title: "Rides to the clinic".to_string(),
            description: String::new(),
            end_date: None,
            max_concurrent_requests: max,
        }
    }

    fn new_tx(event_id: EventId, responder: i64) -> NewTransaction {
        NewTransaction {
            creator_id: MemberId::new(responder),
            event_id,
            event_kind: EventKind::Proposal,
            comment: String::new(),
        }
    }

    #[tokio::test]
    async fn reserve_stops_at_zero() {
        let store = MemoryStore::new();
        let Ok(event) = store.create_event(new_event(2), vec![]).await else {
            panic!("create failed");
        };

        assert_eq!(store.try_reserve_slot(event.id).await, Ok(true));
        assert_eq!(store.try_reserve_slot(event.id).await, Ok(true));
        assert_eq!(store.try_reserve_slot(event.id).await, Ok(false));

        let Ok(event) = store.get_event(event.id).await else {
            panic!("get failed");
        };
        assert_eq!(event.remaining_helps, 0);
    }

    #[tokio::test]
    async fn concurrent_reservations_never_oversubscribe() {
        let store = Arc::new(MemoryStore::new());
        let Ok(event) = store.create_event(new_event(5), vec![]).await else {
            panic!("create failed");
        };

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.try_reserve_slot(event.id).await
            }));
        }
        let mut granted = 0;
        for handle in handles {
            if let Ok(Ok(true)) = handle.await {
                granted += 1;
            }
        }
        assert_eq!(granted, 5);
    }

    #[tokio::test]
    async fn release_is_capped_at_ceiling() {
        let store = MemoryStore::new();
        let Ok(event) = store.create_event(new_event(3), vec![]).await else {
            panic!("create failed");
        };
        let _ = store.try_reserve_slot(event.id).await;
        assert!(store.release_slots(event.id, 5).await.is_ok());

        let Ok(event) = store.get_event(event.id).await else {
            panic!("get failed");
        };
        assert_eq!(event.remaining_helps, 3);
    }

    #[tokio::test]
    async fn resize_keeps_occupied_slots() {
        let store = MemoryStore::new();
        let Ok(event) = store.create_event(new_event(3), vec![]).await else {
            panic!("create failed");
        };
        let _ = store.try_reserve_slot(event.id).await;
        let _ = store.try_reserve_slot(event.id).await;

        assert_eq!(store.resize_capacity(event.id, 1).await, Ok(None));

        let Ok(Some(resized)) = store.resize_capacity(event.id, 6).await else {
            panic!("resize failed");
        };
        assert_eq!(resized.max_concurrent_requests, 6);
        assert_eq!(resized.remaining_helps, 4);
    }

    #[tokio::test]
    async fn deleted_events_read_as_not_found() {
        let store = MemoryStore::new();
        let Ok(event) = store.create_event(new_event(1), vec![]).await else {
            panic!("create failed");
        };
        let moved = store
            .transition_event(event.id, EventStatus::Active, EventStatus::Deleted)
            .await;
        assert_eq!(moved, Ok(true));
        assert!(matches!(
            store.get_event(event.id).await,
            Err(BrokerError::NotFound { entity: "event", .. })
        ));
    }

    #[tokio::test]
    async fn open_transaction_blocks_duplicate_insert() {
        let store = MemoryStore::new();
        let Ok(event) = store.create_event(new_event(3), vec![]).await else {
            panic!("create failed");
        };
        assert!(store.create_transaction(new_tx(event.id, 2), vec![]).await.is_ok());
        assert_eq!(
            store.create_transaction(new_tx(event.id, 2), vec![]).await,
            Err(BrokerError::DuplicateTransaction { event_id: event.id })
        );
        assert!(store.create_transaction(new_tx(event.id, 3), vec![]).await.is_ok());
    }

    #[tokio::test]
    async fn compare_and_swap_rejects_stale_snapshot() {
        let store = MemoryStore::new();
        let Ok(event) = store.create_event(new_event(1), vec![]).await else {
            panic!("create failed");
        };
        let Ok(tx) = store.create_transaction(new_tx(event.id, 2), vec![]).await else {
            panic!("insert failed");
        };
        let stale = tx.snapshot();
        let accept = TransactionPatch {
            transaction_status: Some(TransactionStatus::Accepted),
            ..TransactionPatch::default()
        };

        let first = store.update_transaction_if(tx.id, stale, accept.clone()).await;
        assert!(matches!(first, Ok(Some(_))));
        let second = store.update_transaction_if(tx.id, stale, accept).await;
        assert_eq!(second, Ok(None));
    }

    #[tokio::test]
    async fn pledges_are_written_only_with_a_winning_swap() {
        let store = MemoryStore::new();
        let Ok(event) = store.create_event(new_event(2), vec![]).await else {
            panic!("create failed");
        };
        let pledge = NewNeed {
            title: "blankets".to_string(),
            amount: 4.0,
            unit: "pcs".to_string(),
        };
        let Ok(tx) = store
            .create_transaction(new_tx(event.id, 2), vec![pledge.clone()])
            .await
        else {
            panic!("insert failed");
        };
        let Ok(other) = store.create_transaction(new_tx(event.id, 3), vec![pledge]).await else {
            panic!("insert failed");
        };
        let (Ok(copies), Ok(foreign)) = (
            store.needs_by_transaction(tx.id).await,
            store.needs_by_transaction(other.id).await,
        ) else {
            panic!("pledge copies missing");
        };
        let with_received = |needs: Vec<Need>| {
            needs
                .into_iter()
                .map(|mut n| {
                    n.received = 4.0;
                    n
                })
                .collect::<Vec<_>>()
        };
        let patch = |pledges| TransactionPatch {
            responder_status: Some(TransactionStatus::Waiting),
            pledges,
            ..TransactionPatch::default()
        };

        let stale = StatusSnapshot {
            transaction_status: TransactionStatus::Accepted,
            responder_status: TransactionStatus::Accepted,
        };
        let lost = store
            .update_transaction_if(tx.id, stale, patch(with_received(copies.clone())))
            .await;
        assert_eq!(lost, Ok(None));

        let foreign_write = store
            .update_transaction_if(tx.id, tx.snapshot(), patch(with_received(foreign)))
            .await;
        assert!(matches!(foreign_write, Err(BrokerError::NotFound { entity: "need", .. })));
        let Ok(unchanged) = store.get_transaction(tx.id).await else {
            panic!("get failed");
        };
        assert_eq!(unchanged.snapshot(), tx.snapshot());
        assert!(matches!(
            store.needs_by_transaction(tx.id).await.as_deref(),
            Ok([n]) if n.received == 0.0
        ));

        let won = store
            .update_transaction_if(tx.id, tx.snapshot(), patch(with_received(copies)))
            .await;
        assert!(matches!(won, Ok(Some(_))));
        assert!(matches!(
            store.needs_by_transaction(tx.id).await.as_deref(),
            Ok([n]) if n.received == 4.0
        ));
    }

    #[tokio::test]
    async fn expired_query_only_returns_active_past_events() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut past = new_event(1);
        past.end_date = Some(now - Duration::hours(1));
        let mut future = new_event(1);
        future.end_date = Some(now + Duration::hours(1));

        let Ok(expired) = store.create_event(past, vec![]).await else {
            panic!("create failed");
        };
        let _ = store.create_event(future, vec![]).await;
        let _ = store.create_event(new_event(1), vec![]).await;

        let Ok(found) = store.expired_active_events(now).await else {
            panic!("query failed");
        };
        assert_eq!(found.len(), 1);
        assert_eq!(found.first().map(|e| e.id), Some(expired.id));
    }

    #[tokio::test]
    async fn mark_read_ignores_other_members() {
        let store = MemoryStore::new();
        let make = |member: i64| NewNotification {
            event_kind: EventKind::Proposal,
            event_id: EventId::new(1),
            transaction_id: TransactionId::new(1),
            action: crate::domain::NotificationAction::Created,
            new_status: TransactionStatus::Waiting,
            member_id: MemberId::new(member),
        };
        let Ok(mine) = store.create_notification(make(1)).await else {
            panic!("insert failed");
        };
        let Ok(theirs) = store.create_notification(make(2)).await else {
            panic!("insert failed");
        };

        let changed = store
            .mark_notifications_read(MemberId::new(1), &[mine.id, theirs.id])
            .await;
        assert_eq!(changed, Ok(1));

        let Ok(list) = store.notifications_for_member(MemberId::new(2)).await else {
            panic!("list failed");
        };
        assert!(list.iter().all(|n| !n.is_read));
    }
}
