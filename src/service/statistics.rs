//! Read-only statistics over an author's transactions.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{MemberId, Transaction, TransactionStatus};
use crate::error::BrokerError;
use crate::persistence::EntityStore;

/// Longest supported window.
pub const MAX_WINDOW_DAYS: u32 = 366;

/// A count and its change against the previous window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct ComparedCount {
    /// Count in the current window.
    pub count: u64,
    /// Change versus the previous window in percent.
    pub compare_percent: i64,
}

/// Transactions created on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct DailyRequests {
    /// Calendar day (UTC).
    pub date: NaiveDate,
    /// Transactions created that day.
    pub requests_count: u64,
}

/// Statistics for one author over a window of days.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct EventStatistics {
    /// Window start, inclusive.
    pub start_date: DateTime<Utc>,
    /// Window end, exclusive.
    pub end_date: DateTime<Utc>,
    /// All transactions created in the window.
    pub transactions: ComparedCount,
    /// Of those, completed.
    pub completed: ComparedCount,
    /// Of those, canceled.
    pub canceled: ComparedCount,
    /// Of those, aborted.
    pub aborted: ComparedCount,
    /// Per-day creation counts, oldest first.
    pub requests: Vec<DailyRequests>,
}

/// Computes [`EventStatistics`].
#[derive(Debug, Clone)]
pub struct StatisticsService {
    store: Arc<dyn EntityStore>,
}

impl StatisticsService {
    /// Creates the service.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Statistics for the `days` ending now.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Validation`] if `days` is outside
    /// `1..=MAX_WINDOW_DAYS`.
    pub async fn get_event_statistics(
        &self,
        author: MemberId,
        days: u32,
    ) -> Result<EventStatistics, BrokerError> {
        self.statistics_at(author, days, Utc::now()).await
    }

    /// Statistics for the `days` ending at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Validation`] if `days` is outside
    /// `1..=MAX_WINDOW_DAYS`.
    pub async fn statistics_at(
        &self,
        author: MemberId,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<EventStatistics, BrokerError> {
        if days == 0 || days > MAX_WINDOW_DAYS {
            return Err(BrokerError::Validation(format!(
                "days must be between 1 and {MAX_WINDOW_DAYS}"
            )));
        }
        let window = Duration::days(i64::from(days));
        let start = now - window;
        let previous_start = start - window;

        let current = self.store.transactions_for_author(author, start, now).await?;
        let previous = self
            .store
            .transactions_for_author(author, previous_start, start)
            .await?;

        let by_status = |status| {
            compared(
                count_status(&current, status),
                count_status(&previous, status),
            )
        };

        Ok(EventStatistics {
            start_date: start,
            end_date: now,
            transactions: compared(current.len() as u64, previous.len() as u64),
            completed: by_status(TransactionStatus::Completed),
            canceled: by_status(TransactionStatus::Canceled),
            aborted: by_status(TransactionStatus::Aborted),
            requests: daily_requests(&current, start, days),
        })
    }
}

/// `(current - previous) * 100 / previous`, or `current * 100` without a baseline.
#[must_use]
pub fn compare_in_percent(current: u64, previous: u64) -> i64 {
    let cur = i64::try_from(current).unwrap_or(i64::MAX);
    let prev = i64::try_from(previous).unwrap_or(i64::MAX);
    if prev == 0 {
        return cur.saturating_mul(100);
    }
    cur.saturating_sub(prev).saturating_mul(100) / prev
}

fn compared(current: u64, previous: u64) -> ComparedCount {
    ComparedCount {
        count: current,
        compare_percent: compare_in_percent(current, previous),
    }
}

fn count_status(transactions: &[Transaction], status: TransactionStatus) -> u64 {
    transactions
        .iter()
        .filter(|t| t.transaction_status == status)
        .count() as u64
}

fn daily_requests(
    transactions: &[Transaction],
    start: DateTime<Utc>,
    days: u32,
) -> Vec<DailyRequests> {
    (1..=i64::from(days))
        .map(|offset| {
            let date = (start + Duration::days(offset)).date_naive();
            let requests_count = transactions
                .iter()
                .filter(|t| t.created_at.date_naive() == date)
                .count() as u64;
            DailyRequests {
                date,
                requests_count,
            }
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{EventKind, NewEvent, NewTransaction, StatusSnapshot, TransactionPatch};
    use crate::persistence::MemoryStore;

    #[test]
    fn percentage_against_previous_window() {
        assert_eq!(compare_in_percent(15, 10), 50);
        assert_eq!(compare_in_percent(5, 10), -50);
        assert_eq!(compare_in_percent(3, 0), 300);
        assert_eq!(compare_in_percent(0, 0), 0);
    }

    #[tokio::test]
    async fn counts_transactions_on_authors_events() {
        let store = Arc::new(MemoryStore::new());
        let author = MemberId::new(1);
        let Ok(event) = store
            .create_event(
                NewEvent {
                    kind: EventKind::Proposal,
                    author_id: author,
                    title: "Tutoring".to_string(),
                    description: String::new(),
                    end_date: None,
                    max_concurrent_requests: 5,
                },
                vec![],
            )
            .await
        else {
            panic!("create failed");
        };

        let mut ids = Vec::new();
        for responder in 2..5 {
            let Ok(tx) = store
                .create_transaction(
                    NewTransaction {
                        creator_id: MemberId::new(responder),
                        event_id: event.id,
                        event_kind: EventKind::Proposal,
                        comment: String::new(),
                    },
                    vec![],
                )
                .await
            else {
                panic!("insert failed");
            };
            ids.push(tx.id);
        }
        let Some(first) = ids.first() else {
            panic!("no transactions");
        };
        let canceled = store
            .update_transaction_if(
                *first,
                StatusSnapshot {
                    transaction_status: TransactionStatus::Waiting,
                    responder_status: TransactionStatus::NotStarted,
                },
                TransactionPatch {
                    transaction_status: Some(TransactionStatus::Canceled),
                    responder_status: Some(TransactionStatus::Canceled),
                    ..TransactionPatch::default()
                },
            )
            .await;
        assert!(matches!(canceled, Ok(Some(_))));

        let service = StatisticsService::new(Arc::clone(&store) as Arc<dyn EntityStore>);
        let now = Utc::now() + Duration::seconds(1);
        let Ok(stats) = service.statistics_at(author, 7, now).await else {
            panic!("statistics failed");
        };
        assert_eq!(stats.transactions.count, 3);
        assert_eq!(stats.transactions.compare_percent, 300);
        assert_eq!(stats.canceled.count, 1);
        assert_eq!(stats.completed.count, 0);
        assert_eq!(stats.requests.len(), 7);
        assert_eq!(stats.requests.iter().map(|d| d.requests_count).sum::<u64>(), 3);

        let Ok(other) = service.statistics_at(MemberId::new(2), 7, now).await else {
            panic!("statistics failed");
        };
        assert_eq!(other.transactions.count, 0);
    }

    #[tokio::test]
    async fn window_is_bounded() {
        let service = StatisticsService::new(Arc::new(MemoryStore::new()));
        assert!(service.get_event_statistics(MemberId::new(1), 0).await.is_err());
        assert!(
            service
                .get_event_statistics(MemberId::new(1), MAX_WINDOW_DAYS + 1)
                .await
                .is_err()
        );
    }
}
