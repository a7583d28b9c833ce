//! PostgreSQL implementation of the entity store.
//!
//! Counter and status mutations are single `UPDATE ... WHERE` statements
//! whose `WHERE` clause carries the precondition, so the database
//! serialises concurrent callers. Multi-row inserts run in one
//! transaction.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::EntityStore;
use super::models::{
    EVENT_COLUMNS, EventRow, NEED_COLUMNS, NOTIFICATION_COLUMNS, NeedRow, NotificationRow,
    TRANSACTION_COLUMNS, TransactionRow, to_db_counter,
};
use crate::config::BrokerConfig;
use crate::domain::{
    Event, EventId, EventStatus, MemberId, Need, NeedIncrement, NewEvent, NewNeed,
    NewNotification, NewTransaction, Notification, NotificationId, StatusSnapshot, Transaction,
    TransactionId, TransactionPatch, TransactionStatus,
};
use crate::error::BrokerError;

/// PostgreSQL-backed entity store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a store over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects using the configured pool limits and applies migrations.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Storage`] if the database is unreachable or
    /// a migration fails.
    pub async fn connect(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| BrokerError::Storage(format!("migration failed: {e}")))?;

        tracing::info!("connected to postgres and applied migrations");
        Ok(Self::new(pool))
    }

    async fn event_exists(&self, id: EventId) -> Result<bool, BrokerError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM events WHERE id = $1 AND status <> 'deleted')",
        )
        .bind(id.get())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert_needs(
        conn: &mut sqlx::PgConnection,
        event_id: EventId,
        transaction_id: Option<TransactionId>,
        needs: &[NewNeed],
    ) -> Result<(), BrokerError> {
        for need in needs {
            sqlx::query(
                "INSERT INTO needs (event_id, transaction_id, title, amount, unit) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(event_id.get())
            .bind(transaction_id.map(TransactionId::get))
            .bind(&need.title)
            .bind(need.amount)
            .bind(&need.unit)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for PostgresStore {
    async fn create_event(
        &self,
        event: NewEvent,
        needs: Vec<NewNeed>,
    ) -> Result<Event, BrokerError> {
        let max = to_db_counter(event.max_concurrent_requests)?;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, EventRow>(&format!(
            "INSERT INTO events (kind, author_id, title, description, end_date, \
             max_concurrent_requests, remaining_helps) \
             VALUES ($1, $2, $3, $4, $5, $6, $6) RETURNING {EVENT_COLUMNS}"
        ))
        .bind(event.kind.as_str())
        .bind(event.author_id.get())
        .bind(&event.title)
        .bind(&event.description)
        .bind(event.end_date)
        .bind(max)
        .fetch_one(&mut *tx)
        .await?;

        let stored = Event::try_from(row)?;
        Self::insert_needs(&mut tx, stored.id, None, &needs).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn get_event(&self, id: EventId) -> Result<Event, BrokerError> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1 AND status <> 'deleted'"
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| BrokerError::not_found("event", id))?;
        Event::try_from(row)
    }

    async fn count_active_events(&self, author_id: MemberId) -> Result<u32, BrokerError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM events WHERE author_id = $1 AND status = 'active'",
        )
        .bind(author_id.get())
        .fetch_one(&self.pool)
        .await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn try_reserve_slot(&self, id: EventId) -> Result<bool, BrokerError> {
        let result = sqlx::query(
            "UPDATE events SET remaining_helps = remaining_helps - 1 \
             WHERE id = $1 AND status <> 'deleted' AND remaining_helps > 0",
        )
        .bind(id.get())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if self.event_exists(id).await? {
            Ok(false)
        } else {
            Err(BrokerError::not_found("event", id))
        }
    }

    async fn release_slots(&self, id: EventId, n: u32) -> Result<(), BrokerError> {
        let result = sqlx::query(
            "UPDATE events \
             SET remaining_helps = LEAST(remaining_helps + $2, max_concurrent_requests) \
             WHERE id = $1",
        )
        .bind(id.get())
        .bind(to_db_counter(n)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BrokerError::not_found("event", id));
        }
        Ok(())
    }

    async fn resize_capacity(
        &self,
        id: EventId,
        new_max: u32,
    ) -> Result<Option<Event>, BrokerError> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "UPDATE events \
             SET max_concurrent_requests = $2, \
                 remaining_helps = $2 - (max_concurrent_requests - remaining_helps) \
             WHERE id = $1 AND status <> 'deleted' \
               AND $2 >= (max_concurrent_requests - remaining_helps) \
             RETURNING {EVENT_COLUMNS}"
        ))
        .bind(id.get())
        .bind(to_db_counter(new_max)?)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Event::try_from(row)?)),
            None if self.event_exists(id).await? => Ok(None),
            None => Err(BrokerError::not_found("event", id)),
        }
    }

    async fn transition_event(
        &self,
        id: EventId,
        from: EventStatus,
        to: EventStatus,
    ) -> Result<bool, BrokerError> {
        let result = sqlx::query("UPDATE events SET status = $3 WHERE id = $1 AND status = $2")
            .bind(id.get())
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM events WHERE id = $1)")
            .bind(id.get())
            .fetch_one(&self.pool)
            .await?;
        if exists {
            Ok(false)
        } else {
            Err(BrokerError::not_found("event", id))
        }
    }

    async fn expired_active_events(&self, now: DateTime<Utc>) -> Result<Vec<Event>, BrokerError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE status = 'active' AND end_date IS NOT NULL AND end_date <= $1 \
             ORDER BY end_date ASC"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Event::try_from).collect()
    }

    async fn create_transaction(
        &self,
        new_tx: NewTransaction,
        pledges: Vec<NewNeed>,
    ) -> Result<Transaction, BrokerError> {
        let event_id = new_tx.event_id;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "INSERT INTO transactions \
             (creator_id, event_id, event_kind, comment, transaction_status, responder_status) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(new_tx.creator_id.get())
        .bind(event_id.get())
        .bind(new_tx.event_kind.as_str())
        .bind(&new_tx.comment)
        .bind(TransactionStatus::Waiting.as_str())
        .bind(TransactionStatus::NotStarted.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                BrokerError::DuplicateTransaction { event_id }
            }
            other => BrokerError::from(other),
        })?;

        let stored = Transaction::try_from(row)?;
        Self::insert_needs(&mut tx, event_id, Some(stored.id), &pledges).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, BrokerError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| BrokerError::not_found("transaction", id))?;
        Transaction::try_from(row)
    }

    async fn find_open_transaction(
        &self,
        event_id: EventId,
        responder_id: MemberId,
    ) -> Result<Option<Transaction>, BrokerError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE event_id = $1 AND creator_id = $2 \
               AND transaction_status NOT IN ('completed', 'interrupted', 'canceled', 'aborted') \
             LIMIT 1"
        ))
        .bind(event_id.get())
        .bind(responder_id.get())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Transaction::try_from).transpose()
    }

    async fn update_transaction_if(
        &self,
        id: TransactionId,
        expected: StatusSnapshot,
        patch: TransactionPatch,
    ) -> Result<Option<Transaction>, BrokerError> {
        let mut db = self.pool.begin().await?;
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "UPDATE transactions SET \
                 transaction_status = COALESCE($4, transaction_status), \
                 responder_status = COALESCE($5, responder_status), \
                 completed_at = COALESCE($6, completed_at), \
                 report_url = COALESCE($7, report_url) \
             WHERE id = $1 AND transaction_status = $2 AND responder_status = $3 \
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(id.get())
        .bind(expected.transaction_status.as_str())
        .bind(expected.responder_status.as_str())
        .bind(patch.transaction_status.map(TransactionStatus::as_str))
        .bind(patch.responder_status.map(TransactionStatus::as_str))
        .bind(patch.completed_at)
        .bind(patch.report_url)
        .fetch_optional(&mut *db)
        .await?;

        let Some(row) = row else {
            drop(db);
            // Distinguish a lost race from a missing row.
            self.get_transaction(id).await?;
            return Ok(None);
        };

        for pledge in &patch.pledges {
            let result = sqlx::query(
                "UPDATE needs SET received = $2 WHERE id = $1 AND transaction_id = $3",
            )
            .bind(pledge.id.get())
            .bind(pledge.received)
            .bind(id.get())
            .execute(&mut *db)
            .await?;
            if result.rows_affected() == 0 {
                return Err(BrokerError::not_found("need", pledge.id));
            }
        }
        db.commit().await?;

        Ok(Some(Transaction::try_from(row)?))
    }

    async fn transactions_for_author(
        &self,
        author_id: MemberId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, BrokerError> {
        let columns = TRANSACTION_COLUMNS
            .split(", ")
            .map(|c| format!("t.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {columns} FROM transactions t JOIN events e ON e.id = t.event_id \
             WHERE e.author_id = $1 AND t.created_at >= $2 AND t.created_at < $3 \
             ORDER BY t.created_at ASC"
        ))
        .bind(author_id.get())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn needs_by_event(&self, event_id: EventId) -> Result<Vec<Need>, BrokerError> {
        let rows = sqlx::query_as::<_, NeedRow>(&format!(
            "SELECT {NEED_COLUMNS} FROM needs \
             WHERE event_id = $1 AND transaction_id IS NULL ORDER BY id"
        ))
        .bind(event_id.get())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Need::from).collect())
    }

    async fn needs_by_transaction(&self, tx_id: TransactionId) -> Result<Vec<Need>, BrokerError> {
        let rows = sqlx::query_as::<_, NeedRow>(&format!(
            "SELECT {NEED_COLUMNS} FROM needs WHERE transaction_id = $1 ORDER BY id"
        ))
        .bind(tx_id.get())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Need::from).collect())
    }

    async fn add_received_totals(&self, increments: &[NeedIncrement]) -> Result<(), BrokerError> {
        let mut tx = self.pool.begin().await?;
        for inc in increments {
            let result =
                sqlx::query("UPDATE needs SET received_total = received_total + $2 WHERE id = $1")
                    .bind(inc.need_id.get())
                    .bind(inc.delta)
                    .execute(&mut *tx)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(BrokerError::not_found("need", inc.need_id));
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, BrokerError> {
        let row = sqlx::query_as::<_, NotificationRow>(&format!(
            "INSERT INTO notifications \
             (event_kind, event_id, transaction_id, action, new_status, member_id) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {NOTIFICATION_COLUMNS}"
        ))
        .bind(notification.event_kind.as_str())
        .bind(notification.event_id.get())
        .bind(notification.transaction_id.get())
        .bind(notification.action.as_str())
        .bind(notification.new_status.as_str())
        .bind(notification.member_id.get())
        .fetch_one(&self.pool)
        .await?;
        Notification::try_from(row)
    }

    async fn notifications_for_member(
        &self,
        member_id: MemberId,
    ) -> Result<Vec<Notification>, BrokerError> {
        let rows = sqlx::query_as::<_, NotificationRow>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE member_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(member_id.get())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Notification::try_from).collect()
    }

    async fn mark_notifications_read(
        &self,
        member_id: MemberId,
        ids: &[NotificationId],
    ) -> Result<u64, BrokerError> {
        let raw: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        let result = sqlx::query(
            "UPDATE notifications SET is_read = TRUE \
             WHERE member_id = $1 AND id = ANY($2) AND NOT is_read",
        )
        .bind(member_id.get())
        .bind(&raw)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
