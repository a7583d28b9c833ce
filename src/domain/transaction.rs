//! Responder transactions and their status lifecycle.
//!
//! ```text
//! NotStarted ─▶ Waiting ─┬─▶ Accepted ─▶ InProcess ─┬─▶ Completed
//!                        └─▶ Canceled                ├─▶ Interrupted
//!                                                    └─▶ Aborted
//! ```
//!
//! The event author drives `transaction_status` through the whole table.
//! The responder drives `responder_status`, which the author's decision
//! moves out of `NotStarted`; from `Accepted` on the responder follows the
//! lower row of the table.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{EventId, EventKind, MemberId, Need, TransactionId};
use crate::error::BrokerError;

/// Status of one side of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Responder side before the author has decided.
    NotStarted,
    /// Waiting for the author's decision.
    Waiting,
    /// Work is under way.
    #[serde(rename = "in_progress")]
    InProcess,
    /// Author accepted the response.
    Accepted,
    /// Work finished.
    Completed,
    /// Work stopped part way.
    Interrupted,
    /// Author declined the response.
    Canceled,
    /// Abandoned after acceptance.
    Aborted,
}

impl TransactionStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 8] = [
        Self::NotStarted,
        Self::Waiting,
        Self::Accepted,
        Self::InProcess,
        Self::Completed,
        Self::Interrupted,
        Self::Canceled,
        Self::Aborted,
    ];

    /// No transition is permitted out of a terminal status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Interrupted | Self::Canceled | Self::Aborted
        )
    }

    /// Statuses that hold one of the event's concurrent slots.
    #[must_use]
    pub const fn occupies_slot(self) -> bool {
        matches!(self, Self::Waiting | Self::InProcess | Self::Accepted)
    }

    /// Returns `true` if `self → next` is an enumerated edge.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::Waiting)
                | (Self::Waiting, Self::Accepted | Self::Canceled)
                | (Self::Accepted, Self::InProcess)
                | (
                    Self::InProcess,
                    Self::Completed | Self::Interrupted | Self::Aborted
                )
        )
    }

    /// Returns `true` if `party` may move its own side from `self` to `next`.
    ///
    /// The author walks the full table. The responder side only starts
    /// moving once the author has accepted, so its edges begin at
    /// `Accepted`; the decision edges out of `Waiting` are the author's.
    #[must_use]
    pub const fn can_transition_as(self, party: Party, next: Self) -> bool {
        match party {
            Party::Author => self.can_transition_to(next),
            Party::Responder => matches!(
                (self, next),
                (Self::Accepted, Self::InProcess)
                    | (
                        Self::InProcess,
                        Self::Completed | Self::Interrupted | Self::Aborted
                    )
            ),
        }
    }

    /// Returns the storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Waiting => "waiting",
            Self::InProcess => "in_progress",
            Self::Accepted => "accepted",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Canceled => "canceled",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| BrokerError::Validation(format!("unknown transaction status: {s}")))
    }
}

/// Which side of a transaction an actor is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    /// The member who authored the event.
    Author,
    /// The member who created the transaction.
    Responder,
}

/// A stored transaction.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Transaction {
    /// Surrogate id.
    pub id: TransactionId,
    /// Responder who created it.
    pub creator_id: MemberId,
    /// Event responded to.
    pub event_id: EventId,
    /// Kind of that event.
    pub event_kind: EventKind,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Set when the transaction closes.
    pub completed_at: Option<DateTime<Utc>>,
    /// Responder's message to the author.
    pub comment: String,
    /// Location of the uploaded completion proof.
    pub report_url: Option<String>,
    /// Author-facing status.
    pub transaction_status: TransactionStatus,
    /// Responder-facing status.
    pub responder_status: TransactionStatus,
}

impl Transaction {
    /// The status owned by `party`.
    #[must_use]
    pub const fn status_of(&self, party: Party) -> TransactionStatus {
        match party {
            Party::Author => self.transaction_status,
            Party::Responder => self.responder_status,
        }
    }

    /// A transaction is closed once the author-facing status is terminal.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.transaction_status.is_terminal()
    }

    /// The statuses this record was read with, for compare-and-swap writes.
    #[must_use]
    pub const fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            transaction_status: self.transaction_status,
            responder_status: self.responder_status,
        }
    }
}

/// Insert payload for a new transaction.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    /// Responder.
    pub creator_id: MemberId,
    /// Event responded to.
    pub event_id: EventId,
    /// Kind of that event.
    pub event_kind: EventKind,
    /// Responder's message.
    pub comment: String,
}

/// Both statuses as read before a conditional update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Expected author-facing status.
    pub transaction_status: TransactionStatus,
    /// Expected responder-facing status.
    pub responder_status: TransactionStatus,
}

/// Field changes applied by a conditional transaction update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionPatch {
    /// New author-facing status.
    pub transaction_status: Option<TransactionStatus>,
    /// New responder-facing status.
    pub responder_status: Option<TransactionStatus>,
    /// Close timestamp.
    pub completed_at: Option<DateTime<Utc>>,
    /// Proof location.
    pub report_url: Option<String>,
    /// Pledge copies of this transaction whose `received` is written
    /// together with the status change.
    pub pledges: Vec<Need>,
}

impl TransactionPatch {
    /// Applies the record fields of the patch. Pledges are written by the
    /// store alongside.
    pub fn apply_to(&self, tx: &mut Transaction) {
        if let Some(status) = self.transaction_status {
            tx.transaction_status = status;
        }
        if let Some(status) = self.responder_status {
            tx.responder_status = status;
        }
        if let Some(at) = self.completed_at {
            tx.completed_at = Some(at);
        }
        if let Some(url) = &self.report_url {
            tx.report_url = Some(url.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_have_no_outgoing_edges() {
        for from in TransactionStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in TransactionStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn enumerated_edges_are_accepted() {
        use TransactionStatus::*;
        assert!(NotStarted.can_transition_to(Waiting));
        assert!(Waiting.can_transition_to(Accepted));
        assert!(Waiting.can_transition_to(Canceled));
        assert!(Accepted.can_transition_to(InProcess));
        assert!(InProcess.can_transition_to(Completed));
        assert!(InProcess.can_transition_to(Interrupted));
        assert!(InProcess.can_transition_to(Aborted));
    }

    #[test]
    fn shortcuts_are_rejected() {
        use TransactionStatus::*;
        assert!(!Waiting.can_transition_to(InProcess));
        assert!(!Accepted.can_transition_to(Completed));
        assert!(!NotStarted.can_transition_to(Accepted));
        assert!(!InProcess.can_transition_to(Canceled));
    }

    #[test]
    fn responder_side_starts_at_acceptance() {
        use TransactionStatus::*;
        for next in TransactionStatus::ALL {
            assert!(!NotStarted.can_transition_as(Party::Responder, next));
            assert!(!Waiting.can_transition_as(Party::Responder, next));
        }
        assert!(Accepted.can_transition_as(Party::Responder, InProcess));
        assert!(InProcess.can_transition_as(Party::Responder, Completed));
        assert!(InProcess.can_transition_as(Party::Responder, Aborted));
        assert!(!Accepted.can_transition_as(Party::Responder, Completed));
        assert!(Waiting.can_transition_as(Party::Author, Accepted));
    }

    #[test]
    fn slot_occupancy() {
        use TransactionStatus::*;
        let occupying: Vec<_> = TransactionStatus::ALL
            .into_iter()
            .filter(|s| s.occupies_slot())
            .collect();
        assert_eq!(occupying, vec![Waiting, Accepted, InProcess]);
        assert!(!NotStarted.occupies_slot());
    }

    #[test]
    fn in_process_uses_legacy_wire_name() {
        let json = serde_json::to_string(&TransactionStatus::InProcess).unwrap_or_default();
        assert_eq!(json, "\"in_progress\"");
        assert_eq!(
            "in_progress".parse::<TransactionStatus>().ok(),
            Some(TransactionStatus::InProcess)
        );
    }

    #[test]
    fn patch_only_touches_set_fields() {
        let mut tx = Transaction {
            id: TransactionId::new(1),
            creator_id: MemberId::new(2),
            event_id: EventId::new(3),
            event_kind: EventKind::Proposal,
            created_at: Utc::now(),
            completed_at: None,
            comment: String::new(),
            report_url: Some("old".to_string()),
            transaction_status: TransactionStatus::Waiting,
            responder_status: TransactionStatus::NotStarted,
        };
        let patch = TransactionPatch {
            transaction_status: Some(TransactionStatus::Accepted),
            ..TransactionPatch::default()
        };
        patch.apply_to(&mut tx);
        assert_eq!(tx.transaction_status, TransactionStatus::Accepted);
        assert_eq!(tx.responder_status, TransactionStatus::NotStarted);
        assert_eq!(tx.report_url.as_deref(), Some("old"));
    }
}
