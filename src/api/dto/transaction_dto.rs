//! Transaction DTOs for respond, decide and status updates.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{Need, NotificationId, Transaction, TransactionStatus};
use crate::service::{TransactionDetails, TransitionOutcome};

/// Request body for `POST /transactions/{id}/decision`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DecisionRequest {
    /// `true` accepts the responder, `false` declines.
    pub accept: bool,
}

/// Multipart form of `POST /transactions/{id}/status`. Documentation only.
#[derive(Debug, ToSchema)]
pub struct UpdateStatusForm {
    /// Target status of the caller's side.
    pub status: TransactionStatus,
    /// JSON array of `{ "need_id", "received" }` objects. Responder only.
    pub pledges: Option<String>,
    /// Completion proof.
    #[schema(value_type = Option<String>, format = Binary)]
    pub file: Option<Vec<u8>>,
}

/// Result of a state-changing transaction call.
#[derive(Debug, Serialize, ToSchema)]
pub struct TransitionResponse {
    /// The transaction after the change.
    pub transaction: Transaction,
    /// Id of the counter-party notification, if it was recorded.
    pub notification_id: Option<NotificationId>,
    /// Why the notification was not recorded. The change itself stands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_error: Option<String>,
    /// `true` if the change completed the owning help event.
    pub event_completed: bool,
}

impl From<TransitionOutcome> for TransitionResponse {
    fn from(outcome: TransitionOutcome) -> Self {
        let (notification_id, notification_error) = match outcome.notification {
            Ok(id) => (Some(id), None),
            Err(err) => (None, Some(err.to_string())),
        };
        Self {
            transaction: outcome.transaction,
            notification_id,
            notification_error,
            event_completed: outcome.event_completed,
        }
    }
}

/// Response body for `GET /transactions/{id}`.
#[derive(Debug, Serialize, ToSchema)]
pub struct TransactionDetailsResponse {
    /// The transaction.
    pub transaction: Transaction,
    /// Pledge copies.
    pub needs: Vec<Need>,
    /// Share of pledge copies fully received, in percent.
    pub completion_percentage: f64,
}

impl From<TransactionDetails> for TransactionDetailsResponse {
    fn from(details: TransactionDetails) -> Self {
        Self {
            transaction: details.transaction,
            needs: details.needs,
            completion_percentage: details.completion_percentage,
        }
    }
}
