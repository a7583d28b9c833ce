//! Broker error types with HTTP status code mapping.
//!
//! [`BrokerError`] is the closed set of failure kinds. The HTTP layer
//! switches on the variant, never on the formatted message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{EventId, EventStatus, TransactionStatus};

/// Structured JSON error response body.
///
/// ```json
/// {
///   "error": {
///     "code": 2001,
///     "message": "no free slot left on event 7",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Every failure the broker can report.
///
/// # Error Code Ranges
///
/// | Range     | Category            | HTTP Status                 |
/// |-----------|---------------------|-----------------------------|
/// | 1000–1999 | Validation / lookup | 400 / 401 / 403 / 404       |
/// | 2000–2999 | Capacity / state    | 400 / 409                   |
/// | 3000–3999 | Server              | 408 / 500                   |
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BrokerError {
    /// Entity absent or soft-deleted.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Record kind (`"event"`, `"transaction"`, ...).
        entity: &'static str,
        /// Requested id.
        id: i64,
    },

    /// Malformed or semantically invalid input.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The request carries no usable member identity.
    #[error("missing or malformed member identity")]
    Unauthenticated,

    /// The actor is not allowed to act on this record.
    #[error("actor is not a party to this record")]
    NotParticipant,

    /// The event author tried to respond to their own event.
    #[error("event author cannot respond to their own event")]
    SelfResponseNotAllowed,

    /// The author already has the configured maximum of active events.
    #[error("active event limit of {limit} reached")]
    ActiveEventLimitReached {
        /// Configured limit.
        limit: u32,
    },

    /// No free slot left on the event.
    #[error("no free slot left on event {event_id}")]
    CapacityExhausted {
        /// Event whose capacity is exhausted.
        event_id: EventId,
    },

    /// The responder already holds an open transaction on this event.
    #[error("responder already has an open transaction on event {event_id}")]
    DuplicateTransaction {
        /// Event responded to.
        event_id: EventId,
    },

    /// The event is not accepting work.
    #[error("event is {status}, responses require an active event")]
    EventNotActive {
        /// Current event status.
        status: EventStatus,
    },

    /// The transaction already reached a terminal status.
    #[error("transaction is {status} and can no longer change")]
    TerminalStateViolation {
        /// Current terminal status.
        status: TransactionStatus,
    },

    /// The requested status equals the current one.
    #[error("transaction is already {status}")]
    NoOpTransition {
        /// Current status.
        status: TransactionStatus,
    },

    /// The requested edge is not in the transition table.
    #[error("cannot move transaction from {from} to {to}")]
    IllegalTransition {
        /// Current status.
        from: TransactionStatus,
        /// Requested status.
        to: TransactionStatus,
    },

    /// Completing requires a proof file and none exists yet.
    #[error("completing a transaction requires a proof file")]
    ProofRequired,

    /// A concurrent writer changed the record between read and write.
    #[error("concurrent modification: {0}")]
    Conflict(String),

    /// The request deadline elapsed. The operation may still complete.
    #[error("{operation} did not finish within {after_ms} ms; outcome unknown")]
    Timeout {
        /// Guarded operation name.
        operation: &'static str,
        /// Deadline in milliseconds.
        after_ms: u64,
    },

    /// Opaque storage failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    /// Shorthand for [`BrokerError::NotFound`].
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<i64>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::Validation(_) => 1001,
            Self::NotFound { .. } => 1004,
            Self::Unauthenticated => 1002,
            Self::NotParticipant => 1003,
            Self::SelfResponseNotAllowed => 1010,
            Self::ActiveEventLimitReached { .. } => 1011,
            Self::CapacityExhausted { .. } => 2001,
            Self::DuplicateTransaction { .. } => 2002,
            Self::EventNotActive { .. } => 2003,
            Self::TerminalStateViolation { .. } => 2010,
            Self::NoOpTransition { .. } => 2011,
            Self::IllegalTransition { .. } => 2012,
            Self::ProofRequired => 2013,
            Self::Conflict(_) => 2090,
            Self::Timeout { .. } => 3008,
            Self::Storage(_) => 3001,
            Self::Internal(_) => 3000,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Validation(_)
            | Self::SelfResponseNotAllowed
            | Self::ActiveEventLimitReached { .. }
            | Self::CapacityExhausted { .. }
            | Self::DuplicateTransaction { .. }
            | Self::EventNotActive { .. }
            | Self::TerminalStateViolation { .. }
            | Self::NoOpTransition { .. }
            | Self::IllegalTransition { .. }
            | Self::ProofRequired => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::NotParticipant => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for BrokerError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let details = match &self {
            Self::Timeout { .. } => {
                Some("the operation keeps running; re-read state before retrying".to_string())
            }
            _ => None,
        };
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
