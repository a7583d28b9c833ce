//! Transaction handlers: decide, update status and read.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::{
    DecisionRequest, TransactionDetailsResponse, TransitionResponse, UpdateStatusForm,
};
use crate::api::extract::Actor;
use crate::app_state::AppState;
use crate::domain::{MemberId, NeedPledge, TransactionId, TransactionStatus};
use crate::error::{BrokerError, ErrorResponse};
use crate::service::{ProofFile, UpdateStatusRequest};

/// Largest accepted proof upload.
const MAX_PROOF_BYTES: usize = 10 * 1024 * 1024;

/// `POST /transactions/{id}/decision`: Accept or decline a responder.
///
/// # Errors
///
/// Returns [`BrokerError`] if the caller is not the event author or the
/// transaction is no longer waiting.
#[utoipa::path(
    post,
    path = "/api/v1/transactions/{id}/decision",
    tag = "Transactions",
    summary = "Accept or decline",
    description = "Only legal while the transaction is `waiting`. Declining closes it and frees its slot.",
    request_body = DecisionRequest,
    params(
        ("id" = i64, Path, description = "Transaction id"),
        ("x-member-id" = i64, Header, description = "Event author"),
    ),
    responses(
        (status = 200, description = "Decision applied", body = TransitionResponse),
        (status = 400, description = "Transaction not waiting", body = ErrorResponse),
        (status = 403, description = "Not the event author", body = ErrorResponse),
        (status = 409, description = "Concurrent modification", body = ErrorResponse),
    )
)]
pub async fn decide(
    State(state): State<AppState>,
    Actor(requester): Actor,
    Path(id): Path<TransactionId>,
    Json(req): Json<DecisionRequest>,
) -> Result<impl IntoResponse, BrokerError> {
    let machine = Arc::clone(&state.transactions);
    let outcome = state
        .guard
        .run("accept", async move {
            machine.accept(id, requester, req.accept).await
        })
        .await?;
    Ok(Json(TransitionResponse::from(outcome)))
}

/// `POST /transactions/{id}/status`: Move the caller's side forward.
///
/// # Errors
///
/// Returns [`BrokerError`] on malformed forms, illegal transitions, or a
/// missing proof when completing.
#[utoipa::path(
    post,
    path = "/api/v1/transactions/{id}/status",
    tag = "Transactions",
    summary = "Update transaction status",
    description = "Multipart form with `status`, optional `pledges` JSON and optional `file`. Completing requires a proof unless one was uploaded before.",
    request_body(content = UpdateStatusForm, content_type = "multipart/form-data"),
    params(
        ("id" = i64, Path, description = "Transaction id"),
        ("x-member-id" = i64, Header, description = "Event author or responder"),
    ),
    responses(
        (status = 200, description = "Status updated", body = TransitionResponse),
        (status = 400, description = "Illegal transition or missing proof", body = ErrorResponse),
        (status = 403, description = "Not a participant", body = ErrorResponse),
        (status = 408, description = "Deadline elapsed, outcome unknown", body = ErrorResponse),
    )
)]
pub async fn update_status(
    State(state): State<AppState>,
    Actor(requester): Actor,
    Path(id): Path<TransactionId>,
    multipart: Multipart,
) -> Result<impl IntoResponse, BrokerError> {
    let request = read_status_form(requester, multipart).await?;
    let machine = Arc::clone(&state.transactions);
    let outcome = state
        .guard
        .run("update_status", async move {
            machine.update_status(id, request).await
        })
        .await?;
    Ok(Json(TransitionResponse::from(outcome)))
}

/// `GET /transactions/{id}`: Transaction with its pledge copies.
///
/// # Errors
///
/// Returns [`BrokerError`] if the caller is not a participant.
#[utoipa::path(
    get,
    path = "/api/v1/transactions/{id}",
    tag = "Transactions",
    summary = "Get transaction",
    params(
        ("id" = i64, Path, description = "Transaction id"),
        ("x-member-id" = i64, Header, description = "Event author or responder"),
    ),
    responses(
        (status = 200, description = "Transaction details", body = TransactionDetailsResponse),
        (status = 403, description = "Not a participant", body = ErrorResponse),
        (status = 404, description = "Transaction not found", body = ErrorResponse),
    )
)]
pub async fn get_transaction(
    State(state): State<AppState>,
    Actor(requester): Actor,
    Path(id): Path<TransactionId>,
) -> Result<impl IntoResponse, BrokerError> {
    let details = state.transactions.transaction_details(id, requester).await?;
    Ok(Json(TransactionDetailsResponse::from(details)))
}

async fn read_status_form(
    requester: MemberId,
    mut multipart: Multipart,
) -> Result<UpdateStatusRequest, BrokerError> {
    let mut status: Option<TransactionStatus> = None;
    let mut pledges: Vec<NeedPledge> = Vec::new();
    let mut proof = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("status") => {
                let text = field.text().await.map_err(bad_form)?;
                status = Some(text.trim().parse()?);
            }
            Some("pledges") => {
                let text = field.text().await.map_err(bad_form)?;
                if !text.trim().is_empty() {
                    pledges = serde_json::from_str(&text).map_err(|e| {
                        BrokerError::Validation(format!("pledges must be a JSON array: {e}"))
                    })?;
                }
            }
            Some("file") => {
                let extension = field
                    .file_name()
                    .and_then(|n| n.rsplit_once('.'))
                    .map(|(_, ext)| ext.to_string())
                    .unwrap_or_default();
                let bytes = field.bytes().await.map_err(bad_form)?;
                proof = Some(ProofFile {
                    extension,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }

    let new_status =
        status.ok_or_else(|| BrokerError::Validation("missing `status` field".to_string()))?;
    Ok(UpdateStatusRequest {
        requester,
        new_status,
        pledges,
        proof,
    })
}

fn bad_form(err: axum::extract::multipart::MultipartError) -> BrokerError {
    BrokerError::Validation(format!("malformed multipart form: {err}"))
}

/// Transaction routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/transactions/{id}", get(get_transaction))
        .route("/transactions/{id}/decision", post(decide))
        .route(
            "/transactions/{id}/status",
            post(update_status).layer(DefaultBodyLimit::max(MAX_PROOF_BYTES)),
        )
}
