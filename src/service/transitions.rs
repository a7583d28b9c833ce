//! The transaction state machine.
//!
//! Every status write is a compare-and-swap on the two status fields as
//! they were read. A lost race is re-validated against the fresh record so
//! the caller learns why the write did not apply.
//!
//! Side effects per operation:
//!
//! | Operation                         | Capacity  | Needs               | Notification      |
//! |-----------------------------------|-----------|---------------------|-------------------|
//! | `respond`                         | reserve 1 | pledge copies       | author, `Created` |
//! | `accept(true)`                    |           |                     | responder         |
//! | `accept(false)`                   | release 1 |                     | responder         |
//! | `update_status`, closing          | release 1 | fold on author done | counter-party     |
//! | `update_status`, not closing      |           | responder pledges   | counter-party     |
//!
//! Responder pledges are written in the same unit as the status swap. A
//! proof uploaded for a swap that does not apply is removed again.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::{CapacityManager, NeedAggregator, NotificationEmitter};
use crate::domain::{
    Event, EventId, EventKind, EventStatus, MemberId, Need, NeedPledge, NewNeed, NewNotification,
    NewTransaction, NotificationAction, NotificationId, Party, Transaction, TransactionId,
    TransactionPatch, TransactionStatus,
};
use crate::error::BrokerError;
use crate::persistence::{EntityStore, FileStorage};

const MAX_COMMENT_LEN: usize = 2000;
const MAX_EXTENSION_LEN: usize = 10;

/// An uploaded completion proof.
#[derive(Debug, Clone)]
pub struct ProofFile {
    /// File extension without the dot, e.g. `png`.
    pub extension: String,
    /// Raw file contents.
    pub bytes: Vec<u8>,
}

/// Input of [`TransactionStateMachine::update_status`].
#[derive(Debug, Clone)]
pub struct UpdateStatusRequest {
    /// Member asking for the change.
    pub requester: MemberId,
    /// Status the requester's side moves to.
    pub new_status: TransactionStatus,
    /// Received quantities for the transaction's pledge copies. Responder only.
    pub pledges: Vec<NeedPledge>,
    /// Proof file, needed when completing without an existing proof.
    pub proof: Option<ProofFile>,
}

/// Result of a successful state change.
#[derive(Debug)]
pub struct TransitionOutcome {
    /// The transaction after the change.
    pub transaction: Transaction,
    /// Outcome of the counter-party notification. A failure here did not
    /// undo the state change.
    pub notification: Result<NotificationId, BrokerError>,
    /// `true` if this change completed the owning help event.
    pub event_completed: bool,
}

/// A transaction with its pledge copies.
#[derive(Debug, Clone)]
pub struct TransactionDetails {
    /// The transaction.
    pub transaction: Transaction,
    /// Pledge copies, empty for proposal events.
    pub needs: Vec<Need>,
    /// Share of pledge copies fully received, in percent.
    pub completion_percentage: f64,
}

/// Validates and applies transaction transitions with their side effects.
#[derive(Debug, Clone)]
pub struct TransactionStateMachine {
    store: Arc<dyn EntityStore>,
    files: Arc<dyn FileStorage>,
    capacity: CapacityManager,
    notifier: NotificationEmitter,
}

impl TransactionStateMachine {
    /// Creates a state machine over the given collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn EntityStore>,
        files: Arc<dyn FileStorage>,
        capacity: CapacityManager,
        notifier: NotificationEmitter,
    ) -> Self {
        Self {
            store,
            files,
            capacity,
            notifier,
        }
    }

    /// Creates a transaction for `responder` on an active event.
    ///
    /// The slot reservation and the insert form one unit: if the insert
    /// fails, the slot is released before the error is returned.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::EventNotActive`] if the event is not active
    /// - [`BrokerError::SelfResponseNotAllowed`] if `responder` is the author
    /// - [`BrokerError::DuplicateTransaction`] if an open transaction exists
    /// - [`BrokerError::CapacityExhausted`] if no slot is free
    pub async fn respond(
        &self,
        event_id: EventId,
        responder: MemberId,
        comment: String,
    ) -> Result<TransitionOutcome, BrokerError> {
        if comment.chars().count() > MAX_COMMENT_LEN {
            return Err(BrokerError::Validation(format!(
                "comment exceeds {MAX_COMMENT_LEN} characters"
            )));
        }

        let event = self.store.get_event(event_id).await?;
        if event.status != EventStatus::Active {
            return Err(BrokerError::EventNotActive {
                status: event.status,
            });
        }
        if event.author_id == responder {
            return Err(BrokerError::SelfResponseNotAllowed);
        }
        if self
            .store
            .find_open_transaction(event_id, responder)
            .await?
            .is_some()
        {
            return Err(BrokerError::DuplicateTransaction { event_id });
        }

        let pledges: Vec<NewNeed> = match event.kind {
            EventKind::Help => self
                .store
                .needs_by_event(event_id)
                .await?
                .iter()
                .map(Need::pledge_copy)
                .collect(),
            EventKind::Proposal => Vec::new(),
        };

        self.capacity.reserve(event_id).await?;

        let new_tx = NewTransaction {
            creator_id: responder,
            event_id,
            event_kind: event.kind,
            comment,
        };
        let transaction = match self.store.create_transaction(new_tx, pledges).await {
            Ok(tx) => tx,
            Err(err) => {
                if let Err(release_err) = self.capacity.release(event_id, 1).await {
                    tracing::error!(
                        %event_id,
                        error = %release_err,
                        "failed to release slot after rejected insert"
                    );
                }
                return Err(err);
            }
        };

        tracing::info!(
            %event_id,
            transaction_id = %transaction.id,
            %responder,
            "transaction created"
        );

        let notification = self
            .notify(
                &transaction,
                NotificationAction::Created,
                TransactionStatus::Waiting,
                event.author_id,
            )
            .await;

        Ok(TransitionOutcome {
            transaction,
            notification,
            event_completed: false,
        })
    }

    /// The event author's decision on a waiting transaction.
    ///
    /// Accepting moves both sides to `Accepted`. Declining moves both to
    /// `Canceled`, closes the transaction and releases its slot.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::NotParticipant`] if `requester` is not the event author
    /// - [`BrokerError::TerminalStateViolation`] if the transaction is closed
    /// - [`BrokerError::NoOpTransition`] if the decision was already applied
    /// - [`BrokerError::IllegalTransition`] if the transaction is not waiting
    pub async fn accept(
        &self,
        tx_id: TransactionId,
        requester: MemberId,
        accept: bool,
    ) -> Result<TransitionOutcome, BrokerError> {
        let tx = self.store.get_transaction(tx_id).await?;
        let event = self.store.get_event(tx.event_id).await?;
        if event.author_id != requester {
            return Err(BrokerError::NotParticipant);
        }

        let target = if accept {
            TransactionStatus::Accepted
        } else {
            TransactionStatus::Canceled
        };
        check_decision(&tx, target)?;

        let patch = TransactionPatch {
            transaction_status: Some(target),
            responder_status: Some(target),
            completed_at: (!accept).then(Utc::now),
            ..TransactionPatch::default()
        };
        let Some(updated) = self
            .store
            .update_transaction_if(tx.id, tx.snapshot(), patch)
            .await?
        else {
            let fresh = self.store.get_transaction(tx_id).await?;
            return Err(check_decision(&fresh, target).err().unwrap_or_else(|| lost_race(tx_id)));
        };

        if !accept {
            self.release_closed(&updated).await?;
        }

        tracing::info!(
            event_id = %updated.event_id,
            transaction_id = %updated.id,
            status = %target,
            "transaction decided"
        );

        let notification = self
            .notify(
                &updated,
                NotificationAction::Updated,
                target,
                updated.creator_id,
            )
            .await;

        Ok(TransitionOutcome {
            transaction: updated,
            notification,
            event_completed: false,
        })
    }

    /// Moves the requester's side of a transaction to `request.new_status`.
    ///
    /// The transaction closes when the author reaches a terminal status or
    /// the responder reaches `Interrupted` or `Aborted`. A responder
    /// `Completed` is a completion claim and leaves the transaction open.
    /// When the author completes a help transaction, its pledges are folded
    /// into the event's needs and the event is marked done once every need
    /// is satisfied. An author move to `Accepted` or `Canceled` is the
    /// decision of [`Self::accept`].
    ///
    /// # Errors
    ///
    /// - [`BrokerError::NotParticipant`] if `requester` is neither party
    /// - [`BrokerError::TerminalStateViolation`] if the transaction or the
    ///   requester's side is already terminal
    /// - [`BrokerError::NoOpTransition`] if the side is already in the status
    /// - [`BrokerError::IllegalTransition`] for edges outside the table
    /// - [`BrokerError::ProofRequired`] when completing without any proof
    /// - [`BrokerError::Validation`] for bad pledges or proof files
    pub async fn update_status(
        &self,
        tx_id: TransactionId,
        request: UpdateStatusRequest,
    ) -> Result<TransitionOutcome, BrokerError> {
        let UpdateStatusRequest {
            requester,
            new_status,
            pledges,
            proof,
        } = request;

        let tx = self.store.get_transaction(tx_id).await?;
        let event = self.store.get_event(tx.event_id).await?;
        let party = party_of(&event, &tx, requester)?;
        check_transition(&tx, party, new_status)?;

        if party == Party::Author && !pledges.is_empty() {
            return Err(BrokerError::Validation(
                "only the responder can report received quantities".to_string(),
            ));
        }
        if proof.is_some() && new_status != TransactionStatus::Completed {
            return Err(BrokerError::Validation(
                "a proof file is only accepted when completing".to_string(),
            ));
        }
        if party == Party::Author
            && matches!(
                new_status,
                TransactionStatus::Accepted | TransactionStatus::Canceled
            )
        {
            return self
                .accept(tx_id, requester, new_status == TransactionStatus::Accepted)
                .await;
        }
        let changed_needs = if pledges.is_empty() {
            Vec::new()
        } else {
            let own = self.store.needs_by_transaction(tx.id).await?;
            NeedAggregator::apply_pledges(&own, &pledges)?
        };
        if new_status == TransactionStatus::Completed && proof.is_none() && tx.report_url.is_none()
        {
            return Err(BrokerError::ProofRequired);
        }

        let (proof_name, report_url) = match proof {
            Some(file) => {
                let (name, url) = self.store_proof(file).await?;
                (Some(name), Some(url))
            }
            None => (None, None),
        };

        let closes = match party {
            Party::Author => new_status.is_terminal(),
            Party::Responder => matches!(
                new_status,
                TransactionStatus::Interrupted | TransactionStatus::Aborted
            ),
        };
        let mut patch = if closes {
            TransactionPatch {
                transaction_status: Some(new_status),
                responder_status: Some(new_status),
                completed_at: Some(Utc::now()),
                report_url,
                ..TransactionPatch::default()
            }
        } else {
            match party {
                Party::Author => TransactionPatch {
                    transaction_status: Some(new_status),
                    report_url,
                    ..TransactionPatch::default()
                },
                Party::Responder => TransactionPatch {
                    responder_status: Some(new_status),
                    report_url,
                    ..TransactionPatch::default()
                },
            }
        };
        patch.pledges = changed_needs;

        let swapped = self
            .store
            .update_transaction_if(tx.id, tx.snapshot(), patch)
            .await;
        if let Some(name) = &proof_name
            && !matches!(swapped, Ok(Some(_)))
        {
            self.discard_proof(name).await;
        }
        let Some(updated) = swapped? else {
            let fresh = self.store.get_transaction(tx_id).await?;
            return Err(check_transition(&fresh, party, new_status)
                .err()
                .unwrap_or_else(|| lost_race(tx_id)));
        };

        if closes {
            self.release_closed(&updated).await?;
        }

        let event_completed = if party == Party::Author
            && new_status == TransactionStatus::Completed
            && event.kind == EventKind::Help
        {
            self.fold_into_event(&updated).await?
        } else {
            false
        };

        tracing::info!(
            event_id = %updated.event_id,
            transaction_id = %updated.id,
            ?party,
            status = %new_status,
            closed = closes,
            "transaction status updated"
        );

        let recipient = match party {
            Party::Author => updated.creator_id,
            Party::Responder => event.author_id,
        };
        let notification = self
            .notify(&updated, NotificationAction::Updated, new_status, recipient)
            .await;

        Ok(TransitionOutcome {
            transaction: updated,
            notification,
            event_completed,
        })
    }

    /// Loads a transaction with its pledge copies. Participants only.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotParticipant`] for other members and
    /// [`BrokerError::NotFound`] for unknown ids.
    pub async fn transaction_details(
        &self,
        tx_id: TransactionId,
        requester: MemberId,
    ) -> Result<TransactionDetails, BrokerError> {
        let transaction = self.store.get_transaction(tx_id).await?;
        let event = self.store.get_event(transaction.event_id).await?;
        party_of(&event, &transaction, requester)?;

        let needs = self.store.needs_by_transaction(tx_id).await?;
        let completion_percentage = NeedAggregator::pledge_percentage(&needs);
        Ok(TransactionDetails {
            transaction,
            needs,
            completion_percentage,
        })
    }

    /// Uploads a proof under a fresh name. Returns the name and its URL.
    async fn store_proof(&self, file: ProofFile) -> Result<(String, String), BrokerError> {
        let extension = file.extension.trim_start_matches('.').to_ascii_lowercase();
        if extension.is_empty()
            || extension.len() > MAX_EXTENSION_LEN
            || !extension.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(BrokerError::Validation(format!(
                "unsupported proof file extension: {}",
                file.extension
            )));
        }
        if file.bytes.is_empty() {
            return Err(BrokerError::Validation("proof file is empty".to_string()));
        }
        let name = format!("{}.{extension}", Uuid::new_v4());
        let url = self.files.upload(&name, file.bytes).await?;
        Ok((name, url))
    }

    async fn discard_proof(&self, name: &str) {
        if let Err(err) = self.files.remove(name).await {
            tracing::warn!(file = name, error = %err, "unreferenced proof file left behind");
        }
    }

    /// Releases the slot of a transaction that was just closed.
    async fn release_closed(&self, tx: &Transaction) -> Result<(), BrokerError> {
        self.capacity.release(tx.event_id, 1).await.inspect_err(|err| {
            tracing::error!(
                event_id = %tx.event_id,
                transaction_id = %tx.id,
                error = %err,
                "transaction closed but its slot was not released"
            );
        })
    }

    /// Adds the transaction's pledges to the event needs. Returns `true` if
    /// this completed the event.
    async fn fold_into_event(&self, tx: &Transaction) -> Result<bool, BrokerError> {
        let event_needs = self.store.needs_by_event(tx.event_id).await?;
        let pledges = self.store.needs_by_transaction(tx.id).await?;
        let folded = NeedAggregator::fold(&event_needs, &pledges);
        if folded.increments.is_empty() {
            return Ok(false);
        }
        self.store.add_received_totals(&folded.increments).await?;

        let totals = self.store.needs_by_event(tx.event_id).await?;
        if !NeedAggregator::all_satisfied(&totals) {
            return Ok(false);
        }
        let completed = self
            .store
            .transition_event(tx.event_id, EventStatus::Active, EventStatus::Done)
            .await?;
        if completed {
            tracing::info!(event_id = %tx.event_id, "all needs satisfied, event done");
        }
        Ok(completed)
    }

    async fn notify(
        &self,
        tx: &Transaction,
        action: NotificationAction,
        new_status: TransactionStatus,
        recipient: MemberId,
    ) -> Result<NotificationId, BrokerError> {
        let result = self
            .notifier
            .emit(NewNotification {
                event_kind: tx.event_kind,
                event_id: tx.event_id,
                transaction_id: tx.id,
                action,
                new_status,
                member_id: recipient,
            })
            .await;
        if let Err(err) = &result {
            tracing::warn!(
                transaction_id = %tx.id,
                %recipient,
                error = %err,
                "notification not recorded, state change kept"
            );
        }
        result
    }
}

fn party_of(event: &Event, tx: &Transaction, requester: MemberId) -> Result<Party, BrokerError> {
    if requester == event.author_id {
        Ok(Party::Author)
    } else if requester == tx.creator_id {
        Ok(Party::Responder)
    } else {
        Err(BrokerError::NotParticipant)
    }
}

/// The decision applies to both sides, so both are checked.
fn check_decision(tx: &Transaction, target: TransactionStatus) -> Result<(), BrokerError> {
    let current = tx.transaction_status;
    let responder = tx.responder_status;
    if current.is_terminal() {
        return Err(BrokerError::TerminalStateViolation { status: current });
    }
    if responder.is_terminal() {
        return Err(BrokerError::TerminalStateViolation { status: responder });
    }
    if current == target {
        return Err(BrokerError::NoOpTransition { status: current });
    }
    if current != TransactionStatus::Waiting {
        return Err(BrokerError::IllegalTransition {
            from: current,
            to: target,
        });
    }
    if responder != TransactionStatus::NotStarted {
        return Err(BrokerError::IllegalTransition {
            from: responder,
            to: target,
        });
    }
    Ok(())
}

fn check_transition(
    tx: &Transaction,
    party: Party,
    new_status: TransactionStatus,
) -> Result<(), BrokerError> {
    if tx.is_closed() {
        return Err(BrokerError::TerminalStateViolation {
            status: tx.transaction_status,
        });
    }
    let current = tx.status_of(party);
    if current.is_terminal() {
        return Err(BrokerError::TerminalStateViolation { status: current });
    }
    if party == Party::Responder && tx.transaction_status == TransactionStatus::Waiting {
        return Err(BrokerError::IllegalTransition {
            from: current,
            to: new_status,
        });
    }
    if current == new_status {
        return Err(BrokerError::NoOpTransition { status: current });
    }
    if !current.can_transition_as(party, new_status) {
        return Err(BrokerError::IllegalTransition {
            from: current,
            to: new_status,
        });
    }
    Ok(())
}

fn lost_race(tx_id: TransactionId) -> BrokerError {
    BrokerError::Conflict(format!(
        "transaction {tx_id} changed concurrently, re-read and retry"
    ))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{NewEvent, NotificationBus, StatusSnapshot};
    use crate::persistence::{MemoryFileStorage, MemoryStore};

    const AUTHOR: MemberId = MemberId::new(1);
    const ALICE: MemberId = MemberId::new(2);
    const BOB: MemberId = MemberId::new(3);

    struct Harness {
        machine: TransactionStateMachine,
        store: Arc<MemoryStore>,
        files: Arc<MemoryFileStorage>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let files = Arc::new(MemoryFileStorage::new());
        let dyn_store: Arc<dyn EntityStore> = Arc::clone(&store) as Arc<dyn EntityStore>;
        let machine = TransactionStateMachine::new(
            Arc::clone(&dyn_store),
            Arc::clone(&files) as Arc<dyn FileStorage>,
            CapacityManager::new(Arc::clone(&dyn_store)),
            NotificationEmitter::new(dyn_store, NotificationBus::new(64)),
        );
        Harness {
            machine,
            store,
            files,
        }
    }

    impl Harness {
        async fn proposal(&self, max: u32) -> Event {
            self.event(EventKind::Proposal, max, vec![]).await
        }

        async fn event(&self, kind: EventKind, max: u32, needs: Vec<NewNeed>) -> Event {
            let Ok(event) = self
                .store
                .create_event(
                    NewEvent {
                        kind,
                        author_id: AUTHOR,
                        title: "Groceries for the shelter".to_string(),
                        description: String::new(),
                        end_date: None,
                        max_concurrent_requests: max,
                    },
                    needs,
                )
                .await
            else {
                panic!("create event failed");
            };
            event
        }

        async fn remaining(&self, event_id: EventId) -> u32 {
            let Ok(event) = self.store.get_event(event_id).await else {
                panic!("event missing");
            };
            event.remaining_helps
        }

        async fn respond(&self, event_id: EventId, who: MemberId) -> Transaction {
            let Ok(outcome) = self.machine.respond(event_id, who, String::new()).await else {
                panic!("respond failed");
            };
            outcome.transaction
        }

        async fn update(
            &self,
            tx_id: TransactionId,
            requester: MemberId,
            new_status: TransactionStatus,
        ) -> Result<TransitionOutcome, BrokerError> {
            self.machine
                .update_status(
                    tx_id,
                    UpdateStatusRequest {
                        requester,
                        new_status,
                        pledges: vec![],
                        proof: None,
                    },
                )
                .await
        }

        /// Responds, gets accepted and moves both sides into `InProcess`.
        async fn in_process(&self, event_id: EventId, who: MemberId) -> Transaction {
            let tx = self.respond(event_id, who).await;
            assert!(self.machine.accept(tx.id, AUTHOR, true).await.is_ok());
            assert!(self.update(tx.id, who, TransactionStatus::InProcess).await.is_ok());
            let Ok(outcome) = self.update(tx.id, AUTHOR, TransactionStatus::InProcess).await
            else {
                panic!("author could not start");
            };
            outcome.transaction
        }
    }

    fn proof() -> Option<ProofFile> {
        Some(ProofFile {
            extension: "jpg".to_string(),
            bytes: vec![0xFF, 0xD8],
        })
    }

    fn need(title: &str, amount: f64, unit: &str) -> NewNeed {
        NewNeed {
            title: title.to_string(),
            amount,
            unit: unit.to_string(),
        }
    }

    #[tokio::test]
    async fn single_slot_admits_exactly_one_of_two_concurrent_responders() {
        let h = harness();
        let event = h.proposal(1).await;

        let (a, b) = tokio::join!(
            h.machine.respond(event.id, ALICE, String::new()),
            h.machine.respond(event.id, BOB, String::new()),
        );
        let results = [a, b];
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let exhausted = results
            .iter()
            .filter(|r| matches!(r, Err(BrokerError::CapacityExhausted { .. })))
            .count();
        assert_eq!((ok, exhausted), (1, 1));
        assert_eq!(h.remaining(event.id).await, 0);
    }

    #[tokio::test]
    async fn author_cannot_respond_to_own_event() {
        let h = harness();
        let event = h.proposal(3).await;
        let result = h.machine.respond(event.id, AUTHOR, String::new()).await;
        assert!(matches!(result, Err(BrokerError::SelfResponseNotAllowed)));
        assert_eq!(h.remaining(event.id).await, 3);
    }

    #[tokio::test]
    async fn declining_restores_the_slot() {
        let h = harness();
        let event = h.proposal(2).await;
        let tx = h.respond(event.id, ALICE).await;
        assert_eq!(h.remaining(event.id).await, 1);

        let Ok(outcome) = h.machine.accept(tx.id, AUTHOR, false).await else {
            panic!("decline failed");
        };
        assert_eq!(outcome.transaction.transaction_status, TransactionStatus::Canceled);
        assert_eq!(outcome.transaction.responder_status, TransactionStatus::Canceled);
        assert!(outcome.transaction.completed_at.is_some());
        assert_eq!(h.remaining(event.id).await, 2);
    }

    #[tokio::test]
    async fn help_event_is_done_once_every_need_is_received() {
        let h = harness();
        let event = h
            .event(
                EventKind::Help,
                2,
                vec![need("rice", 10.0, "kg"), need("water", 5.0, "l")],
            )
            .await;

        let mut completed_flags = Vec::new();
        for (who, title, amount) in [(ALICE, "rice", 10.0), (BOB, "water", 5.0)] {
            let tx = h.in_process(event.id, who).await;
            let Ok(copies) = h.store.needs_by_transaction(tx.id).await else {
                panic!("no pledge copies");
            };
            let Some(copy) = copies.iter().find(|n| n.title == title) else {
                panic!("pledge copy missing");
            };
            let claim = h
                .machine
                .update_status(
                    tx.id,
                    UpdateStatusRequest {
                        requester: who,
                        new_status: TransactionStatus::Completed,
                        pledges: vec![NeedPledge {
                            need_id: copy.id,
                            received: amount,
                        }],
                        proof: proof(),
                    },
                )
                .await;
            let Ok(claim) = claim else {
                panic!("completion claim failed");
            };
            assert!(!claim.transaction.is_closed());

            let Ok(done) = h.update(tx.id, AUTHOR, TransactionStatus::Completed).await else {
                panic!("author completion failed");
            };
            completed_flags.push(done.event_completed);
        }

        assert_eq!(completed_flags, vec![false, true]);
        let Ok(event) = h.store.get_event(event.id).await else {
            panic!("event missing");
        };
        assert_eq!(event.status, EventStatus::Done);
        assert_eq!(event.remaining_helps, 2);
        assert_eq!(h.files.len().await, 2);
    }

    #[tokio::test]
    async fn completed_transaction_rejects_further_updates() {
        let h = harness();
        let event = h.proposal(1).await;
        let tx = h.in_process(event.id, ALICE).await;
        let completed = h
            .machine
            .update_status(
                tx.id,
                UpdateStatusRequest {
                    requester: AUTHOR,
                    new_status: TransactionStatus::Completed,
                    pledges: vec![],
                    proof: proof(),
                },
            )
            .await;
        assert!(completed.is_ok());

        let again = h.update(tx.id, ALICE, TransactionStatus::Aborted).await;
        assert!(matches!(
            again,
            Err(BrokerError::TerminalStateViolation {
                status: TransactionStatus::Completed
            })
        ));
        assert!(matches!(
            h.machine.accept(tx.id, AUTHOR, true).await,
            Err(BrokerError::TerminalStateViolation { .. })
        ));
        assert_eq!(h.remaining(event.id).await, 1);
    }

    #[tokio::test]
    async fn second_open_response_is_a_duplicate() {
        let h = harness();
        let event = h.proposal(3).await;
        let tx = h.respond(event.id, ALICE).await;

        let dup = h.machine.respond(event.id, ALICE, String::new()).await;
        assert!(matches!(dup, Err(BrokerError::DuplicateTransaction { .. })));
        assert_eq!(h.remaining(event.id).await, 2);

        assert!(h.machine.accept(tx.id, AUTHOR, false).await.is_ok());
        assert!(h.machine.respond(event.id, ALICE, String::new()).await.is_ok());
    }

    #[tokio::test]
    async fn failed_insert_releases_reserved_slot() {
        let h = harness();
        let event = h.proposal(1).await;
        h.store.with_faults(|f| f.fail_transaction_insert = true).await;

        let result = h.machine.respond(event.id, ALICE, String::new()).await;
        assert!(matches!(result, Err(BrokerError::Storage(_))));
        assert_eq!(h.remaining(event.id).await, 1);
        assert_eq!(h.store.transaction_count().await, 0);
    }

    #[tokio::test]
    async fn notification_failure_keeps_the_transition() {
        let h = harness();
        let event = h.proposal(1).await;
        h.store.with_faults(|f| f.fail_notifications = true).await;

        let Ok(outcome) = h.machine.respond(event.id, ALICE, String::new()).await else {
            panic!("respond should succeed without notifications");
        };
        assert!(matches!(outcome.notification, Err(BrokerError::Storage(_))));
        assert_eq!(h.store.transaction_count().await, 1);
        assert_eq!(h.remaining(event.id).await, 0);
    }

    #[tokio::test]
    async fn notifications_go_to_the_counter_party() {
        let h = harness();
        let event = h.proposal(1).await;
        let tx = h.respond(event.id, ALICE).await;
        assert!(h.machine.accept(tx.id, AUTHOR, true).await.is_ok());
        assert!(h.update(tx.id, ALICE, TransactionStatus::InProcess).await.is_ok());

        let recipients: Vec<MemberId> = h
            .store
            .all_notifications()
            .await
            .iter()
            .map(|n| n.member_id)
            .collect();
        assert_eq!(recipients, vec![AUTHOR, ALICE, AUTHOR]);
    }

    #[tokio::test]
    async fn completing_needs_a_proof_unless_one_exists() {
        let h = harness();
        let event = h.proposal(1).await;
        let tx = h.in_process(event.id, ALICE).await;

        assert!(matches!(
            h.update(tx.id, ALICE, TransactionStatus::Completed).await,
            Err(BrokerError::ProofRequired)
        ));

        let claim = h
            .machine
            .update_status(
                tx.id,
                UpdateStatusRequest {
                    requester: ALICE,
                    new_status: TransactionStatus::Completed,
                    pledges: vec![],
                    proof: proof(),
                },
            )
            .await;
        let Ok(claim) = claim else {
            panic!("claim failed");
        };
        let url = claim.transaction.report_url.clone();
        assert!(url.as_deref().is_some_and(|u| u.ends_with(".jpg")));

        let Ok(done) = h.update(tx.id, AUTHOR, TransactionStatus::Completed).await else {
            panic!("author completion should reuse the proof");
        };
        assert_eq!(done.transaction.report_url, url);
        assert_eq!(h.files.len().await, 1);
    }

    #[tokio::test]
    async fn responder_abort_closes_and_releases_once() {
        let h = harness();
        let event = h.proposal(2).await;
        let tx = h.in_process(event.id, ALICE).await;
        assert_eq!(h.remaining(event.id).await, 1);

        let Ok(aborted) = h.update(tx.id, ALICE, TransactionStatus::Aborted).await else {
            panic!("abort failed");
        };
        assert_eq!(aborted.transaction.transaction_status, TransactionStatus::Aborted);
        assert_eq!(h.remaining(event.id).await, 2);

        assert!(matches!(
            h.update(tx.id, AUTHOR, TransactionStatus::Interrupted).await,
            Err(BrokerError::TerminalStateViolation { .. })
        ));
        assert_eq!(h.remaining(event.id).await, 2);
    }

    #[tokio::test]
    async fn shortcuts_and_repeats_are_rejected() {
        let h = harness();
        let event = h.proposal(1).await;
        let tx = h.respond(event.id, ALICE).await;

        assert!(matches!(
            h.update(tx.id, AUTHOR, TransactionStatus::Completed).await,
            Err(BrokerError::IllegalTransition {
                from: TransactionStatus::Waiting,
                to: TransactionStatus::Completed
            })
        ));
        assert!(matches!(
            h.update(tx.id, AUTHOR, TransactionStatus::Waiting).await,
            Err(BrokerError::NoOpTransition { .. })
        ));
        assert!(matches!(
            h.update(tx.id, BOB, TransactionStatus::Waiting).await,
            Err(BrokerError::NotParticipant)
        ));
        assert!(matches!(
            h.machine.accept(tx.id, ALICE, true).await,
            Err(BrokerError::NotParticipant)
        ));
    }

    #[tokio::test]
    async fn inactive_event_refuses_responses() {
        let h = harness();
        let event = h.proposal(1).await;
        let moved = h
            .store
            .transition_event(event.id, EventStatus::Active, EventStatus::Done)
            .await;
        assert_eq!(moved, Ok(true));

        assert!(matches!(
            h.machine.respond(event.id, ALICE, String::new()).await,
            Err(BrokerError::EventNotActive {
                status: EventStatus::Done
            })
        ));
    }

    #[tokio::test]
    async fn slots_match_open_transactions_under_concurrency() {
        let h = Arc::new(harness());
        let event = h.proposal(4).await;

        let mut handles = Vec::new();
        for member in 10..40 {
            let h = Arc::clone(&h);
            handles.push(tokio::spawn(async move {
                let responder = MemberId::new(member);
                let Ok(outcome) = h.machine.respond(event.id, responder, String::new()).await
                else {
                    return;
                };
                let _ = h
                    .machine
                    .accept(outcome.transaction.id, AUTHOR, member % 2 == 0)
                    .await;
            }));
        }
        for handle in handles {
            assert!(handle.await.is_ok());
        }

        let Ok(event) = h.store.get_event(event.id).await else {
            panic!("event missing");
        };
        let mut open = 0;
        for member in 10..40 {
            if let Ok(Some(_)) = h
                .store
                .find_open_transaction(event.id, MemberId::new(member))
                .await
            {
                open += 1;
            }
        }
        assert!(event.remaining_helps <= event.max_concurrent_requests);
        assert_eq!(event.occupied_slots(), open);
    }

    #[tokio::test]
    async fn details_are_visible_to_participants_only() {
        let h = harness();
        let event = h.event(EventKind::Help, 1, vec![need("soap", 3.0, "pcs")]).await;
        let tx = h.respond(event.id, ALICE).await;

        let Ok(details) = h.machine.transaction_details(tx.id, AUTHOR).await else {
            panic!("author should see details");
        };
        assert_eq!(details.needs.len(), 1);
        assert!(details.completion_percentage.abs() < f64::EPSILON);
        assert!(matches!(
            h.machine.transaction_details(tx.id, BOB).await,
            Err(BrokerError::NotParticipant)
        ));
    }

    #[tokio::test]
    async fn responder_cannot_move_before_the_author_decides() {
        let h = harness();
        let event = h.proposal(1).await;
        let tx = h.respond(event.id, ALICE).await;

        for status in [
            TransactionStatus::Waiting,
            TransactionStatus::Accepted,
            TransactionStatus::InProcess,
        ] {
            assert!(matches!(
                h.update(tx.id, ALICE, status).await,
                Err(BrokerError::IllegalTransition { .. })
            ));
        }
        let claim = h
            .machine
            .update_status(
                tx.id,
                UpdateStatusRequest {
                    requester: ALICE,
                    new_status: TransactionStatus::Completed,
                    pledges: vec![],
                    proof: proof(),
                },
            )
            .await;
        assert!(matches!(claim, Err(BrokerError::IllegalTransition { .. })));
        assert_eq!(h.files.len().await, 0);

        let Ok(accepted) = h.machine.accept(tx.id, AUTHOR, true).await else {
            panic!("accept failed");
        };
        assert_eq!(
            accepted.transaction.snapshot(),
            StatusSnapshot {
                transaction_status: TransactionStatus::Accepted,
                responder_status: TransactionStatus::Accepted,
            }
        );
        assert_eq!(accepted.transaction.report_url, None);
    }

    #[tokio::test]
    async fn decision_refuses_a_finished_responder_side() {
        let h = harness();
        let event = h.proposal(1).await;
        let tx = h.respond(event.id, ALICE).await;
        let forced = h
            .store
            .update_transaction_if(
                tx.id,
                tx.snapshot(),
                TransactionPatch {
                    responder_status: Some(TransactionStatus::Aborted),
                    ..TransactionPatch::default()
                },
            )
            .await;
        assert!(matches!(forced, Ok(Some(_))));

        assert!(matches!(
            h.machine.accept(tx.id, AUTHOR, true).await,
            Err(BrokerError::TerminalStateViolation {
                status: TransactionStatus::Aborted
            })
        ));
        let Ok(stored) = h.store.get_transaction(tx.id).await else {
            panic!("transaction missing");
        };
        assert_eq!(stored.responder_status, TransactionStatus::Aborted);
    }

    #[tokio::test]
    async fn author_status_update_to_accepted_moves_both_sides() {
        let h = harness();
        let event = h.proposal(1).await;
        let tx = h.respond(event.id, ALICE).await;

        let Ok(accepted) = h.update(tx.id, AUTHOR, TransactionStatus::Accepted).await else {
            panic!("author could not accept");
        };
        assert_eq!(accepted.transaction.responder_status, TransactionStatus::Accepted);
        assert!(h.update(tx.id, ALICE, TransactionStatus::InProcess).await.is_ok());
    }

    #[tokio::test]
    async fn close_won_by_another_writer_keeps_pledges_and_proof_out() {
        let h = harness();
        let event = h.event(EventKind::Help, 1, vec![need("rice", 10.0, "kg")]).await;
        let tx = h.in_process(event.id, ALICE).await;
        let Ok(copies) = h.store.needs_by_transaction(tx.id).await else {
            panic!("no pledge copies");
        };
        let Some(copy) = copies.first() else {
            panic!("pledge copy missing");
        };
        let interrupted = StatusSnapshot {
            transaction_status: TransactionStatus::Interrupted,
            responder_status: TransactionStatus::Interrupted,
        };
        h.store
            .with_faults(|f| f.interleave_write = Some((tx.id, interrupted)))
            .await;

        let claim = h
            .machine
            .update_status(
                tx.id,
                UpdateStatusRequest {
                    requester: ALICE,
                    new_status: TransactionStatus::Completed,
                    pledges: vec![NeedPledge {
                        need_id: copy.id,
                        received: 10.0,
                    }],
                    proof: proof(),
                },
            )
            .await;
        assert!(matches!(
            claim,
            Err(BrokerError::TerminalStateViolation {
                status: TransactionStatus::Interrupted
            })
        ));
        assert_eq!(h.remaining(event.id).await, 0);
        assert_eq!(h.files.len().await, 0);
        let Ok(copies) = h.store.needs_by_transaction(tx.id).await else {
            panic!("no pledge copies");
        };
        assert!(copies.iter().all(|n| n.received == 0.0));
    }

    #[tokio::test]
    async fn swap_lost_to_a_compatible_write_is_a_conflict() {
        let h = harness();
        let event = h.proposal(2).await;
        let tx = h.respond(event.id, ALICE).await;
        assert!(h.machine.accept(tx.id, AUTHOR, true).await.is_ok());
        let author_started = StatusSnapshot {
            transaction_status: TransactionStatus::InProcess,
            responder_status: TransactionStatus::Accepted,
        };
        h.store
            .with_faults(|f| f.interleave_write = Some((tx.id, author_started)))
            .await;

        assert!(matches!(
            h.update(tx.id, ALICE, TransactionStatus::InProcess).await,
            Err(BrokerError::Conflict(_))
        ));
        assert_eq!(h.remaining(event.id).await, 1);
        let Ok(stored) = h.store.get_transaction(tx.id).await else {
            panic!("transaction missing");
        };
        assert_eq!(stored.snapshot(), author_started);
    }
}
