//! Need aggregation for help events.
//!
//! Pledge copies on a transaction are matched to the event's own needs by
//! `(title, unit, amount)`. The first matching copy contributes its
//! `received` quantity to the event need's `received_total`.

use std::collections::HashMap;

use crate::domain::{Need, NeedIncrement, NeedPledge};
use crate::error::BrokerError;

/// Result of [`NeedAggregator::fold`].
#[derive(Debug, Clone, PartialEq)]
pub struct FoldedNeeds {
    /// The event needs after the fold.
    pub needs: Vec<Need>,
    /// Per-need additions to `received_total`.
    pub increments: Vec<NeedIncrement>,
}

/// Pure aggregation rules over need lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeedAggregator;

impl NeedAggregator {
    /// Folds a transaction's pledge copies into the event needs.
    ///
    /// [`FoldedNeeds::needs`] is `event_needs` with every matched pledge
    /// added to `received_total`; [`FoldedNeeds::increments`] carries the
    /// same additions as deltas for an atomic store update, so concurrent
    /// folds on one event never overwrite each other. Zero deltas are
    /// omitted.
    #[must_use]
    pub fn fold(event_needs: &[Need], transaction_needs: &[Need]) -> FoldedNeeds {
        let mut folded = FoldedNeeds {
            needs: Vec::with_capacity(event_needs.len()),
            increments: Vec::new(),
        };
        for need in event_needs {
            let mut updated = need.clone();
            if let Some(pledge) = Self::matching_pledge(need, transaction_needs)
                && pledge.received != 0.0
            {
                updated.received_total += pledge.received;
                folded.increments.push(NeedIncrement {
                    need_id: need.id,
                    delta: pledge.received,
                });
            }
            folded.needs.push(updated);
        }
        folded
    }

    /// `100 * sum(received_total) / sum(amount)`, or `0` if nothing is required.
    #[must_use]
    pub fn completion_percentage(needs: &[Need]) -> f64 {
        let required: f64 = needs.iter().map(|n| n.amount).sum();
        if required <= 0.0 {
            return 0.0;
        }
        let received: f64 = needs.iter().map(|n| n.received_total).sum();
        received * 100.0 / required
    }

    /// Share of a transaction's pledge copies that are fully received, in percent.
    #[must_use]
    pub fn pledge_percentage(transaction_needs: &[Need]) -> f64 {
        if transaction_needs.is_empty() {
            return 0.0;
        }
        let fulfilled = transaction_needs
            .iter()
            .filter(|n| n.received >= n.amount)
            .count();
        #[allow(clippy::cast_precision_loss)]
        let share = fulfilled as f64 * 100.0 / transaction_needs.len() as f64;
        share
    }

    /// `true` if there is at least one need and each has `received_total >= amount`.
    #[must_use]
    pub fn all_satisfied(needs: &[Need]) -> bool {
        !needs.is_empty() && needs.iter().all(|n| n.received_total >= n.amount)
    }

    /// Applies responder pledges to the transaction's own need copies.
    ///
    /// Returns only the copies that changed.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Validation`] if a quantity is negative or not
    /// finite, or if a pledge names a need outside the transaction.
    pub fn apply_pledges(
        transaction_needs: &[Need],
        pledges: &[NeedPledge],
    ) -> Result<Vec<Need>, BrokerError> {
        let mut by_id: HashMap<_, Need> = transaction_needs
            .iter()
            .map(|n| (n.id, n.clone()))
            .collect();
        let mut touched = Vec::new();

        for pledge in pledges {
            if !pledge.received.is_finite() || pledge.received < 0.0 {
                return Err(BrokerError::Validation(format!(
                    "received quantity for need {} must be a non-negative number",
                    pledge.need_id
                )));
            }
            let need = by_id.get_mut(&pledge.need_id).ok_or_else(|| {
                BrokerError::Validation(format!(
                    "need {} does not belong to this transaction",
                    pledge.need_id
                ))
            })?;
            need.received = pledge.received;
            if !touched.contains(&pledge.need_id) {
                touched.push(pledge.need_id);
            }
        }

        Ok(touched
            .into_iter()
            .filter_map(|id| by_id.remove(&id))
            .collect())
    }

    fn matching_pledge<'a>(need: &Need, transaction_needs: &'a [Need]) -> Option<&'a Need> {
        transaction_needs.iter().find(|t| t.same_requirement(need))
    }
}
