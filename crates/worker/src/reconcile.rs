//! Stripe reconciliation sweep
//!
//! Safety net for lost webhooks: for every cycle the ledger believes is
//! live, fetch the canonical subscription from Stripe and repair local
//! state on mismatch. A fetch failure for one cycle is logged and skipped
//! so the rest of the sweep still runs.

use mentorsub_billing::{Cycle, Ledger, StripeClient};
use mentorsub_shared::CycleStatus;
use sqlx::PgPool;
use stripe::{Subscription, SubscriptionId, SubscriptionStatus};
use tracing::{error, info};

use mentorsub_billing::{BillingError, BillingResult};

/// What the sweep did for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairAction {
    /// Stripe reports the subscription terminated or unpaid; local cycle
    /// expired.
    Expired,
    /// Stripe reports payment failed; local active cycle marked past_due.
    MarkedPastDue,
    /// Stripe reports the subscription healthy; local past_due cycle
    /// restored to active.
    Recovered,
    /// Local and remote already agree.
    Untouched,
}

/// Totals for one sweep run.
#[derive(Debug, Default, Clone)]
pub struct ReconcileSummary {
    pub checked: usize,
    pub expired: usize,
    pub marked_past_due: usize,
    pub recovered: usize,
    pub untouched: usize,
    pub errors: usize,
}

/// Periodic drift repair against the Stripe system of record.
#[derive(Clone)]
pub struct Reconciler {
    stripe: StripeClient,
    ledger: Ledger,
}

impl Reconciler {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        let ledger = Ledger::new(stripe.clone(), pool);
        Self { stripe, ledger }
    }

    /// Sweep every live cycle once.
    pub async fn run(&self) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        let cycles = match self.ledger.live_cycles().await {
            Ok(cycles) => cycles,
            Err(e) => {
                error!(error = %e, "Failed to load live cycles for reconciliation");
                return summary;
            }
        };

        summary.checked = cycles.len();

        for cycle in cycles {
            match self.reconcile_cycle(&cycle).await {
                Ok(RepairAction::Expired) => summary.expired += 1,
                Ok(RepairAction::MarkedPastDue) => summary.marked_past_due += 1,
                Ok(RepairAction::Recovered) => summary.recovered += 1,
                Ok(RepairAction::Untouched) => summary.untouched += 1,
                Err(e) => {
                    // One broken cycle must not abort the sweep.
                    error!(
                        cycle_id = %cycle.id,
                        stripe_subscription_id = %cycle.stripe_subscription_id,
                        error = %e,
                        "Failed to reconcile cycle - skipping"
                    );
                    summary.errors += 1;
                }
            }
        }

        info!(
            checked = summary.checked,
            expired = summary.expired,
            marked_past_due = summary.marked_past_due,
            recovered = summary.recovered,
            untouched = summary.untouched,
            errors = summary.errors,
            "Reconciliation sweep complete"
        );

        summary
    }

    async fn reconcile_cycle(&self, cycle: &Cycle) -> BillingResult<RepairAction> {
        let sub_id = cycle
            .stripe_subscription_id
            .parse::<SubscriptionId>()
            .map_err(|e| {
                BillingError::InvalidInput(format!(
                    "invalid Stripe subscription id {}: {e}",
                    cycle.stripe_subscription_id
                ))
            })?;

        let remote = Subscription::retrieve(self.stripe.inner(), &sub_id, &[]).await?;

        let action = Self::plan_repair(cycle.status, remote.status);
        match action {
            RepairAction::Expired => {
                info!(
                    cycle_id = %cycle.id,
                    remote_status = ?remote.status,
                    "Stripe reports subscription terminated - expiring local cycle"
                );
                self.ledger.expire(cycle.id).await?;
            }
            RepairAction::MarkedPastDue => {
                info!(
                    cycle_id = %cycle.id,
                    "Stripe reports payment failed - marking cycle past_due"
                );
                self.ledger
                    .mark_past_due(&cycle.stripe_subscription_id)
                    .await?;
            }
            RepairAction::Recovered => {
                info!(
                    cycle_id = %cycle.id,
                    "Stripe reports subscription healthy - restoring cycle to active"
                );
                self.ledger
                    .mark_recovered(&cycle.stripe_subscription_id)
                    .await?;
            }
            RepairAction::Untouched => {}
        }

        Ok(action)
    }

    /// Pure mapping from (local, remote) status to the repair to apply.
    /// Any combination not listed is already consistent and left alone.
    /// Payment-state flapping is ignored for paused cycles — pause is an
    /// admin-owned state; only termination overrides it.
    fn plan_repair(local: CycleStatus, remote: SubscriptionStatus) -> RepairAction {
        match (local, remote) {
            (
                local,
                SubscriptionStatus::Canceled
                | SubscriptionStatus::IncompleteExpired
                | SubscriptionStatus::Unpaid,
            ) if local.is_live() => RepairAction::Expired,
            (CycleStatus::Active, SubscriptionStatus::PastDue) => RepairAction::MarkedPastDue,
            (CycleStatus::PastDue, SubscriptionStatus::Active | SubscriptionStatus::Trialing) => {
                RepairAction::Recovered
            }
            _ => RepairAction::Untouched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminated_remote_expires_any_live_local() {
        for local in [
            CycleStatus::Active,
            CycleStatus::PastDue,
            CycleStatus::Paused,
        ] {
            assert_eq!(
                Reconciler::plan_repair(local, SubscriptionStatus::Canceled),
                RepairAction::Expired
            );
            assert_eq!(
                Reconciler::plan_repair(local, SubscriptionStatus::Unpaid),
                RepairAction::Expired
            );
        }
    }

    #[test]
    fn payment_failure_only_touches_active() {
        assert_eq!(
            Reconciler::plan_repair(CycleStatus::Active, SubscriptionStatus::PastDue),
            RepairAction::MarkedPastDue
        );
        // Paused cycles keep their admin-owned state.
        assert_eq!(
            Reconciler::plan_repair(CycleStatus::Paused, SubscriptionStatus::PastDue),
            RepairAction::Untouched
        );
    }

    #[test]
    fn healthy_remote_recovers_past_due() {
        assert_eq!(
            Reconciler::plan_repair(CycleStatus::PastDue, SubscriptionStatus::Active),
            RepairAction::Recovered
        );
        assert_eq!(
            Reconciler::plan_repair(CycleStatus::PastDue, SubscriptionStatus::Trialing),
            RepairAction::Recovered
        );
    }

    #[test]
    fn consistent_states_untouched() {
        assert_eq!(
            Reconciler::plan_repair(CycleStatus::Active, SubscriptionStatus::Active),
            RepairAction::Untouched
        );
        assert_eq!(
            Reconciler::plan_repair(CycleStatus::PastDue, SubscriptionStatus::PastDue),
            RepairAction::Untouched
        );
        assert_eq!(
            Reconciler::plan_repair(CycleStatus::Paused, SubscriptionStatus::Active),
            RepairAction::Untouched
        );
    }
}
