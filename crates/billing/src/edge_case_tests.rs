// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Billing System
//!
//! Tests critical boundary conditions in:
//! - Pricing override resolution (SUB-P01 to SUB-P06)
//! - Cycle state machine (SUB-C01 to SUB-C05)
//! - Seat capacity (SUB-S01 to SUB-S04)
//! - Webhook verification (SUB-W01 to SUB-W03)

#[cfg(test)]
mod pricing_edge_tests {
    use crate::pricing::{Plan, PlanOverride, ResolvedPricing};
    use mentorsub_shared::BillingPeriod;
    use time::{Duration, OffsetDateTime};
    use uuid::Uuid;

    fn basic_plan() -> Plan {
        Plan {
            id: Uuid::new_v4(),
            name: "Basic".to_string(),
            billing_period: BillingPeriod::Monthly,
            price_cents: 2999,
            default_seat_limit: 3,
            stripe_price_id: "price_basic".to_string(),
            is_active: true,
        }
    }

    fn open_override(plan: &Plan) -> PlanOverride {
        PlanOverride {
            id: Uuid::new_v4(),
            mentor_id: Uuid::new_v4(),
            plan_id: plan.id,
            price_cents_override: None,
            seat_limit_override: None,
            stripe_price_id_override: None,
            valid_from: OffsetDateTime::now_utc() - Duration::days(30),
            valid_until: None,
        }
    }

    // =========================================================================
    // SUB-P01: Seat limit override with null price inherits the plan price
    // =========================================================================
    #[test]
    fn test_partial_override_inherits_remaining_fields() {
        let plan = basic_plan();
        let mut ovr = open_override(&plan);
        ovr.seat_limit_override = Some(10);

        let resolved = ResolvedPricing::from_parts(&plan, Some(&ovr));
        assert_eq!(resolved.price_cents, plan.price_cents, "price must inherit");
        assert_eq!(resolved.seat_limit, 10, "limit must come from override");
    }

    // =========================================================================
    // SUB-P02: Override with valid_until in the past is not effective
    // =========================================================================
    #[test]
    fn test_expired_override_not_effective() {
        let plan = basic_plan();
        let mut ovr = open_override(&plan);
        ovr.valid_until = Some(OffsetDateTime::now_utc() - Duration::days(1));

        assert!(!ovr.is_effective_at(OffsetDateTime::now_utc()));
    }

    // =========================================================================
    // SUB-P03: Override effective exactly at valid_until (inclusive bound)
    // =========================================================================
    #[test]
    fn test_override_effective_at_valid_until_instant() {
        let plan = basic_plan();
        let now = OffsetDateTime::now_utc();
        let mut ovr = open_override(&plan);
        ovr.valid_until = Some(now);

        assert!(ovr.is_effective_at(now));
        assert!(!ovr.is_effective_at(now + Duration::seconds(1)));
    }

    // =========================================================================
    // SUB-P04: Override not yet valid is not effective
    // =========================================================================
    #[test]
    fn test_future_override_not_effective() {
        let plan = basic_plan();
        let mut ovr = open_override(&plan);
        ovr.valid_from = OffsetDateTime::now_utc() + Duration::days(1);

        assert!(!ovr.is_effective_at(OffsetDateTime::now_utc()));
    }

    // =========================================================================
    // SUB-P05: Open-ended override (valid_until null) stays effective
    // =========================================================================
    #[test]
    fn test_open_ended_override_effective() {
        let plan = basic_plan();
        let ovr = open_override(&plan);

        assert!(ovr.is_effective_at(OffsetDateTime::now_utc() + Duration::days(3650)));
    }

    // =========================================================================
    // SUB-P06: Ineffective override means plan defaults (caller passes None)
    // =========================================================================
    #[test]
    fn test_no_effective_override_falls_back_to_defaults() {
        let plan = basic_plan();
        let resolved = ResolvedPricing::from_parts(&plan, None);
        assert_eq!(resolved.price_cents, 2999);
        assert_eq!(resolved.seat_limit, 3);
        assert!(resolved.override_id.is_none());
    }
}

#[cfg(test)]
mod state_machine_tests {
    use mentorsub_shared::CycleStatus;

    // =========================================================================
    // SUB-C01: Terminated webhook after admin immediate-cancel — the
    // cancelled cycle must not be expirable
    // =========================================================================
    #[test]
    fn test_cancelled_cycle_cannot_expire() {
        assert!(!CycleStatus::Cancelled.can_transition_to(CycleStatus::Expired));
    }

    // =========================================================================
    // SUB-C02: A superseded cycle never becomes live again
    // =========================================================================
    #[test]
    fn test_superseded_is_terminal() {
        assert!(CycleStatus::Superseded.is_terminal());
        assert!(!CycleStatus::Superseded.can_transition_to(CycleStatus::Active));
    }

    // =========================================================================
    // SUB-C03: Renewal supersedes both active and past_due cycles
    // =========================================================================
    #[test]
    fn test_renewal_supersedes_live_payment_states() {
        assert!(CycleStatus::Active.can_transition_to(CycleStatus::Superseded));
        assert!(CycleStatus::PastDue.can_transition_to(CycleStatus::Superseded));
    }

    // =========================================================================
    // SUB-C04: Pause only applies to strictly-active cycles
    // =========================================================================
    #[test]
    fn test_only_active_can_pause() {
        assert!(CycleStatus::Active.can_transition_to(CycleStatus::Paused));
        assert!(!CycleStatus::PastDue.can_transition_to(CycleStatus::Paused));
        assert!(!CycleStatus::Expired.can_transition_to(CycleStatus::Paused));
    }

    // =========================================================================
    // SUB-C05: Payment failure and recovery round-trip
    // =========================================================================
    #[test]
    fn test_past_due_round_trip() {
        assert!(CycleStatus::Active.can_transition_to(CycleStatus::PastDue));
        assert!(CycleStatus::PastDue.can_transition_to(CycleStatus::Active));
    }
}

#[cfg(test)]
mod capacity_tests {
    use crate::seats::SeatDenial;

    // =========================================================================
    // SUB-S01: Count at limit denies; count below limit allows
    // =========================================================================
    #[test]
    fn test_capacity_boundary() {
        let limit: i32 = 3;

        // 3 active of 3 — full.
        assert!(3i64 >= limit as i64);
        // 2 active of 3 — one seat free.
        assert!(2i64 < limit as i64);
    }

    // =========================================================================
    // SUB-S02: Zero limit denies the first activation
    // =========================================================================
    #[test]
    fn test_zero_limit_denies_first_seat() {
        let limit: i32 = 0;
        assert!(0i64 >= limit as i64, "zero-limit cycle admits no seats");
    }

    // =========================================================================
    // SUB-S03: Denial reasons map to stable wire strings
    // =========================================================================
    #[test]
    fn test_denial_reason_wire_strings() {
        assert_eq!(SeatDenial::NoSubscription.as_str(), "no_subscription");
        assert_eq!(SeatDenial::LimitReached.as_str(), "limit_reached");
        assert_eq!(SeatDenial::AlreadyMentored.as_str(), "already_mentored");
        assert_eq!(SeatDenial::MenteeNotFound.as_str(), "mentee_not_found");
        assert_eq!(SeatDenial::SeatNotFound.as_str(), "seat_not_found");
    }

    // =========================================================================
    // SUB-S04: Raised limit admits previously denied seats
    // =========================================================================
    #[test]
    fn test_raised_limit_admits_more_seats() {
        let active: i64 = 3;
        assert!(active >= 3, "full at the default limit");
        assert!(active < 10, "an override to 10 opens seats");
    }
}

#[cfg(test)]
mod webhook_tests {
    // =========================================================================
    // SUB-W01: Signature tolerance is 5 minutes
    // =========================================================================
    #[test]
    fn test_webhook_timestamp_tolerance() {
        let tolerance_seconds = 300;

        assert!(300 <= tolerance_seconds, "300s should be within tolerance");
        assert!(301 > tolerance_seconds, "301s should exceed tolerance");
    }

    // =========================================================================
    // SUB-W02: Exactly the handled event set
    // =========================================================================
    #[test]
    fn test_known_event_types() {
        // Handlers exist for these; everything else is logged and ignored.
        let known_types = [
            "checkout.session.completed",
            "invoice.paid",
            "invoice.payment_failed",
            "customer.subscription.deleted",
        ];

        assert_eq!(known_types.len(), 4, "4 known event types");
    }

    // =========================================================================
    // SUB-W03: Stuck-processing recovery window is 30 minutes
    // =========================================================================
    #[test]
    fn test_processing_timeout_window() {
        let timeout_minutes = 30;
        assert!(29 < timeout_minutes, "29 minutes is still claimed");
        assert!(31 > timeout_minutes, "31 minutes is re-claimable");
    }
}
