//! Core domain enums shared across the platform.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one billing cycle in the ledger.
///
/// `Active`, `PastDue` and `Paused` are the live states: a mentor has at
/// most one cycle in a live state at any time. `Superseded`, `Cancelled`
/// and `Expired` are terminal — a cycle never leaves a terminal state;
/// renewal creates a new row instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Active,
    PastDue,
    Paused,
    Superseded,
    Cancelled,
    Expired,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Active => "active",
            CycleStatus::PastDue => "past_due",
            CycleStatus::Paused => "paused",
            CycleStatus::Superseded => "superseded",
            CycleStatus::Cancelled => "cancelled",
            CycleStatus::Expired => "expired",
        }
    }

    /// Live states keep the mentor's subscription slot occupied.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            CycleStatus::Active | CycleStatus::PastDue | CycleStatus::Paused
        )
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CycleStatus::Superseded | CycleStatus::Cancelled | CycleStatus::Expired
        )
    }

    /// Whether the state machine permits moving from `self` to `to`.
    ///
    /// Mirrors the transition table: terminal states admit nothing;
    /// `paused` only resumes to `active`; everything else follows the
    /// webhook/admin triggers.
    pub fn can_transition_to(&self, to: CycleStatus) -> bool {
        match (self, to) {
            (CycleStatus::Active, CycleStatus::PastDue) => true,
            (CycleStatus::PastDue, CycleStatus::Active) => true,
            (CycleStatus::Active | CycleStatus::PastDue, CycleStatus::Superseded) => true,
            (CycleStatus::Active | CycleStatus::PastDue, CycleStatus::Expired) => true,
            (CycleStatus::Active | CycleStatus::PastDue, CycleStatus::Cancelled) => true,
            (CycleStatus::Active, CycleStatus::Paused) => true,
            (CycleStatus::Paused, CycleStatus::Active) => true,
            (CycleStatus::Paused, CycleStatus::Expired) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CycleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CycleStatus::Active),
            "past_due" => Ok(CycleStatus::PastDue),
            "paused" => Ok(CycleStatus::Paused),
            "superseded" => Ok(CycleStatus::Superseded),
            "cancelled" => Ok(CycleStatus::Cancelled),
            "expired" => Ok(CycleStatus::Expired),
            other => Err(format!("unknown cycle status: {other}")),
        }
    }
}

impl TryFrom<String> for CycleStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Billing cadence of a plan, snapshotted onto each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
    #[default]
    Monthly,
    Annual,
}

impl BillingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPeriod::Monthly => "monthly",
            BillingPeriod::Annual => "annual",
        }
    }
}

impl std::fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BillingPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" | "month" => Ok(BillingPeriod::Monthly),
            "annual" | "yearly" | "year" => Ok(BillingPeriod::Annual),
            other => Err(format!("unknown billing period: {other}")),
        }
    }
}

impl TryFrom<String> for BillingPeriod {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_admit_no_transition() {
        for from in [
            CycleStatus::Superseded,
            CycleStatus::Cancelled,
            CycleStatus::Expired,
        ] {
            for to in [
                CycleStatus::Active,
                CycleStatus::PastDue,
                CycleStatus::Paused,
                CycleStatus::Superseded,
                CycleStatus::Cancelled,
                CycleStatus::Expired,
            ] {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be denied");
            }
        }
    }

    #[test]
    fn past_due_recovers_to_active() {
        assert!(CycleStatus::PastDue.can_transition_to(CycleStatus::Active));
        assert!(CycleStatus::Active.can_transition_to(CycleStatus::PastDue));
    }

    #[test]
    fn paused_only_resumes_or_expires() {
        assert!(CycleStatus::Paused.can_transition_to(CycleStatus::Active));
        assert!(CycleStatus::Paused.can_transition_to(CycleStatus::Expired));
        assert!(!CycleStatus::Paused.can_transition_to(CycleStatus::PastDue));
        assert!(!CycleStatus::Paused.can_transition_to(CycleStatus::Superseded));
    }

    #[test]
    fn live_and_terminal_partition() {
        for status in [
            CycleStatus::Active,
            CycleStatus::PastDue,
            CycleStatus::Paused,
        ] {
            assert!(status.is_live());
            assert!(!status.is_terminal());
        }
        for status in [
            CycleStatus::Superseded,
            CycleStatus::Cancelled,
            CycleStatus::Expired,
        ] {
            assert!(status.is_terminal());
            assert!(!status.is_live());
        }
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            CycleStatus::Active,
            CycleStatus::PastDue,
            CycleStatus::Paused,
            CycleStatus::Superseded,
            CycleStatus::Cancelled,
            CycleStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<CycleStatus>(), Ok(status));
        }
        assert!("bogus".parse::<CycleStatus>().is_err());
    }
}
