//! Pricing resolution
//!
//! Resolves the effective price, seat limit and Stripe price id for a
//! (mentor, plan) pair by applying the override chain: plan defaults
//! first, then the single currently-effective per-mentor override, field
//! by field where the override field is non-null.
//!
//! Resolution is a read-only function of table state at a point in time.
//! It must be re-run at every renewal — the effective override can change
//! between cycles even when the plan does not.

use mentorsub_shared::BillingPeriod;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// A sellable subscription plan. Immutable once referenced by a cycle;
/// edits only affect cycles created afterwards.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    #[sqlx(try_from = "String")]
    pub billing_period: BillingPeriod,
    pub price_cents: i64,
    pub default_seat_limit: i32,
    pub stripe_price_id: String,
    pub is_active: bool,
}

/// A time-windowed per-mentor exception to plan defaults.
///
/// A null field means "inherit the plan default", never "zero".
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PlanOverride {
    pub id: Uuid,
    pub mentor_id: Uuid,
    pub plan_id: Uuid,
    pub price_cents_override: Option<i64>,
    pub seat_limit_override: Option<i32>,
    pub stripe_price_id_override: Option<String>,
    pub valid_from: OffsetDateTime,
    pub valid_until: Option<OffsetDateTime>,
}

impl PlanOverride {
    /// Whether this override is effective at `as_of`. Mirrors the window
    /// predicate the resolver's SQL applies: `valid_from <= as_of` and
    /// `valid_until` absent or `>= as_of`.
    pub fn is_effective_at(&self, as_of: OffsetDateTime) -> bool {
        self.valid_from <= as_of && self.valid_until.is_none_or(|until| until >= as_of)
    }
}

/// The terms to snapshot onto a cycle at creation or renewal time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPricing {
    pub price_cents: i64,
    pub seat_limit: i32,
    pub stripe_price_id: String,
    pub billing_period: BillingPeriod,
    /// Provenance: the override that shaped these terms, if any.
    pub override_id: Option<Uuid>,
}

impl ResolvedPricing {
    /// Merge plan defaults with an optional override, field by field.
    pub fn from_parts(plan: &Plan, ovr: Option<&PlanOverride>) -> Self {
        let mut resolved = Self {
            price_cents: plan.price_cents,
            seat_limit: plan.default_seat_limit,
            stripe_price_id: plan.stripe_price_id.clone(),
            billing_period: plan.billing_period,
            override_id: None,
        };

        if let Some(ovr) = ovr {
            resolved.override_id = Some(ovr.id);
            if let Some(price) = ovr.price_cents_override {
                resolved.price_cents = price;
            }
            if let Some(limit) = ovr.seat_limit_override {
                resolved.seat_limit = limit;
            }
            if let Some(ref price_id) = ovr.stripe_price_id_override {
                resolved.stripe_price_id = price_id.clone();
            }
        }

        resolved
    }
}

/// Resolves effective subscription pricing by applying the override chain.
#[derive(Clone)]
pub struct PricingResolver {
    pool: PgPool,
}

impl PricingResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load a plan by id.
    pub async fn plan(&self, plan_id: Uuid) -> BillingResult<Plan> {
        let plan: Option<Plan> = sqlx::query_as(
            r#"
            SELECT id, name, billing_period, price_cents, default_seat_limit,
                   stripe_price_id, is_active
            FROM plans
            WHERE id = $1
            "#,
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?;

        plan.ok_or(BillingError::PlanNotFound(plan_id))
    }

    /// Resolve effective pricing for a mentor on a plan as of `as_of`.
    pub async fn resolve(
        &self,
        mentor_id: Uuid,
        plan_id: Uuid,
        as_of: OffsetDateTime,
    ) -> BillingResult<ResolvedPricing> {
        let plan = self.plan(plan_id).await?;

        let ovr: Option<PlanOverride> = sqlx::query_as(
            r#"
            SELECT id, mentor_id, plan_id, price_cents_override, seat_limit_override,
                   stripe_price_id_override, valid_from, valid_until
            FROM plan_overrides
            WHERE mentor_id = $1
              AND plan_id = $2
              AND valid_from <= $3
              AND (valid_until IS NULL OR valid_until >= $3)
            ORDER BY valid_from DESC
            LIMIT 1
            "#,
        )
        .bind(mentor_id)
        .bind(plan_id)
        .bind(as_of)
        .fetch_optional(&self.pool)
        .await?;

        let resolved = ResolvedPricing::from_parts(&plan, ovr.as_ref());

        tracing::debug!(
            mentor_id = %mentor_id,
            plan_id = %plan_id,
            price_cents = resolved.price_cents,
            seat_limit = resolved.seat_limit,
            override_id = ?resolved.override_id,
            "Resolved pricing"
        );

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn plan() -> Plan {
        Plan {
            id: Uuid::new_v4(),
            name: "Basic".to_string(),
            billing_period: BillingPeriod::Monthly,
            price_cents: 2999,
            default_seat_limit: 3,
            stripe_price_id: "price_basic_monthly".to_string(),
            is_active: true,
        }
    }

    fn override_for(plan: &Plan) -> PlanOverride {
        PlanOverride {
            id: Uuid::new_v4(),
            mentor_id: Uuid::new_v4(),
            plan_id: plan.id,
            price_cents_override: None,
            seat_limit_override: None,
            stripe_price_id_override: None,
            valid_from: OffsetDateTime::now_utc() - Duration::days(1),
            valid_until: None,
        }
    }

    #[test]
    fn no_override_yields_plan_defaults() {
        let plan = plan();
        let resolved = ResolvedPricing::from_parts(&plan, None);
        assert_eq!(resolved.price_cents, 2999);
        assert_eq!(resolved.seat_limit, 3);
        assert_eq!(resolved.stripe_price_id, "price_basic_monthly");
        assert_eq!(resolved.override_id, None);
    }

    #[test]
    fn null_override_fields_inherit_defaults() {
        // seat_limit_override=10, everything else null: price stays at the
        // plan default while the limit is raised.
        let plan = plan();
        let mut ovr = override_for(&plan);
        ovr.seat_limit_override = Some(10);

        let resolved = ResolvedPricing::from_parts(&plan, Some(&ovr));
        assert_eq!(resolved.price_cents, 2999);
        assert_eq!(resolved.seat_limit, 10);
        assert_eq!(resolved.stripe_price_id, "price_basic_monthly");
        assert_eq!(resolved.override_id, Some(ovr.id));
    }

    #[test]
    fn all_fields_overridable() {
        let plan = plan();
        let mut ovr = override_for(&plan);
        ovr.price_cents_override = Some(999);
        ovr.seat_limit_override = Some(25);
        ovr.stripe_price_id_override = Some("price_custom".to_string());

        let resolved = ResolvedPricing::from_parts(&plan, Some(&ovr));
        assert_eq!(resolved.price_cents, 999);
        assert_eq!(resolved.seat_limit, 25);
        assert_eq!(resolved.stripe_price_id, "price_custom");
    }

    #[test]
    fn zero_override_is_not_null() {
        // A zero price override means "free", not "inherit".
        let plan = plan();
        let mut ovr = override_for(&plan);
        ovr.price_cents_override = Some(0);

        let resolved = ResolvedPricing::from_parts(&plan, Some(&ovr));
        assert_eq!(resolved.price_cents, 0);
    }

    #[test]
    fn merge_is_deterministic() {
        let plan = plan();
        let mut ovr = override_for(&plan);
        ovr.seat_limit_override = Some(7);

        let a = ResolvedPricing::from_parts(&plan, Some(&ovr));
        let b = ResolvedPricing::from_parts(&plan, Some(&ovr));
        assert_eq!(a, b);
    }
}
