#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Integration tests for the subscription cycle lifecycle
//!
//! These tests exercise the ledger, seat manager and notification dedup
//! against a real Postgres database. They cover the invariants the
//! system promises: one live cycle per mentor, atomic renewal, idempotent
//! event handling, capacity enforcement under concurrency, and scoped
//! seat deactivation on expiry.
//!
//! ## Running Tests
//! ```bash
//! export DATABASE_URL="postgres://localhost/mentorsub_test"
//! cargo test --test lifecycle -- --ignored --test-threads=1
//! ```

use mentorsub_billing::{
    AddMenteeOutcome, BillingResult, CapacityGuard, Ledger, NewCycle, NotificationLog, Notifier,
    SeatDenial, StripeClient, StripeConfig, NOTIFICATION_TYPE_EXPIRY,
};
use mentorsub_shared::{BillingPeriod, CycleStatus};
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

// ============================================================================
// Test Utilities
// ============================================================================

/// Connect to the test database. Stripe is configured with dummy keys —
/// none of the paths under test talk to the Stripe API.
async fn setup() -> (Ledger, CapacityGuard, PgPool) {
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database");

    let stripe = StripeClient::new(StripeConfig {
        secret_key: "sk_test_dummy".to_string(),
        webhook_secret: "whsec_test_dummy".to_string(),
        app_base_url: "http://localhost:3000".to_string(),
    });

    let ledger = Ledger::new(stripe, pool.clone());
    let seats = CapacityGuard::new(pool.clone(), Notifier::from_env());
    (ledger, seats, pool)
}

async fn create_test_user(pool: &PgPool) -> Uuid {
    let user_id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, email, full_name) VALUES ($1, $2, $3)")
        .bind(user_id)
        .bind(format!("user-{user_id}@example.com"))
        .bind("Test User")
        .execute(pool)
        .await
        .expect("Failed to create test user");
    user_id
}

async fn create_test_plan(pool: &PgPool, seat_limit: i32) -> Uuid {
    let plan_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO plans (id, name, billing_period, price_cents, default_seat_limit, stripe_price_id)
        VALUES ($1, 'Basic', 'monthly', 2999, $2, 'price_test_basic')
        "#,
    )
    .bind(plan_id)
    .bind(seat_limit)
    .execute(pool)
    .await
    .expect("Failed to create test plan");
    plan_id
}

fn new_cycle(mentor_id: Uuid, plan_id: Uuid, seat_limit: i32) -> NewCycle {
    let now = OffsetDateTime::now_utc();
    NewCycle {
        mentor_id,
        plan_id,
        override_id: None,
        billed_price_cents: 2999,
        billed_seat_limit: seat_limit,
        billing_period: BillingPeriod::Monthly,
        stripe_subscription_id: format!("sub_test_{}", Uuid::new_v4().simple()),
        stripe_customer_id: format!("cus_test_{}", Uuid::new_v4().simple()),
        stripe_invoice_id: None,
        stripe_price_id: "price_test_basic".to_string(),
        period_start: now,
        period_end: now + Duration::days(30),
    }
}

async fn count_cycles(pool: &PgPool, mentor_id: Uuid) -> i64 {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM subscription_cycles WHERE mentor_id = $1")
            .bind(mentor_id)
            .fetch_one(pool)
            .await
            .unwrap();
    count
}

async fn active_seat_count(pool: &PgPool, mentor_id: Uuid) -> i64 {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM mentees WHERE mentor_id = $1 AND is_active")
            .bind(mentor_id)
            .fetch_one(pool)
            .await
            .unwrap();
    count
}

// ============================================================================
// Ledger: single live cycle and renewal atomicity
// ============================================================================

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn at_most_one_live_cycle_per_mentor() -> BillingResult<()> {
    let (ledger, _, pool) = setup().await;
    let mentor = create_test_user(&pool).await;
    let plan = create_test_plan(&pool, 3).await;

    let first = ledger.create_cycle(new_cycle(mentor, plan, 3)).await?;
    let second = ledger.renew(first.id, new_cycle(mentor, plan, 3)).await?;

    let (live,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM subscription_cycles
        WHERE mentor_id = $1 AND status IN ('active', 'past_due', 'paused')
        "#,
    )
    .bind(mentor)
    .fetch_one(&pool)
    .await?;

    assert_eq!(live, 1, "exactly one live cycle after renewal");
    assert_eq!(ledger.by_id(first.id).await?.status, CycleStatus::Superseded);
    assert_eq!(ledger.by_id(second.id).await?.status, CycleStatus::Active);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn renew_is_all_or_nothing() -> BillingResult<()> {
    let (ledger, _, pool) = setup().await;
    let mentor = create_test_user(&pool).await;
    let plan = create_test_plan(&pool, 3).await;

    let cycle = ledger.create_cycle(new_cycle(mentor, plan, 3)).await?;
    ledger.expire(cycle.id).await?;

    // The previous cycle is terminal, so the supersede step fails and the
    // insert must roll back with it: no new row, no half-applied state.
    let before = count_cycles(&pool, mentor).await;
    let result = ledger.renew(cycle.id, new_cycle(mentor, plan, 3)).await;
    assert!(result.is_err(), "renewing a terminal cycle must fail");
    assert_eq!(count_cycles(&pool, mentor).await, before, "no partial insert");

    assert_eq!(ledger.by_id(cycle.id).await?.status, CycleStatus::Expired);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn history_is_newest_first() -> BillingResult<()> {
    let (ledger, _, pool) = setup().await;
    let mentor = create_test_user(&pool).await;
    let plan = create_test_plan(&pool, 3).await;

    let first = ledger.create_cycle(new_cycle(mentor, plan, 3)).await?;
    let second = ledger.renew(first.id, new_cycle(mentor, plan, 3)).await?;

    let history = ledger.history_of(mentor).await?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, second.id, "newest cycle first");
    assert_eq!(history[1].id, first.id);
    Ok(())
}

// ============================================================================
// Webhook idempotency gates (ledger level)
// ============================================================================

#[tokio::test]
#[ignore]
async fn duplicate_invoice_produces_one_renewal() -> BillingResult<()> {
    let (ledger, _, pool) = setup().await;
    let mentor = create_test_user(&pool).await;
    let plan = create_test_plan(&pool, 3).await;

    let first = ledger.create_cycle(new_cycle(mentor, plan, 3)).await?;

    let invoice_id = format!("in_test_{}", Uuid::new_v4().simple());
    let mut renewal = new_cycle(mentor, plan, 3);
    renewal.stripe_invoice_id = Some(invoice_id.clone());
    renewal.stripe_subscription_id = first.stripe_subscription_id.clone();

    // First delivery renews; the redelivery stops at the invoice gate the
    // way the webhook handler does.
    assert!(!ledger.invoice_already_processed(&invoice_id).await?);
    ledger.renew(first.id, renewal).await?;
    assert!(ledger.invoice_already_processed(&invoice_id).await?);

    assert_eq!(count_cycles(&pool, mentor).await, 2, "exactly one renewal");
    Ok(())
}

#[tokio::test]
#[ignore]
async fn invoice_before_checkout_finds_no_active_cycle() -> BillingResult<()> {
    let (ledger, _, _pool) = setup().await;

    // An invoice.paid that arrives before checkout completion (network
    // reordering) finds nothing to renew and the handler no-ops.
    let unknown = format!("sub_test_{}", Uuid::new_v4().simple());
    assert!(ledger
        .find_active_by_stripe_subscription(&unknown)
        .await?
        .is_none());
    Ok(())
}

#[tokio::test]
#[ignore]
async fn payment_failure_transitions_only_active_cycles() -> BillingResult<()> {
    let (ledger, _, pool) = setup().await;
    let mentor = create_test_user(&pool).await;
    let plan = create_test_plan(&pool, 3).await;

    let cycle = ledger.create_cycle(new_cycle(mentor, plan, 3)).await?;
    let sub_id = cycle.stripe_subscription_id.clone();

    assert!(ledger.mark_past_due(&sub_id).await?, "active -> past_due");
    assert!(
        !ledger.mark_past_due(&sub_id).await?,
        "second failure is a no-op transition"
    );
    assert_eq!(ledger.by_id(cycle.id).await?.status, CycleStatus::PastDue);

    assert!(ledger.mark_recovered(&sub_id).await?, "past_due -> active");
    assert!(!ledger.mark_recovered(&sub_id).await?);
    assert_eq!(ledger.by_id(cycle.id).await?.status, CycleStatus::Active);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn terminated_after_admin_cancel_is_a_noop() -> BillingResult<()> {
    let (ledger, _, pool) = setup().await;
    let mentor = create_test_user(&pool).await;
    let plan = create_test_plan(&pool, 3).await;

    let cycle = ledger.create_cycle(new_cycle(mentor, plan, 3)).await?;

    // Reflect an admin-initiated immediate cancellation locally (the
    // Stripe call itself is out of scope here).
    sqlx::query(
        r#"
        UPDATE subscription_cycles
        SET status = 'cancelled', cancelled_at = NOW(), updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(cycle.id)
    .execute(&pool)
    .await?;

    // The late terminated webhook finds no live cycle...
    assert!(ledger
        .find_live_by_stripe_subscription(&cycle.stripe_subscription_id)
        .await?
        .is_none());

    // ...and a direct expire call leaves the cancelled status untouched.
    ledger.expire(cycle.id).await?;
    assert_eq!(ledger.by_id(cycle.id).await?.status, CycleStatus::Cancelled);
    Ok(())
}

// ============================================================================
// Expiry: seat scoping
// ============================================================================

#[tokio::test]
#[ignore]
async fn expire_deactivates_only_this_mentors_seats() -> BillingResult<()> {
    let (ledger, seats, pool) = setup().await;
    let plan = create_test_plan(&pool, 3).await;

    let mentor_a = create_test_user(&pool).await;
    let mentor_b = create_test_user(&pool).await;
    let cycle_a = ledger.create_cycle(new_cycle(mentor_a, plan, 3)).await?;
    let _cycle_b = ledger.create_cycle(new_cycle(mentor_b, plan, 3)).await?;

    for mentor in [mentor_a, mentor_b] {
        let mentee = create_test_user(&pool).await;
        match seats.add_mentee(mentor, mentee).await? {
            AddMenteeOutcome::Added(_) => {}
            AddMenteeOutcome::Denied(reason) => panic!("unexpected denial: {reason:?}"),
        }
    }

    ledger.expire(cycle_a.id).await?;

    assert_eq!(active_seat_count(&pool, mentor_a).await, 0, "A's seats off");
    assert_eq!(active_seat_count(&pool, mentor_b).await, 1, "B untouched");

    // Seats are deactivated, never deleted.
    let (total_a,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM mentees WHERE mentor_id = $1")
        .bind(mentor_a)
        .fetch_one(&pool)
        .await?;
    assert_eq!(total_a, 1, "seat row survives expiry");
    Ok(())
}

// ============================================================================
// Capacity enforcement
// ============================================================================

#[tokio::test]
#[ignore]
async fn seat_limit_denies_activation_at_capacity() -> BillingResult<()> {
    let (ledger, seats, pool) = setup().await;
    let mentor = create_test_user(&pool).await;
    let plan = create_test_plan(&pool, 3).await;
    ledger.create_cycle(new_cycle(mentor, plan, 3)).await?;

    for _ in 0..3 {
        let mentee = create_test_user(&pool).await;
        assert!(matches!(
            seats.add_mentee(mentor, mentee).await?,
            AddMenteeOutcome::Added(_)
        ));
    }

    // Fourth seat: denied before any mutation, count unchanged.
    let extra = create_test_user(&pool).await;
    match seats.add_mentee(mentor, extra).await? {
        AddMenteeOutcome::Denied(reason) => assert_eq!(reason, SeatDenial::LimitReached),
        AddMenteeOutcome::Added(_) => panic!("seat beyond the limit was admitted"),
    }
    assert_eq!(active_seat_count(&pool, mentor).await, 3);

    // Toggling an existing seat off and a new activation back on works.
    let mentees = seats.mentees_of(mentor).await?;
    let toggled = seats
        .set_mentee_status(mentor, mentees[0].mentee_id, false)
        .await?;
    assert!(toggled.success);
    assert_eq!(active_seat_count(&pool, mentor).await, 2);

    let outcome = seats
        .set_mentee_status(mentor, mentees[0].mentee_id, true)
        .await?;
    assert!(outcome.success);
    assert_eq!(outcome.active, 3);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn mentee_is_globally_exclusive() -> BillingResult<()> {
    let (ledger, seats, pool) = setup().await;
    let plan = create_test_plan(&pool, 3).await;

    let mentor_a = create_test_user(&pool).await;
    let mentor_b = create_test_user(&pool).await;
    ledger.create_cycle(new_cycle(mentor_a, plan, 3)).await?;
    ledger.create_cycle(new_cycle(mentor_b, plan, 3)).await?;

    let mentee = create_test_user(&pool).await;
    assert!(matches!(
        seats.add_mentee(mentor_a, mentee).await?,
        AddMenteeOutcome::Added(_)
    ));

    match seats.add_mentee(mentor_b, mentee).await? {
        AddMenteeOutcome::Denied(reason) => assert_eq!(reason, SeatDenial::AlreadyMentored),
        AddMenteeOutcome::Added(_) => panic!("mentee joined a second mentor"),
    }
    Ok(())
}

#[tokio::test]
#[ignore]
async fn no_subscription_denies_seat_creation() -> BillingResult<()> {
    let (_, seats, pool) = setup().await;
    let mentor = create_test_user(&pool).await;
    let mentee = create_test_user(&pool).await;

    match seats.add_mentee(mentor, mentee).await? {
        AddMenteeOutcome::Denied(reason) => assert_eq!(reason, SeatDenial::NoSubscription),
        AddMenteeOutcome::Added(_) => panic!("seat added without a subscription"),
    }
    Ok(())
}

#[tokio::test]
#[ignore]
async fn concurrent_activation_respects_limit() -> BillingResult<()> {
    use std::sync::Arc;
    use tokio::sync::Barrier;

    let (ledger, seats, pool) = setup().await;
    let mentor = create_test_user(&pool).await;
    let plan = create_test_plan(&pool, 3).await;
    ledger.create_cycle(new_cycle(mentor, plan, 3)).await?;

    // Six inactive seats exist; at most three may come back on. Each seat
    // is added then toggled off, so the add-time capacity check always
    // sees a free slot.
    let mut mentee_ids = Vec::new();
    for _ in 0..6 {
        let mentee = create_test_user(&pool).await;
        seats.add_mentee(mentor, mentee).await?;
        seats.set_mentee_status(mentor, mentee, false).await?;
        mentee_ids.push(mentee);
    }

    let seats = Arc::new(seats);
    let barrier = Arc::new(Barrier::new(mentee_ids.len()));
    let mut handles = vec![];

    for mentee in mentee_ids {
        let seats = Arc::clone(&seats);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            seats.set_mentee_status(mentor, mentee, true).await
        }));
    }

    let mut allowed = 0;
    for handle in handles {
        let outcome = handle.await.expect("task panicked")?;
        if outcome.success {
            allowed += 1;
        } else {
            assert_eq!(outcome.reason, Some(SeatDenial::LimitReached));
        }
    }

    assert_eq!(allowed, 3, "exactly the limit may activate concurrently");
    assert_eq!(active_seat_count(&pool, mentor).await, 3);
    Ok(())
}

// ============================================================================
// Expiry notifier dedup
// ============================================================================

#[tokio::test]
#[ignore]
async fn expiry_reminder_sent_at_most_once_per_threshold() -> BillingResult<()> {
    let (ledger, _, pool) = setup().await;
    let mentor = create_test_user(&pool).await;
    let plan = create_test_plan(&pool, 3).await;
    let cycle = ledger.create_cycle(new_cycle(mentor, plan, 3)).await?;

    let log = NotificationLog::new(pool.clone());

    assert!(!log.already_sent(cycle.id, NOTIFICATION_TYPE_EXPIRY, 7).await?);
    assert!(log.record_sent(cycle.id, NOTIFICATION_TYPE_EXPIRY, 7).await?);

    // A second sweep over the same window records nothing new.
    assert!(log.already_sent(cycle.id, NOTIFICATION_TYPE_EXPIRY, 7).await?);
    assert!(!log.record_sent(cycle.id, NOTIFICATION_TYPE_EXPIRY, 7).await?);

    // A different threshold for the same cycle is a separate reminder.
    assert!(!log.already_sent(cycle.id, NOTIFICATION_TYPE_EXPIRY, 3).await?);
    Ok(())
}
