//! Enrolment sync
//!
//! Grants and revokes course memberships and the mentor capability role.
//! All operations are idempotent: granting an existing membership and
//! revoking an absent one are both no-ops. The sync only ever touches
//! memberships in courses listed in `managed_courses` — memberships
//! created by other means are invisible to it.
//!
//! These writes run OUTSIDE ledger transactions. A failed grant or
//! revocation is logged and retried by the caller; it never rolls back a
//! committed ledger state, because seat attribution is the source of
//! truth.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::BillingResult;

/// Role scope granted to paying mentors.
pub const MENTOR_ROLE_SCOPE: &str = "mentorsub:mentor";

/// Role scope granted to sponsored mentees.
pub const MENTEE_ROLE_SCOPE: &str = "mentorsub:mentee";

/// Course membership and role synchronisation for mentors and mentees.
#[derive(Clone)]
pub struct EnrolmentSync {
    pool: PgPool,
}

impl EnrolmentSync {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enrol a user into every managed course. Idempotent.
    pub async fn grant_memberships(&self, user_id: Uuid) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO course_memberships (user_id, course_id)
            SELECT $1, course_id FROM managed_courses
            ON CONFLICT (user_id, course_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Remove a user from every managed course. Idempotent; memberships
    /// outside the managed set are untouched.
    pub async fn revoke_memberships(&self, user_id: Uuid) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM course_memberships
            WHERE user_id = $1
              AND course_id IN (SELECT course_id FROM managed_courses)
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Assign a capability-scoped role. Idempotent.
    pub async fn grant_role(&self, user_id: Uuid, scope: &str) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO role_assignments (user_id, scope)
            VALUES ($1, $2)
            ON CONFLICT (user_id, scope) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(scope)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Unassign a capability-scoped role. Revoking an absent role is a
    /// no-op.
    pub async fn revoke_role(&self, user_id: Uuid, scope: &str) -> BillingResult<()> {
        sqlx::query("DELETE FROM role_assignments WHERE user_id = $1 AND scope = $2")
            .bind(user_id)
            .bind(scope)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Assign the mentor capability role. Idempotent.
    pub async fn grant_mentor_role(&self, user_id: Uuid) -> BillingResult<()> {
        self.grant_role(user_id, MENTOR_ROLE_SCOPE).await
    }

    /// Unassign the mentor capability role.
    pub async fn revoke_mentor_role(&self, user_id: Uuid) -> BillingResult<()> {
        self.revoke_role(user_id, MENTOR_ROLE_SCOPE).await
    }

    /// Whether a user exists in the directory.
    pub async fn user_exists(&self, user_id: Uuid) -> BillingResult<bool> {
        let row: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }
}
