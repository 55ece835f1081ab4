use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use keystone_application::ProfileRepository;
use keystone_core::{AppError, AppResult, IdentityKey};
use keystone_domain::{AssignmentStatus, RoleAssignment, RoleName, StoredAssignment};

/// PostgreSQL-backed repository for per-identity role assignments.
#[derive(Clone)]
pub struct PostgresProfileRepository {
    pool: PgPool,
}

impl PostgresProfileRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct AssignmentRow {
    role_name: String,
    granted_by: String,
    granted_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    paused: bool,
    paused_remaining_seconds: Option<i64>,
    status: String,
    pending_notification: bool,
}

impl AssignmentRow {
    fn into_assignment(self) -> AppResult<RoleAssignment> {
        Ok(RoleAssignment::restore(StoredAssignment {
            role_name: RoleName::new(self.role_name)?,
            granted_by: self.granted_by,
            granted_at: self.granted_at,
            expires_at: self.expires_at,
            paused: self.paused,
            paused_remaining_seconds: self.paused_remaining_seconds,
            status: AssignmentStatus::from_str(self.status.as_str())?,
            pending_notification: self.pending_notification,
        }))
    }
}

#[async_trait]
impl ProfileRepository for PostgresProfileRepository {
    async fn list_assignments(&self, identity: IdentityKey) -> AppResult<Vec<RoleAssignment>> {
        let rows = sqlx::query_as::<_, AssignmentRow>(
            r#"
            SELECT
                role_name,
                granted_by,
                granted_at,
                expires_at,
                paused,
                paused_remaining_seconds,
                status,
                pending_notification
            FROM keystone_role_assignments
            WHERE identity_key = $1
            ORDER BY granted_at
            "#,
        )
        .bind(identity.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Unavailable(format!(
                "failed to list role assignments for '{identity}': {error}"
            ))
        })?;

        rows.into_iter()
            .map(AssignmentRow::into_assignment)
            .collect()
    }

    async fn save_assignment(
        &self,
        identity: IdentityKey,
        assignment: RoleAssignment,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO keystone_role_assignments (
                identity_key, role_name, granted_by, granted_at, expires_at,
                paused, paused_remaining_seconds, status, pending_notification
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (identity_key, role_name) DO UPDATE SET
                granted_by = EXCLUDED.granted_by,
                granted_at = EXCLUDED.granted_at,
                expires_at = EXCLUDED.expires_at,
                paused = EXCLUDED.paused,
                paused_remaining_seconds = EXCLUDED.paused_remaining_seconds,
                status = EXCLUDED.status,
                pending_notification = EXCLUDED.pending_notification
            "#,
        )
        .bind(identity.as_uuid())
        .bind(assignment.role_name().as_str())
        .bind(assignment.granted_by())
        .bind(assignment.granted_at())
        .bind(assignment.expires_at())
        .bind(assignment.is_paused())
        .bind(assignment.paused_remaining_seconds())
        .bind(assignment.status().as_str())
        .bind(assignment.pending_notification())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Unavailable(format!(
                "failed to save role assignment '{}' for '{identity}': {error}",
                assignment.role_name()
            ))
        })?;

        Ok(())
    }

    async fn count_live_assignments(&self, role: &RoleName, now: DateTime<Utc>) -> AppResult<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM keystone_role_assignments
            WHERE role_name = $1
                AND status = 'active'
                AND (expires_at IS NULL OR expires_at >= $2)
            "#,
        )
        .bind(role.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::Unavailable(format!(
                "failed to count assignments of role '{role}': {error}"
            ))
        })?;

        u64::try_from(count)
            .map_err(|error| AppError::Internal(format!("invalid assignment count: {error}")))
    }
}
