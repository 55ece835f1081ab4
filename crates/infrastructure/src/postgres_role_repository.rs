use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use keystone_application::RoleRepository;
use keystone_core::{AppError, AppResult};
use keystone_domain::{Role, RoleInput, RoleName, RoleType};

/// PostgreSQL-backed repository for role definitions.
#[derive(Clone)]
pub struct PostgresRoleRepository {
    pool: PgPool,
}

impl PostgresRoleRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct RoleRow {
    name: String,
    display_name: String,
    prefix: String,
    suffix: String,
    color: String,
    role_type: String,
    weight: i32,
    inherits: Vec<String>,
    permissions: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RoleRow {
    fn into_role(self) -> AppResult<Role> {
        Role::restore(
            RoleInput {
                name: self.name,
                display_name: self.display_name,
                prefix: self.prefix,
                suffix: self.suffix,
                color: self.color,
                role_type: RoleType::from_str(self.role_type.as_str())?,
                weight: self.weight,
                inherits: self.inherits,
                permissions: self.permissions,
            },
            self.created_at,
            self.updated_at,
        )
        .map_err(|error| AppError::Internal(format!("stored role is invalid: {error}")))
    }
}

const SELECT_ROLE_COLUMNS: &str = r#"
    SELECT
        name,
        display_name,
        prefix,
        suffix,
        color,
        role_type,
        weight,
        inherits,
        permissions,
        created_at,
        updated_at
    FROM keystone_roles
"#;

#[async_trait]
impl RoleRepository for PostgresRoleRepository {
    async fn find_role(&self, name: &RoleName) -> AppResult<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>(&format!("{SELECT_ROLE_COLUMNS} WHERE name = $1"))
            .bind(name.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| {
                AppError::Unavailable(format!("failed to find role '{name}': {error}"))
            })?;

        row.map(RoleRow::into_role).transpose()
    }

    async fn save_role(&self, role: Role) -> AppResult<()> {
        let inherits: Vec<String> = role
            .inherits()
            .iter()
            .map(|parent| parent.as_str().to_owned())
            .collect();

        sqlx::query(
            r#"
            INSERT INTO keystone_roles (
                name, display_name, prefix, suffix, color, role_type,
                weight, inherits, permissions, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (name) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                prefix = EXCLUDED.prefix,
                suffix = EXCLUDED.suffix,
                color = EXCLUDED.color,
                role_type = EXCLUDED.role_type,
                weight = EXCLUDED.weight,
                inherits = EXCLUDED.inherits,
                permissions = EXCLUDED.permissions,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(role.name().as_str())
        .bind(role.display_name())
        .bind(role.prefix())
        .bind(role.suffix())
        .bind(role.color())
        .bind(role.role_type().as_str())
        .bind(role.weight())
        .bind(inherits)
        .bind(role.permissions().to_vec())
        .bind(role.created_at())
        .bind(role.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Unavailable(format!("failed to save role '{}': {error}", role.name()))
        })?;

        Ok(())
    }

    async fn delete_role(&self, name: &RoleName) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM keystone_roles WHERE name = $1")
            .bind(name.as_str())
            .execute(&self.pool)
            .await
            .map_err(|error| {
                AppError::Unavailable(format!("failed to delete role '{name}': {error}"))
            })?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_roles(&self) -> AppResult<Vec<Role>> {
        let rows = sqlx::query_as::<_, RoleRow>(&format!("{SELECT_ROLE_COLUMNS} ORDER BY name"))
            .fetch_all(&self.pool)
            .await
            .map_err(|error| AppError::Unavailable(format!("failed to list roles: {error}")))?;

        rows.into_iter().map(RoleRow::into_role).collect()
    }
}
