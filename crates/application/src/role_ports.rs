use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keystone_core::{AppResult, IdentityKey};
use keystone_domain::{Role, RoleAssignment, RoleName};

/// System of record for role definitions.
#[async_trait]
pub trait RoleRepository: Send + Sync {
    /// Returns one role definition.
    async fn find_role(&self, name: &RoleName) -> AppResult<Option<Role>>;

    /// Inserts or replaces one role definition.
    async fn save_role(&self, role: Role) -> AppResult<()>;

    /// Deletes one role definition, returning whether it existed.
    async fn delete_role(&self, name: &RoleName) -> AppResult<bool>;

    /// Lists every role definition.
    async fn list_roles(&self) -> AppResult<Vec<Role>>;
}

/// System of record for per-identity role assignments.
///
/// Each identity holds at most one assignment per role; saving an assignment
/// for a role the identity already holds replaces the stored one.
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// Lists every stored assignment of one identity, whatever its status.
    async fn list_assignments(&self, identity: IdentityKey) -> AppResult<Vec<RoleAssignment>>;

    /// Inserts or replaces one assignment.
    async fn save_assignment(
        &self,
        identity: IdentityKey,
        assignment: RoleAssignment,
    ) -> AppResult<()>;

    /// Counts assignments of a role that still hold it at `now`, paused or running.
    async fn count_live_assignments(&self, role: &RoleName, now: DateTime<Utc>) -> AppResult<u64>;
}
