use chrono::{DateTime, Utc};
use keystone_core::IdentityKey;

use crate::catalog::Resolution;
use crate::permission::PermissionSet;
use crate::role::RoleName;

/// Immutable permission and display result computed for one identity.
///
/// Snapshots are never patched; a recomputation replaces the whole value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionSnapshot {
    identity: IdentityKey,
    primary_role: RoleName,
    permissions: PermissionSet,
    display_name: String,
    prefix: String,
    suffix: String,
    color: String,
    computed_at: DateTime<Utc>,
}

impl PermissionSnapshot {
    /// Builds a snapshot from one catalog resolution.
    #[must_use]
    pub fn from_resolution(
        identity: IdentityKey,
        resolution: Resolution,
        computed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            identity,
            primary_role: resolution.primary_role,
            permissions: resolution.permissions,
            display_name: resolution.display.display_name,
            prefix: resolution.display.prefix,
            suffix: resolution.display.suffix,
            color: resolution.display.color,
            computed_at,
        }
    }

    /// Returns the identity the snapshot belongs to.
    #[must_use]
    pub fn identity(&self) -> IdentityKey {
        self.identity
    }

    /// Returns the primary role.
    #[must_use]
    pub fn primary_role(&self) -> &RoleName {
        &self.primary_role
    }

    /// Returns the effective permission set.
    #[must_use]
    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    /// Returns the primary role's display name.
    #[must_use]
    pub fn role_display_name(&self) -> &str {
        self.display_name.as_str()
    }

    /// Returns the chat prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.prefix.as_str()
    }

    /// Returns the chat suffix.
    #[must_use]
    pub fn suffix(&self) -> &str {
        self.suffix.as_str()
    }

    /// Returns the color tag.
    #[must_use]
    pub fn color(&self) -> &str {
        self.color.as_str()
    }

    /// Returns the computation timestamp.
    #[must_use]
    pub fn computed_at(&self) -> DateTime<Utc> {
        self.computed_at
    }

    /// Evaluates one permission query against the snapshot.
    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.has_permission(permission)
    }
}
