use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keystone_core::{AppResult, IdentityKey};
use keystone_domain::{PermissionSnapshot, RoleAssignment};
use tracing::{debug, warn};

use crate::{ProfileRepository, RoleGraph, SnapshotSource};

/// Computes snapshots from stored assignments and the local role graph.
pub struct SnapshotLoader {
    graph: Arc<RoleGraph>,
    profiles: Arc<dyn ProfileRepository>,
}

impl SnapshotLoader {
    /// Creates a loader from the role graph and profile store.
    #[must_use]
    pub fn new(graph: Arc<RoleGraph>, profiles: Arc<dyn ProfileRepository>) -> Self {
        Self { graph, profiles }
    }

    /// Writes back assignments whose expiry passed while still marked active.
    async fn write_back_lapsed(
        &self,
        identity: IdentityKey,
        assignments: &[RoleAssignment],
        now: DateTime<Utc>,
    ) {
        for assignment in assignments.iter().filter(|value| value.is_lapsed_at(now)) {
            let mut expired = assignment.clone();
            expired.mark_expired();

            match self.profiles.save_assignment(identity, expired).await {
                Ok(()) => debug!(
                    identity = %identity,
                    role = %assignment.role_name(),
                    "marked lapsed role assignment as expired"
                ),
                Err(error) => warn!(
                    identity = %identity,
                    role = %assignment.role_name(),
                    error = %error,
                    "failed to write back lapsed role assignment"
                ),
            }
        }
    }
}

#[async_trait]
impl SnapshotSource for SnapshotLoader {
    async fn compute(&self, identity: IdentityKey) -> AppResult<PermissionSnapshot> {
        let now = Utc::now();
        let assignments = self.profiles.list_assignments(identity).await?;

        self.write_back_lapsed(identity, &assignments, now).await;
        self.graph
            .ensure_loaded(
                assignments
                    .iter()
                    .filter(|assignment| assignment.is_active_at(now))
                    .map(RoleAssignment::role_name)
                    .chain(std::iter::once(self.graph.fallback_role())),
            )
            .await?;

        let resolution = self.graph.resolve(&assignments, now).await;
        Ok(PermissionSnapshot::from_resolution(identity, resolution, now))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use keystone_core::IdentityKey;
    use keystone_domain::{AssignmentStatus, RoleAssignment, StoredAssignment};

    use crate::test_support::{FakeProfileRepository, FakeRoleRepository, name, role};
    use crate::{RoleGraph, SnapshotSource};

    use super::SnapshotLoader;

    fn loader(profiles: Arc<FakeProfileRepository>) -> SnapshotLoader {
        let roles = Arc::new(FakeRoleRepository::with_roles([
            role("default", 0, &[], &["chat.send"]),
            role("member", 5, &["default"], &["home.set"]),
            role("vip", 20, &["member"], &["fly", "-home.set"]),
        ]));
        SnapshotLoader::new(Arc::new(RoleGraph::new(roles, name("default"))), profiles)
    }

    #[tokio::test]
    async fn identity_without_assignments_gets_fallback_role() {
        let loader = loader(Arc::new(FakeProfileRepository::default()));

        let snapshot = loader.compute(IdentityKey::new()).await;

        let snapshot = snapshot.unwrap_or_else(|_| unreachable!());
        assert_eq!(snapshot.primary_role(), &name("default"));
        assert!(snapshot.has_permission("chat.send"));
    }

    #[tokio::test]
    async fn ancestors_are_fetched_on_demand() {
        let profiles = Arc::new(FakeProfileRepository::default());
        let identity = IdentityKey::new();
        profiles.seed(
            identity,
            RoleAssignment::grant(name("vip"), "console", Utc::now(), None, false)
                .unwrap_or_else(|_| unreachable!()),
        );

        let snapshot = loader(profiles)
            .compute(identity)
            .await
            .unwrap_or_else(|_| unreachable!());

        assert_eq!(snapshot.primary_role(), &name("vip"));
        assert!(snapshot.has_permission("fly"));
        assert!(snapshot.has_permission("chat.send"));
        assert!(!snapshot.has_permission("home.set"));
    }

    #[tokio::test]
    async fn lapsed_assignment_is_written_back_as_expired() {
        let profiles = Arc::new(FakeProfileRepository::default());
        let identity = IdentityKey::new();
        let granted_at = Utc::now() - Duration::days(2);
        profiles.seed(
            identity,
            RoleAssignment::restore(StoredAssignment {
                role_name: name("vip"),
                granted_by: "store".to_owned(),
                granted_at,
                expires_at: Some(granted_at + Duration::days(1)),
                paused: false,
                paused_remaining_seconds: None,
                status: AssignmentStatus::Active,
                pending_notification: false,
            }),
        );

        let snapshot = loader(profiles.clone())
            .compute(identity)
            .await
            .unwrap_or_else(|_| unreachable!());

        assert_eq!(snapshot.primary_role(), &name("default"));
        assert!(!snapshot.has_permission("fly"));
        assert_eq!(
            profiles
                .stored(identity)
                .iter()
                .map(RoleAssignment::status)
                .collect::<Vec<_>>(),
            vec![AssignmentStatus::Expired]
        );
    }
}
