use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keystone_application::ProfileRepository;
use keystone_core::{AppResult, IdentityKey};
use keystone_domain::{RoleAssignment, RoleName};
use tokio::sync::RwLock;

/// In-memory profile repository keeping one assignment per identity and role.
#[derive(Debug, Default)]
pub struct InMemoryProfileRepository {
    assignments: RwLock<HashMap<IdentityKey, HashMap<RoleName, RoleAssignment>>>,
}

impl InMemoryProfileRepository {
    /// Creates an empty in-memory repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileRepository for InMemoryProfileRepository {
    async fn list_assignments(&self, identity: IdentityKey) -> AppResult<Vec<RoleAssignment>> {
        let assignments = self.assignments.read().await;
        let mut values: Vec<RoleAssignment> = assignments
            .get(&identity)
            .map(|held| held.values().cloned().collect())
            .unwrap_or_default();
        values.sort_by_key(RoleAssignment::granted_at);
        Ok(values)
    }

    async fn save_assignment(
        &self,
        identity: IdentityKey,
        assignment: RoleAssignment,
    ) -> AppResult<()> {
        self.assignments
            .write()
            .await
            .entry(identity)
            .or_default()
            .insert(assignment.role_name().clone(), assignment);
        Ok(())
    }

    async fn count_live_assignments(&self, role: &RoleName, now: DateTime<Utc>) -> AppResult<u64> {
        let assignments = self.assignments.read().await;
        let count = assignments
            .values()
            .filter_map(|held| held.get(role))
            .filter(|assignment| assignment.is_live_at(now))
            .count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }
}
