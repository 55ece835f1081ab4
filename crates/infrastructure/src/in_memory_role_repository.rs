use std::collections::HashMap;

use async_trait::async_trait;
use keystone_application::RoleRepository;
use keystone_core::AppResult;
use keystone_domain::{Role, RoleName};
use tokio::sync::RwLock;

/// In-memory role repository implementation.
#[derive(Debug, Default)]
pub struct InMemoryRoleRepository {
    roles: RwLock<HashMap<RoleName, Role>>,
}

impl InMemoryRoleRepository {
    /// Creates an empty in-memory repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoleRepository for InMemoryRoleRepository {
    async fn find_role(&self, name: &RoleName) -> AppResult<Option<Role>> {
        Ok(self.roles.read().await.get(name).cloned())
    }

    async fn save_role(&self, role: Role) -> AppResult<()> {
        self.roles.write().await.insert(role.name().clone(), role);
        Ok(())
    }

    async fn delete_role(&self, name: &RoleName) -> AppResult<bool> {
        Ok(self.roles.write().await.remove(name).is_some())
    }

    async fn list_roles(&self) -> AppResult<Vec<Role>> {
        let roles = self.roles.read().await;
        let mut values: Vec<Role> = roles.values().cloned().collect();
        values.sort_by(|left, right| left.name().cmp(right.name()));
        Ok(values)
    }
}
