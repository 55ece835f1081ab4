use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use keystone_core::AppResult;
use keystone_domain::{Resolution, Role, RoleAssignment, RoleCatalog, RoleName};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::RoleRepository;

/// Process-local copy of every role definition.
///
/// Readers get an immutable catalog; writers swap in a new one, so a
/// resolution never observes a half-applied update.
pub struct RoleGraph {
    repository: Arc<dyn RoleRepository>,
    fallback_role: RoleName,
    catalog: RwLock<Arc<RoleCatalog>>,
}

impl RoleGraph {
    /// Creates an empty graph backed by a repository.
    #[must_use]
    pub fn new(repository: Arc<dyn RoleRepository>, fallback_role: RoleName) -> Self {
        Self {
            repository,
            fallback_role,
            catalog: RwLock::new(Arc::new(RoleCatalog::new())),
        }
    }

    /// Returns the universal fallback role.
    #[must_use]
    pub fn fallback_role(&self) -> &RoleName {
        &self.fallback_role
    }

    /// Returns the current catalog.
    pub async fn catalog(&self) -> Arc<RoleCatalog> {
        self.catalog.read().await.clone()
    }

    /// Replaces the catalog with every stored role definition.
    pub async fn reload_all(&self) -> AppResult<usize> {
        let roles = self.repository.list_roles().await?;
        let catalog = RoleCatalog::from_roles(roles);
        let count = catalog.len();

        *self.catalog.write().await = Arc::new(catalog);
        debug!(roles = count, "role catalog reloaded");
        Ok(count)
    }

    /// Re-reads one role definition, dropping it when it no longer exists.
    ///
    /// Returns whether the role exists after the reload.
    pub async fn reload_role(&self, name: &RoleName) -> AppResult<bool> {
        match self.repository.find_role(name).await? {
            Some(role) => {
                self.install(role).await;
                Ok(true)
            }
            None => {
                self.forget(name).await;
                Ok(false)
            }
        }
    }

    /// Loads roles the local catalog has not seen yet, with their ancestors.
    pub async fn ensure_loaded<'a>(
        &self,
        names: impl IntoIterator<Item = &'a RoleName>,
    ) -> AppResult<()> {
        let mut pending: Vec<RoleName> = names.into_iter().cloned().collect();
        let mut seen: HashSet<RoleName> = HashSet::new();

        while let Some(name) = pending.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }

            let known = self
                .catalog()
                .await
                .get(&name)
                .map(|role| role.inherits().to_vec());
            let parents = match known {
                Some(parents) => parents,
                None => match self.repository.find_role(&name).await? {
                    Some(role) => {
                        let parents = role.inherits().to_vec();
                        self.install(role).await;
                        parents
                    }
                    None => {
                        warn!(role = %name, "referenced role does not exist");
                        continue;
                    }
                },
            };
            pending.extend(parents);
        }

        Ok(())
    }

    /// Inserts or replaces one role in the local catalog.
    pub async fn install(&self, role: Role) {
        let mut guard = self.catalog.write().await;
        let mut catalog = RoleCatalog::clone(&guard);
        catalog.insert(role);
        *guard = Arc::new(catalog);
    }

    /// Removes one role from the local catalog.
    pub async fn forget(&self, name: &RoleName) {
        let mut guard = self.catalog.write().await;
        if guard.contains(name) {
            let mut catalog = RoleCatalog::clone(&guard);
            catalog.remove(name);
            *guard = Arc::new(catalog);
        }
    }

    /// Resolves assignments against the current catalog, logging skipped edges.
    pub async fn resolve(&self, assignments: &[RoleAssignment], now: DateTime<Utc>) -> Resolution {
        let resolution = self
            .catalog()
            .await
            .resolve(assignments, &self.fallback_role, now);

        for missing in &resolution.missing_roles {
            warn!(role = %missing, "skipping reference to missing role");
        }
        for cycle in &resolution.cycles {
            warn!(
                from = %cycle.from,
                to = %cycle.to,
                "skipping inheritance edge that closes a cycle"
            );
        }

        resolution
    }
}
