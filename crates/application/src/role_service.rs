use std::sync::Arc;

use chrono::{Duration, Utc};
use keystone_core::{AppError, AppResult, IdentityKey};
use keystone_domain::{
    AssignmentStatus, BroadcastMessage, Role, RoleAssignment, RoleCatalog, RoleInput, RoleName,
    SyncChannel,
};
use tracing::{info, warn};

use crate::{PresenceTracker, ProfileRepository, RoleGraph, RoleRepository, SyncPublisher};

/// Input payload for granting a role to an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignRoleInput {
    /// Receiving identity.
    pub identity: IdentityKey,
    /// Granted role name.
    pub role_name: String,
    /// Actor recorded on the assignment.
    pub granted_by: String,
    /// Optional time limit; permanent when absent.
    pub duration: Option<Duration>,
    /// Whether the network is told about the activation.
    pub notify: bool,
}

/// Application service for role definitions and per-identity assignments.
///
/// Every mutation writes through the repositories before it publishes the
/// matching sync message.
#[derive(Clone)]
pub struct RoleService {
    roles: Arc<dyn RoleRepository>,
    profiles: Arc<dyn ProfileRepository>,
    graph: Arc<RoleGraph>,
    publisher: Arc<dyn SyncPublisher>,
    presence: PresenceTracker,
}

impl RoleService {
    /// Creates a new service from required dependencies.
    #[must_use]
    pub fn new(
        roles: Arc<dyn RoleRepository>,
        profiles: Arc<dyn ProfileRepository>,
        graph: Arc<RoleGraph>,
        publisher: Arc<dyn SyncPublisher>,
        presence: PresenceTracker,
    ) -> Self {
        Self {
            roles,
            profiles,
            graph,
            publisher,
            presence,
        }
    }

    /// Ensures the fallback role exists and is well formed.
    ///
    /// A stored fallback role that inherits other roles is rejected; the
    /// process must not finish starting in that case.
    pub async fn bootstrap_defaults(&self) -> AppResult<Role> {
        let name = self.graph.fallback_role().clone();

        let role = match self.roles.find_role(&name).await? {
            Some(role) if !role.inherits().is_empty() => {
                return Err(AppError::Validation(format!(
                    "fallback role '{name}' must not inherit other roles"
                )));
            }
            Some(role) => role,
            None => {
                let role = Role::fallback(&name, Utc::now())?;
                self.roles.save_role(role.clone()).await?;
                info!(role = %name, "created fallback role");
                role
            }
        };

        self.graph.install(role.clone()).await;
        Ok(role)
    }

    /// Lists every stored role definition sorted by descending weight.
    pub async fn list_roles(&self) -> AppResult<Vec<Role>> {
        let mut roles = self.roles.list_roles().await?;
        roles.sort_by(|left, right| {
            right
                .weight()
                .cmp(&left.weight())
                .then_with(|| left.name().cmp(right.name()))
        });
        Ok(roles)
    }

    /// Creates or replaces a role definition.
    pub async fn upsert_role(&self, input: RoleInput) -> AppResult<Role> {
        let name = RoleName::new(input.name.as_str())?;
        let now = Utc::now();

        let role = match self.roles.find_role(&name).await? {
            Some(existing) => existing.updated(input, now)?,
            None => Role::new(input, now)?,
        };

        let known = RoleCatalog::from_roles(self.roles.list_roles().await?);
        if let Some(path) = known.cycle_through(&role) {
            let path = path
                .iter()
                .map(RoleName::as_str)
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(AppError::Conflict(format!(
                "role '{name}' would close an inheritance cycle: {path}"
            )));
        }

        self.roles.save_role(role.clone()).await?;
        self.graph.install(role.clone()).await;
        self.publish_role_change(&name).await?;

        info!(role = %name, weight = role.weight(), "role definition saved");
        Ok(role)
    }

    /// Deletes a role nobody holds any more.
    pub async fn delete_role(&self, role_name: &str) -> AppResult<()> {
        let name = RoleName::new(role_name)?;
        if &name == self.graph.fallback_role() {
            return Err(AppError::Conflict(format!(
                "fallback role '{name}' cannot be deleted"
            )));
        }

        let holders = self
            .profiles
            .count_live_assignments(&name, Utc::now())
            .await?;
        if holders > 0 {
            return Err(AppError::Conflict(format!(
                "role '{name}' is still assigned to {holders} identities"
            )));
        }

        if !self.roles.delete_role(&name).await? {
            return Err(AppError::NotFound(format!("role '{name}' does not exist")));
        }

        self.graph.forget(&name).await;
        self.publish_role_change(&name).await?;

        info!(role = %name, "role definition deleted");
        Ok(())
    }

    /// Grants a role to an identity.
    ///
    /// Re-granting a role the identity already holds replaces the stored
    /// assignment. When notification is requested but the identity is offline
    /// the assignment keeps a pending flag for delivery on next connect.
    pub async fn assign_role(&self, input: AssignRoleInput) -> AppResult<RoleAssignment> {
        let name = RoleName::new(input.role_name.as_str())?;
        let role = self
            .roles
            .find_role(&name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("role '{name}' does not exist")))?;

        let online_name = if input.notify {
            self.presence
                .record(input.identity)
                .await?
                .map(|record| record.display_name)
        } else {
            None
        };
        let pending = input.notify && online_name.is_none();

        let assignment = RoleAssignment::grant(
            name.clone(),
            input.granted_by,
            Utc::now(),
            input.duration,
            pending,
        )?;
        self.profiles
            .save_assignment(input.identity, assignment.clone())
            .await?;
        self.publish_identity_change(input.identity).await?;

        if let Some(display_name) = online_name {
            self.publish_broadcast(&BroadcastMessage::RoleActivated {
                identity: input.identity,
                display_name,
                role_name: name.as_str().to_owned(),
                role_display_name: role.display_name().to_owned(),
            })
            .await?;
        }

        info!(
            identity = %input.identity,
            role = %name,
            pending_notification = pending,
            "role assigned"
        );
        Ok(assignment)
    }

    /// Withdraws a role from an identity.
    pub async fn remove_role(&self, identity: IdentityKey, role_name: &str) -> AppResult<()> {
        let mut assignment = self.held_assignment(identity, role_name).await?;
        assignment.mark_removed();

        self.profiles.save_assignment(identity, assignment).await?;
        self.publish_identity_change(identity).await?;

        info!(identity = %identity, role = %role_name, "role removed");
        Ok(())
    }

    /// Stops the expiry clock of a held role.
    pub async fn pause_assignment(
        &self,
        identity: IdentityKey,
        role_name: &str,
    ) -> AppResult<RoleAssignment> {
        let mut assignment = self.held_assignment(identity, role_name).await?;
        assignment.pause(Utc::now())?;

        self.profiles
            .save_assignment(identity, assignment.clone())
            .await?;
        self.publish_identity_change(identity).await?;
        Ok(assignment)
    }

    /// Restarts the expiry clock of a paused role.
    pub async fn resume_assignment(
        &self,
        identity: IdentityKey,
        role_name: &str,
    ) -> AppResult<RoleAssignment> {
        let mut assignment = self.held_assignment(identity, role_name).await?;
        assignment.resume(Utc::now())?;

        self.profiles
            .save_assignment(identity, assignment.clone())
            .await?;
        self.publish_identity_change(identity).await?;
        Ok(assignment)
    }

    /// Announces activations that were granted while the identity was offline.
    ///
    /// Returns the number of announcements published.
    pub async fn deliver_pending_notifications(
        &self,
        identity: IdentityKey,
        display_name: &str,
    ) -> AppResult<usize> {
        let now = Utc::now();
        let catalog = self.graph.catalog().await;
        let pending: Vec<RoleAssignment> = self
            .profiles
            .list_assignments(identity)
            .await?
            .into_iter()
            .filter(|assignment| assignment.pending_notification() && assignment.is_active_at(now))
            .collect();

        let mut delivered = 0;
        for mut assignment in pending {
            let role_display_name = catalog
                .get(assignment.role_name())
                .map_or_else(
                    || assignment.role_name().as_str().to_owned(),
                    |role| role.display_name().to_owned(),
                );

            self.publish_broadcast(&BroadcastMessage::RoleActivated {
                identity,
                display_name: display_name.to_owned(),
                role_name: assignment.role_name().as_str().to_owned(),
                role_display_name,
            })
            .await?;

            assignment.clear_pending_notification();
            self.profiles.save_assignment(identity, assignment).await?;
            delivered += 1;
        }

        Ok(delivered)
    }

    async fn held_assignment(
        &self,
        identity: IdentityKey,
        role_name: &str,
    ) -> AppResult<RoleAssignment> {
        let name = RoleName::new(role_name)?;
        self.profiles
            .list_assignments(identity)
            .await?
            .into_iter()
            .find(|assignment| {
                assignment.role_name() == &name && assignment.status() == AssignmentStatus::Active
            })
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "identity '{identity}' does not hold role '{name}'"
                ))
            })
    }

    async fn publish_identity_change(&self, identity: IdentityKey) -> AppResult<()> {
        self.publish(
            SyncChannel::IdentityRoles,
            identity.to_string().as_str(),
        )
        .await
    }

    async fn publish_role_change(&self, name: &RoleName) -> AppResult<()> {
        self.publish(SyncChannel::RoleDefinitions, name.as_str())
            .await
    }

    async fn publish_broadcast(&self, message: &BroadcastMessage) -> AppResult<()> {
        self.publish(SyncChannel::NetworkBroadcast, message.encode()?.as_str())
            .await
    }

    /// Publishes after a completed write-through.
    ///
    /// The stored change stands when publishing fails; other processes pick it
    /// up on their next recomputation.
    async fn publish(&self, channel: SyncChannel, payload: &str) -> AppResult<()> {
        self.publisher
            .publish(channel.as_str(), payload)
            .await
            .map_err(|error| {
                warn!(
                    channel = channel.as_str(),
                    error = %error,
                    "sync publish failed after write-through"
                );
                AppError::Unavailable(format!(
                    "change was stored but '{}' was not notified: {error}",
                    channel.as_str()
                ))
            })
    }
}

#[cfg(test)]
mod tests;
