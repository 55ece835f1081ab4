use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keystone_core::{AppError, AppResult, IdentityKey};
use keystone_domain::{
    BroadcastMessage, PresenceScope, Role, RoleAssignment, RoleInput, RoleName,
};

use crate::{
    BroadcastSink, PermissionRefresher, PresenceOp, PresenceStore, ProfileRepository,
    RoleRepository, SyncPublisher,
};

pub(crate) fn name(value: &str) -> RoleName {
    RoleName::new(value).unwrap_or_else(|_| unreachable!())
}

pub(crate) fn role(value: &str, weight: i32, inherits: &[&str], permissions: &[&str]) -> Role {
    let mut input = RoleInput::named(value, weight);
    input.inherits = inherits.iter().map(|parent| (*parent).to_owned()).collect();
    input.permissions = permissions.iter().map(|node| (*node).to_owned()).collect();
    Role::new(input, Utc::now()).unwrap_or_else(|_| unreachable!())
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[derive(Default)]
pub(crate) struct FakeRoleRepository {
    roles: Mutex<HashMap<RoleName, Role>>,
}

impl FakeRoleRepository {
    pub(crate) fn with_roles(roles: impl IntoIterator<Item = Role>) -> Self {
        let repository = Self::default();
        lock(&repository.roles).extend(roles.into_iter().map(|role| (role.name().clone(), role)));
        repository
    }

    pub(crate) fn stored(&self, name: &RoleName) -> Option<Role> {
        lock(&self.roles).get(name).cloned()
    }
}

#[async_trait]
impl RoleRepository for FakeRoleRepository {
    async fn find_role(&self, name: &RoleName) -> AppResult<Option<Role>> {
        Ok(lock(&self.roles).get(name).cloned())
    }

    async fn save_role(&self, role: Role) -> AppResult<()> {
        lock(&self.roles).insert(role.name().clone(), role);
        Ok(())
    }

    async fn delete_role(&self, name: &RoleName) -> AppResult<bool> {
        Ok(lock(&self.roles).remove(name).is_some())
    }

    async fn list_roles(&self) -> AppResult<Vec<Role>> {
        Ok(lock(&self.roles).values().cloned().collect())
    }
}

#[derive(Default)]
pub(crate) struct FakeProfileRepository {
    assignments: Mutex<HashMap<IdentityKey, Vec<RoleAssignment>>>,
}

impl FakeProfileRepository {
    pub(crate) fn stored(&self, identity: IdentityKey) -> Vec<RoleAssignment> {
        lock(&self.assignments)
            .get(&identity)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn seed(&self, identity: IdentityKey, assignment: RoleAssignment) {
        lock(&self.assignments)
            .entry(identity)
            .or_default()
            .push(assignment);
    }
}

#[async_trait]
impl ProfileRepository for FakeProfileRepository {
    async fn list_assignments(&self, identity: IdentityKey) -> AppResult<Vec<RoleAssignment>> {
        Ok(self.stored(identity))
    }

    async fn save_assignment(
        &self,
        identity: IdentityKey,
        assignment: RoleAssignment,
    ) -> AppResult<()> {
        let mut assignments = lock(&self.assignments);
        let held = assignments.entry(identity).or_default();
        held.retain(|existing| existing.role_name() != assignment.role_name());
        held.push(assignment);
        Ok(())
    }

    async fn count_live_assignments(&self, role: &RoleName, now: DateTime<Utc>) -> AppResult<u64> {
        let count = lock(&self.assignments)
            .values()
            .flatten()
            .filter(|assignment| assignment.role_name() == role && assignment.is_live_at(now))
            .count();
        Ok(count as u64)
    }
}

/// Presence store without expiry that keeps every applied batch.
#[derive(Default)]
pub(crate) struct FakePresenceStore {
    records: Mutex<HashMap<IdentityKey, HashMap<String, String>>>,
    members: Mutex<HashMap<PresenceScope, BTreeSet<String>>>,
    batches: Mutex<Vec<Vec<PresenceOp>>>,
    offline: AtomicBool,
}

impl FakePresenceStore {
    pub(crate) fn batches(&self) -> Vec<Vec<PresenceOp>> {
        lock(&self.batches).clone()
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub(crate) fn expire_record(&self, identity: IdentityKey) {
        lock(&self.records).remove(&identity);
    }

    pub(crate) fn write_raw(&self, identity: IdentityKey, fields: &[(&str, &str)]) {
        lock(&self.records).insert(
            identity,
            fields
                .iter()
                .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
                .collect(),
        );
    }

    pub(crate) fn insert_member(&self, scope: PresenceScope, display_name: &str) {
        lock(&self.members)
            .entry(scope)
            .or_default()
            .insert(display_name.to_owned());
    }
}

#[async_trait]
impl PresenceStore for FakePresenceStore {
    async fn apply(&self, batch: Vec<PresenceOp>) -> AppResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::Unavailable("presence store offline".to_owned()));
        }

        let mut records = lock(&self.records);
        let mut members = lock(&self.members);
        for op in &batch {
            match op {
                PresenceOp::DeleteRecord { identity } => {
                    records.remove(identity);
                }
                PresenceOp::WriteRecord {
                    identity, fields, ..
                } => {
                    records
                        .entry(*identity)
                        .or_default()
                        .extend(fields.iter().cloned());
                }
                PresenceOp::AddMember {
                    scope,
                    display_name,
                    ..
                } => {
                    members
                        .entry(scope.clone())
                        .or_default()
                        .insert(display_name.clone());
                }
                PresenceOp::RemoveMember {
                    scope,
                    display_name,
                } => {
                    if let Some(set) = members.get_mut(scope) {
                        set.remove(display_name);
                    }
                }
            }
        }
        lock(&self.batches).push(batch);
        Ok(())
    }

    async fn read_record(
        &self,
        identity: IdentityKey,
    ) -> AppResult<Option<HashMap<String, String>>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::Unavailable("presence store offline".to_owned()));
        }

        Ok(lock(&self.records).get(&identity).cloned())
    }

    async fn count_members(&self, scope: &PresenceScope) -> AppResult<u64> {
        Ok(lock(&self.members).get(scope).map_or(0, |set| set.len() as u64))
    }

    async fn list_members(&self, scope: &PresenceScope) -> AppResult<Vec<String>> {
        Ok(lock(&self.members)
            .get(scope)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub(crate) struct RecordingPublisher {
    published: Mutex<Vec<(String, String)>>,
    offline: AtomicBool,
}

impl RecordingPublisher {
    pub(crate) fn published(&self) -> Vec<(String, String)> {
        lock(&self.published).clone()
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl SyncPublisher for RecordingPublisher {
    async fn publish(&self, channel: &str, payload: &str) -> AppResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::Unavailable("sync bus offline".to_owned()));
        }

        lock(&self.published).push((channel.to_owned(), payload.to_owned()));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingRefresher {
    refreshed: Mutex<Vec<IdentityKey>>,
}

impl RecordingRefresher {
    pub(crate) fn refreshed(&self) -> Vec<IdentityKey> {
        lock(&self.refreshed).clone()
    }
}

#[async_trait]
impl PermissionRefresher for RecordingRefresher {
    async fn refresh(&self, identity: IdentityKey) -> AppResult<()> {
        lock(&self.refreshed).push(identity);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    delivered: Mutex<Vec<BroadcastMessage>>,
}

impl RecordingSink {
    pub(crate) fn delivered(&self) -> Vec<BroadcastMessage> {
        lock(&self.delivered).clone()
    }
}

#[async_trait]
impl BroadcastSink for RecordingSink {
    async fn deliver(&self, message: BroadcastMessage) -> AppResult<()> {
        lock(&self.delivered).push(message);
        Ok(())
    }
}
