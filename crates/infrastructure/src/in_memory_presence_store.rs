use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use keystone_application::{PresenceOp, PresenceStore};
use keystone_core::{AppResult, IdentityKey};
use keystone_domain::PresenceScope;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct StoredRecord {
    fields: HashMap<String, String>,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct PresenceState {
    records: HashMap<IdentityKey, StoredRecord>,
    members: HashMap<PresenceScope, HashMap<String, Instant>>,
}

impl PresenceState {
    fn apply(&mut self, op: PresenceOp, now: Instant) {
        match op {
            PresenceOp::DeleteRecord { identity } => {
                self.records.remove(&identity);
            }
            PresenceOp::WriteRecord {
                identity,
                fields,
                ttl_seconds,
            } => {
                let expires_at = now + Duration::from_secs(u64::from(ttl_seconds));
                match self.records.get_mut(&identity) {
                    Some(record) if record.expires_at > now => {
                        record.fields.extend(fields);
                        record.expires_at = expires_at;
                    }
                    _ => {
                        self.records.insert(
                            identity,
                            StoredRecord {
                                fields: fields.into_iter().collect(),
                                expires_at,
                            },
                        );
                    }
                }
            }
            PresenceOp::AddMember {
                scope,
                display_name,
                ttl_seconds,
            } => {
                let set = self.members.entry(scope).or_default();
                set.retain(|_, expires_at| *expires_at > now);
                set.insert(
                    display_name,
                    now + Duration::from_secs(u64::from(ttl_seconds)),
                );
            }
            PresenceOp::RemoveMember {
                scope,
                display_name,
            } => {
                if let Some(set) = self.members.get_mut(&scope) {
                    set.remove(&display_name);
                }
            }
        }
    }

    fn live_members(&self, scope: &PresenceScope, now: Instant) -> impl Iterator<Item = &String> {
        self.members
            .get(scope)
            .into_iter()
            .flatten()
            .filter(move |(_, expires_at)| **expires_at > now)
            .map(|(display_name, _)| display_name)
    }
}

/// In-memory presence store with expiry on the tokio clock.
///
/// Expired entries read as absent immediately and are pruned on later writes.
#[derive(Debug, Default)]
pub struct InMemoryPresenceStore {
    state: Mutex<PresenceState>,
}

impl InMemoryPresenceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceStore for InMemoryPresenceStore {
    async fn apply(&self, batch: Vec<PresenceOp>) -> AppResult<()> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        for op in batch {
            state.apply(op, now);
        }
        Ok(())
    }

    async fn read_record(
        &self,
        identity: IdentityKey,
    ) -> AppResult<Option<HashMap<String, String>>> {
        let now = Instant::now();
        let state = self.state.lock().await;
        Ok(state
            .records
            .get(&identity)
            .filter(|record| record.expires_at > now)
            .map(|record| record.fields.clone()))
    }

    async fn count_members(&self, scope: &PresenceScope) -> AppResult<u64> {
        let now = Instant::now();
        let state = self.state.lock().await;
        let count = state.live_members(scope, now).count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn list_members(&self, scope: &PresenceScope) -> AppResult<Vec<String>> {
        let now = Instant::now();
        let state = self.state.lock().await;
        Ok(state.live_members(scope, now).cloned().collect())
    }
}
