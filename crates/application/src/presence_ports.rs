use std::collections::HashMap;

use async_trait::async_trait;
use keystone_core::{AppResult, IdentityKey};
use keystone_domain::PresenceScope;

/// One mutation inside an atomic presence batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceOp {
    /// Deletes the identity's record.
    DeleteRecord {
        /// Record owner.
        identity: IdentityKey,
    },
    /// Merges fields into the identity's record and resets its expiry.
    WriteRecord {
        /// Record owner.
        identity: IdentityKey,
        /// Field values to set.
        fields: Vec<(String, String)>,
        /// Record time-to-live.
        ttl_seconds: u32,
    },
    /// Adds or refreshes one member of a scope set.
    AddMember {
        /// Target set.
        scope: PresenceScope,
        /// Member display name.
        display_name: String,
        /// Member time-to-live.
        ttl_seconds: u32,
    },
    /// Removes one member of a scope set.
    RemoveMember {
        /// Target set.
        scope: PresenceScope,
        /// Member display name.
        display_name: String,
    },
}

/// Expiring store of presence records and online-membership sets.
///
/// Expired records and members must read as absent without any cleanup call.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Applies all operations as one atomic batch.
    async fn apply(&self, batch: Vec<PresenceOp>) -> AppResult<()>;

    /// Reads the raw fields of one unexpired record.
    async fn read_record(&self, identity: IdentityKey)
    -> AppResult<Option<HashMap<String, String>>>;

    /// Counts unexpired members of one scope set.
    async fn count_members(&self, scope: &PresenceScope) -> AppResult<u64>;

    /// Lists unexpired members of one scope set.
    async fn list_members(&self, scope: &PresenceScope) -> AppResult<Vec<String>>;
}
