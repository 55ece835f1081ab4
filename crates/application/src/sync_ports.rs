use std::sync::Arc;

use async_trait::async_trait;
use keystone_core::{AppResult, IdentityKey};
use keystone_domain::{BroadcastMessage, PermissionSnapshot};

/// Fire-and-forget publisher for sync channels.
#[async_trait]
pub trait SyncPublisher: Send + Sync {
    /// Publishes one payload on one channel.
    async fn publish(&self, channel: &str, payload: &str) -> AppResult<()>;
}

/// Handler bound to exactly one channel.
#[async_trait]
pub trait ChannelListener: Send + Sync {
    /// Returns the channel this listener consumes.
    fn channel(&self) -> &str;

    /// Handles one payload received on the channel.
    async fn on_message(&self, payload: &str) -> AppResult<()>;
}

/// Host capability forcing re-evaluation of a connected identity's permissions.
///
/// Implementations must treat identities not connected to the local process
/// as a no-op.
#[async_trait]
pub trait PermissionRefresher: Send + Sync {
    /// Discards host-side permission decisions for one identity.
    async fn refresh(&self, identity: IdentityKey) -> AppResult<()>;
}

/// Host capability rendering network broadcasts.
#[async_trait]
pub trait BroadcastSink: Send + Sync {
    /// Renders one broadcast message to local players.
    async fn deliver(&self, message: BroadcastMessage) -> AppResult<()>;
}

/// Non-blocking permission lookups registered with the host runtime.
pub trait PermissionProvider: Send + Sync {
    /// Evaluates one permission against the materialized snapshot.
    ///
    /// Identities without a snapshot are denied.
    fn has_permission(&self, identity: IdentityKey, permission: &str) -> bool;

    /// Returns the materialized snapshot, if any.
    fn snapshot(&self, identity: IdentityKey) -> Option<Arc<PermissionSnapshot>>;
}
