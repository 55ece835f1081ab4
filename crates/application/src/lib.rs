//! Application services and ports.

#![forbid(unsafe_code)]

mod connection_lifecycle;
mod listener_registry;
mod presence_ports;
mod presence_tracker;
mod role_graph;
mod role_ports;
mod role_service;
mod session_cache;
mod snapshot_loader;
mod sync_listeners;
mod sync_ports;

#[cfg(test)]
mod test_support;

pub use connection_lifecycle::{
    ConnectionAccept, ConnectionLifecycle, ConnectionRejection, DATA_STILL_LOADING_MESSAGE,
    RejectionReason, SessionCacheConfig,
};
pub use listener_registry::{ListenerRegistry, RegistryChange};
pub use presence_ports::{PresenceOp, PresenceStore};
pub use presence_tracker::{PresenceConfig, PresenceTracker, SessionStart};
pub use role_graph::RoleGraph;
pub use role_ports::{ProfileRepository, RoleRepository};
pub use role_service::{AssignRoleInput, RoleService};
pub use session_cache::{PermissionSessionCache, SnapshotFuture, SnapshotSource};
pub use snapshot_loader::SnapshotLoader;
pub use sync_listeners::{
    IdentityRolesListener, NetworkBroadcastListener, RoleDefinitionsListener, core_listeners,
};
pub use sync_ports::{
    BroadcastSink, ChannelListener, PermissionProvider, PermissionRefresher, SyncPublisher,
};
