//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod assignment;
mod catalog;
mod permission;
mod presence;
mod role;
mod snapshot;
mod sync;

pub use assignment::{AssignmentStatus, RoleAssignment, StoredAssignment};
pub use catalog::{InheritanceCycle, Resolution, RoleCatalog, RoleDisplay};
pub use permission::{GLOBAL_WILDCARD, NEGATION_PREFIX, PermissionSet, normalize_permission};
pub use presence::{
    ConnectionState, FIELD_BACKEND, FIELD_DISPLAY_NAME, FIELD_EDGE, FIELD_HEARTBEAT, FIELD_PING,
    FIELD_PROTOCOL, FIELD_STATE, PresenceRecord, PresenceScope,
};
pub use role::{ROLE_NAME_MAX_LENGTH, Role, RoleInput, RoleName, RoleType};
pub use snapshot::PermissionSnapshot;
pub use sync::{BroadcastMessage, SyncChannel, parse_identity_payload, parse_role_payload};
