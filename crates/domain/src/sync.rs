use std::str::FromStr;

use keystone_core::{AppError, AppResult, IdentityKey};
use serde::{Deserialize, Serialize};

use crate::role::RoleName;

/// Publish/subscribe channels known to Keystone processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncChannel {
    /// One identity's role assignments changed.
    IdentityRoles,
    /// One role definition changed.
    RoleDefinitions,
    /// User-facing notifications rendered by every process.
    NetworkBroadcast,
    /// Profile documents changed; owned by the profile subsystem.
    Profiles,
    /// Cosmetic unlocks changed; owned by the cosmetics subsystem.
    Cosmetics,
    /// Player preferences changed; owned by the preferences subsystem.
    Preferences,
}

impl SyncChannel {
    /// Returns the wire channel name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IdentityRoles => "sync:identity-roles",
            Self::RoleDefinitions => "sync:role-definitions",
            Self::NetworkBroadcast => "broadcast:network",
            Self::Profiles => "sync:profiles",
            Self::Cosmetics => "sync:cosmetics",
            Self::Preferences => "sync:preferences",
        }
    }
}

impl FromStr for SyncChannel {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sync:identity-roles" => Ok(Self::IdentityRoles),
            "sync:role-definitions" => Ok(Self::RoleDefinitions),
            "broadcast:network" => Ok(Self::NetworkBroadcast),
            "sync:profiles" => Ok(Self::Profiles),
            "sync:cosmetics" => Ok(Self::Cosmetics),
            "sync:preferences" => Ok(Self::Preferences),
            _ => Err(AppError::Validation(format!(
                "unknown sync channel '{value}'"
            ))),
        }
    }
}

/// Parses an identity-roles payload, which is the bare identity key.
pub fn parse_identity_payload(payload: &str) -> AppResult<IdentityKey> {
    IdentityKey::from_str(payload)
}

/// Parses a role-definitions payload, which is the bare role name.
pub fn parse_role_payload(payload: &str) -> AppResult<RoleName> {
    RoleName::new(payload)
}

/// User-facing notification carried on the broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BroadcastMessage {
    /// An identity received a role.
    RoleActivated {
        /// Receiving identity.
        identity: IdentityKey,
        /// Receiving identity's display name.
        display_name: String,
        /// Activated role.
        role_name: String,
        /// Activated role's display name.
        role_display_name: String,
    },
    /// Free-form network announcement.
    Announcement {
        /// Announcement text.
        text: String,
    },
}

impl BroadcastMessage {
    /// Encodes the message as a JSON payload.
    pub fn encode(&self) -> AppResult<String> {
        serde_json::to_string(self).map_err(|error| {
            AppError::Internal(format!("failed to encode broadcast message: {error}"))
        })
    }

    /// Decodes a JSON payload.
    pub fn decode(payload: &str) -> AppResult<Self> {
        serde_json::from_str(payload).map_err(|error| {
            AppError::Validation(format!("malformed broadcast payload: {error}"))
        })
    }
}
