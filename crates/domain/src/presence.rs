use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use keystone_core::{AppError, AppResult, IdentityKey};
use serde::{Deserialize, Serialize};

/// Hash field holding the connection state.
pub const FIELD_STATE: &str = "state";
/// Hash field holding the display name.
pub const FIELD_DISPLAY_NAME: &str = "name";
/// Hash field holding the owning edge process.
pub const FIELD_EDGE: &str = "edge";
/// Hash field holding the current backend process.
pub const FIELD_BACKEND: &str = "backend";
/// Hash field holding the client protocol version.
pub const FIELD_PROTOCOL: &str = "protocol";
/// Hash field holding the last reported ping.
pub const FIELD_PING: &str = "ping";
/// Hash field holding the last heartbeat in epoch milliseconds.
pub const FIELD_HEARTBEAT: &str = "heartbeat";

/// Connection phase of one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Accepted by an edge process, permissions still loading.
    Connecting,
    /// Fully connected.
    Online,
}

impl ConnectionState {
    /// Returns a stable storage value for this state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "CONNECTING",
            Self::Online => "ONLINE",
        }
    }
}

impl FromStr for ConnectionState {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "CONNECTING" => Ok(Self::Connecting),
            "ONLINE" => Ok(Self::Online),
            _ => Err(AppError::Validation(format!(
                "unknown connection state value '{value}'"
            ))),
        }
    }
}

/// Scope of one online-membership set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PresenceScope {
    /// Every connected identity.
    Network,
    /// Identities routed through one edge process.
    Edge(String),
    /// Identities playing on one backend process.
    Backend(String),
}

impl Display for PresenceScope {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => formatter.write_str("all"),
            Self::Edge(edge_id) => write!(formatter, "edge:{edge_id}"),
            Self::Backend(backend) => write!(formatter, "backend:{backend}"),
        }
    }
}

/// Live connection record of one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceRecord {
    /// Identity the record describes.
    pub identity: IdentityKey,
    /// Display name used in membership sets.
    pub display_name: String,
    /// Connection phase.
    pub state: ConnectionState,
    /// Owning edge process.
    pub edge_id: String,
    /// Current backend process.
    pub backend: Option<String>,
    /// Client protocol version.
    pub protocol_version: Option<i32>,
    /// Last reported round-trip time in milliseconds.
    pub ping_ms: Option<u32>,
    /// Last heartbeat in epoch milliseconds.
    pub last_heartbeat_ms: i64,
}

impl PresenceRecord {
    /// Encodes the record as store hash fields.
    #[must_use]
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            (FIELD_STATE.to_owned(), self.state.as_str().to_owned()),
            (FIELD_DISPLAY_NAME.to_owned(), self.display_name.clone()),
            (FIELD_EDGE.to_owned(), self.edge_id.clone()),
            (FIELD_HEARTBEAT.to_owned(), self.last_heartbeat_ms.to_string()),
        ];
        if let Some(backend) = &self.backend {
            fields.push((FIELD_BACKEND.to_owned(), backend.clone()));
        }
        if let Some(protocol_version) = self.protocol_version {
            fields.push((FIELD_PROTOCOL.to_owned(), protocol_version.to_string()));
        }
        if let Some(ping_ms) = self.ping_ms {
            fields.push((FIELD_PING.to_owned(), ping_ms.to_string()));
        }
        fields
    }

    /// Decodes a record from store hash fields.
    pub fn from_fields(identity: IdentityKey, fields: &HashMap<String, String>) -> AppResult<Self> {
        let required = |name: &str| {
            fields.get(name).cloned().ok_or_else(|| {
                AppError::Internal(format!(
                    "presence record for '{identity}' is missing field '{name}'"
                ))
            })
        };

        Ok(Self {
            identity,
            display_name: required(FIELD_DISPLAY_NAME)?,
            state: ConnectionState::from_str(required(FIELD_STATE)?.as_str())?,
            edge_id: required(FIELD_EDGE)?,
            backend: fields.get(FIELD_BACKEND).cloned(),
            protocol_version: parse_optional(fields, FIELD_PROTOCOL)?,
            ping_ms: parse_optional(fields, FIELD_PING)?,
            last_heartbeat_ms: required(FIELD_HEARTBEAT)?.parse::<i64>().map_err(|error| {
                AppError::Internal(format!("invalid presence heartbeat value: {error}"))
            })?,
        })
    }
}

fn parse_optional<T>(fields: &HashMap<String, String>, name: &str) -> AppResult<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    fields
        .get(name)
        .map(|value| {
            value.parse::<T>().map_err(|error| {
                AppError::Internal(format!("invalid presence field '{name}' value '{value}': {error}"))
            })
        })
        .transpose()
}
