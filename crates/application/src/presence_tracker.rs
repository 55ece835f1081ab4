use std::sync::Arc;

use chrono::Utc;
use keystone_core::{AppError, AppResult, IdentityKey};
use keystone_domain::{
    ConnectionState, FIELD_BACKEND, FIELD_DISPLAY_NAME, FIELD_EDGE, PresenceRecord, PresenceScope,
};
use tracing::{debug, warn};

use crate::{PresenceOp, PresenceStore};

/// Expiry settings for presence records and membership sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceConfig {
    /// Time-to-live of one presence record.
    pub session_ttl_seconds: u32,
    /// Time-to-live of one set membership.
    pub set_ttl_seconds: u32,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            session_ttl_seconds: 300,
            set_ttl_seconds: 90,
        }
    }
}

impl PresenceConfig {
    /// Validates expiry settings.
    pub fn validate(&self) -> AppResult<()> {
        if self.session_ttl_seconds == 0 || self.set_ttl_seconds == 0 {
            return Err(AppError::Validation(
                "presence ttl values must be greater than zero".to_owned(),
            ));
        }

        if self.set_ttl_seconds > self.session_ttl_seconds {
            return Err(AppError::Validation(
                "presence set ttl must not exceed the session ttl".to_owned(),
            ));
        }

        Ok(())
    }
}

/// Input for opening one presence session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStart {
    /// Connecting identity.
    pub identity: IdentityKey,
    /// Display name stored in membership sets.
    pub display_name: String,
    /// Edge process accepting the connection.
    pub edge_id: String,
    /// Backend process the identity is routed to first.
    pub backend: Option<String>,
    /// Client protocol version.
    pub protocol_version: Option<i32>,
}

/// Maintains expiring presence records and online-membership sets.
///
/// Every mutation is one atomic store batch that also refreshes the expiry of
/// everything it touches. Records that are never ended disappear on their own
/// once heartbeats stop.
#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<dyn PresenceStore>,
    config: PresenceConfig,
}

impl PresenceTracker {
    /// Creates a tracker over one presence store.
    pub fn new(store: Arc<dyn PresenceStore>, config: PresenceConfig) -> AppResult<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    /// Returns the expiry settings.
    #[must_use]
    pub fn config(&self) -> PresenceConfig {
        self.config
    }

    /// Records a new connection in the `CONNECTING` state.
    pub async fn start_session(&self, start: SessionStart) -> AppResult<()> {
        let display_name = required("display_name", start.display_name)?;
        let edge_id = required("edge_id", start.edge_id)?;
        let backend = start
            .backend
            .map(|backend| required("backend", backend))
            .transpose()?;

        let record = PresenceRecord {
            identity: start.identity,
            display_name,
            state: ConnectionState::Connecting,
            edge_id,
            backend,
            protocol_version: start.protocol_version,
            ping_ms: None,
            last_heartbeat_ms: Utc::now().timestamp_millis(),
        };

        let mut batch = vec![
            PresenceOp::DeleteRecord {
                identity: record.identity,
            },
            self.write_record(&record),
        ];
        batch.extend(self.membership_refresh(&record));

        self.store.apply(batch).await?;
        debug!(
            identity = %record.identity,
            edge = %record.edge_id,
            "presence session started"
        );
        Ok(())
    }

    /// Moves an identity between backend processes.
    ///
    /// Returns `false` when the record already expired; nothing is written.
    pub async fn update_backend(
        &self,
        identity: IdentityKey,
        display_name: &str,
        old_backend: Option<&str>,
        new_backend: &str,
    ) -> AppResult<bool> {
        let display_name = required("display_name", display_name.to_owned())?;
        let new_backend = required("backend", new_backend.to_owned())?;
        let Some(mut record) = self.record(identity).await? else {
            return Ok(false);
        };

        let mut stale: Vec<(String, String)> = Vec::new();
        for backend in [record.backend.as_deref(), old_backend].into_iter().flatten() {
            for name in [record.display_name.as_str(), display_name.as_str()] {
                let entry = (backend.to_owned(), name.to_owned());
                if backend != new_backend && !stale.contains(&entry) {
                    stale.push(entry);
                }
            }
        }

        record.backend = Some(new_backend);
        record.last_heartbeat_ms = Utc::now().timestamp_millis();

        let mut batch = vec![self.write_record(&record)];
        batch.extend(stale.into_iter().map(|(backend, display_name)| {
            PresenceOp::RemoveMember {
                scope: PresenceScope::Backend(backend),
                display_name,
            }
        }));
        batch.extend(self.membership_refresh(&record));

        self.store.apply(batch).await?;
        Ok(true)
    }

    /// Refreshes a live record and its memberships.
    ///
    /// Returns `false` when the record already expired; the caller must start a
    /// new session.
    pub async fn heartbeat(
        &self,
        identity: IdentityKey,
        backend: Option<&str>,
        ping_ms: Option<u32>,
        protocol_version: Option<i32>,
    ) -> AppResult<bool> {
        let Some(mut record) = self.record(identity).await? else {
            return Ok(false);
        };

        let mut batch = Vec::new();
        if let Some(backend) = backend.filter(|value| !value.trim().is_empty()) {
            if let Some(previous) = record.backend.as_deref().filter(|previous| *previous != backend)
            {
                batch.push(PresenceOp::RemoveMember {
                    scope: PresenceScope::Backend(previous.to_owned()),
                    display_name: record.display_name.clone(),
                });
            }
            record.backend = Some(backend.to_owned());
        }
        if ping_ms.is_some() {
            record.ping_ms = ping_ms;
        }
        if protocol_version.is_some() {
            record.protocol_version = protocol_version;
        }
        record.last_heartbeat_ms = Utc::now().timestamp_millis();

        batch.insert(0, self.write_record(&record));
        batch.extend(self.membership_refresh(&record));

        self.store.apply(batch).await?;
        Ok(true)
    }

    /// Changes the connection state of a live record.
    ///
    /// Returns `false` when the record already expired.
    pub async fn set_state(&self, identity: IdentityKey, state: ConnectionState) -> AppResult<bool> {
        let Some(mut record) = self.record(identity).await? else {
            return Ok(false);
        };

        record.state = state;
        record.last_heartbeat_ms = Utc::now().timestamp_millis();

        let mut batch = vec![self.write_record(&record)];
        batch.extend(self.membership_refresh(&record));

        self.store.apply(batch).await?;
        Ok(true)
    }

    /// Removes a record and its memberships.
    ///
    /// Idempotent. When the caller does not know the display name the stored
    /// record supplies it; without either only the record is deleted. A stored
    /// record that cannot be decoded is still deleted.
    pub async fn end_session(
        &self,
        identity: IdentityKey,
        display_name: Option<&str>,
    ) -> AppResult<()> {
        let stored = self.store.read_record(identity).await?;

        let mut batch = vec![PresenceOp::DeleteRecord { identity }];
        let caller_name = display_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_owned);

        match stored.map(|fields| (PresenceRecord::from_fields(identity, &fields), fields)) {
            Some((Ok(record), _)) => {
                batch.extend(self.membership_removal(&record));
                if let Some(name) = caller_name.filter(|name| *name != record.display_name) {
                    batch.extend(removal_for(
                        name,
                        Some(record.edge_id.as_str()),
                        record.backend.as_deref(),
                    ));
                }
            }
            Some((Err(error), fields)) => {
                warn!(
                    identity = %identity,
                    error = %error,
                    "deleting undecodable presence record"
                );
                let names = [caller_name, fields.get(FIELD_DISPLAY_NAME).cloned()];
                let mut seen: Vec<String> = Vec::new();
                for name in names.into_iter().flatten() {
                    if seen.contains(&name) {
                        continue;
                    }
                    seen.push(name.clone());
                    batch.extend(removal_for(
                        name,
                        fields.get(FIELD_EDGE).map(String::as_str),
                        fields.get(FIELD_BACKEND).map(String::as_str),
                    ));
                }
            }
            None => {
                if let Some(name) = caller_name {
                    batch.extend(removal_for(name, None, None));
                }
            }
        }

        self.store.apply(batch).await?;
        debug!(identity = %identity, "presence session ended");
        Ok(())
    }

    /// Returns the live record of one identity.
    pub async fn record(&self, identity: IdentityKey) -> AppResult<Option<PresenceRecord>> {
        self.store
            .read_record(identity)
            .await?
            .map(|fields| PresenceRecord::from_fields(identity, &fields))
            .transpose()
    }

    /// Returns whether a live record exists.
    pub async fn is_online(&self, identity: IdentityKey) -> AppResult<bool> {
        Ok(self.store.read_record(identity).await?.is_some())
    }

    /// Counts live members of one scope.
    pub async fn count(&self, scope: &PresenceScope) -> AppResult<u64> {
        self.store.count_members(scope).await
    }

    /// Lists live member display names of one scope.
    pub async fn members(&self, scope: &PresenceScope) -> AppResult<Vec<String>> {
        let mut members = self.store.list_members(scope).await?;
        members.sort_unstable_by_key(|name| name.to_lowercase());
        Ok(members)
    }

    fn write_record(&self, record: &PresenceRecord) -> PresenceOp {
        PresenceOp::WriteRecord {
            identity: record.identity,
            fields: record.to_fields(),
            ttl_seconds: self.config.session_ttl_seconds,
        }
    }

    fn add_member(&self, scope: PresenceScope, display_name: &str) -> PresenceOp {
        PresenceOp::AddMember {
            scope,
            display_name: display_name.to_owned(),
            ttl_seconds: self.config.set_ttl_seconds,
        }
    }

    fn membership_refresh(&self, record: &PresenceRecord) -> Vec<PresenceOp> {
        scopes_of(record)
            .into_iter()
            .map(|scope| self.add_member(scope, record.display_name.as_str()))
            .collect()
    }

    fn membership_removal(&self, record: &PresenceRecord) -> Vec<PresenceOp> {
        scopes_of(record)
            .into_iter()
            .map(|scope| PresenceOp::RemoveMember {
                scope,
                display_name: record.display_name.clone(),
            })
            .collect()
    }
}

fn scopes_of(record: &PresenceRecord) -> Vec<PresenceScope> {
    let mut scopes = vec![
        PresenceScope::Network,
        PresenceScope::Edge(record.edge_id.clone()),
    ];
    if let Some(backend) = &record.backend {
        scopes.push(PresenceScope::Backend(backend.clone()));
    }
    scopes
}

fn removal_for(display_name: String, edge: Option<&str>, backend: Option<&str>) -> Vec<PresenceOp> {
    let mut scopes = vec![PresenceScope::Network];
    scopes.extend(edge.map(|edge| PresenceScope::Edge(edge.to_owned())));
    scopes.extend(backend.map(|backend| PresenceScope::Backend(backend.to_owned())));
    scopes
        .into_iter()
        .map(|scope| PresenceOp::RemoveMember {
            scope,
            display_name: display_name.clone(),
        })
        .collect()
}

fn required(field: &str, value: String) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!(
            "presence {field} must not be empty"
        )));
    }

    Ok(trimmed.to_owned())
}

#[cfg(test)]
mod tests;
