use std::sync::Arc;
use std::time::Duration;

use keystone_core::{AppError, AppResult, IdentityKey};
use keystone_domain::{ConnectionState, PermissionSnapshot, RoleName};
use tracing::{debug, info, warn};

use crate::{PermissionSessionCache, PresenceTracker, RoleService, SessionStart};

/// Message shown to a player whose permissions could not be loaded in time.
pub const DATA_STILL_LOADING_MESSAGE: &str =
    "Your profile data is still loading. Please reconnect in a moment.";

/// Upper bound accepted for the preload wait.
const MAX_PRELOAD_TIMEOUT: Duration = Duration::from_millis(9_999);

/// Session cache settings applied at connection time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCacheConfig {
    /// Longest wait for a snapshot before the connection is refused.
    pub preload_timeout: Duration,
    /// Role every identity holds implicitly.
    pub fallback_role: String,
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        Self {
            preload_timeout: Duration::from_millis(5_000),
            fallback_role: "default".to_owned(),
        }
    }
}

impl SessionCacheConfig {
    /// Checks the timeout range and returns the parsed fallback role name.
    pub fn validate(&self) -> AppResult<RoleName> {
        if self.preload_timeout.is_zero() || self.preload_timeout > MAX_PRELOAD_TIMEOUT {
            return Err(AppError::Validation(format!(
                "preload timeout must be between 1 and {} ms",
                MAX_PRELOAD_TIMEOUT.as_millis()
            )));
        }

        RoleName::new(self.fallback_role.as_str())
    }
}

/// Why a connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    /// The snapshot computation did not finish within the preload timeout.
    Timeout,
    /// The snapshot computation failed.
    LoadFailed,
}

/// Refusal returned to the host, which disconnects the player with `message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRejection {
    /// Refusal category.
    pub reason: RejectionReason,
    /// User-facing disconnect message.
    pub message: &'static str,
    /// Underlying failure.
    pub cause: AppError,
}

/// Details of a connection the host is about to accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionAccept {
    /// Connecting identity.
    pub identity: IdentityKey,
    /// Player display name.
    pub display_name: String,
    /// Edge process handling the connection.
    pub edge_id: String,
    /// First backend process, when already known.
    pub backend: Option<String>,
    /// Client protocol version.
    pub protocol_version: Option<i32>,
}

/// Host connection hooks tying the session cache to presence tracking.
#[derive(Clone)]
pub struct ConnectionLifecycle {
    cache: PermissionSessionCache,
    presence: PresenceTracker,
    roles: RoleService,
    preload_timeout: Duration,
}

impl ConnectionLifecycle {
    /// Creates lifecycle hooks with a bounded preload wait.
    #[must_use]
    pub fn new(
        cache: PermissionSessionCache,
        presence: PresenceTracker,
        roles: RoleService,
        preload_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            presence,
            roles,
            preload_timeout,
        }
    }

    /// Starts computing the snapshot before the connection is accepted.
    pub fn on_early_connect(&self, identity: IdentityKey) {
        let _pending = self.cache.load(identity);
        debug!(identity = %identity, "started permission preload");
    }

    /// Waits for the identity's snapshot and marks the identity online.
    ///
    /// Fails closed: when the snapshot is not ready within the preload timeout,
    /// or cannot be computed, the attempt is abandoned, nothing is published to
    /// the cache and the connection must be refused.
    pub async fn on_connection_accept(
        &self,
        accept: ConnectionAccept,
    ) -> Result<Arc<PermissionSnapshot>, ConnectionRejection> {
        let identity = accept.identity;
        if let Err(error) = self
            .presence
            .start_session(SessionStart {
                identity,
                display_name: accept.display_name.clone(),
                edge_id: accept.edge_id.clone(),
                backend: accept.backend.clone(),
                protocol_version: accept.protocol_version,
            })
            .await
        {
            warn!(identity = %identity, error = %error, "failed to record connecting presence");
        }

        let pending = self
            .cache
            .preloaded(identity)
            .unwrap_or_else(|| self.cache.load(identity));

        let snapshot = match tokio::time::timeout(self.preload_timeout, pending).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(error)) => {
                return Err(self
                    .reject(identity, RejectionReason::LoadFailed, error)
                    .await);
            }
            Err(_) => {
                let error = AppError::Timeout(format!(
                    "permission snapshot for '{identity}' not ready after {} ms",
                    self.preload_timeout.as_millis()
                ));
                return Err(self.reject(identity, RejectionReason::Timeout, error).await);
            }
        };

        match self
            .presence
            .set_state(identity, ConnectionState::Online)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(identity = %identity, "presence record vanished before going online"),
            Err(error) => warn!(identity = %identity, error = %error, "failed to mark presence online"),
        }

        match self
            .roles
            .deliver_pending_notifications(identity, accept.display_name.as_str())
            .await
        {
            Ok(0) => {}
            Ok(delivered) => debug!(identity = %identity, delivered, "delivered pending role notifications"),
            Err(error) => warn!(
                identity = %identity,
                error = %error,
                "failed to deliver pending role notifications"
            ),
        }

        info!(
            identity = %identity,
            role = %snapshot.primary_role(),
            edge = %accept.edge_id,
            "connection accepted"
        );
        Ok(snapshot)
    }

    /// Records a move between backend processes.
    pub async fn on_backend_switch(
        &self,
        identity: IdentityKey,
        display_name: &str,
        old_backend: Option<&str>,
        new_backend: &str,
    ) {
        match self
            .presence
            .update_backend(identity, display_name, old_backend, new_backend)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(identity = %identity, "backend switch for identity without presence record");
            }
            Err(error) => {
                warn!(identity = %identity, error = %error, "failed to record backend switch");
            }
        }
    }

    /// Drops the identity's snapshot and presence.
    pub async fn on_disconnect(&self, identity: IdentityKey, display_name: Option<&str>) {
        self.cache.abandon(identity);
        self.cache.invalidate(identity);

        if let Err(error) = self.presence.end_session(identity, display_name).await {
            warn!(identity = %identity, error = %error, "failed to end presence session");
        }
        debug!(identity = %identity, "connection closed");
    }

    async fn reject(
        &self,
        identity: IdentityKey,
        reason: RejectionReason,
        cause: AppError,
    ) -> ConnectionRejection {
        self.cache.abandon(identity);
        self.cache.invalidate(identity);

        if let Err(error) = self.presence.end_session(identity, None).await {
            warn!(identity = %identity, error = %error, "failed to clear presence of refused connection");
        }

        warn!(identity = %identity, reason = ?reason, error = %cause, "refusing connection");
        ConnectionRejection {
            reason,
            message: DATA_STILL_LOADING_MESSAGE,
            cause,
        }
    }
}
