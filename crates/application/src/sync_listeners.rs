use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use keystone_core::{AppResult, IdentityKey};
use keystone_domain::{BroadcastMessage, SyncChannel, parse_identity_payload, parse_role_payload};
use tracing::{debug, info, warn};

use crate::{
    BroadcastSink, ChannelListener, PermissionRefresher, PermissionSessionCache, RoleGraph,
};

/// Recomputes one identity's snapshot after its assignments changed elsewhere.
///
/// Identities this process neither caches nor is loading are ignored; they
/// are not connected here.
pub struct IdentityRolesListener {
    cache: PermissionSessionCache,
    refresher: Arc<dyn PermissionRefresher>,
}

impl IdentityRolesListener {
    /// Creates the listener.
    #[must_use]
    pub fn new(cache: PermissionSessionCache, refresher: Arc<dyn PermissionRefresher>) -> Self {
        Self { cache, refresher }
    }
}

#[async_trait]
impl ChannelListener for IdentityRolesListener {
    fn channel(&self) -> &str {
        SyncChannel::IdentityRoles.as_str()
    }

    async fn on_message(&self, payload: &str) -> AppResult<()> {
        let identity = parse_identity_payload(payload)?;
        if !self.cache.invalidate(identity) {
            debug!(identity = %identity, "ignoring role sync for identity not held locally");
            return Ok(());
        }

        self.cache.load_async(identity).await?;
        self.refresher.refresh(identity).await
    }
}

/// Rebuilds local state after a role definition changed elsewhere.
///
/// Every local snapshot may inherit the changed role, so all of them are
/// invalidated and recomputed.
pub struct RoleDefinitionsListener {
    graph: Arc<RoleGraph>,
    cache: PermissionSessionCache,
    refresher: Arc<dyn PermissionRefresher>,
}

impl RoleDefinitionsListener {
    /// Creates the listener.
    #[must_use]
    pub fn new(
        graph: Arc<RoleGraph>,
        cache: PermissionSessionCache,
        refresher: Arc<dyn PermissionRefresher>,
    ) -> Self {
        Self {
            graph,
            cache,
            refresher,
        }
    }

    async fn recompute(&self, identity: IdentityKey) -> AppResult<()> {
        self.cache.load_async(identity).await?;
        self.refresher.refresh(identity).await
    }
}

#[async_trait]
impl ChannelListener for RoleDefinitionsListener {
    fn channel(&self) -> &str {
        SyncChannel::RoleDefinitions.as_str()
    }

    async fn on_message(&self, payload: &str) -> AppResult<()> {
        let role = parse_role_payload(payload)?;
        let exists = self.graph.reload_role(&role).await?;

        let identities = self.cache.invalidate_all();
        let results = join_all(identities.iter().map(|identity| self.recompute(*identity))).await;

        for (identity, result) in identities.iter().zip(results) {
            if let Err(error) = result {
                warn!(
                    identity = %identity,
                    error = %error,
                    "failed to recompute snapshot after role change"
                );
            }
        }

        info!(
            role = %role,
            exists,
            recomputed = identities.len(),
            "applied role definition change"
        );
        Ok(())
    }
}

/// Hands network broadcasts to the host for rendering.
pub struct NetworkBroadcastListener {
    sink: Arc<dyn BroadcastSink>,
}

impl NetworkBroadcastListener {
    /// Creates the listener.
    #[must_use]
    pub fn new(sink: Arc<dyn BroadcastSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl ChannelListener for NetworkBroadcastListener {
    fn channel(&self) -> &str {
        SyncChannel::NetworkBroadcast.as_str()
    }

    async fn on_message(&self, payload: &str) -> AppResult<()> {
        let message = BroadcastMessage::decode(payload)?;
        self.sink.deliver(message).await
    }
}

/// Builds the listeners every process registers at startup.
#[must_use]
pub fn core_listeners(
    graph: Arc<RoleGraph>,
    cache: PermissionSessionCache,
    refresher: Arc<dyn PermissionRefresher>,
    sink: Arc<dyn BroadcastSink>,
) -> Vec<Arc<dyn ChannelListener>> {
    vec![
        Arc::new(IdentityRolesListener::new(cache.clone(), refresher.clone())),
        Arc::new(RoleDefinitionsListener::new(graph, cache, refresher)),
        Arc::new(NetworkBroadcastListener::new(sink)),
    ]
}
