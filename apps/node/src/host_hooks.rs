use async_trait::async_trait;
use keystone_application::{BroadcastSink, PermissionRefresher};
use keystone_core::{AppResult, IdentityKey};
use keystone_domain::BroadcastMessage;
use tracing::info;

/// Refresher for a node without an attached game server.
#[derive(Debug, Clone)]
pub struct LoggingRefresher {
    node_id: String,
}

impl LoggingRefresher {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
        }
    }
}

#[async_trait]
impl PermissionRefresher for LoggingRefresher {
    async fn refresh(&self, identity: IdentityKey) -> AppResult<()> {
        info!(node_id = %self.node_id, identity = %identity, "permission snapshot refreshed");
        Ok(())
    }
}

/// Sink writing network broadcasts to the node log.
#[derive(Debug, Clone)]
pub struct LoggingSink {
    node_id: String,
}

impl LoggingSink {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
        }
    }
}

#[async_trait]
impl BroadcastSink for LoggingSink {
    async fn deliver(&self, message: BroadcastMessage) -> AppResult<()> {
        match message {
            BroadcastMessage::RoleActivated {
                identity,
                display_name,
                role_name,
                role_display_name,
            } => info!(
                node_id = %self.node_id,
                identity = %identity,
                display_name = %display_name,
                role_name = %role_name,
                role_display_name = %role_display_name,
                "role activated"
            ),
            BroadcastMessage::Announcement { text } => {
                info!(node_id = %self.node_id, text = %text, "network announcement");
            }
        }

        Ok(())
    }
}
