//! Redis pub/sub publisher for sync channels.

use async_trait::async_trait;
use keystone_application::SyncPublisher;
use keystone_core::AppResult;
use redis::AsyncCommands;
use tracing::debug;

use crate::redis_store_client::{RedisStoreClient, store_error};

/// Redis implementation of the sync publisher port.
#[derive(Clone)]
pub struct RedisSyncPublisher {
    client: RedisStoreClient,
}

impl RedisSyncPublisher {
    /// Creates a publisher over the shared store client.
    #[must_use]
    pub fn new(client: RedisStoreClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SyncPublisher for RedisSyncPublisher {
    async fn publish(&self, channel: &str, payload: &str) -> AppResult<()> {
        let mut connection = self.client.connection().await?;
        let receivers: i64 = connection
            .publish(channel, payload)
            .await
            .map_err(|error| store_error("failed to publish sync message", &error))?;

        debug!(channel = %channel, receivers, "published sync message");
        Ok(())
    }
}
