//! Bounded Redis client shared by the presence store and sync publisher.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use keystone_core::{AppError, AppResult};
use redis::aio::ConnectionManager;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Connection settings for the shared store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreClientConfig {
    /// Maximum concurrent store operations per process.
    pub max_connections: usize,
    /// Bound on connecting and on waiting for a free slot.
    pub connect_timeout: Duration,
}

impl Default for StoreClientConfig {
    fn default() -> Self {
        Self {
            max_connections: 16,
            connect_timeout: Duration::from_millis(3_000),
        }
    }
}

/// Multiplexed Redis connection with a per-process concurrency bound.
///
/// Callers over the bound queue for a slot; only waiting longer than the
/// connect timeout fails.
#[derive(Clone)]
pub struct RedisStoreClient {
    client: redis::Client,
    manager: ConnectionManager,
    permits: Arc<Semaphore>,
    connect_timeout: Duration,
}

impl RedisStoreClient {
    /// Connects to Redis at `url`.
    pub async fn connect(url: &str, config: StoreClientConfig) -> AppResult<Self> {
        if config.max_connections == 0 {
            return Err(AppError::Validation(
                "store max_connections must be greater than zero".to_owned(),
            ));
        }

        let client = redis::Client::open(url)
            .map_err(|error| AppError::Validation(format!("invalid redis url: {error}")))?;

        let manager = tokio::time::timeout(config.connect_timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "redis connection not established after {} ms",
                    config.connect_timeout.as_millis()
                ))
            })?
            .map_err(|error| store_error("failed to connect to redis", &error))?;

        Ok(Self {
            client,
            manager,
            permits: Arc::new(Semaphore::new(config.max_connections)),
            connect_timeout: config.connect_timeout,
        })
    }

    /// Returns the underlying client for dedicated connections such as pub/sub.
    #[must_use]
    pub fn client(&self) -> &redis::Client {
        &self.client
    }

    /// Waits for a free slot and returns a connection holding it.
    pub async fn connection(&self) -> AppResult<StoreConnection> {
        let permit = tokio::time::timeout(self.connect_timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "no free redis connection slot after {} ms",
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|error| AppError::Internal(format!("redis connection slots closed: {error}")))?;

        Ok(StoreConnection {
            connection: self.manager.clone(),
            _permit: permit,
        })
    }
}

/// Connection that releases its slot when dropped.
pub struct StoreConnection {
    connection: ConnectionManager,
    _permit: OwnedSemaphorePermit,
}

impl Deref for StoreConnection {
    type Target = ConnectionManager;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl DerefMut for StoreConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.connection
    }
}

/// Maps a Redis failure to the store-connectivity error category.
pub(crate) fn store_error(context: &str, error: &redis::RedisError) -> AppError {
    AppError::Unavailable(format!("{context}: {error}"))
}
