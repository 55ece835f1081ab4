//! Long-lived Redis pub/sub consumer feeding the listener registry.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use keystone_application::{ListenerRegistry, RegistryChange};
use keystone_core::{AppError, AppResult};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::redis_store_client::store_error;

/// Reconnect and keepalive settings for the channel consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConsumerConfig {
    /// Fixed wait between a lost connection and the next attempt.
    pub reconnect_backoff: Duration,
    /// Interval between keepalive pings on the subscription connection.
    pub ping_interval: Duration,
}

impl Default for ChannelConsumerConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff: Duration::from_millis(2_000),
            ping_interval: Duration::from_secs(30),
        }
    }
}

/// Subscribes to every registered channel and dispatches incoming messages.
///
/// After a lost connection the consumer waits the backoff interval and
/// subscribes again to the channels registered at that moment. Channels
/// registered while connected are subscribed incrementally.
pub struct RedisChannelConsumer {
    client: redis::Client,
    registry: Arc<ListenerRegistry>,
    config: ChannelConsumerConfig,
}

enum SessionEnd {
    Shutdown,
    Resync,
}

impl RedisChannelConsumer {
    /// Creates a consumer for the registry's channels.
    #[must_use]
    pub fn new(
        client: redis::Client,
        registry: Arc<ListenerRegistry>,
        config: ChannelConsumerConfig,
    ) -> Self {
        Self {
            client,
            registry,
            config,
        }
    }

    /// Runs until `shutdown` changes or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            match self.session(&mut shutdown).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Resync) => {
                    info!("resubscribing after missed registry changes");
                    continue;
                }
                Err(error) => warn!(
                    error = %error,
                    backoff_ms = self.config.reconnect_backoff.as_millis(),
                    "channel consumer lost its connection"
                ),
            }

            tokio::select! {
                () = tokio::time::sleep(self.config.reconnect_backoff) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("channel consumer stopped");
    }

    async fn session(&self, shutdown: &mut watch::Receiver<bool>) -> AppResult<SessionEnd> {
        let mut changes = self.registry.watch();
        let pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|error| store_error("failed to open subscription connection", &error))?;
        let (mut sink, mut stream) = pubsub.split();

        let channels = self.registry.channels();
        for channel in &channels {
            sink.subscribe(channel.as_str())
                .await
                .map_err(|error| store_error("failed to subscribe", &error))?;
        }
        info!(channels = ?channels, "channel consumer subscribed");

        let mut keepalive = tokio::time::interval(self.config.ping_interval);
        keepalive.tick().await;

        loop {
            tokio::select! {
                message = stream.next() => {
                    let Some(message) = message else {
                        return Err(AppError::Unavailable(
                            "subscription connection closed".to_owned(),
                        ));
                    };
                    self.spawn_dispatch(&message);
                }
                change = changes.recv() => match change {
                    Ok(RegistryChange::Subscribe(channel)) => {
                        sink.subscribe(channel.as_str())
                            .await
                            .map_err(|error| store_error("failed to subscribe", &error))?;
                        debug!(channel = %channel, "subscribed to channel");
                    }
                    Ok(RegistryChange::Unsubscribe(channel)) => {
                        sink.unsubscribe(channel.as_str())
                            .await
                            .map_err(|error| store_error("failed to unsubscribe", &error))?;
                        debug!(channel = %channel, "unsubscribed from channel");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed listener registry changes");
                        return Ok(SessionEnd::Resync);
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(SessionEnd::Shutdown),
                },
                _ = keepalive.tick() => {
                    sink.ping::<redis::Value>()
                        .await
                        .map_err(|error| store_error("subscription keepalive failed", &error))?;
                }
                _ = shutdown.changed() => return Ok(SessionEnd::Shutdown),
            }
        }
    }

    /// Hands one message to its listener on a separate task.
    fn spawn_dispatch(&self, message: &redis::Msg) {
        let channel = match message.get_channel::<String>() {
            Ok(channel) => channel,
            Err(error) => {
                warn!(error = %error, "dropping message with unreadable channel name");
                return;
            }
        };
        let payload = match message.get_payload::<String>() {
            Ok(payload) => payload,
            Err(error) => {
                warn!(channel = %channel, error = %error, "dropping malformed message payload");
                return;
            }
        };

        let registry = self.registry.clone();
        tokio::spawn(async move {
            registry.dispatch(channel.as_str(), payload.as_str()).await;
        });
    }
}
