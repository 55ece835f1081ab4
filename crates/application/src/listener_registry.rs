use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::ChannelListener;

const CHANGE_BUFFER: usize = 64;

/// Change in the set of channels the consumer must be subscribed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryChange {
    /// A listener was bound to a channel that had none.
    Subscribe(String),
    /// The last listener of a channel was removed.
    Unsubscribe(String),
}

/// Channel-to-listener bindings shared with the channel consumer.
pub struct ListenerRegistry {
    listeners: DashMap<String, Arc<dyn ChannelListener>>,
    changes: broadcast::Sender<RegistryChange>,
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            listeners: DashMap::new(),
            changes,
        }
    }

    /// Binds a listener to its channel, replacing any previous binding.
    ///
    /// Returns the replaced listener.
    pub fn register(&self, listener: Arc<dyn ChannelListener>) -> Option<Arc<dyn ChannelListener>> {
        let channel = listener.channel().to_owned();
        let replaced = self.listeners.insert(channel.clone(), listener);

        if replaced.is_none() {
            debug!(channel = %channel, "listener registered");
            let _ = self.changes.send(RegistryChange::Subscribe(channel));
        }
        replaced
    }

    /// Removes the listener of one channel.
    pub fn unregister(&self, channel: &str) -> bool {
        if self.listeners.remove(channel).is_none() {
            return false;
        }

        debug!(channel = %channel, "listener unregistered");
        let _ = self
            .changes
            .send(RegistryChange::Unsubscribe(channel.to_owned()));
        true
    }

    /// Returns every channel with a listener, sorted.
    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self
            .listeners
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        channels.sort_unstable();
        channels
    }

    /// Subscribes to binding changes made after this call.
    #[must_use]
    pub fn watch(&self) -> broadcast::Receiver<RegistryChange> {
        self.changes.subscribe()
    }

    /// Hands one message to its channel's listener.
    ///
    /// Messages for unknown channels and listener failures are logged and
    /// dropped. Returns whether a listener handled the message.
    pub async fn dispatch(&self, channel: &str, payload: &str) -> bool {
        let Some(listener) = self
            .listeners
            .get(channel)
            .map(|entry| entry.value().clone())
        else {
            debug!(channel = %channel, "dropping message for channel without listener");
            return false;
        };

        match listener.on_message(payload).await {
            Ok(()) => true,
            Err(error) => {
                warn!(channel = %channel, error = %error, "listener failed to handle message");
                false
            }
        }
    }
}
