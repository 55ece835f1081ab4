use std::sync::Arc;

use async_trait::async_trait;
use keystone_application::{ListenerRegistry, SyncPublisher};
use keystone_core::AppResult;
use tokio::sync::RwLock;
use tracing::debug;

/// In-process pub/sub bus delivering to every attached registry.
///
/// Delivery completes before `publish` returns. Registries attached after a
/// publish never see it.
#[derive(Default)]
pub struct InMemorySyncBus {
    registries: RwLock<Vec<Arc<ListenerRegistry>>>,
}

impl InMemorySyncBus {
    /// Creates a bus without subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches one process's listener registry.
    pub async fn attach(&self, registry: Arc<ListenerRegistry>) {
        self.registries.write().await.push(registry);
    }
}

#[async_trait]
impl SyncPublisher for InMemorySyncBus {
    async fn publish(&self, channel: &str, payload: &str) -> AppResult<()> {
        let registries = self.registries.read().await.clone();

        let mut handled = 0_usize;
        for registry in registries {
            if registry.dispatch(channel, payload).await {
                handled += 1;
            }
        }

        debug!(channel = %channel, handled, "delivered in-process sync message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use keystone_application::{ChannelListener, ListenerRegistry, SyncPublisher};
    use keystone_core::AppResult;

    use super::InMemorySyncBus;

    #[derive(Default)]
    struct Counter {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl ChannelListener for Counter {
        fn channel(&self) -> &str {
            "sync:test"
        }

        async fn on_message(&self, _payload: &str) -> AppResult<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn publish_reaches_every_attached_registry() {
        let bus = InMemorySyncBus::new();
        let counters: Vec<Arc<Counter>> = (0..3).map(|_| Arc::new(Counter::default())).collect();
        for counter in &counters {
            let registry = Arc::new(ListenerRegistry::new());
            registry.register(counter.clone());
            bus.attach(registry).await;
        }

        assert!(bus.publish("sync:test", "payload").await.is_ok());
        assert!(bus.publish("sync:other", "payload").await.is_ok());

        for counter in counters {
            assert_eq!(counter.seen.load(Ordering::SeqCst), 1);
        }
    }
}
