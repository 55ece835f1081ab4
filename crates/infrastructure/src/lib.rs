//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod in_memory_presence_store;
mod in_memory_profile_repository;
mod in_memory_role_repository;
mod in_memory_sync_bus;
mod postgres_profile_repository;
mod postgres_role_repository;
mod redis_channel_consumer;
mod redis_presence_store;
mod redis_store_client;
mod redis_sync_publisher;

pub use in_memory_presence_store::InMemoryPresenceStore;
pub use in_memory_profile_repository::InMemoryProfileRepository;
pub use in_memory_role_repository::InMemoryRoleRepository;
pub use in_memory_sync_bus::InMemorySyncBus;
pub use postgres_profile_repository::PostgresProfileRepository;
pub use postgres_role_repository::PostgresRoleRepository;
pub use redis_channel_consumer::{ChannelConsumerConfig, RedisChannelConsumer};
pub use redis_presence_store::RedisPresenceStore;
pub use redis_store_client::{RedisStoreClient, StoreClientConfig, StoreConnection};
pub use redis_sync_publisher::RedisSyncPublisher;
