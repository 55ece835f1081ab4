//! Keystone node runtime: permission cache, presence and sync consumer.

#![forbid(unsafe_code)]

mod host_hooks;
mod node_config;

use std::sync::Arc;
use std::time::Duration;

use keystone_application::{
    ListenerRegistry, PermissionSessionCache, PresenceStore, PresenceTracker, ProfileRepository,
    RoleGraph, RoleRepository, RoleService, SnapshotLoader, core_listeners,
};
use keystone_core::{AppError, AppResult};
use keystone_domain::PresenceScope;
use keystone_infrastructure::{
    InMemoryProfileRepository, InMemoryRoleRepository, PostgresProfileRepository,
    PostgresRoleRepository, RedisChannelConsumer, RedisPresenceStore, RedisStoreClient,
    RedisSyncPublisher,
};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::host_hooks::{LoggingRefresher, LoggingSink};
use crate::node_config::{NodeConfig, RoleStoreConfig, init_tracing};

const STATUS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = NodeConfig::load()?;

    let (roles, profiles) = match &config.role_store {
        RoleStoreConfig::Postgres { database_url } => {
            let pool = connect_pool(database_url.as_str()).await?;
            sqlx::migrate!("../../crates/infrastructure/migrations")
                .run(&pool)
                .await
                .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;

            if config.migrate_only {
                info!("migrations applied");
                return Ok(());
            }

            let roles: Arc<dyn RoleRepository> = Arc::new(PostgresRoleRepository::new(pool.clone()));
            let profiles: Arc<dyn ProfileRepository> =
                Arc::new(PostgresProfileRepository::new(pool));
            (roles, profiles)
        }
        RoleStoreConfig::Memory => {
            if config.migrate_only {
                return Err(AppError::Validation(
                    "migrate requires ROLE_STORE=postgres".to_owned(),
                ));
            }

            warn!("using in-memory role store; role data is lost on restart");
            let roles: Arc<dyn RoleRepository> = Arc::new(InMemoryRoleRepository::new());
            let profiles: Arc<dyn ProfileRepository> = Arc::new(InMemoryProfileRepository::new());
            (roles, profiles)
        }
    };

    let store_client =
        RedisStoreClient::connect(config.redis_url.as_str(), config.store_client).await?;
    let presence_store: Arc<dyn PresenceStore> = Arc::new(RedisPresenceStore::new(
        store_client.clone(),
        config.key_prefix.clone(),
    ));
    let presence = PresenceTracker::new(presence_store, config.presence)?;
    let publisher = Arc::new(RedisSyncPublisher::new(store_client.clone()));

    let fallback_role = config.session_cache.validate()?;
    let graph = Arc::new(RoleGraph::new(roles.clone(), fallback_role));
    let cache = PermissionSessionCache::new(Arc::new(SnapshotLoader::new(
        graph.clone(),
        profiles.clone(),
    )));
    let role_service = RoleService::new(
        roles,
        profiles,
        graph.clone(),
        publisher,
        presence.clone(),
    );

    role_service.bootstrap_defaults().await?;
    let loaded_roles = graph.reload_all().await?;

    let registry = Arc::new(ListenerRegistry::new());
    for listener in core_listeners(
        graph,
        cache.clone(),
        Arc::new(LoggingRefresher::new(config.node_id.as_str())),
        Arc::new(LoggingSink::new(config.node_id.as_str())),
    ) {
        registry.register(listener);
    }

    let (shutdown_sender, shutdown_receiver) = watch::channel(false);
    let consumer = RedisChannelConsumer::new(
        store_client.client().clone(),
        registry.clone(),
        config.channel_consumer,
    );
    let consumer_task = tokio::spawn(consumer.run(shutdown_receiver));

    info!(
        node_id = %config.node_id,
        loaded_roles,
        channels = ?registry.channels(),
        preload_timeout_ms = config.session_cache.preload_timeout.as_millis(),
        "keystone-node started"
    );

    run_until_shutdown(&config, &cache, &presence).await;

    if shutdown_sender.send(true).is_err() {
        warn!("channel consumer already stopped");
    }
    if let Err(error) = consumer_task.await {
        warn!(error = %error, "channel consumer task failed");
    }

    info!(node_id = %config.node_id, "keystone-node stopped");
    Ok(())
}

async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

/// Logs cache and presence figures until the process is interrupted.
async fn run_until_shutdown(
    config: &NodeConfig,
    cache: &PermissionSessionCache,
    presence: &PresenceTracker,
) {
    let mut status = tokio::time::interval(STATUS_INTERVAL);
    let edge = PresenceScope::Edge(config.node_id.clone());

    loop {
        tokio::select! {
            _ = status.tick() => {
                match (presence.count(&PresenceScope::Network).await, presence.count(&edge).await) {
                    (Ok(network_online), Ok(edge_online)) => info!(
                        node_id = %config.node_id,
                        network_online,
                        edge_online,
                        cached_snapshots = cache.cached_count(),
                        in_flight = cache.in_flight_count(),
                        "node status"
                    ),
                    (Err(error), _) | (_, Err(error)) => warn!(
                        node_id = %config.node_id,
                        error = %error,
                        "failed to read presence counts"
                    ),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(error) = signal {
                    warn!(error = %error, "failed to listen for shutdown signal");
                }
                return;
            }
        }
    }
}
