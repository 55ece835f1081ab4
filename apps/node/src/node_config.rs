use std::env;
use std::time::Duration;

use keystone_application::{PresenceConfig, SessionCacheConfig};
use keystone_core::AppError;
use keystone_infrastructure::{ChannelConsumerConfig, StoreClientConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleStoreConfig {
    Memory,
    Postgres { database_url: String },
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub migrate_only: bool,
    pub node_id: String,
    pub redis_url: String,
    pub key_prefix: String,
    pub role_store: RoleStoreConfig,
    pub session_cache: SessionCacheConfig,
    pub presence: PresenceConfig,
    pub store_client: StoreClientConfig,
    pub channel_consumer: ChannelConsumerConfig,
}

impl NodeConfig {
    pub fn load() -> Result<Self, AppError> {
        let migrate_only = env::args().nth(1).as_deref() == Some("migrate");
        let mut config = Self::from_lookup(|name| env::var(name).ok())?;
        config.migrate_only = migrate_only;
        Ok(config)
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let redis_url =
            read("REDIS_URL").ok_or_else(|| AppError::Validation("REDIS_URL is required".to_owned()))?;
        let node_id = read("NODE_ID").unwrap_or_else(|| format!("node-{}", std::process::id()));
        let key_prefix = read("KEY_PREFIX").unwrap_or_else(|| "keystone".to_owned());

        let role_store = match read("ROLE_STORE")
            .unwrap_or_else(|| "memory".to_owned())
            .as_str()
        {
            "memory" => RoleStoreConfig::Memory,
            "postgres" => RoleStoreConfig::Postgres {
                database_url: read("DATABASE_URL").ok_or_else(|| {
                    AppError::Validation(
                        "DATABASE_URL is required when ROLE_STORE is 'postgres'".to_owned(),
                    )
                })?,
            },
            other => {
                return Err(AppError::Validation(format!(
                    "ROLE_STORE must be either 'memory' or 'postgres', got '{other}'"
                )));
            }
        };

        let session_cache = SessionCacheConfig {
            preload_timeout: Duration::from_millis(parse_or(
                read("PRELOAD_TIMEOUT_MS"),
                "PRELOAD_TIMEOUT_MS",
                5_000_u64,
            )?),
            fallback_role: read("DEFAULT_ROLE").unwrap_or_else(|| "default".to_owned()),
        };
        session_cache.validate()?;

        let presence = PresenceConfig {
            session_ttl_seconds: parse_or(
                read("PRESENCE_SESSION_TTL_SECONDS"),
                "PRESENCE_SESSION_TTL_SECONDS",
                300_u32,
            )?,
            set_ttl_seconds: parse_or(
                read("PRESENCE_SET_TTL_SECONDS"),
                "PRESENCE_SET_TTL_SECONDS",
                90_u32,
            )?,
        };
        presence.validate()?;

        let store_client = StoreClientConfig {
            max_connections: parse_or(
                read("STORE_MAX_CONNECTIONS"),
                "STORE_MAX_CONNECTIONS",
                16_usize,
            )?,
            connect_timeout: Duration::from_millis(parse_or(
                read("STORE_CONNECT_TIMEOUT_MS"),
                "STORE_CONNECT_TIMEOUT_MS",
                3_000_u64,
            )?),
        };
        if store_client.max_connections == 0 {
            return Err(AppError::Validation(
                "STORE_MAX_CONNECTIONS must be greater than zero".to_owned(),
            ));
        }

        let channel_consumer = ChannelConsumerConfig {
            reconnect_backoff: Duration::from_millis(parse_or(
                read("CONSUMER_RECONNECT_BACKOFF_MS"),
                "CONSUMER_RECONNECT_BACKOFF_MS",
                2_000_u64,
            )?),
            ping_interval: Duration::from_secs(parse_or(
                read("CONSUMER_PING_INTERVAL_SECONDS"),
                "CONSUMER_PING_INTERVAL_SECONDS",
                30_u64,
            )?),
        };
        if channel_consumer.ping_interval.is_zero() {
            return Err(AppError::Validation(
                "CONSUMER_PING_INTERVAL_SECONDS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            migrate_only: false,
            node_id,
            redis_url,
            key_prefix,
            role_store,
            session_cache,
            presence,
            store_client,
            channel_consumer,
        })
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn parse_or<T>(value: Option<String>, name: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|error| AppError::Validation(format!("invalid {name}: {error}"))),
        None => Ok(default),
    }
}
