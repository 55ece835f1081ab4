//! Redis-backed presence records and online-membership sets.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use keystone_application::{PresenceOp, PresenceStore};
use keystone_core::{AppResult, IdentityKey};
use keystone_domain::PresenceScope;
use redis::AsyncCommands;

use crate::redis_store_client::{RedisStoreClient, store_error};

/// Redis implementation of the presence store port.
///
/// Records are hashes with a key expiry. Sets are sorted sets scored by each
/// member's own expiry in epoch milliseconds, so one live member refreshing
/// the key does not keep crashed members visible.
#[derive(Clone)]
pub struct RedisPresenceStore {
    client: RedisStoreClient,
    key_prefix: String,
}

impl RedisPresenceStore {
    /// Creates a store with a configured client and key prefix.
    #[must_use]
    pub fn new(client: RedisStoreClient, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }
}

fn record_key(prefix: &str, identity: IdentityKey) -> String {
    format!("{prefix}:session:{identity}")
}

fn scope_key(prefix: &str, scope: &PresenceScope) -> String {
    format!("{prefix}:online:{scope}")
}

/// Builds one `MULTI`/`EXEC` pipeline for a presence batch.
fn presence_pipeline(prefix: &str, batch: &[PresenceOp], now_ms: i64) -> redis::Pipeline {
    let mut pipeline = redis::pipe();
    pipeline.atomic();

    for op in batch {
        match op {
            PresenceOp::DeleteRecord { identity } => {
                pipeline.del(record_key(prefix, *identity)).ignore();
            }
            PresenceOp::WriteRecord {
                identity,
                fields,
                ttl_seconds,
            } => {
                let key = record_key(prefix, *identity);
                if !fields.is_empty() {
                    pipeline.hset_multiple(key.as_str(), fields.as_slice()).ignore();
                }
                pipeline.expire(key.as_str(), i64::from(*ttl_seconds)).ignore();
            }
            PresenceOp::AddMember {
                scope,
                display_name,
                ttl_seconds,
            } => {
                let key = scope_key(prefix, scope);
                let expires_at_ms = now_ms + i64::from(*ttl_seconds) * 1_000;
                pipeline
                    .zrembyscore(key.as_str(), "-inf", now_ms)
                    .ignore()
                    .zadd(key.as_str(), display_name.as_str(), expires_at_ms)
                    .ignore()
                    .expire(key.as_str(), i64::from(*ttl_seconds))
                    .ignore();
            }
            PresenceOp::RemoveMember {
                scope,
                display_name,
            } => {
                pipeline
                    .zrem(scope_key(prefix, scope), display_name.as_str())
                    .ignore();
            }
        }
    }

    pipeline
}

/// Lower score bound that excludes members expiring at `now_ms`.
fn live_bound(now_ms: i64) -> String {
    format!("({now_ms}")
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn apply(&self, batch: Vec<PresenceOp>) -> AppResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let pipeline = presence_pipeline(
            self.key_prefix.as_str(),
            &batch,
            Utc::now().timestamp_millis(),
        );
        let mut connection = self.client.connection().await?;
        pipeline
            .query_async::<()>(&mut *connection)
            .await
            .map_err(|error| store_error("failed to apply presence batch", &error))
    }

    async fn read_record(
        &self,
        identity: IdentityKey,
    ) -> AppResult<Option<HashMap<String, String>>> {
        let mut connection = self.client.connection().await?;
        let fields: HashMap<String, String> = connection
            .hgetall(record_key(self.key_prefix.as_str(), identity))
            .await
            .map_err(|error| store_error("failed to read presence record", &error))?;

        Ok((!fields.is_empty()).then_some(fields))
    }

    async fn count_members(&self, scope: &PresenceScope) -> AppResult<u64> {
        let now_ms = Utc::now().timestamp_millis();
        let mut connection = self.client.connection().await?;
        connection
            .zcount(scope_key(self.key_prefix.as_str(), scope), live_bound(now_ms), "+inf")
            .await
            .map_err(|error| store_error("failed to count presence members", &error))
    }

    async fn list_members(&self, scope: &PresenceScope) -> AppResult<Vec<String>> {
        let now_ms = Utc::now().timestamp_millis();
        let mut connection = self.client.connection().await?;
        connection
            .zrangebyscore(
                scope_key(self.key_prefix.as_str(), scope),
                live_bound(now_ms),
                "+inf",
            )
            .await
            .map_err(|error| store_error("failed to list presence members", &error))
    }
}
