use std::sync::Arc;

use anyhow::Result;
use redis::AsyncCommands;
use shared::models::pool::Pool;

use crate::store::core::RedisStore;

const POOL_KEY_PREFIX: &str = "explorer:pool:";
const POOL_INDEX: &str = "explorer:pool_index";
const POOL_ID_COUNTER: &str = "explorer:pool:next_id";
const POOL_OWNER_PREFIX: &str = "explorer:pool:owner:";

/// Pools live in a hash: `data` is the document, `updated` the settlement
/// guard. The script only writes when the guard still matches, which
/// serializes concurrent settlements without locking.
const POOL_CAS_SCRIPT: &str = r#"
local updated = redis.call('HGET', KEYS[1], 'updated')
if updated == false then return -2 end
if updated ~= ARGV[1] then return -1 end
redis.call('HSET', KEYS[1], 'updated', ARGV[2], 'data', ARGV[3])
return 1
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Written,
    Stale,
    Missing,
}

pub struct PoolStore {
    redis: Arc<RedisStore>,
}

impl PoolStore {
    pub fn new(redis: Arc<RedisStore>) -> Self {
        Self { redis }
    }

    fn key(pool_id: i64) -> String {
        format!("{}{}", POOL_KEY_PREFIX, pool_id)
    }

    pub async fn next_id(&self) -> Result<i64> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        Ok(con.incr(POOL_ID_COUNTER, 1).await?)
    }

    pub async fn insert(&self, pool: &Pool) -> Result<()> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let json = serde_json::to_string(pool)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(Self::key(pool.pool_id), "data", json)
            .hset(Self::key(pool.pool_id), "updated", pool.last_updated)
            .sadd(POOL_INDEX, pool.pool_id)
            .sadd(
                format!("{}{}", POOL_OWNER_PREFIX, pool.customer_tid),
                pool.pool_id,
            );
        let _: () = pipe.query_async(&mut con).await?;
        Ok(())
    }

    pub async fn get(&self, pool_id: i64) -> Result<Option<Pool>> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let data: Option<String> = con.hget(Self::key(pool_id), "data").await?;
        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn list(&self) -> Result<Vec<Pool>> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let ids: Vec<i64> = con.smembers(POOL_INDEX).await?;
        let mut pools = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(pool) = self.get(id).await? {
                pools.push(pool);
            }
        }
        pools.sort_by_key(|p| p.pool_id);
        Ok(pools)
    }

    pub async fn pools_for_owner(&self, owner: i64) -> Result<Vec<Pool>> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let ids: Vec<i64> = con
            .smembers(format!("{}{}", POOL_OWNER_PREFIX, owner))
            .await?;
        let mut pools = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(pool) = self.get(id).await? {
                pools.push(pool);
            }
        }
        pools.sort_by_key(|p| p.pool_id);
        Ok(pools)
    }

    /// Write `pool` only if nobody settled it since it was read at
    /// `expected_updated`.
    pub async fn update_cas(&self, pool: &Pool, expected_updated: i64) -> Result<CasOutcome> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let json = serde_json::to_string(pool)?;

        let outcome: i64 = redis::Script::new(POOL_CAS_SCRIPT)
            .key(Self::key(pool.pool_id))
            .arg(expected_updated)
            .arg(pool.last_updated)
            .arg(json)
            .invoke_async(&mut con)
            .await?;

        Ok(match outcome {
            1 => CasOutcome::Written,
            -1 => CasOutcome::Stale,
            _ => CasOutcome::Missing,
        })
    }
}
