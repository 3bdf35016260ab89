use std::sync::Arc;

use anyhow::Result;
use redis::AsyncCommands;

use crate::store::core::RedisStore;

const QUEUE_KEY_PREFIX: &str = "explorer:queue:";

/// Per-node parking lot for workloads whose admission was deferred, e.g.
/// waiting on a pool re-funding or a pending public-IP swap. Members are
/// workload ids scored by id so drains stay ordered.
pub struct QueueStore {
    redis: Arc<RedisStore>,
}

impl QueueStore {
    pub fn new(redis: Arc<RedisStore>) -> Self {
        Self { redis }
    }

    fn key(node_id: &str) -> String {
        format!("{}{}", QUEUE_KEY_PREFIX, node_id)
    }

    pub async fn push(&self, node_id: &str, workload_id: i64) -> Result<()> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let _: () = con
            .zadd(Self::key(node_id), workload_id, workload_id)
            .await?;
        Ok(())
    }

    pub async fn list(&self, node_id: &str, limit: usize) -> Result<Vec<i64>> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let ids: Vec<i64> = con
            .zrangebyscore_limit(Self::key(node_id), 0, "+inf", 0, limit as isize)
            .await?;
        Ok(ids)
    }

    /// Drop a consumed entry; a node reporting a result pops its queue slot.
    pub async fn pop(&self, node_id: &str, workload_id: i64) -> Result<()> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let _: () = con.zrem(Self::key(node_id), workload_id).await?;
        Ok(())
    }
}
