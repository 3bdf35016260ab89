use std::sync::Arc;

use anyhow::Result;
use redis::AsyncCommands;
use shared::models::workload::{NextAction, Workload};

use crate::store::core::RedisStore;

const WORKLOAD_KEY_PREFIX: &str = "explorer:workload:";
const WORKLOAD_ALL_INDEX: &str = "explorer:workload_index";
const WORKLOAD_ID_COUNTER: &str = "explorer:workload:last_id";
const WORKLOAD_NODE_PREFIX: &str = "explorer:workload:node:";
const WORKLOAD_POOL_PREFIX: &str = "explorer:workload:pool:";
const WORKLOAD_CUSTOMER_PREFIX: &str = "explorer:workload:customer:";
const WORKLOAD_PUBLIC_IP_PREFIX: &str = "explorer:workload:public_ip:";

/// Workloads live in a hash: `data` is the document, `action` the
/// `next_action` guard. State transitions only land when the guard matches,
/// so racing sweeps, signers and node results serialize cleanly.
const WORKLOAD_CAS_SCRIPT: &str = r#"
local action = redis.call('HGET', KEYS[1], 'action')
if action == false then return -2 end
if action ~= ARGV[1] then return -1 end
redis.call('HSET', KEYS[1], 'action', ARGV[2], 'data', ARGV[3])
return 1
"#;

pub use super::pool_store::CasOutcome;

pub struct WorkloadStore {
    redis: Arc<RedisStore>,
}

impl WorkloadStore {
    pub fn new(redis: Arc<RedisStore>) -> Self {
        Self { redis }
    }

    fn key(id: i64) -> String {
        format!("{}{}", WORKLOAD_KEY_PREFIX, id)
    }

    /// Persist a new workload, allocating its globally monotonic id.
    pub async fn create(&self, mut workload: Workload) -> Result<Workload> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;

        let id: i64 = con.incr(WORKLOAD_ID_COUNTER, 1).await?;
        workload.info.id = id;
        workload.info.workload_id = 1;

        let json = serde_json::to_string(&workload)?;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(Self::key(id), "data", json)
            .hset(Self::key(id), "action", workload.info.next_action as i64)
            .zadd(WORKLOAD_ALL_INDEX, id, id)
            .zadd(
                format!("{}{}", WORKLOAD_NODE_PREFIX, workload.info.node_id),
                id,
                id,
            )
            .sadd(
                format!("{}{}", WORKLOAD_POOL_PREFIX, workload.info.pool_id),
                id,
            )
            .sadd(
                format!("{}{}", WORKLOAD_CUSTOMER_PREFIX, workload.info.customer_tid),
                id,
            );
        let public_ip = workload.public_ip_ref();
        if public_ip > 0 {
            pipe.sadd(format!("{}{}", WORKLOAD_PUBLIC_IP_PREFIX, public_ip), id);
        }
        let _: () = pipe.query_async(&mut con).await?;

        Ok(workload)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Workload>> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let data: Option<Workload> = con.hget(Self::key(id), "data").await?;
        Ok(data)
    }

    /// Write `workload` only while its stored `next_action` still equals
    /// `expected`. The new action is taken from the document.
    pub async fn update_cas(
        &self,
        workload: &Workload,
        expected: NextAction,
    ) -> Result<CasOutcome> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let json = serde_json::to_string(workload)?;

        let outcome: i64 = redis::Script::new(WORKLOAD_CAS_SCRIPT)
            .key(Self::key(workload.info.id))
            .arg(expected as i64)
            .arg(workload.info.next_action as i64)
            .arg(json)
            .invoke_async(&mut con)
            .await?;

        Ok(match outcome {
            1 => CasOutcome::Written,
            -1 => CasOutcome::Stale,
            _ => CasOutcome::Missing,
        })
    }

    /// CAS transition of `next_action` alone.
    pub async fn set_next_action(
        &self,
        id: i64,
        expected: NextAction,
        new: NextAction,
    ) -> Result<CasOutcome> {
        let Some(mut workload) = self.get(id).await? else {
            return Ok(CasOutcome::Missing);
        };
        if workload.info.next_action != expected {
            return Ok(CasOutcome::Stale);
        }
        workload.info.next_action = new;
        self.update_cas(&workload, expected).await
    }

    /// The largest workload id ever allocated. Pollers advance their cursor
    /// to this when a page comes back empty.
    pub async fn last_id(&self) -> Result<i64> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let id: Option<i64> = con.get(WORKLOAD_ID_COUNTER).await?;
        Ok(id.unwrap_or(0))
    }

    /// Workloads for one node with `id >= from`, filtered to `actions`,
    /// ascending by id, at most `limit`.
    pub async fn list_for_node(
        &self,
        node_id: &str,
        from: i64,
        actions: &[NextAction],
        limit: usize,
    ) -> Result<Vec<Workload>> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let ids: Vec<i64> = con
            .zrangebyscore(
                format!("{}{}", WORKLOAD_NODE_PREFIX, node_id),
                from,
                "+inf",
            )
            .await?;

        let mut workloads = Vec::new();
        for id in ids {
            let Some(workload) = self.get(id).await? else {
                continue;
            };
            if !workload.is_any(actions) {
                continue;
            }
            workloads.push(workload);
            if workloads.len() >= limit {
                break;
            }
        }
        Ok(workloads)
    }

    pub async fn list_for_pool(&self, pool_id: i64) -> Result<Vec<Workload>> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let mut ids: Vec<i64> = con
            .smembers(format!("{}{}", WORKLOAD_POOL_PREFIX, pool_id))
            .await?;
        ids.sort_unstable();

        let mut workloads = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(workload) = self.get(id).await? {
                workloads.push(workload);
            }
        }
        Ok(workloads)
    }

    pub async fn list_for_customer(&self, customer_tid: i64) -> Result<Vec<Workload>> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let mut ids: Vec<i64> = con
            .smembers(format!("{}{}", WORKLOAD_CUSTOMER_PREFIX, customer_tid))
            .await?;
        ids.sort_unstable();

        let mut workloads = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(workload) = self.get(id).await? {
                workloads.push(workload);
            }
        }
        Ok(workloads)
    }

    /// Workloads referencing the given PublicIP workload that are currently
    /// in one of `actions`.
    pub async fn referencing_public_ip(
        &self,
        public_ip_id: i64,
        actions: &[NextAction],
    ) -> Result<Vec<Workload>> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let ids: Vec<i64> = con
            .smembers(format!("{}{}", WORKLOAD_PUBLIC_IP_PREFIX, public_ip_id))
            .await?;

        let mut workloads = Vec::new();
        for id in ids {
            if let Some(workload) = self.get(id).await? {
                if workload.is_any(actions) {
                    workloads.push(workload);
                }
            }
        }
        Ok(workloads)
    }

    /// One page of the global listing, newest ids last.
    pub async fn list_page(&self, page: usize, size: usize) -> Result<Vec<Workload>> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let start = (page.saturating_sub(1) * size) as isize;
        let stop = start + size as isize - 1;
        let ids: Vec<i64> = con.zrange(WORKLOAD_ALL_INDEX, start, stop).await?;

        let mut workloads = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(workload) = self.get(id).await? {
                workloads.push(workload);
            }
        }
        Ok(workloads)
    }

    pub async fn count(&self) -> Result<usize> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let count: usize = con.zcard(WORKLOAD_ALL_INDEX).await?;
        Ok(count)
    }
}
