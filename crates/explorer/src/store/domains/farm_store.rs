use std::sync::Arc;

use anyhow::Result;
use redis::AsyncCommands;
use shared::models::farm::{Farm, FarmPublicIp};

use crate::store::core::RedisStore;

const FARM_KEY_PREFIX: &str = "explorer:farm:";
const FARM_INDEX: &str = "explorer:farm_index";
const FARM_ID_COUNTER: &str = "explorer:farm:next_id";
const FARM_IP_PREFIX: &str = "explorer:farm:ips:";

/// Atomic compare-and-swap of one IP binding. The binding hash is the
/// authoritative owner record; the farm document is overlaid on read.
const IP_SWAP_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], ARGV[1])
if current == false then return -2 end
if current ~= ARGV[2] then return -1 end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
return 1
"#;

const IP_REMOVE_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], ARGV[1])
if current == false then return -2 end
if current ~= '0' then return -1 end
redis.call('HDEL', KEYS[1], ARGV[1])
return 1
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpSwapOutcome {
    Swapped,
    Conflict,
    NotFound,
}

pub struct FarmStore {
    redis: Arc<RedisStore>,
}

impl FarmStore {
    pub fn new(redis: Arc<RedisStore>) -> Self {
        Self { redis }
    }

    fn ip_hash_key(farm_id: i64) -> String {
        format!("{}{}", FARM_IP_PREFIX, farm_id)
    }

    pub async fn create(&self, mut farm: Farm) -> Result<Farm> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;

        let id: i64 = con.incr(FARM_ID_COUNTER, 1).await?;
        farm.id = id;
        for ip in &mut farm.ipaddresses {
            ip.reservation_id = 0;
        }

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(format!("{}{}", FARM_KEY_PREFIX, id), &farm)
            .sadd(FARM_INDEX, id);
        for ip in &farm.ipaddresses {
            pipe.hset_nx(Self::ip_hash_key(id), &ip.address, 0i64);
        }
        let _: () = pipe.query_async(&mut con).await?;

        Ok(farm)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Farm>> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let farm: Option<Farm> = con.get(format!("{}{}", FARM_KEY_PREFIX, id)).await?;
        let Some(mut farm) = farm else {
            return Ok(None);
        };

        // overlay the authoritative IP bindings
        let bindings: std::collections::HashMap<String, i64> =
            con.hgetall(Self::ip_hash_key(id)).await?;
        for ip in &mut farm.ipaddresses {
            if let Some(rid) = bindings.get(&ip.address) {
                ip.reservation_id = *rid;
            }
        }
        Ok(Some(farm))
    }

    pub async fn list(&self) -> Result<Vec<Farm>> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let ids: Vec<i64> = con.smembers(FARM_INDEX).await?;
        let mut farms = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(farm) = self.get(id).await? {
                farms.push(farm);
            }
        }
        farms.sort_by_key(|f| f.id);
        Ok(farms)
    }

    /// Add public addresses to a farm. Existing bindings are left alone.
    pub async fn add_ips(&self, farm_id: i64, ips: Vec<FarmPublicIp>) -> Result<()> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let key = format!("{}{}", FARM_KEY_PREFIX, farm_id);
        let farm: Option<Farm> = con.get(&key).await?;
        let Some(mut farm) = farm else {
            anyhow::bail!("farm {} not found", farm_id);
        };

        let mut pipe = redis::pipe();
        pipe.atomic();
        for ip in ips {
            if farm.ipaddresses.iter().any(|e| e.address == ip.address) {
                continue;
            }
            pipe.hset_nx(Self::ip_hash_key(farm_id), &ip.address, 0i64);
            farm.ipaddresses.push(ip);
        }
        pipe.set(&key, &farm);
        let _: () = pipe.query_async(&mut con).await?;
        Ok(())
    }

    /// Remove a free address from a farm. Bound addresses are refused.
    pub async fn remove_ip(&self, farm_id: i64, address: &str) -> Result<IpSwapOutcome> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let outcome: i64 = redis::Script::new(IP_REMOVE_SCRIPT)
            .key(Self::ip_hash_key(farm_id))
            .arg(address)
            .invoke_async(&mut con)
            .await?;
        if outcome != 1 {
            return Ok(Self::outcome_from(outcome));
        }

        let key = format!("{}{}", FARM_KEY_PREFIX, farm_id);
        let farm: Option<Farm> = con.get(&key).await?;
        if let Some(mut farm) = farm {
            farm.ipaddresses.retain(|e| e.address != address);
            let _: () = con.set(&key, &farm).await?;
        }
        Ok(IpSwapOutcome::Swapped)
    }

    /// CAS the reservation binding of `address` from `expected` to `new`.
    pub async fn ip_swap(
        &self,
        farm_id: i64,
        address: &str,
        expected: i64,
        new: i64,
    ) -> Result<IpSwapOutcome> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let outcome: i64 = redis::Script::new(IP_SWAP_SCRIPT)
            .key(Self::ip_hash_key(farm_id))
            .arg(address)
            .arg(expected)
            .arg(new)
            .invoke_async(&mut con)
            .await?;
        Ok(Self::outcome_from(outcome))
    }

    /// Release the binding held by `reservation_id`, making the address
    /// available again.
    pub async fn ip_release(
        &self,
        farm_id: i64,
        address: &str,
        reservation_id: i64,
    ) -> Result<IpSwapOutcome> {
        self.ip_swap(farm_id, address, reservation_id, 0).await
    }

    fn outcome_from(code: i64) -> IpSwapOutcome {
        match code {
            1 => IpSwapOutcome::Swapped,
            -1 => IpSwapOutcome::Conflict,
            _ => IpSwapOutcome::NotFound,
        }
    }
}
