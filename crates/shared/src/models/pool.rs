use std::collections::HashMap;

use redis::{ErrorKind, FromRedisValue, RedisError, RedisResult, RedisWrite, ToRedisArgs, Value};
use serde::{Deserialize, Serialize};

use crate::security::keys;

/// Cloud units drawn by a single workload, per second of runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct CloudUnits {
    pub cu: f64,
    pub su: f64,
    pub nu: f64,
    pub ipv4u: f64,
}

impl CloudUnits {
    pub fn is_zero(&self) -> bool {
        self.cu == 0.0 && self.su == 0.0 && self.nu == 0.0 && self.ipv4u == 0.0
    }
}

/// A prepaid allocation of cloud-unit-seconds bound to a set of nodes.
///
/// Balances (`cus`, `sus`, `nus`, `ipv4us`) are unit-seconds. They drain at
/// the `active_*` rates, which are the summed per-second draw of every
/// deployed workload attached to the pool. Any mutation must settle first.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Pool {
    pub pool_id: i64,
    pub customer_tid: i64,
    pub node_ids: Vec<String>,
    #[serde(default)]
    pub asset_capacities: HashMap<String, i64>,
    pub cus: f64,
    pub sus: f64,
    pub nus: f64,
    pub ipv4us: f64,
    pub active_cu: f64,
    pub active_su: f64,
    pub active_nu: f64,
    pub active_ipv4: f64,
    pub last_updated: i64,
    pub empty_at: i64,
    #[serde(default)]
    pub active_workload_ids: Vec<i64>,
}

impl Pool {
    pub fn new(pool_id: i64, customer_tid: i64, node_ids: Vec<String>, now: i64) -> Self {
        Pool {
            pool_id,
            customer_tid,
            node_ids,
            last_updated: now,
            empty_at: i64::MAX,
            ..Default::default()
        }
    }

    /// Integrate consumption since `last_updated` into the balances.
    /// Balances never go negative; a crossed zero clamps.
    pub fn settle(&mut self, now: i64) {
        let dt = (now - self.last_updated).max(0) as f64;
        self.cus = (self.cus - self.active_cu * dt).max(0.0);
        self.sus = (self.sus - self.active_su * dt).max(0.0);
        self.nus = (self.nus - self.active_nu * dt).max(0.0);
        self.ipv4us = (self.ipv4us - self.active_ipv4 * dt).max(0.0);
        self.last_updated = now;
        self.recompute_empty_at();
    }

    /// Account a workload going live: settle, then raise the active rates.
    pub fn add_workload(&mut self, id: i64, units: &CloudUnits, now: i64) {
        self.settle(now);
        self.active_cu += units.cu;
        self.active_su += units.su;
        self.active_nu += units.nu;
        self.active_ipv4 += units.ipv4u;
        if !self.active_workload_ids.contains(&id) {
            self.active_workload_ids.push(id);
        }
        self.recompute_empty_at();
    }

    /// Account a workload going away: settle, then lower the active rates.
    pub fn remove_workload(&mut self, id: i64, units: &CloudUnits, now: i64) {
        self.settle(now);
        self.active_cu = (self.active_cu - units.cu).max(0.0);
        self.active_su = (self.active_su - units.su).max(0.0);
        self.active_nu = (self.active_nu - units.nu).max(0.0);
        self.active_ipv4 = (self.active_ipv4 - units.ipv4u).max(0.0);
        self.active_workload_ids.retain(|wid| *wid != id);
        self.recompute_empty_at();
    }

    /// Fund the pool. The only operation that increases balances.
    pub fn credit(&mut self, data: &CapacityReservationData, asset: &str, amount: i64, now: i64) {
        self.settle(now);
        self.cus += data.cus as f64;
        self.sus += data.sus as f64;
        self.nus += data.nus as f64;
        self.ipv4us += data.ipv4us as f64;
        *self.asset_capacities.entry(asset.to_string()).or_insert(0) += amount;
        self.recompute_empty_at();
    }

    /// Earliest future instant at which any balance with a positive active
    /// rate reaches zero. `i64::MAX` when nothing is draining.
    pub fn recompute_empty_at(&mut self) {
        let mut shortest = f64::INFINITY;
        for (balance, rate) in [
            (self.cus, self.active_cu),
            (self.sus, self.active_su),
            (self.nus, self.active_nu),
            (self.ipv4us, self.active_ipv4),
        ] {
            if rate > 0.0 {
                shortest = shortest.min(balance / rate);
            }
        }

        self.empty_at = if shortest.is_finite() {
            self.last_updated.saturating_add(shortest as i64)
        } else {
            i64::MAX
        };
    }

    /// Seconds of runway left if `units` were added right now, for the unit
    /// with the least headroom.
    pub fn runway_with(&self, units: &CloudUnits, now: i64) -> i64 {
        let mut probe = self.clone();
        probe.add_workload(0, units, now);
        if probe.empty_at == i64::MAX {
            return i64::MAX;
        }
        probe.empty_at - now
    }
}

/// Units requested when creating or extending a capacity pool. Amounts are
/// cloud-unit-seconds.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CapacityReservationData {
    #[serde(default)]
    pub pool_id: i64,
    pub cus: u64,
    pub sus: u64,
    #[serde(default)]
    pub nus: u64,
    #[serde(default)]
    pub ipv4us: u64,
    pub node_ids: Vec<String>,
    pub currencies: Vec<String>,
}

/// A signed request to create or extend a capacity pool. The customer signs
/// the verbatim `json` field; `data_reservation` must be its decoded form.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CapacityReservation {
    #[serde(default)]
    pub id: i64,
    pub json: String,
    pub data_reservation: CapacityReservationData,
    pub customer_tid: i64,
    pub customer_signature: String,
    #[serde(default)]
    pub sponsor_tid: i64,
    #[serde(default)]
    pub sponsor_signature: String,
}

impl CapacityReservation {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.customer_tid <= 0 {
            anyhow::bail!("customer_tid is required");
        }
        if self.data_reservation.node_ids.is_empty() {
            anyhow::bail!("pool reservation must list at least one node");
        }
        let decoded: CapacityReservationData = serde_json::from_str(&self.json)
            .map_err(|e| anyhow::anyhow!("invalid reservation json: {}", e))?;
        if decoded != self.data_reservation {
            anyhow::bail!("json data does not match the reservation data");
        }
        Ok(())
    }

    pub fn verify(&self, pubkey_hex: &str) -> anyhow::Result<()> {
        keys::verify_hex(pubkey_hex, self.json.as_bytes(), &self.customer_signature)
    }

    pub fn verify_sponsor(&self, pubkey_hex: &str) -> anyhow::Result<()> {
        keys::verify_hex(pubkey_hex, self.json.as_bytes(), &self.sponsor_signature)
    }
}

impl FromRedisValue for Pool {
    fn from_redis_value(v: &Value) -> RedisResult<Self> {
        match v {
            Value::BulkString(s) => serde_json::from_slice(s).map_err(|_| {
                RedisError::from((
                    ErrorKind::TypeError,
                    "Failed to deserialize Pool from string",
                    format!("Invalid JSON string: {:?}", s),
                ))
            }),
            _ => Err(RedisError::from((
                ErrorKind::TypeError,
                "Response type not compatible with Pool",
                format!("Received: {:?}", v),
            ))),
        }
    }
}

impl ToRedisArgs for Pool {
    fn write_redis_args<W>(&self, out: &mut W)
    where
        W: ?Sized + RedisWrite,
    {
        let json = serde_json::to_string(self).expect("Failed to serialize Pool to JSON");
        out.write_arg(json.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funded_pool(now: i64) -> Pool {
        let mut pool = Pool::new(1, 42, vec!["node-1".to_string(), "node-2".to_string()], now);
        pool.credit(
            &CapacityReservationData {
                cus: 36_000,
                sus: 7_200,
                ..Default::default()
            },
            "TFT",
            250_000_000,
            now,
        );
        pool
    }

    #[test]
    fn settle_conserves_consumption() {
        let mut pool = funded_pool(1_000);
        pool.add_workload(7, &CloudUnits { cu: 1.0, su: 0.5, ..Default::default() }, 1_000);

        let before = pool.clone();
        pool.settle(1_100);

        assert_eq!(before.cus, pool.cus + pool.active_cu * 100.0);
        assert_eq!(before.sus, pool.sus + pool.active_su * 100.0);
        assert_eq!(pool.last_updated, 1_100);
    }

    #[test]
    fn empty_at_tracks_the_tightest_unit() {
        let mut pool = funded_pool(0);
        // cus run for 36000s at rate 1, sus for 14400s at rate 0.5
        pool.add_workload(7, &CloudUnits { cu: 1.0, su: 0.5, ..Default::default() }, 0);
        assert_eq!(pool.empty_at, 14_400);

        pool.remove_workload(7, &CloudUnits { cu: 1.0, su: 0.5, ..Default::default() }, 100);
        assert_eq!(pool.empty_at, i64::MAX);
    }

    #[test]
    fn add_then_remove_restores_rates() {
        let mut pool = funded_pool(0);
        let units = CloudUnits { cu: 0.25, su: 0.005, ..Default::default() };

        pool.add_workload(9, &units, 10);
        pool.remove_workload(9, &units, 50);

        assert_eq!(pool.active_cu, 0.0);
        assert_eq!(pool.active_su, 0.0);
        assert!(pool.active_workload_ids.is_empty());
        // balances differ from the funded amounts only by rate * elapsed
        assert_eq!(pool.cus, 36_000.0 - 0.25 * 40.0);
    }

    #[test]
    fn settle_clamps_at_zero() {
        let mut pool = funded_pool(0);
        pool.add_workload(3, &CloudUnits { cu: 1.0, ..Default::default() }, 0);

        pool.settle(1_000_000);
        assert_eq!(pool.cus, 0.0);
        assert!(pool.empty_at >= pool.last_updated);
    }

    #[test]
    fn settle_twice_without_elapsed_time_is_idempotent() {
        let mut pool = funded_pool(0);
        pool.add_workload(3, &CloudUnits { cu: 1.0, su: 1.0, ..Default::default() }, 0);

        pool.settle(500);
        let snapshot = pool.clone();
        pool.settle(500);

        assert_eq!(snapshot.cus, pool.cus);
        assert_eq!(snapshot.sus, pool.sus);
        assert_eq!(snapshot.empty_at, pool.empty_at);
    }

    #[test]
    fn reservation_json_mismatch_is_rejected() {
        let data = CapacityReservationData {
            cus: 10,
            sus: 10,
            node_ids: vec!["node-1".to_string()],
            currencies: vec!["TFT".to_string()],
            ..Default::default()
        };
        let reservation = CapacityReservation {
            json: serde_json::to_string(&data).unwrap(),
            data_reservation: data.clone(),
            customer_tid: 42,
            ..Default::default()
        };
        assert!(reservation.validate().is_ok());

        let mut tampered = reservation;
        tampered.data_reservation.cus = 1_000_000;
        assert!(tampered.validate().is_err());
    }
}
