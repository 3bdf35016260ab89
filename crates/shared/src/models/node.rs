use redis::{ErrorKind, FromRedisValue, RedisError, RedisResult, RedisWrite, ToRedisArgs, Value};
use serde::{Deserialize, Serialize};

/// Raw hardware resources of a node: vCPU, GiB memory, GiB HDD, GiB SSD.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct ResourceAmount {
    pub cru: u64,
    pub mru: f64,
    pub hru: f64,
    pub sru: f64,
}

impl ResourceAmount {
    /// Component-wise `self - other`, floored at zero.
    pub fn diff(&self, other: &ResourceAmount) -> ResourceAmount {
        ResourceAmount {
            cru: self.cru.saturating_sub(other.cru),
            mru: (self.mru - other.mru).max(0.0),
            hru: (self.hru - other.hru).max(0.0),
            sru: (self.sru - other.sru).max(0.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Node {
    #[serde(default)]
    pub id: i64,
    pub node_id: String,
    pub farm_id: i64,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub os_version: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub updated: i64,
    #[serde(default)]
    pub uptime: i64,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub total_resources: ResourceAmount,
    #[serde(default)]
    pub used_resources: ResourceAmount,
    #[serde(default)]
    pub reserved_resources: ResourceAmount,
    /// Hex encoded ed25519 key the node signs deployment results with.
    #[serde(default)]
    pub public_key_hex: String,
    #[serde(default)]
    pub free_to_use: bool,
    #[serde(default)]
    pub deleted: bool,
}

impl Node {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.node_id.is_empty() {
            anyhow::bail!("node_id cannot be empty");
        }
        if self.farm_id <= 0 {
            anyhow::bail!("node must belong to a farm");
        }
        Ok(())
    }

    /// Capacity still unclaimed on this node.
    pub fn residual_resources(&self) -> ResourceAmount {
        self.total_resources.diff(&self.reserved_resources)
    }
}

impl FromRedisValue for Node {
    fn from_redis_value(v: &Value) -> RedisResult<Self> {
        match v {
            Value::BulkString(s) => serde_json::from_slice(s).map_err(|_| {
                RedisError::from((
                    ErrorKind::TypeError,
                    "Failed to deserialize Node from string",
                    format!("Invalid JSON string: {:?}", s),
                ))
            }),
            _ => Err(RedisError::from((
                ErrorKind::TypeError,
                "Response type not compatible with Node",
                format!("Received: {:?}", v),
            ))),
        }
    }
}

impl ToRedisArgs for Node {
    fn write_redis_args<W>(&self, out: &mut W)
    where
        W: ?Sized + RedisWrite,
    {
        let json = serde_json::to_string(self).expect("Failed to serialize Node to JSON");
        out.write_arg(json.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_is_component_wise_and_floored() {
        let total = ResourceAmount {
            cru: 8,
            mru: 32.0,
            hru: 1000.0,
            sru: 500.0,
        };
        let reserved = ResourceAmount {
            cru: 2,
            mru: 8.0,
            hru: 1200.0,
            sru: 100.0,
        };

        let diff = total.diff(&reserved);
        assert_eq!(diff.cru, 6);
        assert_eq!(diff.mru, 24.0);
        // over-reserved components clamp instead of going negative
        assert_eq!(diff.hru, 0.0);
        assert_eq!(diff.sru, 400.0);
    }
}
