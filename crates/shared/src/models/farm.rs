use std::net::IpAddr;
use std::str::FromStr;

use redis::{ErrorKind, FromRedisValue, RedisError, RedisResult, RedisWrite, ToRedisArgs, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct WalletAddress {
    pub asset: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Location {
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub continent: String,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

/// A routable address owned by a farm. `reservation_id` is 0 while free,
/// otherwise the id of the workload currently holding the address.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FarmPublicIp {
    /// CIDR notation, e.g. "203.0.113.7/24".
    pub address: String,
    pub gateway: String,
    #[serde(default)]
    pub reservation_id: i64,
}

impl FarmPublicIp {
    pub fn validate(&self) -> anyhow::Result<()> {
        let (ip, mask) = self
            .address
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("public ip address must be in CIDR notation"))?;
        IpAddr::from_str(ip)?;
        let mask: u8 = mask.parse()?;
        if mask > 32 {
            anyhow::bail!("invalid ipv4 mask /{}", mask);
        }
        IpAddr::from_str(&self.gateway)?;
        Ok(())
    }

    /// The bare address part, without the mask.
    pub fn ip(&self) -> Option<IpAddr> {
        let (ip, _) = self.address.split_once('/')?;
        IpAddr::from_str(ip).ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Farm {
    #[serde(default)]
    pub id: i64,
    /// Owning user id.
    pub threebot_id: i64,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub wallet_addresses: Vec<WalletAddress>,
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub ipaddresses: Vec<FarmPublicIp>,
}

impl Farm {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("farm name cannot be empty");
        }
        if self.threebot_id <= 0 {
            anyhow::bail!("farm must have an owner");
        }
        for ip in &self.ipaddresses {
            ip.validate()?;
        }
        Ok(())
    }

    /// Wallet address registered for the given asset code.
    pub fn wallet_for(&self, asset_code: &str) -> Option<&str> {
        self.wallet_addresses
            .iter()
            .find(|w| w.asset == asset_code)
            .map(|w| w.address.as_str())
    }

    pub fn ip_entry(&self, ip: &IpAddr) -> Option<&FarmPublicIp> {
        self.ipaddresses.iter().find(|e| e.ip().as_ref() == Some(ip))
    }
}

impl FromRedisValue for Farm {
    fn from_redis_value(v: &Value) -> RedisResult<Self> {
        match v {
            Value::BulkString(s) => serde_json::from_slice(s).map_err(|_| {
                RedisError::from((
                    ErrorKind::TypeError,
                    "Failed to deserialize Farm from string",
                    format!("Invalid JSON string: {:?}", s),
                ))
            }),
            _ => Err(RedisError::from((
                ErrorKind::TypeError,
                "Response type not compatible with Farm",
                format!("Received: {:?}", v),
            ))),
        }
    }
}

impl ToRedisArgs for Farm {
    fn write_redis_args<W>(&self, out: &mut W)
    where
        W: ?Sized + RedisWrite,
    {
        let json = serde_json::to_string(self).expect("Failed to serialize Farm to JSON");
        out.write_arg(json.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_ip_validation() {
        let ok = FarmPublicIp {
            address: "203.0.113.7/24".to_string(),
            gateway: "203.0.113.1".to_string(),
            reservation_id: 0,
        };
        assert!(ok.validate().is_ok());
        assert_eq!(ok.ip(), Some(IpAddr::from_str("203.0.113.7").unwrap()));

        let bad = FarmPublicIp {
            address: "203.0.113.7".to_string(),
            gateway: "203.0.113.1".to_string(),
            reservation_id: 0,
        };
        assert!(bad.validate().is_err());
    }
}
