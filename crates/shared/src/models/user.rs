use redis::{ErrorKind, FromRedisValue, RedisError, RedisResult, RedisWrite, ToRedisArgs, Value};
use serde::{Deserialize, Serialize};

/// A registered identity. The pubkey is immutable after registration and is
/// the root of trust for every signature this user ever pushes.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct User {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub email: String,
    /// Hex encoded ed25519 verifying key.
    pub pubkey: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub is_trusted_channel: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserRequest {
    pub name: String,
    #[serde(default)]
    pub email: String,
    pub pubkey: String,
    #[serde(default)]
    pub host: String,
}

impl User {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("user name cannot be empty");
        }
        let raw = hex::decode(&self.pubkey)?;
        if raw.len() != 32 {
            anyhow::bail!("pubkey must be a 32 byte hex encoded ed25519 key");
        }
        Ok(())
    }
}

impl From<UserRequest> for User {
    fn from(request: UserRequest) -> Self {
        User {
            id: 0,
            name: request.name,
            email: request.email,
            pubkey: request.pubkey,
            host: request.host,
            is_trusted_channel: false,
        }
    }
}

impl FromRedisValue for User {
    fn from_redis_value(v: &Value) -> RedisResult<Self> {
        match v {
            Value::BulkString(s) => serde_json::from_slice(s).map_err(|_| {
                RedisError::from((
                    ErrorKind::TypeError,
                    "Failed to deserialize User from string",
                    format!("Invalid JSON string: {:?}", s),
                ))
            }),
            _ => Err(RedisError::from((
                ErrorKind::TypeError,
                "Response type not compatible with User",
                format!("Received: {:?}", v),
            ))),
        }
    }
}

impl ToRedisArgs for User {
    fn write_redis_args<W>(&self, out: &mut W)
    where
        W: ?Sized + RedisWrite,
    {
        let json = serde_json::to_string(self).expect("Failed to serialize User to JSON");
        out.write_arg(json.as_bytes());
    }
}
