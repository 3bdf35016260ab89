use redis::{ErrorKind, FromRedisValue, RedisError, RedisResult, RedisWrite, ToRedisArgs, Value};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use super::pool::CapacityReservationData;

#[derive(Debug, Clone, Copy, Serialize_repr, Deserialize_repr, PartialEq, Eq, Default)]
#[repr(i64)]
pub enum PaymentState {
    #[default]
    Pending = 0,
    Paid = 1,
    Refunded = 2,
    Canceled = 3,
    Expired = 4,
}

/// Funding instructions returned to the customer after a pool reservation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CustomerCapacityEscrowInformation {
    pub address: String,
    /// `CODE:ISSUER` form.
    pub asset: String,
    /// Amount due, in stroops.
    pub amount: i64,
}

/// A generated escrow account. The secret never leaves the store.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EscrowAddress {
    pub address: String,
    pub secret: String,
}

/// Tracks one capacity-pool payment from reservation to settlement.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CapacityPoolPayment {
    pub reservation_id: i64,
    pub pool_id: i64,
    pub customer_tid: i64,
    pub address: String,
    pub asset: String,
    /// Stroops expected before the payment window closes.
    pub expected_amount: i64,
    #[serde(default)]
    pub received_amount: i64,
    #[serde(default)]
    pub state: PaymentState,
    pub created_at: i64,
    /// The units this payment buys; credited verbatim on `Paid`.
    pub data: CapacityReservationData,
}

impl CapacityPoolPayment {
    pub fn expired(&self, now: i64, payment_window: i64) -> bool {
        now > self.created_at + payment_window
    }
}

impl FromRedisValue for CapacityPoolPayment {
    fn from_redis_value(v: &Value) -> RedisResult<Self> {
        match v {
            Value::BulkString(s) => serde_json::from_slice(s).map_err(|_| {
                RedisError::from((
                    ErrorKind::TypeError,
                    "Failed to deserialize CapacityPoolPayment from string",
                    format!("Invalid JSON string: {:?}", s),
                ))
            }),
            _ => Err(RedisError::from((
                ErrorKind::TypeError,
                "Response type not compatible with CapacityPoolPayment",
                format!("Received: {:?}", v),
            ))),
        }
    }
}

impl ToRedisArgs for CapacityPoolPayment {
    fn write_redis_args<W>(&self, out: &mut W)
    where
        W: ?Sized + RedisWrite,
    {
        let json =
            serde_json::to_string(self).expect("Failed to serialize CapacityPoolPayment to JSON");
        out.write_arg(json.as_bytes());
    }
}
