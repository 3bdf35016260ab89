use std::sync::Arc;

use anyhow::Result;
use redis::AsyncCommands;
use shared::models::escrow::{CapacityPoolPayment, EscrowAddress, PaymentState};

use crate::store::core::RedisStore;

const ADDRESS_KEY_PREFIX: &str = "explorer:escrow:address:";
const PAYMENT_KEY_PREFIX: &str = "explorer:escrow:payment:";
const PAYMENT_PENDING_INDEX: &str = "explorer:escrow:pending";
const PAYMENT_POOL_PREFIX: &str = "explorer:escrow:payment:pool:";

pub struct EscrowStore {
    redis: Arc<RedisStore>,
}

impl EscrowStore {
    pub fn new(redis: Arc<RedisStore>) -> Self {
        Self { redis }
    }

    pub async fn save_address(&self, address: &EscrowAddress) -> Result<()> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let json = serde_json::to_string(address)?;
        let _: () = con
            .set(format!("{}{}", ADDRESS_KEY_PREFIX, address.address), json)
            .await?;
        Ok(())
    }

    pub async fn address(&self, address: &str) -> Result<Option<EscrowAddress>> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let json: Option<String> = con.get(format!("{}{}", ADDRESS_KEY_PREFIX, address)).await?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn save_payment(&self, payment: &CapacityPoolPayment) -> Result<()> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(
                format!("{}{}", PAYMENT_KEY_PREFIX, payment.reservation_id),
                payment,
            )
            .sadd(
                format!("{}{}", PAYMENT_POOL_PREFIX, payment.pool_id),
                payment.reservation_id,
            );
        if payment.state == PaymentState::Pending {
            pipe.sadd(PAYMENT_PENDING_INDEX, payment.reservation_id);
        } else {
            pipe.srem(PAYMENT_PENDING_INDEX, payment.reservation_id);
        }
        let _: () = pipe.query_async(&mut con).await?;
        Ok(())
    }

    pub async fn payment(&self, reservation_id: i64) -> Result<Option<CapacityPoolPayment>> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let payment: Option<CapacityPoolPayment> = con
            .get(format!("{}{}", PAYMENT_KEY_PREFIX, reservation_id))
            .await?;
        Ok(payment)
    }

    pub async fn pending_payments(&self) -> Result<Vec<CapacityPoolPayment>> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let mut ids: Vec<i64> = con.smembers(PAYMENT_PENDING_INDEX).await?;
        ids.sort_unstable();

        let mut payments = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(payment) = self.payment(id).await? {
                payments.push(payment);
            }
        }
        Ok(payments)
    }

    pub async fn payments_for_pool(&self, pool_id: i64) -> Result<Vec<CapacityPoolPayment>> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let mut ids: Vec<i64> = con
            .smembers(format!("{}{}", PAYMENT_POOL_PREFIX, pool_id))
            .await?;
        ids.sort_unstable();

        let mut payments = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(payment) = self.payment(id).await? {
                payments.push(payment);
            }
        }
        Ok(payments)
    }
}
