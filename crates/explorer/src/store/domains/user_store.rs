use std::sync::Arc;

use anyhow::Result;
use redis::AsyncCommands;
use shared::models::user::User;

use crate::store::core::RedisStore;

const USER_KEY_PREFIX: &str = "explorer:user:";
const USER_INDEX: &str = "explorer:user_index";
const USER_ID_COUNTER: &str = "explorer:user:next_id";
const USER_NAME_INDEX: &str = "explorer:user:by_name";

pub struct UserStore {
    redis: Arc<RedisStore>,
}

impl UserStore {
    pub fn new(redis: Arc<RedisStore>) -> Self {
        Self { redis }
    }

    /// Register a new user. Names are unique; the id is allocated from a
    /// monotonic counter.
    pub async fn create(&self, mut user: User) -> Result<User> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;

        let claimed: bool = con.hset_nx(USER_NAME_INDEX, &user.name, 0i64).await?;
        if !claimed {
            anyhow::bail!("user name '{}' is already taken", user.name);
        }

        let id: i64 = con.incr(USER_ID_COUNTER, 1).await?;
        user.id = id;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(format!("{}{}", USER_KEY_PREFIX, id), &user)
            .sadd(USER_INDEX, id)
            .hset(USER_NAME_INDEX, &user.name, id);
        let _: () = pipe.query_async(&mut con).await?;

        Ok(user)
    }

    pub async fn get(&self, id: i64) -> Result<Option<User>> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let user: Option<User> = con.get(format!("{}{}", USER_KEY_PREFIX, id)).await?;
        Ok(user)
    }

    pub async fn list(&self) -> Result<Vec<User>> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let ids: Vec<i64> = con.smembers(USER_INDEX).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids
            .iter()
            .map(|id| format!("{}{}", USER_KEY_PREFIX, id))
            .collect();
        let values: Vec<Option<User>> = con.mget(&keys).await?;

        let mut users: Vec<User> = values.into_iter().flatten().collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    /// Pubkey lookup for the signature middleware and handlers.
    pub async fn pubkey_of(&self, id: i64) -> Result<Option<String>> {
        Ok(self.get(id).await?.map(|u| u.pubkey))
    }
}
