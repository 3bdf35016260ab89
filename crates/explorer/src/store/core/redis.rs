use log::{error, info};
use redis::Client;

#[derive(Clone)]
pub struct RedisStore {
    pub client: Client,
}

impl RedisStore {
    pub fn new(redis_url: &str) -> Self {
        match Client::open(redis_url) {
            Ok(client) => {
                info!("Using redis store at {}", redis_url);
                Self { client }
            }
            Err(e) => {
                error!("Failed to open redis store at {}: {}", redis_url, e);
                panic!("Redis connection error: {}", e);
            }
        }
    }

    #[cfg(test)]
    pub fn new_test() -> Self {
        let url = std::env::var("REDIS_TEST_URL")
            .unwrap_or_else(|_| "redis://localhost:6379/15".to_string());
        Self::new(&url)
    }
}
