use std::sync::Arc;

use anyhow::Result;
use redis::AsyncCommands;
use shared::models::node::Node;

use crate::store::core::RedisStore;

const NODE_KEY_PREFIX: &str = "explorer:node:";
const NODE_INDEX: &str = "explorer:node_index";
const NODE_ID_COUNTER: &str = "explorer:node:next_id";

pub struct NodeStore {
    redis: Arc<RedisStore>,
}

impl NodeStore {
    pub fn new(redis: Arc<RedisStore>) -> Self {
        Self { redis }
    }

    pub async fn upsert(&self, mut node: Node) -> Result<Node> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;

        let existing: Option<Node> = con
            .get(format!("{}{}", NODE_KEY_PREFIX, node.node_id))
            .await?;
        node.id = match existing {
            Some(current) => current.id,
            None => con.incr(NODE_ID_COUNTER, 1).await?,
        };

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(format!("{}{}", NODE_KEY_PREFIX, node.node_id), &node)
            .sadd(NODE_INDEX, &node.node_id);
        let _: () = pipe.query_async(&mut con).await?;

        Ok(node)
    }

    pub async fn get(&self, node_id: &str) -> Result<Option<Node>> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let node: Option<Node> = con.get(format!("{}{}", NODE_KEY_PREFIX, node_id)).await?;
        Ok(node)
    }

    pub async fn list(&self) -> Result<Vec<Node>> {
        let mut con = self.redis.client.get_multiplexed_async_connection().await?;
        let ids: Vec<String> = con.smembers(NODE_INDEX).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids
            .iter()
            .map(|id| format!("{}{}", NODE_KEY_PREFIX, id))
            .collect();
        let values: Vec<Option<Node>> = con.mget(&keys).await?;

        let mut nodes: Vec<Node> = values.into_iter().flatten().collect();
        nodes.sort_by_key(|n| n.id);
        Ok(nodes)
    }

    /// Fetch several nodes, failing when any of them is unknown or deleted.
    pub async fn get_valid_targets(&self, node_ids: &[String]) -> Result<Vec<Node>> {
        let mut nodes = Vec::with_capacity(node_ids.len());
        for node_id in node_ids {
            match self.get(node_id).await? {
                Some(node) if !node.deleted => nodes.push(node),
                Some(_) => anyhow::bail!("node {} is decommissioned", node_id),
                None => anyhow::bail!("node {} does not exist", node_id),
            }
        }
        Ok(nodes)
    }
}
