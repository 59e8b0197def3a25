use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tokio::time::timeout;

/// Upper bound on any single KV round-trip so an unreachable store fails the
/// request instead of hanging it.
const KV_OP_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    async fn del(&self, key: &str) -> anyhow::Result<()>;
    async fn sadd(&self, key: &str, member: &str) -> anyhow::Result<()>;
    async fn srem(&self, key: &str, member: &str) -> anyhow::Result<()>;
    async fn smembers(&self, key: &str) -> anyhow::Result<Vec<String>>;
}

#[derive(Clone)]
pub struct RedisKv {
    conn: redis::aio::ConnectionManager,
}

impl RedisKv {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let conn = client
            .get_connection_manager()
            .await
            .context("connect to redis")?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = timeout(KV_OP_TIMEOUT, conn.get(key))
            .await
            .context("kv get timed out")??;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        timeout(KV_OP_TIMEOUT, conn.set::<_, _, ()>(key, value))
            .await
            .context("kv set timed out")??;
        Ok(())
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        timeout(KV_OP_TIMEOUT, conn.del::<_, ()>(key))
            .await
            .context("kv del timed out")??;
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        timeout(KV_OP_TIMEOUT, conn.sadd::<_, _, ()>(key, member))
            .await
            .context("kv sadd timed out")??;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        timeout(KV_OP_TIMEOUT, conn.srem::<_, _, ()>(key, member))
            .await
            .context("kv srem timed out")??;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = timeout(KV_OP_TIMEOUT, conn.smembers(key))
            .await
            .context("kv smembers timed out")??;
        Ok(members)
    }
}

/// Process-local fallback used when no Redis URL is configured. Constructed
/// once at startup and shared through `AppState`; contents do not survive a
/// restart.
#[derive(Default)]
pub struct MemoryKv {
    strings: RwLock<HashMap<String, String>>,
    sets: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.strings.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.strings
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        self.strings.write().await.remove(key);
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> anyhow::Result<()> {
        self.sets
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> anyhow::Result<()> {
        if let Some(set) = self.sets.write().await.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .sets
            .read()
            .await
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }
}
