//! Redis-backed counter store.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::store::{CounterStore, StoreError};

const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

/// Counter store backed by a shared redis instance.
///
/// The connection is established lazily and re-attempted on the next call
/// if it fails, so the gateway can start while redis is still down.
pub struct RedisCounterStore {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    script: Script,
    op_timeout: Duration,
}

impl RedisCounterStore {
    /// Create a store for `url`. Only the URL is checked here.
    pub fn new(url: &str, op_timeout: Duration) -> Result<Self, StoreError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            connection: OnceCell::new(),
            script: Script::new(INCREMENT_SCRIPT),
            op_timeout,
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let fut = self
            .connection
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()));
        let conn = tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.op_timeout))??;
        Ok(conn.clone())
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let window_ms = window.as_millis().max(1) as u64;

        let mut invocation = self.script.key(key);
        invocation.arg(window_ms);
        let fut = invocation.invoke_async::<u64>(&mut conn);

        let count = tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.op_timeout))??;
        Ok(count)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let ping = redis::cmd("PING");
        let fut = ping.query_async::<String>(&mut conn);
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.op_timeout))??;
        Ok(())
    }
}
