use async_trait::async_trait;
use redis::AsyncCommands;
use redis::Client;
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::db::cache::DurableCache;
use crate::error::AppError;
use crate::error::AppResult;

/// Prefix shared by every cached recommendation list
pub const RECOMMENDATIONS_PREFIX: &str = "recs:";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Recommendations(String),
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::Recommendations(user_id) => write!(f, "{}{}", RECOMMENDATIONS_PREFIX, user_id),
        }
    }
}

/// Creates a Redis client for caching
///
/// Uses connection pooling via the connection-manager feature.
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Mutations applied by the background writer, in submission order.
/// Deletions carry a channel the writer answers once Redis has applied them.
#[derive(Debug)]
enum CacheCommand {
    Set {
        key: String,
        value: String,
        ttl: u64,
    },
    Delete {
        key: String,
        done: oneshot::Sender<AppResult<()>>,
    },
    DeletePrefix {
        prefix: String,
        done: oneshot::Sender<AppResult<()>>,
    },
}

/// Redis-backed durable tier.
///
/// Reads go straight to Redis. Writes and deletions are queued to a single
/// background task, so a deletion submitted after a write is never overtaken
/// by it. Writes are fire-and-forget; deletions wait for the writer to apply
/// them, so once `delete` returns no read can see the old value.
#[derive(Clone)]
pub struct RedisCache {
    redis_client: Client,
    write_tx: mpsc::UnboundedSender<CacheCommand>,
}

/// Handle for gracefully shutting down the cache writer
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl CacheWriterHandle {
    /// Signals the writer task to flush all pending commands and stop
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Cache writer shutdown signal sent");
    }
}

impl RedisCache {
    /// Creates a new RedisCache and spawns its background writer
    pub fn new(redis_client: Client) -> (Self, CacheWriterHandle) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let client = redis_client.clone();
        tokio::spawn(async move {
            Self::cache_writer_task(client, write_rx, shutdown_rx).await;
        });

        let cache = Self {
            redis_client,
            write_tx,
        };

        (cache, CacheWriterHandle { shutdown_tx })
    }

    /// Applies queued commands until shutdown, then drains what is left
    async fn cache_writer_task(
        client: Client,
        mut write_rx: mpsc::UnboundedReceiver<CacheCommand>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Cache writer task started");

        loop {
            tokio::select! {
                Some(command) = write_rx.recv() => {
                    Self::apply(&client, command).await;
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Cache writer shutting down, flushing remaining writes");
                    write_rx.close();

                    while let Some(command) = write_rx.recv().await {
                        Self::apply(&client, command).await;
                    }

                    tracing::info!("Cache writer task stopped");
                    break;
                }
            }
        }
    }

    async fn apply(client: &Client, command: CacheCommand) {
        match command {
            CacheCommand::Set { key, value, ttl } => {
                if let Err(e) = Self::write(client, &key, value, ttl).await {
                    tracing::warn!(error = %e, key = %key, "Durable cache write failed");
                }
            }
            CacheCommand::Delete { key, done } => {
                let _ = done.send(Self::remove(client, &key).await);
            }
            CacheCommand::DeletePrefix { prefix, done } => {
                let _ = done.send(Self::remove_prefix(client, &prefix).await);
            }
        }
    }

    async fn write(client: &Client, key: &str, value: String, ttl: u64) -> AppResult<()> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: () = conn.set_ex(key, value, ttl).await?;
        Ok(())
    }

    async fn remove(client: &Client, key: &str) -> AppResult<()> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn remove_prefix(client: &Client, prefix: &str) -> AppResult<()> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let keys: Vec<String> = conn.keys(format!("{}*", prefix)).await?;
        if !keys.is_empty() {
            tracing::debug!(prefix = %prefix, count = keys.len(), "Deleting cached keys by prefix");
            let _: () = conn.del(keys).await?;
        }
        Ok(())
    }

    fn enqueue(&self, command: CacheCommand) -> AppResult<()> {
        self.write_tx
            .send(command)
            .map_err(|e| AppError::Internal(format!("Cache writer is gone: {}", e)))
    }

    /// Queues a deletion and waits for the writer to report its result
    async fn enqueue_and_wait(
        &self,
        command: impl FnOnce(oneshot::Sender<AppResult<()>>) -> CacheCommand,
    ) -> AppResult<()> {
        let (done, applied) = oneshot::channel();
        self.enqueue(command(done))?;
        applied
            .await
            .map_err(|_| AppError::Internal("Cache writer stopped before applying a delete".to_string()))?
    }
}

#[async_trait]
impl DurableCache for RedisCache {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let cached: Option<String> = conn.get(key).await?;
        Ok(cached)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> AppResult<()> {
        // Redis rejects SETEX with a zero TTL
        let ttl = ttl.as_secs().max(1);
        self.enqueue(CacheCommand::Set {
            key: key.to_string(),
            value,
            ttl,
        })
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let key = key.to_string();
        self.enqueue_and_wait(|done| CacheCommand::Delete { key, done })
            .await
    }

    async fn delete_prefix(&self, prefix: &str) -> AppResult<()> {
        let prefix = prefix.to_string();
        self.enqueue_and_wait(|done| CacheCommand::DeletePrefix { prefix, done })
            .await
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
