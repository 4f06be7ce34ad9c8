use async_trait::async_trait;
use std::time::Duration;

use crate::error::AppResult;

/// Shared durable cache tier holding serialized values with an explicit TTL.
///
/// Implementations must treat an expired key as absent. A `delete` or
/// `delete_prefix` that returns `Ok` must already be visible to the next `get`.
#[async_trait]
pub trait DurableCache: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> AppResult<()>;

    async fn delete(&self, key: &str) -> AppResult<()>;

    /// Removes every key starting with `prefix`
    async fn delete_prefix(&self, prefix: &str) -> AppResult<()>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}
