pub mod cache;
pub mod memory;
pub mod ratings;
pub mod redis;

pub use cache::DurableCache;
pub use memory::MemoryCache;
pub use ratings::{RatingStore, UpsertOutcome};
pub use self::redis::create_redis_client;
pub use self::redis::CacheKey;
pub use self::redis::CacheWriterHandle;
pub use self::redis::RedisCache;
