//! Thin KVS capability layer over the Redis backplane.
//!
//! Everything that touches short-lived shared state (locks, rate-limit
//! windows, queue structures, caches, feed version keys) goes through the
//! [`Kvs`] trait so the backing store can be swapped or mocked in tests.
//! Two implementations ship: [`RedisKvs`] for production and [`MemoryKvs`]
//! for tests and local fail-open fallbacks.

pub mod backend;
pub mod error;
pub mod lock;
pub mod memory;
pub mod negative;
pub mod rate_limit;
pub mod redis_kvs;

pub use backend::Kvs;
pub use error::KvsError;
pub use lock::DistLock;
pub use memory::MemoryKvs;
pub use negative::NegativeCache;
pub use rate_limit::{RateLimitRule, RateLimiter};
pub use redis_kvs::RedisKvs;

pub type KvsResult<T> = Result<T, KvsError>;
