//! Impls - TaskQueue backends.
//!
//! - **LocalQueue**: in-process, for tests and single instances
//! - **RedisQueue**: Redis lists, shared across instances (feature `redis`)

pub mod local_queue;
#[cfg(feature = "redis")]
pub mod redis_queue;

pub use self::local_queue::LocalQueue;
#[cfg(feature = "redis")]
pub use self::redis_queue::RedisQueue;
