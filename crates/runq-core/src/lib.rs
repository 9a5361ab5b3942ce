//! runq-core
//!
//! Background task queues with retries, exponential backoff and
//! dead-letter queues.
//!
//! # Modules
//! - **domain**: task requests, error types, stats rows
//! - **ports**: the `TaskQueue` contract and the `Clock`
//! - **impls**: queue backends (`LocalQueue`, `RedisQueue` behind the `redis` feature)
//! - **typed**: typed `TaskCallback`s and their type-erased form
//! - **app**: `TaskOperator`, `TaskManager`, `TaskConfig`, `RetryPolicy`

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use app::{TaskConfig, TaskManager, TaskOperator};
pub use domain::{ManagerError, OperatorStats, QueueError, RawRequest, TaskError, TaskRequest};
pub use impls::LocalQueue;
pub use ports::{TaskQueue, TaskQueueExt};
pub use typed::{FnCallback, TaskCallback};
