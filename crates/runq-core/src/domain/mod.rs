//! Domain model: task requests, errors and operator statistics.

pub mod errors;
pub mod request;
pub mod stats;

pub use self::errors::{ManagerError, QueueError, TaskError};
pub use self::request::{RawRequest, TaskRequest};
pub use self::stats::OperatorStats;
