//! Ports - the seams between the manager and the outside world.
//!
//! - `TaskQueue`: where requests wait (in-process, Redis, ...)
//! - `Clock`: time source, swappable in tests

pub mod clock;
pub mod task_queue;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::task_queue::{TaskQueue, TaskQueueExt};
