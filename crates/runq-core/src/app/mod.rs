//! App - the scheduler built from the ports.
//!
//! - **TaskOperator**: queue name + callback + retry settings + counters
//! - **TaskManager**: worker loops, retry/backoff/DLQ policy, admin calls, stats
//! - **TaskConfig**: layered settings (defaults, TOML, `RUNQ_*` env)
//! - **RetryPolicy**: exponential backoff with a ceiling

pub mod config;
pub mod manager;
pub mod operator;
pub mod retry;

pub use self::config::TaskConfig;
pub use self::manager::{Hook, TaskManager};
pub use self::operator::{DLQ_PREFIX, TaskOperator, dlq_name};
pub use self::retry::RetryPolicy;
