use serde::{Deserialize, Serialize};

/// Point-in-time counters for one operator.
///
/// The six numbers are read one by one while the worker loops keep running,
/// so they need not agree with each other exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorStats {
    pub name: String,
    pub queue_size: usize,
    pub dlq_size: usize,
    pub successes: u64,
    pub skips: u64,
    pub errors: u64,
}
