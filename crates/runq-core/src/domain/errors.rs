//! Error types for callbacks, queue backends and the admin surface.

use thiserror::Error;

/// Raised by a callback while processing one payload.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Downstream is rate limiting: back off and yield the rest of the queue.
    #[error("throttled: {0}")]
    Throttled(String),

    #[error("{0}")]
    Failed(String),

    /// The stored payload does not match the operator's payload type.
    #[error("payload decode: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("callback panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn throttled(message: impl Into<String>) -> Self {
        Self::Throttled(message.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Throttled(_))
    }
}

/// Raised by a queue backend.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backend: {0}")]
    Backend(String),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for QueueError {
    fn from(value: redis::RedisError) -> Self {
        Self::Backend(value.to_string())
    }
}

/// Returned by the administrative operations of the manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Callback(#[from] TaskError),
}

impl ManagerError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_names_the_field() {
        let err = ManagerError::validation("queueName", "The queue 'x' does not exist.");
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "invalid queueName: The queue 'x' does not exist.");
    }

    #[test]
    fn throttled_is_distinguishable() {
        assert!(TaskError::throttled("slow down").is_throttled());
        assert!(!TaskError::failed("boom").is_throttled());
    }
}
