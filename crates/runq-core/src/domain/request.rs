//! Task request: one unit of deferred work.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A request waiting on a named queue.
///
/// Identity is the `id` alone: two requests with the same id are equal no
/// matter what payload, try count or schedule they carry. The queue
/// backends rely on this for point removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest<T> {
    pub id: String,
    pub value: T,

    /// Failed attempts so far.
    #[serde(default)]
    pub tries: u32,

    /// Earliest time (epoch millis) the request may run. `None` means now.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<i64>,
}

/// Type-erased request as stored by every queue backend.
pub type RawRequest = TaskRequest<serde_json::Value>;

impl<T> TaskRequest<T> {
    /// Wrap a payload under a freshly generated id.
    pub fn new(value: T) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), value)
    }

    pub fn with_id(id: impl Into<String>, value: T) -> Self {
        Self {
            id: id.into(),
            value,
            tries: 0,
            next_run_at: None,
        }
    }

    /// Count one more failed attempt and return the new total.
    pub fn increment_tries(&mut self) -> u32 {
        self.tries = self.tries.saturating_add(1);
        self.tries
    }

    pub fn with_next_run_at(mut self, next_run_at: Option<i64>) -> Self {
        self.next_run_at = next_run_at;
        self
    }

    pub fn is_ready_at(&self, now_millis: i64) -> bool {
        self.next_run_at.is_none_or(|at| now_millis >= at)
    }

    pub fn ready(&self) -> bool {
        self.is_ready_at(chrono::Utc::now().timestamp_millis())
    }

    /// Swap the payload while keeping id, tries and schedule.
    pub fn map_value<U, F>(self, f: F) -> TaskRequest<U>
    where
        F: FnOnce(T) -> U,
    {
        TaskRequest {
            id: self.id,
            value: f(self.value),
            tries: self.tries,
            next_run_at: self.next_run_at,
        }
    }

    pub fn try_map_value<U, E, F>(self, f: F) -> Result<TaskRequest<U>, E>
    where
        F: FnOnce(T) -> Result<U, E>,
    {
        Ok(TaskRequest {
            id: self.id,
            value: f(self.value)?,
            tries: self.tries,
            next_run_at: self.next_run_at,
        })
    }
}

impl<T> PartialEq for TaskRequest<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for TaskRequest<T> {}

impl<T> Hash for TaskRequest<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T: fmt::Debug> fmt::Display for TaskRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ id: {}, value: {:?}, tries: {}, nextRunAt: {:?} }}",
            self.id, self.value, self.tries, self.next_run_at
        )
    }
}

impl TaskRequest<serde_json::Value> {
    /// Encode a typed request into its stored form.
    pub fn from_typed<T: Serialize>(request: &TaskRequest<T>) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: request.id.clone(),
            value: serde_json::to_value(&request.value)?,
            tries: request.tries,
            next_run_at: request.next_run_at,
        })
    }

    /// Decode the stored payload into `T`.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<TaskRequest<T>, serde_json::Error> {
        self.clone().try_map_value(serde_json::from_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_requests_get_distinct_ids() {
        let a = TaskRequest::new(1);
        let b = TaskRequest::new(1);
        assert_ne!(a.id, b.id);
        assert_eq!(a.tries, 0);
        assert!(a.next_run_at.is_none());
    }

    #[test]
    fn equality_is_by_id_only() {
        let a = TaskRequest::with_id("abc", "first");
        let mut b = TaskRequest::with_id("abc", "second");
        b.increment_tries();
        assert_eq!(a, b);
        assert_ne!(a, TaskRequest::with_id("xyz", "first"));
    }

    #[test]
    fn readiness_follows_next_run_at() {
        let req = TaskRequest::new(()).with_next_run_at(Some(1_000));
        assert!(!req.is_ready_at(999));
        assert!(req.is_ready_at(1_000));
        assert!(req.is_ready_at(5_000));
        assert!(TaskRequest::new(()).is_ready_at(0));
    }

    #[test]
    fn future_request_is_not_ready() {
        let later = chrono::Utc::now().timestamp_millis() + 60_000;
        assert!(!TaskRequest::new(()).with_next_run_at(Some(later)).ready());
    }

    #[test]
    fn increment_returns_new_count() {
        let mut req = TaskRequest::new(());
        assert_eq!(req.increment_tries(), 1);
        assert_eq!(req.increment_tries(), 2);
        assert_eq!(req.tries, 2);
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let req = TaskRequest::with_id("abc", json!({"n": 1})).with_next_run_at(Some(42));
        let text = serde_json::to_value(&req).unwrap();
        assert_eq!(
            text,
            json!({"id": "abc", "value": {"n": 1}, "tries": 0, "nextRunAt": 42})
        );
    }

    #[test]
    fn decode_rejects_wrong_payload_shape() {
        let raw = RawRequest::with_id("abc", json!("not a number"));
        assert!(raw.decode::<u32>().is_err());

        let raw = RawRequest::with_id("abc", json!(7));
        let typed = raw.decode::<u32>().unwrap();
        assert_eq!(typed.value, 7);
        assert_eq!(typed.id, "abc");
    }
}
