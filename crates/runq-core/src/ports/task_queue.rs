//! TaskQueue port - named FIFO storage of task requests.
//!
//! The manager only talks to this trait. Backends decide how requests are
//! stored; they must keep push/pop FIFO per queue name and be safe under
//! concurrent use from several worker loops and outside producers.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{QueueError, RawRequest, TaskRequest};

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Append a request to the tail of `queue`.
    async fn push(&self, queue: &str, request: &RawRequest) -> Result<(), QueueError>;

    /// Remove and return the oldest request, `None` when empty.
    async fn pop(&self, queue: &str) -> Result<Option<RawRequest>, QueueError>;

    /// Current number of requests; zero for an unknown queue.
    async fn size(&self, queue: &str) -> Result<usize, QueueError>;

    /// Every request in queue order, without removing anything.
    async fn list(&self, queue: &str) -> Result<Vec<RawRequest>, QueueError>;

    /// One page of the queue. `page` is 1-based; past the end the page is empty.
    async fn list_page(
        &self,
        queue: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<RawRequest>, QueueError>;

    /// Remove the request with `id`. Returns whether one was found.
    async fn remove(&self, queue: &str, id: &str) -> Result<bool, QueueError>;

    /// Remove every request. Returns how many were removed.
    async fn clear(&self, queue: &str) -> Result<usize, QueueError>;

    /// Drain `from` into `to`, resetting `tries` on each moved request.
    /// Returns how many were moved.
    async fn move_requests(&self, from: &str, to: &str) -> Result<usize, QueueError>;
}

/// Typed helpers over any [`TaskQueue`].
///
/// The payload type parameter plays the role of the type token: a stored
/// payload that does not decode into `T` is reported as a serialization
/// error instead of being handed out.
#[async_trait]
pub trait TaskQueueExt: TaskQueue {
    async fn push_typed<T>(&self, queue: &str, request: &TaskRequest<T>) -> Result<(), QueueError>
    where
        T: Serialize + Sync,
    {
        let raw = RawRequest::from_typed(request)?;
        self.push(queue, &raw).await
    }

    async fn pop_typed<T>(&self, queue: &str) -> Result<Option<TaskRequest<T>>, QueueError>
    where
        T: DeserializeOwned + Send,
    {
        match self.pop(queue).await? {
            Some(raw) => Ok(Some(raw.try_map_value(serde_json::from_value)?)),
            None => Ok(None),
        }
    }
}

impl<Q: TaskQueue + ?Sized> TaskQueueExt for Q {}

/// Start and end (exclusive) indexes of a 1-based page, clamped to `len`.
/// `None` for page 0, an empty page size, or a page past the end.
pub(crate) fn page_bounds(len: usize, page: usize, page_size: usize) -> Option<(usize, usize)> {
    if page == 0 || page_size == 0 {
        return None;
    }
    let start = (page - 1).saturating_mul(page_size);
    if start >= len {
        return None;
    }
    let end = page.saturating_mul(page_size).min(len);
    Some((start, end))
}
