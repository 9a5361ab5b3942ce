//! LocalQueue - in-process task queue.
//!
//! Useful for tests and single-instance deployments. Nothing survives a
//! restart.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{QueueError, RawRequest};
use crate::ports::TaskQueue;
use crate::ports::task_queue::page_bounds;

/// Named FIFO queues kept in memory.
///
/// - `HashMap<String, VecDeque<RawRequest>>`, one deque per queue name
/// - a queue is created on first push and dropped when cleared
/// - the lock is never held across an await point
#[derive(Default)]
pub struct LocalQueue {
    queues: Mutex<HashMap<String, VecDeque<RawRequest>>>,
}

impl LocalQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskQueue for LocalQueue {
    async fn push(&self, queue: &str, request: &RawRequest) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        queues
            .entry(queue.to_string())
            .or_default()
            .push_back(request.clone());
        Ok(())
    }

    async fn pop(&self, queue: &str) -> Result<Option<RawRequest>, QueueError> {
        let mut queues = self.queues.lock().await;
        Ok(queues.get_mut(queue).and_then(VecDeque::pop_front))
    }

    async fn size(&self, queue: &str) -> Result<usize, QueueError> {
        let queues = self.queues.lock().await;
        Ok(queues.get(queue).map_or(0, VecDeque::len))
    }

    async fn list(&self, queue: &str) -> Result<Vec<RawRequest>, QueueError> {
        let queues = self.queues.lock().await;
        Ok(queues
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_page(
        &self,
        queue: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<RawRequest>, QueueError> {
        let queues = self.queues.lock().await;
        let Some(q) = queues.get(queue) else {
            return Ok(Vec::new());
        };
        let Some((start, end)) = page_bounds(q.len(), page, page_size) else {
            return Ok(Vec::new());
        };
        Ok(q.range(start..end).cloned().collect())
    }

    async fn remove(&self, queue: &str, id: &str) -> Result<bool, QueueError> {
        let mut queues = self.queues.lock().await;
        let Some(q) = queues.get_mut(queue) else {
            return Ok(false);
        };
        match q.iter().position(|r| r.id == id) {
            Some(index) => {
                q.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn clear(&self, queue: &str) -> Result<usize, QueueError> {
        let mut queues = self.queues.lock().await;
        Ok(queues.remove(queue).map_or(0, |q| q.len()))
    }

    async fn move_requests(&self, from: &str, to: &str) -> Result<usize, QueueError> {
        if from == to {
            return Ok(0);
        }
        let mut queues = self.queues.lock().await;
        let Some(source) = queues.remove(from) else {
            return Ok(0);
        };
        let count = source.len();
        let target = queues.entry(to.to_string()).or_default();
        for mut request in source {
            request.tries = 0;
            target.push_back(request);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskRequest;
    use crate::ports::TaskQueueExt;
    use serde_json::json;

    fn raw(id: &str) -> RawRequest {
        RawRequest::with_id(id, json!({ "id": id }))
    }

    async fn page_ids(queue: &LocalQueue, page: usize) -> Vec<String> {
        queue
            .list_page("a", page, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect()
    }

    #[tokio::test]
    async fn push_pop_is_fifo_per_queue() {
        let queue = LocalQueue::new();
        queue.push("a", &raw("1")).await.unwrap();
        queue.push("b", &raw("x")).await.unwrap();
        queue.push("a", &raw("2")).await.unwrap();

        assert_eq!(queue.pop("a").await.unwrap().unwrap().id, "1");
        assert_eq!(queue.pop("a").await.unwrap().unwrap().id, "2");
        assert!(queue.pop("a").await.unwrap().is_none());
        assert_eq!(queue.size("b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_queue_is_empty() {
        let queue = LocalQueue::new();
        assert_eq!(queue.size("nope").await.unwrap(), 0);
        assert!(queue.list("nope").await.unwrap().is_empty());
        assert!(queue.list_page("nope", 1, 10).await.unwrap().is_empty());
        assert!(!queue.remove("nope", "1").await.unwrap());
        assert_eq!(queue.clear("nope").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn list_does_not_consume() {
        let queue = LocalQueue::new();
        for id in ["1", "2", "3"] {
            queue.push("a", &raw(id)).await.unwrap();
        }
        let ids: Vec<_> = queue.list("a").await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, ["1", "2", "3"]);
        assert_eq!(queue.size("a").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn paging_is_one_based() {
        let queue = LocalQueue::new();
        for i in 0..5 {
            queue.push("a", &raw(&i.to_string())).await.unwrap();
        }
        assert_eq!(page_ids(&queue, 1).await, ["0", "1"]);
        assert_eq!(page_ids(&queue, 2).await, ["2", "3"]);
        assert_eq!(page_ids(&queue, 3).await, ["4"]);
        assert!(page_ids(&queue, 4).await.is_empty());
    }

    #[tokio::test]
    async fn remove_by_id() {
        let queue = LocalQueue::new();
        queue.push("a", &raw("abc")).await.unwrap();
        queue.push("a", &raw("def")).await.unwrap();

        assert!(queue.remove("a", "abc").await.unwrap());
        assert!(!queue.remove("a", "abc").await.unwrap());
        assert_eq!(queue.size("a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn clear_reports_count() {
        let queue = LocalQueue::new();
        for i in 0..4 {
            queue.push("a", &raw(&i.to_string())).await.unwrap();
        }
        assert_eq!(queue.clear("a").await.unwrap(), 4);
        assert_eq!(queue.size("a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn move_resets_tries_and_appends() {
        let queue = LocalQueue::new();
        queue.push("live", &raw("existing")).await.unwrap();
        for id in ["d1", "d2"] {
            let mut r = raw(id);
            r.tries = 10;
            queue.push("dlq:live", &r).await.unwrap();
        }

        assert_eq!(queue.move_requests("dlq:live", "live").await.unwrap(), 2);
        assert_eq!(queue.size("dlq:live").await.unwrap(), 0);

        let live = queue.list("live").await.unwrap();
        let ids: Vec<_> = live.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["existing", "d1", "d2"]);
        assert!(live.iter().all(|r| r.tries == 0));
    }

    #[tokio::test]
    async fn move_into_missing_destination_creates_it() {
        let queue = LocalQueue::new();
        queue.push("dlq:q", &raw("1")).await.unwrap();
        assert_eq!(queue.move_requests("dlq:q", "q").await.unwrap(), 1);
        assert_eq!(queue.size("q").await.unwrap(), 1);
        assert_eq!(queue.move_requests("dlq:q", "q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn typed_helpers_check_payload_type() {
        let queue = LocalQueue::new();
        queue
            .push_typed("a", &TaskRequest::with_id("n", 5u32))
            .await
            .unwrap();
        queue
            .push_typed("a", &TaskRequest::with_id("s", "five"))
            .await
            .unwrap();

        let first = queue.pop_typed::<u32>("a").await.unwrap().unwrap();
        assert_eq!(first.value, 5);
        assert!(matches!(
            queue.pop_typed::<u32>("a").await,
            Err(QueueError::Serialization(_))
        ));
    }
}
