//! RedisQueue - task queue backed by Redis lists.
//!
//! Lets several instances share one set of queues. Each request is stored
//! as the JSON text of the full [`RawRequest`]; `RPUSH`/`LPOP` keep the
//! list FIFO.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use crate::domain::{QueueError, RawRequest};
use crate::ports::TaskQueue;
use crate::ports::task_queue::page_bounds;

#[derive(Clone)]
pub struct RedisQueue {
    conn: MultiplexedConnection,
}

impl RedisQueue {
    /// Connect to `redis_url` (e.g. `redis://localhost:6379`).
    pub async fn connect(redis_url: impl AsRef<str>) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url.as_ref())?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }

    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }

    fn encode(request: &RawRequest) -> Result<String, QueueError> {
        Ok(serde_json::to_string(request)?)
    }

    fn decode(text: &str) -> Result<RawRequest, QueueError> {
        Ok(serde_json::from_str(text)?)
    }

    /// The entry is already off the list, so a bad one is logged in full
    /// before the error goes up.
    fn decode_popped(queue: &str, text: &str) -> Result<RawRequest, QueueError> {
        Self::decode(text).inspect_err(|e| {
            tracing::error!(queue, stored = text, error = %e, "Dropped undecodable request");
        })
    }

    async fn raw_items(&self, queue: &str) -> Result<Vec<String>, QueueError> {
        let mut conn = self.conn.clone();
        let items: Vec<String> = conn.lrange(queue, 0, -1).await?;
        Ok(items)
    }
}

#[async_trait]
impl TaskQueue for RedisQueue {
    async fn push(&self, queue: &str, request: &RawRequest) -> Result<(), QueueError> {
        let text = Self::encode(request)?;
        let mut conn = self.conn.clone();
        let _: usize = conn.rpush(queue, text).await?;
        Ok(())
    }

    async fn pop(&self, queue: &str) -> Result<Option<RawRequest>, QueueError> {
        let mut conn = self.conn.clone();
        let text: Option<String> = conn.lpop(queue, None).await?;
        text.map(|text| Self::decode_popped(queue, &text)).transpose()
    }

    async fn size(&self, queue: &str) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(queue).await?;
        Ok(len)
    }

    async fn list(&self, queue: &str) -> Result<Vec<RawRequest>, QueueError> {
        self.raw_items(queue)
            .await?
            .iter()
            .map(|text| Self::decode(text))
            .collect()
    }

    async fn list_page(
        &self,
        queue: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<RawRequest>, QueueError> {
        let len = self.size(queue).await?;
        let Some((start, end)) = page_bounds(len, page, page_size) else {
            return Ok(Vec::new());
        };
        let mut conn = self.conn.clone();
        let items: Vec<String> = conn
            .lrange(queue, start as isize, end as isize - 1)
            .await?;
        items.iter().map(|text| Self::decode(text)).collect()
    }

    async fn remove(&self, queue: &str, id: &str) -> Result<bool, QueueError> {
        // LREM needs the exact stored text, so find it first. Decoding stops
        // at the first match.
        for text in self.raw_items(queue).await? {
            if Self::decode(&text)?.id == id {
                let mut conn = self.conn.clone();
                let removed: usize = conn.lrem(queue, 1, &text).await?;
                return Ok(removed > 0);
            }
        }
        Ok(false)
    }

    async fn clear(&self, queue: &str) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let (len, _): (usize, usize) = redis::pipe()
            .atomic()
            .llen(queue)
            .del(queue)
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    async fn move_requests(&self, from: &str, to: &str) -> Result<usize, QueueError> {
        if from == to {
            return Ok(0);
        }
        let mut count = 0;
        while let Some(mut request) = self.pop(from).await? {
            request.tries = 0;
            self.push(to, &request).await?;
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stored_text_round_trips_metadata() {
        let mut request = RawRequest::with_id("abc", json!({"n": 1})).with_next_run_at(Some(99));
        request.increment_tries();
        let text = RedisQueue::encode(&request).unwrap();
        let back = RedisQueue::decode(&text).unwrap();
        assert_eq!(back.id, "abc");
        assert_eq!(back.tries, 1);
        assert_eq!(back.next_run_at, Some(99));
        assert_eq!(back.value, json!({"n": 1}));
    }

    #[test]
    fn undecodable_pop_is_a_serialization_error() {
        assert!(matches!(
            RedisQueue::decode_popped("q", "{not json"),
            Err(QueueError::Serialization(_))
        ));
        assert_eq!(
            RedisQueue::decode_popped("q", r#"{"id":"a","value":1}"#).unwrap().id,
            "a"
        );
    }

    /// Needs a live server: `RUNQ_TEST_REDIS_URL=redis://localhost:6379 cargo test --features redis -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn redis_queue_contract() {
        let url = std::env::var("RUNQ_TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let queue = RedisQueue::connect(url).await.unwrap();
        let name = format!("runq-test:{}", uuid::Uuid::new_v4());
        let dlq = format!("dlq:{name}");

        for id in ["1", "2", "3"] {
            queue.push(&name, &RawRequest::with_id(id, json!(id))).await.unwrap();
        }
        assert_eq!(queue.size(&name).await.unwrap(), 3);
        assert_eq!(queue.list_page(&name, 2, 2).await.unwrap().len(), 1);
        assert!(queue.remove(&name, "2").await.unwrap());
        assert!(!queue.remove(&name, "2").await.unwrap());
        assert_eq!(queue.pop(&name).await.unwrap().unwrap().id, "1");

        let mut failed = RawRequest::with_id("d", json!("d"));
        failed.tries = 5;
        queue.push(&dlq, &failed).await.unwrap();
        assert_eq!(queue.move_requests(&dlq, &name).await.unwrap(), 1);
        let ids: Vec<_> = queue.list(&name).await.unwrap().into_iter().map(|r| (r.id, r.tries)).collect();
        assert_eq!(ids, [("3".to_string(), 0), ("d".to_string(), 0)]);
        assert_eq!(queue.clear(&name).await.unwrap(), 2);
        assert_eq!(queue.clear(&name).await.unwrap(), 0);
    }
}
