use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

use crate::models::job::Job;

const DECLARED_TOPICS_KEY: &str = "video_qr:topics";

/// A message handed to a consumer and not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub payload: String,
    /// Backend-specific handle; Redis settles by payload and leaves this 0.
    pub tag: u64,
}

/// Durable at-least-once FIFO channel between producers and the coordinator.
///
/// `consume` hands out one message at a time; a consumer must `ack` or
/// `reject` it before taking the next one, which gives every coordinator a
/// prefetch of one.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Idempotently create the topic.
    async fn declare(&self, topic: &str) -> Result<(), QueueError>;

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), QueueError>;

    /// Wait up to `timeout` for the next message.
    async fn consume(&self, topic: &str, timeout: Duration)
        -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    async fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError>;

    /// Put messages this consumer took but never settled back on the topic.
    /// Returns how many were redelivered.
    async fn recover(&self, topic: &str) -> Result<usize, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;

    /// Number of messages waiting on the topic.
    async fn depth(&self, topic: &str) -> Result<u64, QueueError>;
}

/// Serialize a job descriptor and publish it.
pub async fn publish_job(
    queue: &dyn JobQueue,
    topic: &str,
    job: &Job,
) -> Result<(), QueueError> {
    let payload = job.to_payload().map_err(QueueError::Serialize)?;
    queue.publish(topic, &payload).await
}

/// Redis-backed queue using the reliable-list pattern.
///
/// Producers `LPUSH` onto the topic list. A consumer atomically moves the
/// tail into its own processing list, so an unacknowledged message survives
/// a crash and is moved back by [`JobQueue::recover`] on restart.
pub struct RedisJobQueue {
    client: redis::Client,
    consumer: String,
    dead_letter_topic: Option<String>,
}

impl RedisJobQueue {
    pub fn new(redis_url: &str, consumer: impl Into<String>) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            consumer: consumer.into(),
            dead_letter_topic: None,
        })
    }

    pub fn with_dead_letter(mut self, topic: Option<String>) -> Self {
        self.dead_letter_topic = topic;
        self
    }

    fn processing_key(&self, topic: &str) -> String {
        processing_key(topic, &self.consumer)
    }

    /// Move unacked messages of every `<group>-<n>` consumer back onto the
    /// topic, whatever instance count the previous run used. Call before any
    /// consumer of the group starts taking messages.
    pub async fn recover_group(&self, topic: &str, group: &str) -> Result<usize, QueueError> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", processing_key(topic, &format!("{group}-")));
        let keys: Vec<String> = {
            let mut iter: redis::AsyncIter<String> = conn
                .scan_match(&pattern)
                .await
                .map_err(QueueError::Redis)?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                if is_group_member(&key, topic, group) {
                    keys.push(key);
                }
            }
            keys
        };

        let mut moved = 0;
        for key in keys {
            moved += drain_processing(&mut conn, &key, topic).await?;
        }
        Ok(moved)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn declare(&self, topic: &str) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.sadd::<_, _, ()>(DECLARED_TOPICS_KEY, topic)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.lpush::<_, _, ()>(topic, payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn consume(
        &self,
        topic: &str,
        timeout: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.connection().await?;
        // A zero timeout would block forever.
        let timeout_secs = timeout.as_secs().max(1);
        let payload: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(topic)
            .arg(self.processing_key(topic))
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        Ok(payload.map(|payload| Delivery {
            topic: topic.to_string(),
            payload,
            tag: 0,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.lrem::<_, _, ()>(self.processing_key(&delivery.topic), 1, &delivery.payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .lrem(self.processing_key(&delivery.topic), 1, &delivery.payload)
            .ignore();
        if requeue {
            // Tail of the list is consumed next.
            pipe.rpush(&delivery.topic, &delivery.payload).ignore();
        } else if let Some(dead) = &self.dead_letter_topic {
            pipe.lpush(dead, &delivery.payload).ignore();
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn recover(&self, topic: &str) -> Result<usize, QueueError> {
        let mut conn = self.connection().await?;
        drain_processing(&mut conn, &self.processing_key(topic), topic).await
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn depth(&self, topic: &str) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(topic).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }
}

fn processing_key(topic: &str, consumer: &str) -> String {
    format!("{topic}:processing:{consumer}")
}

/// True for the processing list of consumer `<group>-<n>` on `topic`.
fn is_group_member(key: &str, topic: &str, group: &str) -> bool {
    key.strip_prefix(&processing_key(topic, &format!("{group}-")))
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

async fn drain_processing(
    conn: &mut redis::aio::MultiplexedConnection,
    processing: &str,
    topic: &str,
) -> Result<usize, QueueError> {
    let mut moved = 0;
    // Newest first onto the consuming end, so the oldest is redelivered first.
    loop {
        let item: Option<String> = redis::cmd("LMOVE")
            .arg(processing)
            .arg(topic)
            .arg("LEFT")
            .arg("RIGHT")
            .query_async(conn)
            .await
            .map_err(QueueError::Redis)?;
        match item {
            Some(_) => moved += 1,
            None => break,
        }
    }
    Ok(moved)
}

#[derive(Default)]
struct MemoryQueueState {
    topics: HashMap<String, VecDeque<String>>,
    unacked: HashMap<u64, Delivery>,
    dead_letters: Vec<Delivery>,
    acked: Vec<Delivery>,
    next_tag: u64,
}

/// Process-local queue with the same delivery semantics as [`RedisJobQueue`].
/// Used for single-process deployments and tests.
#[derive(Default)]
pub struct InMemoryJobQueue {
    state: Mutex<MemoryQueueState>,
    notify: Notify,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryQueueState>, QueueError> {
        self.state.lock().map_err(|_| QueueError::Poisoned)
    }

    fn try_take(&self, topic: &str) -> Result<Option<Delivery>, QueueError> {
        let mut state = self.lock()?;
        let Some(payload) = state.topics.get_mut(topic).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };
        state.next_tag += 1;
        let delivery = Delivery {
            topic: topic.to_string(),
            payload,
            tag: state.next_tag,
        };
        state.unacked.insert(delivery.tag, delivery.clone());
        Ok(Some(delivery))
    }

    fn settle(&self, delivery: &Delivery) -> Result<(MemoryQueueStateGuard<'_>, Delivery), QueueError> {
        let mut state = self.lock()?;
        let settled = state
            .unacked
            .remove(&delivery.tag)
            .ok_or(QueueError::UnknownDelivery(delivery.tag))?;
        Ok((state, settled))
    }

    /// Messages acknowledged so far, in order.
    pub fn acked(&self) -> Vec<Delivery> {
        self.lock().map(|s| s.acked.clone()).unwrap_or_default()
    }

    /// Messages rejected without requeue, in order.
    pub fn dead_letters(&self) -> Vec<Delivery> {
        self.lock().map(|s| s.dead_letters.clone()).unwrap_or_default()
    }

    pub fn unacked_count(&self) -> usize {
        self.lock().map(|s| s.unacked.len()).unwrap_or_default()
    }
}

type MemoryQueueStateGuard<'a> = std::sync::MutexGuard<'a, MemoryQueueState>;

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn declare(&self, topic: &str) -> Result<(), QueueError> {
        self.lock()?.topics.entry(topic.to_string()).or_default();
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), QueueError> {
        self.lock()?
            .topics
            .entry(topic.to_string())
            .or_default()
            .push_back(payload.to_string());
        self.notify.notify_one();
        Ok(())
    }

    async fn consume(
        &self,
        topic: &str,
        timeout: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(delivery) = self.try_take(topic)? {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return self.try_take(topic);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let (mut state, settled) = self.settle(delivery)?;
        state.acked.push(settled);
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        let (mut state, settled) = self.settle(delivery)?;
        if requeue {
            state
                .topics
                .entry(settled.topic.clone())
                .or_default()
                .push_front(settled.payload);
            drop(state);
            self.notify.notify_one();
        } else {
            state.dead_letters.push(settled);
        }
        Ok(())
    }

    async fn recover(&self, topic: &str) -> Result<usize, QueueError> {
        let mut state = self.lock()?;
        let mut tags: Vec<u64> = state
            .unacked
            .values()
            .filter(|d| d.topic == topic)
            .map(|d| d.tag)
            .collect();
        // Oldest delivery goes back to the front last so it is consumed first.
        tags.sort_unstable_by(|a, b| b.cmp(a));
        let moved = tags.len();
        for tag in tags {
            if let Some(delivery) = state.unacked.remove(&tag) {
                state
                    .topics
                    .entry(topic.to_string())
                    .or_default()
                    .push_front(delivery.payload);
            }
        }
        drop(state);
        if moved > 0 {
            self.notify.notify_one();
        }
        Ok(moved)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        self.lock().map(|_| ())
    }

    async fn depth(&self, topic: &str) -> Result<u64, QueueError> {
        Ok(self
            .lock()?
            .topics
            .get(topic)
            .map(|q| q.len() as u64)
            .unwrap_or(0))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Delivery {0} is not outstanding")]
    UnknownDelivery(u64),

    #[error("Queue state lock poisoned")]
    Poisoned,
}
