use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

const PENDING_KEY: &str = "analysis:jobs";
const PROCESSING_KEY: &str = "analysis:processing";
const DEAD_LETTER_KEY: &str = "analysis:dead_letter";

/// Message as stored in the queue lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: Uuid,
    pub receive_count: u32,
    pub body: String,
}

impl Envelope {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            receive_count: 0,
            body: body.into(),
        }
    }
}

/// A received message. `receipt` is the exact list entry, used to remove it again.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message_id: Uuid,
    pub receive_count: u32,
    pub body: String,
    pub receipt: String,
}

impl Delivery {
    /// Interpret a raw list entry. Entries that are not envelopes (pushed by a
    /// foreign producer) are delivered verbatim so they can be dead-lettered.
    pub fn from_entry(raw: String) -> Self {
        match serde_json::from_str::<Envelope>(&raw) {
            Ok(envelope) => Self {
                message_id: envelope.message_id,
                receive_count: envelope.receive_count.saturating_add(1),
                body: envelope.body,
                receipt: raw,
            },
            Err(_) => Self {
                message_id: Uuid::nil(),
                receive_count: 1,
                body: raw.clone(),
                receipt: raw,
            },
        }
    }

    /// Envelope to push back for redelivery, carrying this delivery's count.
    pub fn redelivery(&self) -> Envelope {
        Envelope {
            message_id: if self.message_id.is_nil() {
                Uuid::new_v4()
            } else {
                self.message_id
            },
            receive_count: self.receive_count,
            body: self.body.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum DeadLetterReason {
    InvalidJson,
    Validation,
    MaxReceiveCount,
}

/// Entry written to the dead-letter list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub message_id: Uuid,
    pub receive_count: u32,
    pub body: String,
    pub reason: String,
    pub detail: String,
    pub dead_lettered_at: i64,
}

impl DeadLetter {
    pub fn new(delivery: &Delivery, reason: DeadLetterReason, detail: &str) -> Self {
        Self {
            message_id: delivery.message_id,
            receive_count: delivery.receive_count,
            body: delivery.body.clone(),
            reason: reason.to_string(),
            detail: detail.to_string(),
            dead_lettered_at: Utc::now().timestamp(),
        }
    }
}

/// At-least-once work queue.
///
/// A received message stays invisible to other receivers until it is
/// acknowledged, abandoned for redelivery, or dead-lettered.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Publish a job body. Returns the new message id.
    async fn enqueue(&self, body: &str) -> Result<Uuid, QueueError>;

    /// Wait up to `wait` for one message.
    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Processing succeeded; drop the message.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Processing failed; make the message visible again.
    async fn abandon(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Move the message aside so it is never redelivered.
    async fn dead_letter(
        &self,
        delivery: &Delivery,
        reason: DeadLetterReason,
        detail: &str,
    ) -> Result<(), QueueError>;
}

/// Redis-backed reliable queue (pending list -> processing list).
pub struct RedisWorkQueue {
    client: redis::Client,
}

impl RedisWorkQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    /// Check Redis connectivity.
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Current number of messages waiting to be received.
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(PENDING_KEY).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    /// Return messages left in the processing list by a worker that died
    /// mid-job. Only safe while no other worker shares these keys.
    pub async fn recover_in_flight(&self) -> Result<usize, QueueError> {
        let mut conn = self.connection().await?;
        let stranded: Vec<String> = conn
            .lrange(PROCESSING_KEY, 0, -1)
            .await
            .map_err(QueueError::Redis)?;

        for raw in &stranded {
            let delivery = Delivery::from_entry(raw.clone());
            let payload = serde_json::to_string(&delivery.redelivery())?;
            redis::pipe()
                .atomic()
                .lrem(PROCESSING_KEY, 1, raw)
                .ignore()
                .lpush(PENDING_KEY, &payload)
                .ignore()
                .query_async::<()>(&mut conn)
                .await
                .map_err(QueueError::Redis)?;
            tracing::warn!(
                message_id = %delivery.message_id,
                receive_count = delivery.receive_count,
                "Recovered in-flight message from previous run"
            );
        }

        Ok(stranded.len())
    }
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    async fn enqueue(&self, body: &str) -> Result<Uuid, QueueError> {
        let envelope = Envelope::new(body);
        let payload = serde_json::to_string(&envelope)?;
        let mut conn = self.connection().await?;
        conn.lpush::<_, _, ()>(PENDING_KEY, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(envelope.message_id)
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = redis::cmd("BLMOVE")
            .arg(PENDING_KEY)
            .arg(PROCESSING_KEY)
            .arg("RIGHT")
            .arg("LEFT")
            // a zero timeout would block forever
            .arg(wait.as_secs_f64().max(0.1))
            .query_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        Ok(raw.map(Delivery::from_entry))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &delivery.receipt)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn abandon(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let payload = serde_json::to_string(&delivery.redelivery())?;
        let mut conn = self.connection().await?;
        redis::pipe()
            .atomic()
            .lrem(PROCESSING_KEY, 1, &delivery.receipt)
            .ignore()
            .lpush(PENDING_KEY, &payload)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn dead_letter(
        &self,
        delivery: &Delivery,
        reason: DeadLetterReason,
        detail: &str,
    ) -> Result<(), QueueError> {
        let payload = serde_json::to_string(&DeadLetter::new(delivery, reason, detail))?;
        let mut conn = self.connection().await?;
        redis::pipe()
            .atomic()
            .lrem(PROCESSING_KEY, 1, &delivery.receipt)
            .ignore()
            .lpush(DEAD_LETTER_KEY, &payload)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
