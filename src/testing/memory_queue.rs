//! In-memory work queue.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::services::queue::{
    DeadLetter, DeadLetterReason, Delivery, Envelope, QueueError, WorkQueue,
};

/// Queue with the same pending/processing/dead-letter shape as the Redis one.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    pending: RwLock<VecDeque<String>>,
    processing: RwLock<Vec<String>>,
    dead_letters: RwLock<Vec<DeadLetter>>,
    failing_receives: AtomicUsize,
    receive_errors: AtomicUsize,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a raw list entry, bypassing the envelope (simulates a foreign producer).
    pub async fn push_raw(&self, raw: impl Into<String>) {
        self.pending.write().await.push_back(raw.into());
    }

    /// Make the next `times` receive calls fail as if Redis dropped the connection.
    pub fn fail_receives(&self, times: usize) {
        self.failing_receives.store(times, Ordering::SeqCst);
    }

    /// Receive calls that failed so far.
    pub fn receive_errors(&self) -> usize {
        self.receive_errors.load(Ordering::SeqCst)
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.read().await.len()
    }

    pub async fn processing_len(&self) -> usize {
        self.processing.read().await.len()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.read().await.clone()
    }

    async fn take_processing(&self, receipt: &str) {
        let mut processing = self.processing.write().await;
        if let Some(pos) = processing.iter().position(|r| r == receipt) {
            processing.remove(pos);
        }
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn enqueue(&self, body: &str) -> Result<Uuid, QueueError> {
        let envelope = Envelope::new(body);
        let payload = serde_json::to_string(&envelope)?;
        self.pending.write().await.push_back(payload);
        Ok(envelope.message_id)
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let failing = self
            .failing_receives
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            self.receive_errors.fetch_add(1, Ordering::SeqCst);
            return Err(QueueError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection reset by peer",
            ))));
        }

        let next = self.pending.write().await.pop_front();
        match next {
            Some(raw) => {
                self.processing.write().await.push(raw.clone());
                Ok(Some(Delivery::from_entry(raw)))
            }
            None => {
                // keep an idle consumer loop from spinning
                tokio::time::sleep(wait.min(Duration::from_millis(10))).await;
                Ok(None)
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.take_processing(&delivery.receipt).await;
        Ok(())
    }

    async fn abandon(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.take_processing(&delivery.receipt).await;
        let payload = serde_json::to_string(&delivery.redelivery())?;
        self.pending.write().await.push_back(payload);
        Ok(())
    }

    async fn dead_letter(
        &self,
        delivery: &Delivery,
        reason: DeadLetterReason,
        detail: &str,
    ) -> Result<(), QueueError> {
        self.take_processing(&delivery.receipt).await;
        self.dead_letters
            .write()
            .await
            .push(DeadLetter::new(delivery, reason, detail));
        Ok(())
    }
}
