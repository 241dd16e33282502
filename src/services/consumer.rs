use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::models::job::{JobMessage, MessageError};
use crate::services::orchestrator::TaskOrchestrator;
use crate::services::queue::{DeadLetterReason, Delivery, QueueError, WorkQueue};

/// What happened to one received message.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Nothing arrived within the wait.
    Idle,
    /// Job reached `done`; message deleted.
    Completed { task_id: String },
    /// Job failed; message returned for redelivery.
    Requeued { task_id: String, receive_count: u32 },
    /// Message moved to the dead-letter list and will not come back.
    DeadLettered { reason: DeadLetterReason },
}

/// Pulls job messages one at a time and hands them to the orchestrator.
pub struct QueueConsumer {
    queue: Arc<dyn WorkQueue>,
    orchestrator: TaskOrchestrator,
    poll_wait: Duration,
    error_backoff: Duration,
    max_receive_count: u32,
}

impl QueueConsumer {
    pub fn new(queue: Arc<dyn WorkQueue>, orchestrator: TaskOrchestrator) -> Self {
        Self {
            queue,
            orchestrator,
            poll_wait: Duration::from_secs(10),
            error_backoff: Duration::from_secs(5),
            max_receive_count: 5,
        }
    }

    pub fn poll_wait(mut self, wait: Duration) -> Self {
        self.poll_wait = wait;
        self
    }

    pub fn error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn max_receive_count(mut self, max: u32) -> Self {
        self.max_receive_count = max.max(1);
        self
    }

    /// Poll until `shutdown` resolves.
    ///
    /// Shutdown interrupts a pending poll or backoff, never a job in flight.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        tracing::info!(
            poll_wait_secs = self.poll_wait.as_secs(),
            max_receive_count = self.max_receive_count,
            "Queue consumer started"
        );

        loop {
            let received = tokio::select! {
                _ = &mut shutdown => break,
                received = self.queue.receive(self.poll_wait) => received,
            };

            let result = match received {
                Ok(Some(delivery)) => self.handle(delivery).await,
                Ok(None) => Ok(PollOutcome::Idle),
                Err(e) => Err(e),
            };

            match result {
                Ok(PollOutcome::Idle) => {
                    tracing::trace!("No messages available");
                }
                Ok(outcome) => {
                    tracing::debug!(?outcome, "Message handled, checking for next message");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Queue error, backing off");
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = sleep(self.error_backoff) => {}
                    }
                }
            }
        }

        tracing::info!("Queue consumer stopped");
    }

    /// Receive and fully handle at most one message.
    pub async fn poll_once(&self) -> Result<PollOutcome, QueueError> {
        match self.queue.receive(self.poll_wait).await? {
            Some(delivery) => self.handle(delivery).await,
            None => Ok(PollOutcome::Idle),
        }
    }

    async fn handle(&self, delivery: Delivery) -> Result<PollOutcome, QueueError> {
        tracing::info!(
            message_id = %delivery.message_id,
            receive_count = delivery.receive_count,
            "Received message"
        );

        let job = match JobMessage::parse(&delivery.body) {
            Ok(job) => job,
            Err(e) => return self.reject(&delivery, &e).await,
        };

        if delivery.receive_count > self.max_receive_count {
            let detail = format!(
                "received {} times, limit is {}",
                delivery.receive_count, self.max_receive_count
            );
            return self
                .dead_letter(&delivery, DeadLetterReason::MaxReceiveCount, &detail)
                .await;
        }

        match self.orchestrator.process(&job).await {
            Ok(_) => {
                self.queue.ack(&delivery).await?;
                tracing::info!(task_id = %job.task_id, "Job done, message deleted");
                Ok(PollOutcome::Completed {
                    task_id: job.task_id,
                })
            }
            Err(e) if delivery.receive_count >= self.max_receive_count => {
                let detail = format!("giving up after {} attempts: {}", delivery.receive_count, e);
                self.dead_letter(&delivery, DeadLetterReason::MaxReceiveCount, &detail)
                    .await
            }
            Err(e) => {
                self.queue.abandon(&delivery).await?;
                tracing::info!(
                    task_id = %job.task_id,
                    receive_count = delivery.receive_count,
                    error = %e,
                    "Job failed, message returned for redelivery"
                );
                Ok(PollOutcome::Requeued {
                    task_id: job.task_id,
                    receive_count: delivery.receive_count,
                })
            }
        }
    }

    async fn reject(&self, delivery: &Delivery, error: &MessageError) -> Result<PollOutcome, QueueError> {
        let reason = match error {
            MessageError::Decode(_) => DeadLetterReason::InvalidJson,
            MessageError::Invalid(_) => DeadLetterReason::Validation,
        };
        self.dead_letter(delivery, reason, &error.to_string()).await
    }

    async fn dead_letter(
        &self,
        delivery: &Delivery,
        reason: DeadLetterReason,
        detail: &str,
    ) -> Result<PollOutcome, QueueError> {
        self.queue.dead_letter(delivery, reason, detail).await?;
        tracing::warn!(
            message_id = %delivery.message_id,
            receive_count = delivery.receive_count,
            reason = %reason,
            detail = %detail,
            "Message dead-lettered"
        );
        metrics::counter!("analysis_messages_dead_lettered_total", "reason" => reason.as_ref().to_string())
            .increment(1);
        Ok(PollOutcome::DeadLettered { reason })
    }
}
