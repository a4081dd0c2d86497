use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{AppError, ErrorCode, Result};
use crate::queue::{AutoMessageEnvelope, MessageHeaders, QueueConnector, QueueEnvelope};

use super::automessage_models::AutoMessage;
use super::automessage_repository::AutoMessageRepository;

/// Outcome of one dispatcher pass.
#[derive(Debug, Default, Serialize, ToSchema)]
pub struct DispatchReport {
    pub processed: usize,
    pub queued: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Minute-by-minute scanner that moves due planned messages onto the
/// durable queue in bounded batches.
#[derive(Clone)]
pub struct DispatcherService {
    auto_messages: AutoMessageRepository,
    queue: Arc<QueueConnector>,
    queue_name: String,
    batch_size: usize,
}

impl DispatcherService {
    pub fn new(
        auto_messages: AutoMessageRepository,
        queue: Arc<QueueConnector>,
        queue_name: String,
        batch_size: usize,
    ) -> Self {
        Self {
            auto_messages,
            queue,
            queue_name,
            batch_size: batch_size.max(1),
        }
    }

    /// Publishes every due planned message. Publish attempts are
    /// independent: one failure does not abort the batch, and only the
    /// messages that actually reached the queue are marked as queued.
    pub async fn process_pending_messages(&self) -> Result<DispatchReport> {
        let now = Utc::now();
        let due = self.auto_messages.find_due(now).await?;

        let mut report = DispatchReport {
            processed: due.len(),
            ..Default::default()
        };

        if due.is_empty() {
            debug!("Dispatcher: no due messages");
            return Ok(report);
        }

        if !self.queue.is_connection_active() {
            self.queue.connect().await.map_err(|e| {
                AppError::pipeline(
                    ErrorCode::QueueProcessingError,
                    format!("queue connection could not be established: {e}"),
                )
            })?;
        }

        for batch in due.chunks(self.batch_size) {
            // Success mask: ids are collected per publish so that a failure
            // in the middle of a batch never marks the messages after it.
            let mut published: Vec<Uuid> = Vec::with_capacity(batch.len());

            for message in batch {
                let envelope = envelope_for(message, now);
                match self
                    .queue
                    .send_to_queue(&self.queue_name, &envelope, &MessageHeaders::default())
                    .await
                {
                    Ok(()) => published.push(message.id),
                    Err(e) => {
                        report.failed += 1;
                        report
                            .errors
                            .push(format!("publish failed for {}: {e}", message.id));
                    }
                }
            }

            if published.is_empty() {
                continue;
            }

            match self.auto_messages.mark_queued(&published).await {
                Ok(_) => report.queued += published.len(),
                Err(e) => {
                    // The messages are already on the queue; they will be
                    // re-published next tick and deduplicated by the
                    // consumer's sent check.
                    error!(
                        "Dispatcher: failed to mark {} messages as queued: {e}",
                        published.len()
                    );
                    report.queued += published.len();
                    report
                        .errors
                        .push(format!("mark_queued failed for batch: {e}"));
                }
            }
        }

        info!(
            "Dispatcher: processed={} queued={} failed={}",
            report.processed, report.queued, report.failed
        );
        Ok(report)
    }
}

fn envelope_for(message: &AutoMessage, queued_at: DateTime<Utc>) -> QueueEnvelope {
    QueueEnvelope::AutoMessageV1(AutoMessageEnvelope {
        auto_message_id: message.id,
        sender_id: message.sender_id,
        receiver_id: message.receiver_id,
        content: message.content.clone(),
        original_send_date: message.send_date,
        queued_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_the_planned_message_fields() {
        let now = Utc::now();
        let message = AutoMessage {
            id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            receiver_id: Uuid::new_v4(),
            content: "hello".to_string(),
            send_date: now - chrono::Duration::minutes(3),
            is_queued: false,
            is_sent: false,
            created_at: now - chrono::Duration::hours(20),
            updated_at: now - chrono::Duration::hours(20),
        };

        let QueueEnvelope::AutoMessageV1(envelope) = envelope_for(&message, now);
        assert_eq!(envelope.auto_message_id, message.id);
        assert_eq!(envelope.sender_id, message.sender_id);
        assert_eq!(envelope.receiver_id, message.receiver_id);
        assert_eq!(envelope.content, "hello");
        assert_eq!(envelope.original_send_date, message.send_date);
        assert_eq!(envelope.queued_at, now);
    }

    #[test]
    fn empty_report_is_all_zeros()  {
        let report = DispatchReport::default();
        assert_eq!(report.processed, 0);
        assert_eq!(report.queued, 0);
        assert_eq!(report.failed, 0);
        assert!(report.errors.is_empty());
    }
}
