use std::sync::atomic::{AtomicBool, Ordering};

use sqlx::PgPool;

use crate::error::{AppError, ErrorCode, Result};

use super::envelope::{MessageHeaders, QueueEnvelope};

/// How long a claimed delivery stays invisible before it is considered
/// abandoned and becomes claimable again.
const CLAIM_LOCK_MINUTES: i32 = 5;

/// A message claimed from the queue, awaiting ack or reject.
#[derive(Debug, Clone)]
pub struct QueueDelivery {
    pub id: i64,
    pub payload: serde_json::Value,
    pub headers: MessageHeaders,
}

/// Connector to the durable queue backing store. One instance is built by
/// the root assembly and shared by the dispatcher and the consumer.
///
/// `connect` must succeed before publishes are accepted; a lost connection
/// is reported to the caller rather than retried internally.
pub struct QueueConnector {
    pool: PgPool,
    connected: AtomicBool,
}

impl QueueConnector {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            connected: AtomicBool::new(false),
        }
    }

    pub async fn connect(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::pipeline(
                    ErrorCode::QueueConnectionError,
                    format!("queue backing store unreachable: {e}"),
                )
            })?;

        self.connected.store(true, Ordering::SeqCst);
        tracing::info!("Queue connector established");
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        tracing::info!("Queue connector closed");
    }

    pub fn is_connection_active(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.is_connection_active() {
            return Err(AppError::pipeline(
                ErrorCode::QueueConnectionError,
                "queue connector is not connected",
            ));
        }
        Ok(())
    }

    /// Publish an envelope as a persistent, immediately-available message.
    pub async fn send_to_queue(
        &self,
        queue_name: &str,
        envelope: &QueueEnvelope,
        headers: &MessageHeaders,
    ) -> Result<()> {
        let payload = serde_json::to_value(envelope).map_err(|e| {
            AppError::pipeline(
                ErrorCode::QueueProcessingError,
                format!("envelope serialization failed: {e}"),
            )
        })?;

        self.publish_raw(queue_name, payload, headers, 0).await
    }

    /// Publish a pre-serialized payload, optionally delayed. Used for
    /// retry republishes, which must carry the original payload untouched.
    pub async fn publish_raw(
        &self,
        queue_name: &str,
        payload: serde_json::Value,
        headers: &MessageHeaders,
        delay_ms: u64,
    ) -> Result<()> {
        self.ensure_connected()?;

        let headers = serde_json::to_value(headers).map_err(|e| {
            AppError::pipeline(
                ErrorCode::QueueProcessingError,
                format!("header serialization failed: {e}"),
            )
        })?;

        sqlx::query(
            "INSERT INTO queue_messages (queue_name, payload, headers, status, available_at)
             VALUES ($1, $2, $3, 'ready', NOW() + $4 * INTERVAL '1 millisecond')",
        )
        .bind(queue_name)
        .bind(payload)
        .bind(headers)
        .bind(delay_ms as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Claim up to `limit` available deliveries. Claimed rows are locked for
    /// `CLAIM_LOCK_MINUTES`; rows abandoned by a crashed consumer become
    /// claimable again once their lock lapses.
    pub async fn claim_ready(&self, queue_name: &str, limit: i64) -> Result<Vec<QueueDelivery>> {
        self.ensure_connected()?;

        let rows: Vec<(i64, serde_json::Value, serde_json::Value)> = sqlx::query_as(
            "WITH next AS (
                 SELECT id FROM queue_messages
                 WHERE queue_name = $1
                   AND ((status = 'ready' AND available_at <= NOW())
                     OR (status = 'processing' AND locked_until < NOW()))
                 ORDER BY id ASC
                 LIMIT $2
                 FOR UPDATE SKIP LOCKED
             )
             UPDATE queue_messages q
             SET status = 'processing',
                 locked_until = NOW() + $3 * INTERVAL '1 minute',
                 updated_at = NOW()
             FROM next
             WHERE q.id = next.id
             RETURNING q.id, q.payload, q.headers",
        )
        .bind(queue_name)
        .bind(limit)
        .bind(CLAIM_LOCK_MINUTES)
        .fetch_all(&self.pool)
        .await?;

        let deliveries = rows
            .into_iter()
            .map(|(id, payload, headers)| {
                // Unreadable headers degrade to attempt zero rather than
                // poisoning the delivery.
                let headers = serde_json::from_value(headers).unwrap_or_default();
                QueueDelivery {
                    id,
                    payload,
                    headers,
                }
            })
            .collect();

        Ok(deliveries)
    }

    /// Acknowledge successful processing.
    pub async fn ack(&self, delivery_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE queue_messages
             SET status = 'completed', locked_until = NULL, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(delivery_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Reject without requeue. The row stays for inspection under the
    /// `dead` status and is never delivered again.
    pub async fn reject(&self, delivery_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE queue_messages
             SET status = 'dead', locked_until = NULL, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(delivery_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Messages waiting to be delivered (ready now or scheduled).
    pub async fn pending_count(&self, queue_name: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_messages WHERE queue_name = $1 AND status = 'ready'",
        )
        .bind(queue_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
