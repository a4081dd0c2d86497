use chrono::{DateTime, Utc};
use sqlx::{PgPool, QueryBuilder};
use uuid::Uuid;

use crate::error::Result;

use super::automessage_models::{AutoMessage, AutoMessageStatusCounts, NewAutoMessage};

#[derive(Clone)]
pub struct AutoMessageRepository {
    pool: PgPool,
}

impl AutoMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Bulk insert of planned messages. Returns the number of rows actually
    /// persisted.
    pub async fn bulk_insert(&self, drafts: &[NewAutoMessage]) -> Result<u64> {
        if drafts.is_empty() {
            return Ok(0);
        }

        let mut builder = QueryBuilder::new(
            "INSERT INTO auto_messages (sender_id, receiver_id, content, send_date) ",
        );
        builder.push_values(drafts, |mut row, draft| {
            row.push_bind(draft.sender_id)
                .push_bind(draft.receiver_id)
                .push_bind(draft.content.clone())
                .push_bind(draft.send_date);
        });

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Planned messages that are due: `send_date <= now`, not yet queued,
    /// not yet sent. Oldest due first.
    pub async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<AutoMessage>> {
        let messages = sqlx::query_as::<_, AutoMessage>(
            "SELECT * FROM auto_messages
             WHERE send_date <= $1 AND is_queued = false AND is_sent = false
             ORDER BY send_date ASC",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<AutoMessage>> {
        let message = sqlx::query_as::<_, AutoMessage>("SELECT * FROM auto_messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(message)
    }

    /// Marks the given planned messages as queued in one statement.
    pub async fn mark_queued(&self, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "UPDATE auto_messages
             SET is_queued = true, updated_at = NOW()
             WHERE id = ANY($1)",
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Marks a planned message as sent. Returns false when the row is
    /// missing or was already sent, which lets the consumer detect
    /// duplicate deliveries. `is_queued` is set too: a message consumed
    /// before the dispatcher could record the publish still has to satisfy
    /// sent-implies-queued.
    pub async fn mark_sent(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE auto_messages
             SET is_sent = true, is_queued = true, updated_at = NOW()
             WHERE id = $1 AND is_sent = false",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn status_counts(&self) -> Result<AutoMessageStatusCounts> {
        let counts = sqlx::query_as::<_, AutoMessageStatusCounts>(
            "SELECT
                 COUNT(*) FILTER (WHERE is_queued = false AND is_sent = false) AS pending,
                 COUNT(*) FILTER (WHERE is_queued = true AND is_sent = false) AS queued,
                 COUNT(*) FILTER (WHERE is_sent = true) AS sent
             FROM auto_messages",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(counts)
    }

    pub async fn find_by_sender(&self, sender_id: Uuid, limit: i64) -> Result<Vec<AutoMessage>> {
        let messages = sqlx::query_as::<_, AutoMessage>(
            "SELECT * FROM auto_messages
             WHERE sender_id = $1
             ORDER BY created_at DESC
             LIMIT $2",
        )
        .bind(sender_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    pub async fn find_by_receiver(&self, receiver_id: Uuid, limit: i64) -> Result<Vec<AutoMessage>> {
        let messages = sqlx::query_as::<_, AutoMessage>(
            "SELECT * FROM auto_messages
             WHERE receiver_id = $1
             ORDER BY created_at DESC
             LIMIT $2",
        )
        .bind(receiver_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }
}
