use crate::error::Result;
use sqlx::PgPool;
use uuid::Uuid;

use super::conversation_models::{ChatMessage, ChatMessageWithSender, ConversationMessagesPage};

#[derive(Clone)]
pub struct ChatMessageRepository {
    pool: PgPool,
}

impl ChatMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> Result<ChatMessage> {
        let message = sqlx::query_as::<_, ChatMessage>(
            "INSERT INTO messages (conversation_id, sender_id, content)
             VALUES ($1, $2, $3)
             RETURNING *",
        )
        .bind(conversation_id)
        .bind(sender_id)
        .bind(content)
        .fetch_one(&self.pool)
        .await?;

        Ok(message)
    }

    /// Newest-first page of a conversation, with sender fields populated.
    pub async fn find_by_conversation_id(
        &self,
        conversation_id: Uuid,
        page: i64,
        limit: i64,
    ) -> Result<ConversationMessagesPage> {
        let offset = (page - 1) * limit;

        let messages = sqlx::query_as::<_, ChatMessageWithSender>(
            "SELECT m.id, m.conversation_id, m.sender_id, m.content, m.is_read,
                    m.created_at, m.updated_at,
                    u.username AS sender_username, u.email AS sender_email
             FROM messages m
             JOIN users u ON u.id = m.sender_id
             WHERE m.conversation_id = $1
             ORDER BY m.created_at DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(conversation_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE conversation_id = $1")
                .bind(conversation_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(ConversationMessagesPage { messages, total })
    }

    pub async fn count_unread(&self, conversation_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = $1 AND is_read = false",
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
