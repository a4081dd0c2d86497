use crate::error::{AppError, ErrorCode, Result};
use sqlx::PgPool;
use uuid::Uuid;

use super::conversation_models::Conversation;

#[derive(Clone)]
pub struct ConversationRepository {
    pool: PgPool,
}

impl ConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Conversation whose participant set is exactly `{a, b}`, regardless of
    /// which side opened it.
    pub async fn find_between_users(&self, a: Uuid, b: Uuid) -> Result<Option<Conversation>> {
        let conversation = sqlx::query_as::<_, Conversation>(
            "SELECT * FROM conversations
             WHERE (participant_one = $1 AND participant_two = $2)
                OR (participant_one = $2 AND participant_two = $1)",
        )
        .bind(a)
        .bind(b)
        .fetch_optional(&self.pool)
        .await?;

        Ok(conversation)
    }

    pub async fn create(&self, a: Uuid, b: Uuid) -> Result<Conversation> {
        if a == b {
            return Err(AppError::pipeline(
                ErrorCode::SelfMessageNotAllowed,
                "a conversation needs two distinct participants",
            ));
        }

        let conversation = sqlx::query_as::<_, Conversation>(
            "INSERT INTO conversations (participant_one, participant_two)
             VALUES ($1, $2)
             RETURNING *",
        )
        .bind(a)
        .bind(b)
        .fetch_one(&self.pool)
        .await?;

        Ok(conversation)
    }

    /// Find-or-create for an unordered participant pair. A concurrent create
    /// for the same pair loses on the unique pair index; the loser re-runs
    /// the find.
    pub async fn find_or_create(&self, a: Uuid, b: Uuid) -> Result<Conversation> {
        if let Some(conversation) = self.find_between_users(a, b).await? {
            return Ok(conversation);
        }

        match self.create(a, b).await {
            Ok(conversation) => Ok(conversation),
            Err(AppError::Database(sqlx::Error::Database(db_err)))
                if db_err.is_unique_violation() =>
            {
                self.find_between_users(a, b).await?.ok_or_else(|| {
                    AppError::pipeline(
                        ErrorCode::ConversationCreateFailed,
                        format!("conversation for pair ({a}, {b}) vanished after conflict"),
                    )
                })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Conversation>> {
        let conversation =
            sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(conversation)
    }

    pub async fn update_last_message(
        &self,
        conversation_id: Uuid,
        content: &str,
        sender_id: Uuid,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE conversations
             SET last_message_content = $2,
                 last_message_sender_id = $3,
                 last_message_at = NOW(),
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(conversation_id)
        .bind(content)
        .bind(sender_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Deletes a conversation on behalf of one of its participants.
    pub async fn delete_for_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<()> {
        let conversation = self
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;

        if !conversation.has_participant(user_id) {
            return Err(AppError::Forbidden(
                "Only a participant may delete a conversation".to_string(),
            ));
        }

        sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
