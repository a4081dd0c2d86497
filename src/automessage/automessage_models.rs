use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// A scheduled work item produced by the planner.
///
/// Lifecycle: `{is_queued=false, is_sent=false}` at creation, `is_queued`
/// set by the dispatcher once published, `is_sent` set by the consumer once
/// the chat message exists. `is_sent` implies `is_queued`; rows are never
/// deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct AutoMessage {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub send_date: DateTime<Utc>,
    pub is_queued: bool,
    pub is_sent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for the planner's bulk write.
#[derive(Debug, Clone)]
pub struct NewAutoMessage {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub send_date: DateTime<Utc>,
}

/// Roll-up of planned-message states, for the operations surface.
#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct AutoMessageStatusCounts {
    pub pending: i64,
    pub queued: i64,
    pub sent: i64,
}
