use serde::Serialize;
use uuid::Uuid;

use crate::error::ErrorCode;

/// Typed lifecycle and processing events emitted by the consumer on a
/// broadcast channel. Subscribers that lag simply miss events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsumerEvent {
    Started,
    Stopped,
    MessageProcessed {
        auto_message_id: Uuid,
        chat_message_id: Option<Uuid>,
        duplicate: bool,
        notified: bool,
    },
    MessageRetried {
        retry_count: u32,
        reason: String,
    },
    MessageFailed {
        code: ErrorCode,
        reason: String,
    },
}
