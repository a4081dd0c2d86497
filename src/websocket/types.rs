use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ErrorCode;

/// Server-to-client events on a user's realtime channel.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum WsMessage {
    MessageReceived(MessageReceivedPayload),
    Error(ErrorPayload),
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageReceivedPayload {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_info: SenderInfo,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_auto_message: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SenderInfo {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ErrorPayload {
    pub message: String,
    pub code: ErrorCode,
}

/// Client-to-server messages. The realtime surface for this service is
/// mostly outbound; clients only send keepalives.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_received_wire_shape() {
        let payload = WsMessage::MessageReceived(MessageReceivedPayload {
            message_id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            sender_info: SenderInfo {
                id: Uuid::new_v4(),
                username: "zeynep".to_string(),
                email: "zeynep@example.com".to_string(),
            },
            content: "hello".to_string(),
            created_at: Utc::now(),
            is_auto_message: true,
        });

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["event"], "message_received");
        assert_eq!(value["data"]["isAutoMessage"], true);
        assert!(value["data"]["senderInfo"]["_id"].is_string());
        assert!(value["data"]["createdAt"].is_string());
    }
}
