use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, ErrorCode, Result};

/// Versioned queue payload. The `type` tag lets future formats coexist on
/// the same queue; unknown tags fail deserialization outright.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QueueEnvelope {
    #[serde(rename = "auto_message.v1")]
    AutoMessageV1(AutoMessageEnvelope),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoMessageEnvelope {
    pub auto_message_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub original_send_date: DateTime<Utc>,
    pub queued_at: DateTime<Utc>,
}

/// Mutable per-delivery headers. Missing `x-retry-count` reads as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageHeaders {
    #[serde(rename = "x-retry-count", default)]
    pub retry_count: u32,
}

impl MessageHeaders {
    pub fn next_attempt(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
        }
    }
}

/// Semantic validation of a decoded auto-message envelope. Well-formedness
/// of the identifiers and timestamps is already total via the typed decode;
/// this checks the business rules.
pub fn validate_queue_message(envelope: &AutoMessageEnvelope, content_max: usize) -> Result<()> {
    if envelope.auto_message_id.is_nil() {
        return Err(AppError::pipeline(
            ErrorCode::InvalidAutoMessageId,
            "autoMessageId must be a non-nil identifier",
        ));
    }
    if envelope.sender_id.is_nil() {
        return Err(AppError::pipeline(
            ErrorCode::InvalidSenderId,
            "senderId must be a non-nil identifier",
        ));
    }
    if envelope.receiver_id.is_nil() {
        return Err(AppError::pipeline(
            ErrorCode::InvalidReceiverId,
            "receiverId must be a non-nil identifier",
        ));
    }
    if envelope.sender_id == envelope.receiver_id {
        return Err(AppError::pipeline(
            ErrorCode::SelfMessageNotAllowed,
            "sender and receiver must differ",
        ));
    }

    let trimmed = envelope.content.trim();
    if trimmed.is_empty() {
        return Err(AppError::pipeline(
            ErrorCode::ContentRequired,
            "content must not be empty",
        ));
    }
    if trimmed.chars().count() > content_max {
        return Err(AppError::pipeline(
            ErrorCode::ContentTooLong,
            format!("content exceeds {content_max} characters"),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(content: &str) -> AutoMessageEnvelope {
        AutoMessageEnvelope {
            auto_message_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            receiver_id: Uuid::new_v4(),
            content: content.to_string(),
            original_send_date: Utc::now(),
            queued_at: Utc::now(),
        }
    }

    #[test]
    fn envelope_serializes_with_version_tag_and_camel_case() {
        let env = QueueEnvelope::AutoMessageV1(envelope("hello"));
        let value = serde_json::to_value(&env).unwrap();

        assert_eq!(value["type"], "auto_message.v1");
        assert!(value.get("autoMessageId").is_some());
        assert!(value.get("senderId").is_some());
        assert!(value.get("receiverId").is_some());
        assert!(value.get("originalSendDate").is_some());
        assert!(value.get("queuedAt").is_some());

        let back: QueueEnvelope = serde_json::from_value(value).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn unknown_version_tag_is_rejected() {
        let raw = serde_json::json!({ "type": "auto_message.v2", "content": "hi" });
        assert!(serde_json::from_value::<QueueEnvelope>(raw).is_err());
    }

    #[test]
    fn missing_retry_count_reads_as_zero() {
        let headers: MessageHeaders = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(headers.retry_count, 0);

        let headers: MessageHeaders =
            serde_json::from_value(serde_json::json!({ "x-retry-count": 2 })).unwrap();
        assert_eq!(headers.next_attempt().retry_count, 3);
    }

    #[test]
    fn content_boundaries() {
        assert!(validate_queue_message(&envelope(&"a".repeat(1000)), 1000).is_ok());

        let err = validate_queue_message(&envelope(&"a".repeat(1001)), 1000).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ContentTooLong);

        let err = validate_queue_message(&envelope("   "), 1000).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ContentRequired);
    }

    #[test]
    fn self_directed_envelope_is_rejected() {
        let mut env = envelope("hi");
        env.receiver_id = env.sender_id;
        let err = validate_queue_message(&env, 1000).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::SelfMessageNotAllowed);
    }

    #[test]
    fn nil_identifiers_are_rejected() {
        let mut env = envelope("hi");
        env.auto_message_id = Uuid::nil();
        let err = validate_queue_message(&env, 1000).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidAutoMessageId);
    }
}
