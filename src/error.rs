use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

/// Stable machine-readable error codes. These are part of the API and queue
/// contract and must not be renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    InvalidAutoMessageId,
    InvalidSenderId,
    InvalidReceiverId,
    SelfMessageNotAllowed,
    ContentRequired,
    ContentTooLong,
    SenderNotFound,
    ReceiverNotFound,
    SenderInactive,
    ReceiverInactive,
    UserRetrievalFailed,
    AutoMessageSaveFailed,
    AutoMessageNotFound,
    QueueConnectionError,
    QueueProcessingError,
    ConversationNotFound,
    ConversationCreateFailed,
    MessageSaveFailed,
    NotFound,
    Forbidden,
    Conflict,
    SchedulerError,
    DatabaseError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::InvalidAutoMessageId => "INVALID_AUTO_MESSAGE_ID",
            ErrorCode::InvalidSenderId => "INVALID_SENDER_ID",
            ErrorCode::InvalidReceiverId => "INVALID_RECEIVER_ID",
            ErrorCode::SelfMessageNotAllowed => "SELF_MESSAGE_NOT_ALLOWED",
            ErrorCode::ContentRequired => "CONTENT_REQUIRED",
            ErrorCode::ContentTooLong => "CONTENT_TOO_LONG",
            ErrorCode::SenderNotFound => "SENDER_NOT_FOUND",
            ErrorCode::ReceiverNotFound => "RECEIVER_NOT_FOUND",
            ErrorCode::SenderInactive => "SENDER_INACTIVE",
            ErrorCode::ReceiverInactive => "RECEIVER_INACTIVE",
            ErrorCode::UserRetrievalFailed => "USER_RETRIEVAL_FAILED",
            ErrorCode::AutoMessageSaveFailed => "AUTO_MESSAGE_SAVE_FAILED",
            ErrorCode::AutoMessageNotFound => "AUTO_MESSAGE_NOT_FOUND",
            ErrorCode::QueueConnectionError => "QUEUE_CONNECTION_ERROR",
            ErrorCode::QueueProcessingError => "QUEUE_PROCESSING_ERROR",
            ErrorCode::ConversationNotFound => "CONVERSATION_NOT_FOUND",
            ErrorCode::ConversationCreateFailed => "CONVERSATION_CREATE_FAILED",
            ErrorCode::MessageSaveFailed => "MESSAGE_SAVE_FAILED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::SchedulerError => "SCHEDULER_ERROR",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("{message}")]
    Pipeline { code: ErrorCode, message: String },

    #[error("Internal server error")]
    InternalError,
}

impl AppError {
    /// A pipeline-domain error carrying an explicit code.
    pub fn pipeline(code: ErrorCode, message: impl Into<String>) -> Self {
        AppError::Pipeline {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::Validation(_) => ErrorCode::ValidationError,
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::Forbidden(_) => ErrorCode::Forbidden,
            AppError::Conflict(_) => ErrorCode::Conflict,
            AppError::Scheduler(_) => ErrorCode::SchedulerError,
            AppError::Pipeline { code, .. } => *code,
            AppError::InternalError => ErrorCode::InternalError,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Database(_) | AppError::Scheduler(_) | AppError::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Pipeline { code, .. } => match code {
                ErrorCode::SenderNotFound
                | ErrorCode::ReceiverNotFound
                | ErrorCode::AutoMessageNotFound
                | ErrorCode::ConversationNotFound
                | ErrorCode::NotFound => StatusCode::NOT_FOUND,
                ErrorCode::Forbidden => StatusCode::FORBIDDEN,
                ErrorCode::Conflict => StatusCode::CONFLICT,
                ErrorCode::QueueConnectionError
                | ErrorCode::QueueProcessingError
                | ErrorCode::UserRetrievalFailed
                | ErrorCode::AutoMessageSaveFailed
                | ErrorCode::ConversationCreateFailed
                | ErrorCode::MessageSaveFailed
                | ErrorCode::SchedulerError
                | ErrorCode::DatabaseError
                | ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_REQUEST,
            },
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Database(ref e) = self {
            tracing::error!("Database error: {:?}", e);
        }

        let status = self.status();
        let body = Json(json!({
            "success": false,
            "message": self.to_string(),
            "errorCode": self.code(),
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_serialize_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::QueueProcessingError).unwrap();
        assert_eq!(json, "\"QUEUE_PROCESSING_ERROR\"");
        assert_eq!(ErrorCode::SenderInactive.as_str(), "SENDER_INACTIVE");
    }

    #[test]
    fn pipeline_error_keeps_its_code() {
        let err = AppError::pipeline(ErrorCode::ReceiverInactive, "receiver is deactivated");
        assert_eq!(err.code(), ErrorCode::ReceiverInactive);
        assert_eq!(err.to_string(), "receiver is deactivated");
    }

    #[test]
    fn not_found_codes_map_to_404() {
        let err = AppError::pipeline(ErrorCode::SenderNotFound, "no such user");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        let err = AppError::pipeline(ErrorCode::ContentTooLong, "too long");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
