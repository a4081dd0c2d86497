use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::{AppError, ErrorCode, Result},
    state::AppState,
    user::{
        password::hash_password,
        user_dto::{CreateUserRequest, SetActiveRequest, UserResponse},
    },
    websocket,
};

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let pipeline_routes = Router::new()
        .route("/status", get(pipeline_status))
        .route("/planner/run", post(run_planner))
        .route("/dispatcher/run", post(run_dispatcher))
        .route("/consumer/stats", get(consumer_stats))
        .route("/consumer/stats/reset", post(reset_consumer_stats))
        .route("/presence/cleanup", post(cleanup_presence))
        .route("/presence/clear", post(clear_presence))
        .route("/auto-messages/:id", get(auto_message_by_id));

    let user_routes = Router::new()
        .route("/", post(create_user))
        .route("/:id/active", patch(set_user_active))
        .route("/:id/auto-messages", get(user_auto_messages));

    let conversation_routes = Router::new()
        .route("/:id", delete(delete_conversation))
        .route("/:id/messages", get(conversation_messages))
        .route("/:id/unread", get(conversation_unread));

    let api_routes = Router::new()
        .nest("/pipeline", pipeline_routes)
        .nest("/users", user_routes)
        .nest("/conversations", conversation_routes)
        .route("/online-users", get(online_users))
        .route("/ws", get(websocket::ws_handler));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api_routes)
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Aggregate view over the scheduler, consumer, queue, and presence index.
async fn pipeline_status(State(state): State<AppState>) -> Result<Json<Value>> {
    let scheduler = state.scheduler.status().await;
    let consumer = state.consumer.get_stats().await;
    let auto_messages = state.auto_message_repository.status_counts().await?;
    let queue_depth = state.queue.pending_count(&state.config.queue_name).await?;

    Ok(Json(json!({
        "success": true,
        "scheduler": scheduler,
        "consumer": consumer,
        "autoMessages": auto_messages,
        "queueDepth": queue_depth,
        "onlineUsers": state.presence.get_online_user_count(),
        "wsConnections": state.ws_connections.connected_user_count(),
    })))
}

/// Manual planner trigger. Shares the re-entrancy guard with the cron
/// tick, so a concurrent run reports `skipped`.
async fn run_planner(State(state): State<AppState>) -> Result<Json<Value>> {
    match state.scheduler.trigger_planner().await? {
        Some(planned) => Ok(Json(json!({ "success": true, "planned": planned }))),
        None => Ok(Json(json!({ "success": false, "skipped": true }))),
    }
}

async fn run_dispatcher(State(state): State<AppState>) -> Result<Json<Value>> {
    match state.scheduler.trigger_dispatcher().await? {
        Some(report) => Ok(Json(json!({ "success": true, "report": report }))),
        None => Ok(Json(json!({ "success": false, "skipped": true }))),
    }
}

async fn auto_message_by_id(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>> {
    let message = state
        .auto_message_repository
        .find_by_id(id)
        .await?
        .ok_or_else(|| {
            AppError::pipeline(ErrorCode::AutoMessageNotFound, format!("auto message {id} not found"))
        })?;

    Ok(Json(json!({ "success": true, "autoMessage": message })))
}

async fn consumer_stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "success": true, "stats": state.consumer.get_stats().await }))
}

async fn reset_consumer_stats(State(state): State<AppState>) -> Json<Value> {
    state.consumer.reset_stats().await;
    Json(json!({ "success": true }))
}

async fn cleanup_presence(State(state): State<AppState>) -> Json<Value> {
    let removed = state.presence.cleanup_expired_users();
    Json(json!({ "success": true, "removed": removed }))
}

async fn clear_presence(State(state): State<AppState>) -> Json<Value> {
    state.presence.clear_all_online_users();
    Json(json!({ "success": true }))
}

async fn online_users(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "userIds": state.presence.get_online_users(),
        "users": state.presence.get_online_users_with_info(),
    }))
}

async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;

    if state
        .user_repository
        .find_by_username(&payload.username)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict("Username already taken".to_string()));
    }

    let password_hash = hash_password(&payload.password)?;
    let user = match state
        .user_repository
        .create(&payload.username, &payload.email, &password_hash)
        .await
    {
        Ok(user) => user,
        Err(AppError::Database(sqlx::Error::Database(db_err)))
            if db_err.is_unique_violation() =>
        {
            return Err(AppError::Conflict(
                "Username or email already registered".to_string(),
            ));
        }
        Err(e) => return Err(e),
    };

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "user": UserResponse::from(user) })),
    ))
}

async fn set_user_active(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<SetActiveRequest>,
) -> Result<Json<Value>> {
    state
        .user_repository
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    state
        .user_repository
        .set_active(user_id, payload.is_active)
        .await?;

    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum HistoryDirection {
    Sent,
    Received,
}

#[derive(Debug, Deserialize, Validate)]
struct AutoMessageHistoryQuery {
    direction: HistoryDirection,
    #[validate(range(min = 1, max = 200))]
    #[serde(default = "default_history_limit")]
    limit: i64,
}

fn default_history_limit() -> i64 {
    50
}

/// Per-user planned-message history, newest first.
async fn user_auto_messages(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<AutoMessageHistoryQuery>,
) -> Result<Json<Value>> {
    query.validate()?;

    let messages = match query.direction {
        HistoryDirection::Sent => {
            state
                .auto_message_repository
                .find_by_sender(user_id, query.limit)
                .await?
        }
        HistoryDirection::Received => {
            state
                .auto_message_repository
                .find_by_receiver(user_id, query.limit)
                .await?
        }
    };

    Ok(Json(json!({ "success": true, "messages": messages })))
}

#[derive(Debug, Deserialize, Validate)]
struct PageQuery {
    #[validate(range(min = 1))]
    #[serde(default = "default_page")]
    page: i64,
    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    20
}

async fn conversation_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Value>> {
    query.validate()?;

    state
        .conversation_repository
        .find_by_id(conversation_id)
        .await?
        .ok_or_else(|| {
            AppError::pipeline(
                ErrorCode::ConversationNotFound,
                format!("conversation {conversation_id} not found"),
            )
        })?;

    let page = state
        .chat_message_repository
        .find_by_conversation_id(conversation_id, query.page, query.limit)
        .await?;

    Ok(Json(json!({
        "success": true,
        "messages": page.messages,
        "total": page.total,
    })))
}

async fn conversation_unread(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<Value>> {
    let unread = state
        .chat_message_repository
        .count_unread(conversation_id)
        .await?;

    Ok(Json(json!({ "success": true, "unread": unread })))
}

#[derive(Debug, Deserialize)]
struct DeleteConversationQuery {
    user_id: Uuid,
}

async fn delete_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<DeleteConversationQuery>,
) -> Result<Json<Value>> {
    state
        .conversation_repository
        .delete_for_participant(conversation_id, query.user_id)
        .await?;

    Ok(Json(json!({ "success": true })))
}
