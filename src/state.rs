use std::sync::Arc;

use chrono_tz::Tz;
use tokio::sync::broadcast;

use crate::{
    automessage::{
        automessage_repository::AutoMessageRepository, dispatcher::DispatcherService,
        planner::PlannerService,
    },
    consumer::{events::ConsumerEvent, MessageConsumer},
    conversation::{
        conversation_repository::ConversationRepository,
        message_repository::ChatMessageRepository,
    },
    db::DbPool,
    presence::PresenceIndex,
    queue::QueueConnector,
    scheduler::PipelineScheduler,
    user::user_repository::UserRepository,
    websocket::ConnectionManager,
};

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub user_repository: UserRepository,
    pub auto_message_repository: AutoMessageRepository,
    pub conversation_repository: ConversationRepository,
    pub chat_message_repository: ChatMessageRepository,
    pub planner: PlannerService,
    pub dispatcher: DispatcherService,
    pub queue: Arc<QueueConnector>,
    pub presence: Arc<PresenceIndex>,
    pub ws_connections: ConnectionManager,
    pub consumer: Arc<MessageConsumer>,
    pub scheduler: Arc<PipelineScheduler>,
    pub consumer_events: broadcast::Sender<ConsumerEvent>,
}

#[derive(Clone)]
pub struct Config {
    pub planner_cron: String,
    pub dispatcher_cron: String,
    pub scheduler_timezone: Tz,
    pub queue_name: String,
    pub consumer_prefetch: i64,
    pub dispatcher_batch_size: usize,
    pub consumer_max_retries: u32,
    pub consumer_retry_delay_ms: u64,
    pub presence_ttl_seconds: u64,
    pub message_content_max: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            planner_cron: env_or("PLANNER_CRON", "0 2 * * *"),
            dispatcher_cron: env_or("DISPATCHER_CRON", "* * * * *"),
            scheduler_timezone: env_or("SCHEDULER_TIMEZONE", "Europe/Istanbul")
                .parse()
                .expect("SCHEDULER_TIMEZONE must be a valid IANA timezone"),
            queue_name: env_or("QUEUE_NAME", "message_sending_queue"),
            consumer_prefetch: env_or("CONSUMER_PREFETCH", "10")
                .parse()
                .expect("CONSUMER_PREFETCH must be a number"),
            dispatcher_batch_size: env_or("DISPATCHER_BATCH_SIZE", "50")
                .parse()
                .expect("DISPATCHER_BATCH_SIZE must be a number"),
            consumer_max_retries: env_or("CONSUMER_MAX_RETRIES", "3")
                .parse()
                .expect("CONSUMER_MAX_RETRIES must be a number"),
            consumer_retry_delay_ms: env_or("CONSUMER_RETRY_DELAY_MS", "5000")
                .parse()
                .expect("CONSUMER_RETRY_DELAY_MS must be a number"),
            presence_ttl_seconds: env_or("PRESENCE_TTL_SECONDS", "3600")
                .parse()
                .expect("PRESENCE_TTL_SECONDS must be a number"),
            message_content_max: env_or("MESSAGE_CONTENT_MAX", "1000")
                .parse()
                .expect("MESSAGE_CONTENT_MAX must be a number"),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
