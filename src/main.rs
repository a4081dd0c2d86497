mod automessage;
mod consumer;
mod conversation;
mod db;
mod error;
mod presence;
mod queue;
mod routes;
mod scheduler;
mod state;
mod user;
mod websocket;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use automessage::{
    automessage_repository::AutoMessageRepository, dispatcher::DispatcherService,
    planner::PlannerService,
};
use consumer::MessageConsumer;
use conversation::{
    conversation_repository::ConversationRepository, message_repository::ChatMessageRepository,
};
use db::{create_pool, run_migrations};
use presence::PresenceIndex;
use queue::QueueConnector;
use routes::create_router;
use scheduler::PipelineScheduler;
use state::{AppState, Config};
use user::user_repository::UserRepository;
use websocket::ConnectionManager;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,chat_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env());

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    tracing::info!("Connecting to database...");
    let db = create_pool(&database_url).await?;

    tracing::info!("Running migrations...");
    run_migrations(&db).await?;

    // Repositories
    let user_repository = UserRepository::new(db.clone());
    let auto_message_repository = AutoMessageRepository::new(db.clone());
    let conversation_repository = ConversationRepository::new(db.clone());
    let chat_message_repository = ChatMessageRepository::new(db.clone());

    // Queue, presence, realtime fan-out
    let queue = Arc::new(QueueConnector::new(db.clone()));
    queue.connect().await?;

    let presence = Arc::new(PresenceIndex::new(Duration::from_secs(
        config.presence_ttl_seconds,
    )));
    let ws_connections = ConnectionManager::new();
    let (consumer_events, _) = broadcast::channel(100);

    // Pipeline services
    let planner = PlannerService::new(user_repository.clone(), auto_message_repository.clone());
    let dispatcher = DispatcherService::new(
        auto_message_repository.clone(),
        Arc::clone(&queue),
        config.queue_name.clone(),
        config.dispatcher_batch_size,
    );

    let message_consumer = Arc::new(MessageConsumer::new(
        Arc::clone(&queue),
        user_repository.clone(),
        auto_message_repository.clone(),
        conversation_repository.clone(),
        chat_message_repository.clone(),
        Arc::clone(&presence),
        ws_connections.clone(),
        consumer_events.clone(),
        &config,
    ));
    message_consumer.start().await?;

    // Surface consumer events in the logs.
    let mut events_rx = consumer_events.subscribe();
    tokio::spawn(async move {
        loop {
            match events_rx.recv().await {
                Ok(event) => tracing::debug!("Consumer event: {:?}", event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("Consumer event log lagged, {} events missed", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let pipeline_scheduler = Arc::new(PipelineScheduler::new(
        planner.clone(),
        dispatcher.clone(),
        config.scheduler_timezone,
        config.planner_cron.clone(),
        config.dispatcher_cron.clone(),
    ));
    pipeline_scheduler.start().await?;

    // Application state
    let state = AppState {
        db: db.clone(),
        config: config.clone(),
        user_repository,
        auto_message_repository,
        conversation_repository,
        chat_message_repository,
        planner,
        dispatcher,
        queue: Arc::clone(&queue),
        presence: Arc::clone(&presence),
        ws_connections,
        consumer: Arc::clone(&message_consumer),
        scheduler: Arc::clone(&pipeline_scheduler),
        consumer_events,
    };

    let app = create_router(state);

    // Start server
    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("{}:{}", host, port);

    tracing::info!("Server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain background work before exit.
    pipeline_scheduler.shutdown().await;
    message_consumer.stop().await;
    queue.disconnect().await;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}
