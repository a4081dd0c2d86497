use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    automessage::automessage_repository::AutoMessageRepository,
    conversation::{
        conversation_repository::ConversationRepository,
        message_repository::ChatMessageRepository,
    },
    error::{AppError, ErrorCode, Result},
    presence::PresenceIndex,
    queue::{
        validate_queue_message, AutoMessageEnvelope, QueueConnector, QueueDelivery, QueueEnvelope,
    },
    state::Config,
    user::{user_models::User, user_repository::UserRepository},
    websocket::{
        types::{MessageReceivedPayload, SenderInfo, WsMessage},
        ConnectionManager,
    },
};

use super::events::ConsumerEvent;
use super::stats::{ConsumerStats, StatsInner};

/// Idle wait between queue polls when nothing is claimable.
const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Wait after a claim error before the next attempt.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

struct ProcessOutcome {
    chat_message_id: Option<Uuid>,
    duplicate: bool,
    notified: bool,
}

/// Long-lived worker draining the auto-message queue: materializes chat
/// messages, flips planned messages to sent, and notifies connected
/// receivers. One instance per process.
pub struct MessageConsumer {
    queue: Arc<QueueConnector>,
    users: UserRepository,
    auto_messages: AutoMessageRepository,
    conversations: ConversationRepository,
    chat_messages: ChatMessageRepository,
    presence: Arc<PresenceIndex>,
    connections: ConnectionManager,
    events: broadcast::Sender<ConsumerEvent>,
    queue_name: String,
    prefetch: i64,
    max_retries: u32,
    retry_delay_ms: u64,
    content_max: usize,
    running: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Mutex<StatsInner>,
}

impl MessageConsumer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<QueueConnector>,
        users: UserRepository,
        auto_messages: AutoMessageRepository,
        conversations: ConversationRepository,
        chat_messages: ChatMessageRepository,
        presence: Arc<PresenceIndex>,
        connections: ConnectionManager,
        events: broadcast::Sender<ConsumerEvent>,
        config: &Config,
    ) -> Self {
        Self {
            queue,
            users,
            auto_messages,
            conversations,
            chat_messages,
            presence,
            connections,
            events,
            queue_name: config.queue_name.clone(),
            prefetch: config.consumer_prefetch,
            max_retries: config.consumer_max_retries,
            retry_delay_ms: config.consumer_retry_delay_ms,
            content_max: config.message_content_max,
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
            stats: Mutex::new(StatsInner::default()),
        }
    }

    /// Connects to the queue and spawns the drain loop.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Consumer already running, ignoring start");
            return Ok(());
        }

        if !self.queue.is_connection_active() {
            if let Err(e) = self.queue.connect().await {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }

        let consumer = Arc::clone(self);
        let handle = tokio::spawn(async move { consumer.run().await });
        *self.worker.lock().await = Some(handle);

        let _ = self.events.send(ConsumerEvent::Started);
        info!(
            "Consumer started on queue '{}' (prefetch {})",
            self.queue_name, self.prefetch
        );
        Ok(())
    }

    /// Stops claiming new deliveries; the delivery currently being
    /// processed runs to completion.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.await;
        }

        let _ = self.events.send(ConsumerEvent::Stopped);
        info!("Consumer stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn get_stats(&self) -> ConsumerStats {
        self.stats.lock().await.snapshot(self.is_running())
    }

    pub async fn reset_stats(&self) {
        self.stats.lock().await.reset();
    }

    async fn run(&self) {
        while self.running.load(Ordering::SeqCst) {
            match self.queue.claim_ready(&self.queue_name, self.prefetch).await {
                Ok(deliveries) if deliveries.is_empty() => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Ok(deliveries) => {
                    for delivery in deliveries {
                        self.handle_delivery(delivery).await;
                    }
                }
                Err(e) => {
                    error!("Consumer: queue claim failed: {e}");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }
    }

    async fn handle_delivery(&self, delivery: QueueDelivery) {
        let started = Instant::now();

        // An un-parseable payload can never succeed: dead-letter, no retry.
        let QueueEnvelope::AutoMessageV1(envelope) =
            match serde_json::from_value::<QueueEnvelope>(delivery.payload.clone()) {
                Ok(envelope) => envelope,
                Err(e) => {
                    error!("Consumer: un-parseable payload, dead-lettering: {e}");
                    if let Err(reject_err) = self.queue.reject(delivery.id).await {
                        error!("Consumer: dead-letter reject failed: {reject_err}");
                    }
                    self.stats.lock().await.record_failure();
                    let _ = self.events.send(ConsumerEvent::MessageFailed {
                        code: ErrorCode::ValidationError,
                        reason: format!("un-parseable payload: {e}"),
                    });
                    return;
                }
            };

        match self.process_envelope(&envelope).await {
            Ok(outcome) => {
                if let Err(e) = self.queue.ack(delivery.id).await {
                    error!("Consumer: ack failed for delivery {}: {e}", delivery.id);
                }

                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                self.stats.lock().await.record_success(elapsed_ms);
                let _ = self.events.send(ConsumerEvent::MessageProcessed {
                    auto_message_id: envelope.auto_message_id,
                    chat_message_id: outcome.chat_message_id,
                    duplicate: outcome.duplicate,
                    notified: outcome.notified,
                });
            }
            Err(e) => self.handle_failure(delivery, e).await,
        }
    }

    /// The per-envelope pipeline: validate, check users, resolve the
    /// conversation, persist, mark sent, notify.
    async fn process_envelope(&self, envelope: &AutoMessageEnvelope) -> Result<ProcessOutcome> {
        validate_queue_message(envelope, self.content_max)?;

        let sender = self
            .require_active_user(
                envelope.sender_id,
                ErrorCode::SenderNotFound,
                ErrorCode::SenderInactive,
            )
            .await?;
        let receiver = self
            .require_active_user(
                envelope.receiver_id,
                ErrorCode::ReceiverNotFound,
                ErrorCode::ReceiverInactive,
            )
            .await?;

        // Redelivery guard: an envelope whose planned message is already
        // sent must not create a second chat message.
        match self.auto_messages.find_by_id(envelope.auto_message_id).await? {
            Some(planned) if planned.is_sent => {
                warn!(
                    "Consumer: planned message {} already sent, skipping duplicate delivery",
                    envelope.auto_message_id
                );
                return Ok(ProcessOutcome {
                    chat_message_id: None,
                    duplicate: true,
                    notified: false,
                });
            }
            Some(_) => {}
            None => {
                warn!(
                    "Consumer: planned message {} not found, materializing anyway",
                    envelope.auto_message_id
                );
            }
        }

        let conversation = self
            .conversations
            .find_or_create(sender.id, receiver.id)
            .await?;

        let content = envelope.content.trim();
        let message = self
            .chat_messages
            .create(conversation.id, sender.id, content)
            .await
            .map_err(|e| {
                AppError::pipeline(
                    ErrorCode::MessageSaveFailed,
                    format!("chat message could not be persisted: {e}"),
                )
            })?;
        self.conversations
            .update_last_message(conversation.id, content, sender.id)
            .await?;

        let marked = self.auto_messages.mark_sent(envelope.auto_message_id).await?;
        if !marked {
            // Chat message exists; a stale or missing planned message is
            // not worth failing the delivery over.
            warn!(
                "Consumer: could not mark planned message {} as sent",
                envelope.auto_message_id
            );
        }

        let notified = if self.presence.is_user_online(receiver.id) {
            let payload = WsMessage::MessageReceived(MessageReceivedPayload {
                message_id: message.id,
                conversation_id: conversation.id,
                sender_id: sender.id,
                sender_info: SenderInfo {
                    id: sender.id,
                    username: sender.username.clone(),
                    email: sender.email.clone(),
                },
                content: message.content.clone(),
                created_at: message.created_at,
                is_auto_message: true,
            });
            self.connections.emit_to_user(receiver.id, &payload)
        } else {
            debug!(
                "Consumer: receiver {} offline, skipping notification",
                receiver.id
            );
            false
        };

        Ok(ProcessOutcome {
            chat_message_id: Some(message.id),
            duplicate: false,
            notified,
        })
    }

    async fn require_active_user(
        &self,
        user_id: Uuid,
        missing: ErrorCode,
        inactive: ErrorCode,
    ) -> Result<User> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::pipeline(missing, format!("user {user_id} not found")))?;

        if !user.is_active {
            return Err(AppError::pipeline(
                inactive,
                format!("user {user_id} is deactivated"),
            ));
        }

        Ok(user)
    }

    /// Retry protocol: under the attempt limit the same payload is
    /// republished with a delay and a bumped `x-retry-count`, and the
    /// original delivery is acked. At or over the limit the delivery is
    /// dead-lettered.
    async fn handle_failure(&self, delivery: QueueDelivery, err: AppError) {
        self.stats.lock().await.record_failure();

        let retry_count = delivery.headers.retry_count;
        if retry_count < self.max_retries {
            let headers = delivery.headers.next_attempt();
            warn!(
                "Consumer: delivery {} failed ({err}), scheduling retry {}/{}",
                delivery.id, headers.retry_count, self.max_retries
            );

            match self
                .queue
                .publish_raw(
                    &self.queue_name,
                    delivery.payload,
                    &headers,
                    self.retry_delay_ms,
                )
                .await
            {
                Ok(()) => {
                    if let Err(ack_err) = self.queue.ack(delivery.id).await {
                        error!("Consumer: ack after republish failed: {ack_err}");
                    }
                    let _ = self.events.send(ConsumerEvent::MessageRetried {
                        retry_count: headers.retry_count,
                        reason: err.to_string(),
                    });
                }
                Err(republish_err) => {
                    error!(
                        "Consumer: retry republish failed ({republish_err}), dead-lettering {}",
                        delivery.id
                    );
                    if let Err(reject_err) = self.queue.reject(delivery.id).await {
                        error!("Consumer: reject failed: {reject_err}");
                    }
                    let _ = self.events.send(ConsumerEvent::MessageFailed {
                        code: err.code(),
                        reason: err.to_string(),
                    });
                }
            }
        } else {
            error!(
                "Consumer: delivery {} exhausted {} retries ({err}), dead-lettering",
                delivery.id, self.max_retries
            );
            if let Err(reject_err) = self.queue.reject(delivery.id).await {
                error!("Consumer: reject failed: {reject_err}");
            }
            let _ = self.events.send(ConsumerEvent::MessageFailed {
                code: err.code(),
                reason: err.to_string(),
            });
        }
    }
}
