use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::types::WsMessage;

pub type WsSender = mpsc::UnboundedSender<WsMessage>;

struct ConnectionHandle {
    connection_id: Uuid,
    sender: WsSender,
}

/// Registry of live WebSocket connections, fanning payloads out to every
/// connection a user holds.
///
/// A user may be connected from several devices at once, so connections
/// are reference-counted per user: callers decide a user went offline only
/// when `remove_connection` reports zero remaining.
#[derive(Clone)]
pub struct ConnectionManager {
    connections: Arc<DashMap<Uuid, Vec<ConnectionHandle>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
        }
    }

    /// Registers a connection. Returns how many connections the user now
    /// holds.
    pub fn add_connection(&self, user_id: Uuid, connection_id: Uuid, sender: WsSender) -> usize {
        let mut entry = self.connections.entry(user_id).or_default();
        entry.push(ConnectionHandle {
            connection_id,
            sender,
        });
        let count = entry.len();
        tracing::info!("User {} connected via WebSocket ({} total)", user_id, count);
        count
    }

    /// Drops one connection. Returns how many connections the user still
    /// holds; zero means the last connection closed.
    pub fn remove_connection(&self, user_id: Uuid, connection_id: Uuid) -> usize {
        let remaining = match self.connections.get_mut(&user_id) {
            Some(mut entry) => {
                entry.retain(|handle| handle.connection_id != connection_id);
                entry.len()
            }
            None => 0,
        };

        if remaining == 0 {
            self.connections.remove_if(&user_id, |_, handles| handles.is_empty());
        }

        tracing::info!(
            "User {} disconnected from WebSocket ({} remaining)",
            user_id,
            remaining
        );
        remaining
    }

    /// Delivers a payload to every live connection of a user. Returns true
    /// when at least one connection accepted it.
    pub fn emit_to_user(&self, user_id: Uuid, message: &WsMessage) -> bool {
        match self.connections.get(&user_id) {
            Some(handles) => handles
                .iter()
                .map(|handle| handle.sender.send(message.clone()).is_ok())
                .fold(false, |acc, ok| acc || ok),
            None => false,
        }
    }

    pub fn is_user_connected(&self, user_id: Uuid) -> bool {
        self.connections
            .get(&user_id)
            .map(|handles| !handles.is_empty())
            .unwrap_or(false)
    }

    pub fn connected_user_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::websocket::types::ErrorPayload;

    fn test_message() -> WsMessage {
        WsMessage::Error(ErrorPayload {
            message: "test".to_string(),
            code: ErrorCode::InternalError,
        })
    }

    #[test]
    fn multi_connection_ref_counting() {
        let manager = ConnectionManager::new();
        let user = Uuid::new_v4();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let conn1 = Uuid::new_v4();
        let conn2 = Uuid::new_v4();

        assert_eq!(manager.add_connection(user, conn1, tx1), 1);
        assert_eq!(manager.add_connection(user, conn2, tx2), 2);

        // First close leaves the user connected.
        assert_eq!(manager.remove_connection(user, conn1), 1);
        assert!(manager.is_user_connected(user));

        // Last close reports zero remaining.
        assert_eq!(manager.remove_connection(user, conn2), 0);
        assert!(!manager.is_user_connected(user));
        assert_eq!(manager.connected_user_count(), 0);
    }

    #[test]
    fn emit_reaches_every_connection_of_the_user() {
        let manager = ConnectionManager::new();
        let user = Uuid::new_v4();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        manager.add_connection(user, Uuid::new_v4(), tx1);
        manager.add_connection(user, Uuid::new_v4(), tx2);

        assert!(manager.emit_to_user(user, &test_message()));
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn emit_to_unknown_user_is_a_noop() {
        let manager = ConnectionManager::new();
        assert!(!manager.emit_to_user(Uuid::new_v4(), &test_message()));
    }
}
