use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// Metadata kept per online user. `timestamp` is the connect time.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OnlineUserInfo {
    pub user_id: Uuid,
    pub username: String,
    pub timestamp: DateTime<Utc>,
}

struct PresenceEntry {
    info: OnlineUserInfo,
    expires_at: Instant,
}

/// Ephemeral index of currently connected users.
///
/// Membership and metadata have distinct lifetimes: a user stays a member
/// until explicitly removed or cleaned up, while the metadata lapses after
/// the TTL. `is_user_online` is a pure membership test, so a member whose
/// info has lapsed still counts as online until `cleanup_expired_users`
/// runs. Last writer wins on concurrent updates for the same user.
pub struct PresenceIndex {
    entries: DashMap<Uuid, PresenceEntry>,
    ttl: Duration,
}

impl PresenceIndex {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn set_user_online(&self, user_id: Uuid, username: &str) {
        let entry = PresenceEntry {
            info: OnlineUserInfo {
                user_id,
                username: username.to_string(),
                timestamp: Utc::now(),
            },
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.insert(user_id, entry);
        tracing::debug!("Presence: user {} online", user_id);
    }

    pub fn set_user_offline(&self, user_id: Uuid) {
        self.entries.remove(&user_id);
        tracing::debug!("Presence: user {} offline", user_id);
    }

    pub fn is_user_online(&self, user_id: Uuid) -> bool {
        self.entries.contains_key(&user_id)
    }

    pub fn get_online_users(&self) -> Vec<Uuid> {
        self.entries.iter().map(|entry| *entry.key()).collect()
    }

    pub fn get_online_user_count(&self) -> usize {
        self.entries.len()
    }

    /// Metadata for an online user, or `None` when the user is not a
    /// member or the metadata TTL has lapsed.
    pub fn get_user_info(&self, user_id: Uuid) -> Option<OnlineUserInfo> {
        self.entries.get(&user_id).and_then(|entry| {
            if entry.expires_at <= Instant::now() {
                None
            } else {
                Some(entry.info.clone())
            }
        })
    }

    pub fn get_online_users_with_info(&self) -> Vec<OnlineUserInfo> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.info.clone())
            .collect()
    }

    /// Drops members whose metadata has lapsed. Returns how many were
    /// removed.
    pub fn cleanup_expired_users(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    pub fn clear_all_online_users(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_offline_roundtrip() {
        let index = PresenceIndex::new(Duration::from_secs(3600));
        let user = Uuid::new_v4();

        assert!(!index.is_user_online(user));

        index.set_user_online(user, "ayse");
        assert!(index.is_user_online(user));
        assert_eq!(index.get_online_user_count(), 1);
        assert_eq!(index.get_user_info(user).unwrap().username, "ayse");

        index.set_user_offline(user);
        assert!(!index.is_user_online(user));
        assert!(index.get_user_info(user).is_none());
    }

    #[test]
    fn reconnect_overwrites_previous_info() {
        let index = PresenceIndex::new(Duration::from_secs(3600));
        let user = Uuid::new_v4();

        index.set_user_online(user, "old-name");
        index.set_user_online(user, "new-name");

        assert_eq!(index.get_online_user_count(), 1);
        assert_eq!(index.get_user_info(user).unwrap().username, "new-name");
    }

    #[test]
    fn membership_outlives_lapsed_info_until_cleanup() {
        let index = PresenceIndex::new(Duration::ZERO);
        let user = Uuid::new_v4();

        index.set_user_online(user, "mehmet");

        // Info lapsed immediately, membership remains.
        assert!(index.is_user_online(user));
        assert!(index.get_user_info(user).is_none());
        assert!(index.get_online_users_with_info().is_empty());

        assert_eq!(index.cleanup_expired_users(), 1);
        assert!(!index.is_user_online(user));
    }

    #[test]
    fn cleanup_keeps_fresh_members() {
        let index = PresenceIndex::new(Duration::from_secs(3600));
        index.set_user_online(Uuid::new_v4(), "a");
        index.set_user_online(Uuid::new_v4(), "b");

        assert_eq!(index.cleanup_expired_users(), 0);
        assert_eq!(index.get_online_user_count(), 2);
        assert_eq!(index.get_online_users_with_info().len(), 2);
    }

    #[test]
    fn clear_purges_everything() {
        let index = PresenceIndex::new(Duration::from_secs(3600));
        index.set_user_online(Uuid::new_v4(), "a");
        index.set_user_online(Uuid::new_v4(), "b");

        index.clear_all_online_users();
        assert_eq!(index.get_online_user_count(), 0);
        assert!(index.get_online_users().is_empty());
    }
}
