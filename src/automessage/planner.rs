use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::info;

use crate::error::{AppError, ErrorCode, Result};
use crate::user::{user_models::ActiveUser, user_repository::UserRepository};

use super::automessage_models::NewAutoMessage;
use super::automessage_repository::AutoMessageRepository;

/// Template set for generated conversation starters.
pub const AUTO_MESSAGE_TEMPLATES: [&str; 8] = [
    "Hey! How has your week been going?",
    "Hi there, just checking in. What's new with you?",
    "Thinking of you! Hope your day is going great.",
    "Hello! Any plans for the weekend yet?",
    "Hey, long time no chat. How are things?",
    "Hi! What's the best thing that happened to you today?",
    "Hey there! Found any good shows or books lately?",
    "Hello! Just wanted to say hi and see how you're doing.",
];

/// Nightly batch generator: pairs active users and persists planned
/// messages with randomized future send times.
#[derive(Clone)]
pub struct PlannerService {
    users: UserRepository,
    auto_messages: AutoMessageRepository,
}

impl PlannerService {
    pub fn new(users: UserRepository, auto_messages: AutoMessageRepository) -> Self {
        Self {
            users,
            auto_messages,
        }
    }

    /// Plans one automatic message per user pair. Returns the number of
    /// planned messages persisted.
    pub async fn plan_automatic_messages(&self) -> Result<u64> {
        let users = self.users.find_active_users().await.map_err(|e| {
            AppError::pipeline(
                ErrorCode::UserRetrievalFailed,
                format!("could not load active users: {e}"),
            )
        })?;

        if users.len() < 2 {
            info!("Planner: fewer than 2 active users, nothing to plan");
            return Ok(0);
        }

        let drafts = build_plan(users, Utc::now(), &mut rand::thread_rng());

        let planned = self.auto_messages.bulk_insert(&drafts).await.map_err(|e| {
            AppError::pipeline(
                ErrorCode::AutoMessageSaveFailed,
                format!("could not persist planned messages: {e}"),
            )
        })?;

        info!("Planner: persisted {} planned messages", planned);
        Ok(planned)
    }
}

/// Shuffles users (Fisher–Yates), walks adjacent pairs, and drafts one
/// planned message per pair. With an odd count the last user is skipped.
/// The first element of each pair is the sender.
fn build_plan<R: Rng>(
    mut users: Vec<ActiveUser>,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Vec<NewAutoMessage> {
    users.shuffle(&mut *rng);

    users
        .chunks_exact(2)
        .map(|pair| NewAutoMessage {
            sender_id: pair[0].id,
            receiver_id: pair[1].id,
            content: AUTO_MESSAGE_TEMPLATES
                .choose(&mut *rng)
                .copied()
                .unwrap_or(AUTO_MESSAGE_TEMPLATES[0])
                .to_string(),
            send_date: random_send_date(now, &mut *rng),
        })
        .collect()
}

/// `now + H hours + M minutes` with `H` uniform in 1..=24 and `M` uniform
/// in 0..=59.
fn random_send_date<R: Rng>(now: DateTime<Utc>, rng: &mut R) -> DateTime<Utc> {
    let hours = rng.gen_range(1..=24);
    let minutes = rng.gen_range(0..=59);
    now + Duration::hours(hours) + Duration::minutes(minutes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;
    use uuid::Uuid;

    fn active_users(n: usize) -> Vec<ActiveUser> {
        (0..n)
            .map(|i| ActiveUser {
                id: Uuid::new_v4(),
                username: format!("user{i}"),
                email: format!("user{i}@example.com"),
            })
            .collect()
    }

    #[test]
    fn even_user_count_pairs_everyone() {
        let users = active_users(6);
        let ids: HashSet<Uuid> = users.iter().map(|u| u.id).collect();
        let drafts = build_plan(users, Utc::now(), &mut StdRng::seed_from_u64(7));

        assert_eq!(drafts.len(), 3);

        let mut seen = HashSet::new();
        for draft in &drafts {
            assert_ne!(draft.sender_id, draft.receiver_id);
            assert!(seen.insert(draft.sender_id));
            assert!(seen.insert(draft.receiver_id));
        }
        assert_eq!(seen, ids);
    }

    #[test]
    fn odd_user_count_leaves_exactly_one_unpaired() {
        let users = active_users(5);
        let ids: HashSet<Uuid> = users.iter().map(|u| u.id).collect();
        let drafts = build_plan(users, Utc::now(), &mut StdRng::seed_from_u64(7));

        assert_eq!(drafts.len(), 2);

        let mut paired = HashSet::new();
        for draft in &drafts {
            paired.insert(draft.sender_id);
            paired.insert(draft.receiver_id);
        }
        assert_eq!(ids.difference(&paired).count(), 1);
    }

    #[test]
    fn single_user_plans_nothing() {
        let drafts = build_plan(active_users(1), Utc::now(), &mut StdRng::seed_from_u64(7));
        assert!(drafts.is_empty());
    }

    #[test]
    fn send_dates_fall_inside_the_window() {
        let now = Utc::now();
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..500 {
            let date = random_send_date(now, &mut rng);
            assert!(date >= now + Duration::hours(1));
            assert!(date <= now + Duration::hours(24) + Duration::minutes(59));
        }
    }

    #[test]
    fn drafted_content_comes_from_the_template_set() {
        let drafts = build_plan(active_users(20), Utc::now(), &mut StdRng::seed_from_u64(3));
        assert_eq!(drafts.len(), 10);

        for draft in &drafts {
            assert!(AUTO_MESSAGE_TEMPLATES.contains(&draft.content.as_str()));
            let len = draft.content.chars().count();
            assert!((1..=1000).contains(&len));
        }
    }
}
