use crate::error::Result;
use sqlx::PgPool;
use uuid::Uuid;

use super::user_models::{ActiveUser, User};

#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, username: &str, email: &str, password_hash: &str) -> Result<User> {
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (username, email, password_hash) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    /// All users eligible for automatic-message pairing.
    pub async fn find_active_users(&self) -> Result<Vec<ActiveUser>> {
        let users = sqlx::query_as::<_, ActiveUser>(
            "SELECT id, username, email FROM users WHERE is_active = true",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    pub async fn set_active(&self, user_id: Uuid, is_active: bool) -> Result<()> {
        sqlx::query("UPDATE users SET is_active = $1, updated_at = NOW() WHERE id = $2")
            .bind(is_active)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
