use axum::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_activated: bool,
    /// Retained after activation; re-activating through the same link is a
    /// no-op rather than an error.
    #[serde(skip_serializing)]
    pub activation_link: Uuid,
    pub created_at: OffsetDateTime,
}

/// Fields needed to create a user row; the store fills in id and timestamp.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub activation_link: Uuid,
}

/// Persisted refresh session, at most one row per user.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshSession {
    pub user_id: Uuid,
    pub refresh_token: String,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn find_by_activation_link(&self, link: Uuid) -> anyhow::Result<Option<User>>;
    async fn create(&self, new_user: NewUser) -> anyhow::Result<User>;
    async fn save(&self, user: &User) -> anyhow::Result<()>;
    async fn list_all(&self) -> anyhow::Result<Vec<User>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Upsert: a user has at most one refresh session, a new token replaces
    /// the previous one.
    async fn save(&self, user_id: Uuid, refresh_token: &str) -> anyhow::Result<()>;
    async fn find(&self, refresh_token: &str) -> anyhow::Result<Option<RefreshSession>>;
    /// Returns the number of rows removed; 0 means already logged out.
    async fn remove(&self, refresh_token: &str) -> anyhow::Result<u64>;
}

pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, is_activated, activation_link, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, is_activated, activation_link, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_activation_link(&self, link: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, is_activated, activation_link, created_at
            FROM users
            WHERE activation_link = $1
            "#,
        )
        .bind(link)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn create(&self, new_user: NewUser) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, password_hash, activation_link)
            VALUES ($1, $2, $3)
            RETURNING id, email, password_hash, is_activated, activation_link, created_at
            "#,
        )
        .bind(&new_user.email)
        .bind(&new_user.password_hash)
        .bind(new_user.activation_link)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn save(&self, user: &User) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET email = $2, password_hash = $3, is_activated = $4, activation_link = $5
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.is_activated)
        .bind(user.activation_link)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn list_all(&self) -> anyhow::Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, is_activated, activation_link, created_at
            FROM users
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.db)
        .await?;
        Ok(users)
    }
}

pub struct PgSessionStore {
    db: PgPool,
}

impl PgSessionStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn save(&self, user_id: Uuid, refresh_token: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_sessions (user_id, refresh_token)
            VALUES ($1, $2)
            ON CONFLICT (user_id)
            DO UPDATE SET refresh_token = EXCLUDED.refresh_token, updated_at = now()
            "#,
        )
        .bind(user_id)
        .bind(refresh_token)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find(&self, refresh_token: &str) -> anyhow::Result<Option<RefreshSession>> {
        let session = sqlx::query_as::<_, RefreshSession>(
            r#"
            SELECT user_id, refresh_token
            FROM refresh_sessions
            WHERE refresh_token = $1
            "#,
        )
        .bind(refresh_token)
        .fetch_optional(&self.db)
        .await?;
        Ok(session)
    }

    async fn remove(&self, refresh_token: &str) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM refresh_sessions
            WHERE refresh_token = $1
            "#,
        )
        .bind(refresh_token)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // User rows go out verbatim on the admin listing route; the secret-bearing
    // columns must stay out of the JSON.
    #[test]
    fn user_json_omits_password_hash_and_activation_link() {
        let user = User {
            id: Uuid::new_v4(),
            email: "test@example.com".to_string(),
            password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string(),
            is_activated: false,
            activation_link: Uuid::new_v4(),
            created_at: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(json.contains("test@example.com"));
        assert!(json.contains("is_activated"));
        assert!(!json.contains("password_hash"));
        assert!(!json.contains("argon2id"));
        assert!(!json.contains("activation_link"));
        assert!(!json.contains(&user.activation_link.to_string()));
    }
}
