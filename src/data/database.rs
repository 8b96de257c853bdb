//! SQLite database operations
//!
//! All database access goes through this module.
//! Backs both the user repository and the optional persistent
//! session store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::Path;

use super::models::*;
use super::repository::{SessionStore, UserRepository};
use crate::error::AppError;

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Connect to the SQLite database at `path`, creating it if needed,
    /// and run migrations.
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        // Create connection string
        let connection_string = format!("sqlite:{}?mode=rwc", path.display());

        // Create connection pool
        let pool = SqlitePool::connect(&connection_string).await?;

        // Run migrations
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!(path = %path.display(), "Database connected and migrated successfully");

        Ok(Self { pool })
    }

    /// Number of stored users
    pub async fn count_users(&self) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_sessions(&self) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Delete every session record past its expiry.
    ///
    /// Runs on each save so abandoned sessions do not pile up.
    pub async fn prune_expired_sessions(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        let pruned = result.rows_affected();
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned expired sessions");
        }
        Ok(pruned)
    }
}

// =============================================================================
// Users
// =============================================================================

#[async_trait]
impl UserRepository for Database {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, email, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, email, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Insert the user only when the username is free.
    ///
    /// This is atomic at the SQL statement level, so two callbacks racing
    /// for the same new username both end up with the same row.
    async fn create(&self, username: &str, email: &str) -> Result<User, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (id, username, email, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(username) DO NOTHING
            "#,
        )
        .bind(EntityId::new().0)
        .bind(username)
        .bind(email)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(%username, "User already existed at insert time");
        }

        self.find_by_username(username)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("user {username} vanished after insert")))
    }
}

// =============================================================================
// Sessions
// =============================================================================

#[async_trait]
impl SessionStore for Database {
    async fn load(&self, id: &str) -> Result<Option<SessionData>, AppError> {
        let record = sqlx::query_as::<_, SessionRecord>(
            "SELECT id, data, expires_at FROM sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(record) = record else {
            return Ok(None);
        };

        if record.is_expired() {
            self.delete(&record.id).await?;
            return Ok(None);
        }

        match serde_json::from_str::<SessionData>(&record.data) {
            Ok(data) => Ok(Some(data)),
            Err(error) => {
                tracing::warn!(%error, "Discarding undecodable session record");
                self.delete(&record.id).await?;
                Ok(None)
            }
        }
    }

    async fn save(
        &self,
        id: &str,
        data: &SessionData,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let encoded = serde_json::to_string(data).map_err(|e| AppError::Session(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO sessions (id, data, expires_at) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET data = excluded.data, expires_at = excluded.expires_at
            "#,
        )
        .bind(id)
        .bind(encoded)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        self.prune_expired_sessions().await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
