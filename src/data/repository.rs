//! Storage seams
//!
//! Handlers only see these traits; `AppState` carries the concrete
//! implementations as trait objects.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::{SessionData, User};
use crate::error::AppError;

/// Local user accounts
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Look up a user by username.
    ///
    /// `Ok(None)` means the user does not exist; any `Err` is a real
    /// storage failure and must not be treated as absence.
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, AppError>;

    /// Create a user. If the username already exists, the existing
    /// record is returned unchanged.
    async fn create(&self, username: &str, email: &str) -> Result<User, AppError>;
}

/// Server-side session records keyed by session id
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session. Expired or unknown ids yield `Ok(None)`.
    async fn load(&self, id: &str) -> Result<Option<SessionData>, AppError>;

    /// Insert or replace a session.
    async fn save(
        &self,
        id: &str,
        data: &SessionData,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Delete a session. Unknown ids are not an error.
    async fn delete(&self, id: &str) -> Result<(), AppError>;
}
