//! In-memory session store
//!
//! Volatile: every session is lost on restart. Default backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::models::SessionData;
use super::repository::SessionStore;
use crate::error::AppError;
use crate::metrics::SESSIONS_ACTIVE;

struct Entry {
    data: SessionData,
    expires_at: DateTime<Utc>,
}

/// Session store backed by a `HashMap`
///
/// Expired entries are dropped when touched and swept on every save.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Entry>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (possibly expired but unswept) sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &str) -> Result<Option<SessionData>, AppError> {
        {
            let sessions = self.sessions.read().await;
            match sessions.get(id) {
                None => return Ok(None),
                Some(entry) if entry.expires_at > Utc::now() => {
                    return Ok(Some(entry.data.clone()));
                }
                Some(_) => {}
            }
        }

        // Expired
        let mut sessions = self.sessions.write().await;
        sessions.remove(id);
        SESSIONS_ACTIVE.set(sessions.len() as i64);
        Ok(None)
    }

    async fn save(
        &self,
        id: &str,
        data: &SessionData,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, entry| entry.expires_at > now);
        sessions.insert(
            id.to_string(),
            Entry {
                data: data.clone(),
                expires_at,
            },
        );
        SESSIONS_ACTIVE.set(sessions.len() as i64);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), AppError> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(id);
        SESSIONS_ACTIVE.set(sessions.len() as i64);
        Ok(())
    }
}
