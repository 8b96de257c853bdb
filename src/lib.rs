//! provider-login - OAuth2 "login with provider" for a web application
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HTTP Layer (Axum)                       │
//! │  - /oauth/login, /oauth/callback, /logout                   │
//! │  - Landing pages (/, /welcome), /health, /metrics           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Auth Layer                              │
//! │  - State token issue / consume                              │
//! │  - Provider client (token exchange, userinfo)               │
//! │  - Signed session cookie                                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - UserRepository (SQLite)                                  │
//! │  - SessionStore (memory or SQLite)                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: landing pages and metrics endpoint
//! - `auth`: OAuth flow, provider client, sessions
//! - `data`: users, session storage
//! - `messages`: flash notifications
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod messages;
pub mod metrics;

use std::sync::Arc;

/// Application state shared across all handlers
///
/// Cloned for each request. Storage is injected as trait objects so
/// tests and alternative backends can swap them.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Local user accounts
    pub users: Arc<dyn data::UserRepository>,

    /// Server-side session records
    pub sessions: Arc<dyn data::SessionStore>,

    /// Identity provider client
    pub provider: Arc<auth::ProviderClient>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Select the session backend
    /// 3. Build the provider HTTP client
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let db = Arc::new(data::Database::connect(&config.database.path).await?);
        tracing::info!(users = db.count_users().await?, "Database connected");

        let sessions: Arc<dyn data::SessionStore> = match config.session.backend {
            config::SessionBackend::Memory => Arc::new(data::MemorySessionStore::new()),
            config::SessionBackend::Database => {
                let pruned = db.prune_expired_sessions().await?;
                tracing::info!(
                    stored = db.count_sessions().await?,
                    pruned,
                    "Database sessions loaded"
                );
                db.clone()
            }
        };
        tracing::info!(backend = ?config.session.backend, "Session store initialized");

        let state = Self::from_parts(config, db, sessions)?;
        tracing::info!("Application state initialized successfully");
        Ok(state)
    }

    /// Assemble state from already constructed stores.
    pub fn from_parts(
        config: config::AppConfig,
        users: Arc<dyn data::UserRepository>,
        sessions: Arc<dyn data::SessionStore>,
    ) -> Result<Self, error::AppError> {
        let provider = auth::ProviderClient::new(&config.oauth)?;

        Ok(Self {
            config: Arc::new(config),
            users,
            sessions,
            provider: Arc::new(provider),
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{compression::CompressionLayer, trace::TraceLayer};

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(auth::auth_router())
        .merge(api::pages_router())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(api::metrics_router())
}

async fn health_check() -> &'static str {
    "OK"
}
