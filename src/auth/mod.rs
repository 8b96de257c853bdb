//! OAuth2 provider authentication
//!
//! Handles:
//! - Authorization-code login flow
//! - Identity provider HTTP client
//! - Server-side sessions behind a signed cookie

mod oauth;
pub mod provider;
pub mod session;

pub use oauth::{HOME_PATH, WELCOME_PATH, auth_router, generate_csrf_state, verify_csrf_state};
pub use provider::{ProviderClient, TokenResponse};
pub use session::Session;
