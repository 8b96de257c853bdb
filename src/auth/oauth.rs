//! OAuth2 login flow
//!
//! Implements the OAuth 2.0 authorization code flow against the configured
//! identity provider and maps the provider profile onto a local user.

use axum::{
    Router,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
    routing::{any, get},
};
use axum_extra::extract::CookieJar;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use serde::Deserialize;
use serde_json::Value;

use super::session::Session;
use crate::AppState;
use crate::config::OAuthConfig;
use crate::data::{Profile, SessionData, User, UserRepository};
use crate::error::AppError;
use crate::messages::{self, MessageLevel};
use crate::metrics::{LOGINS_TOTAL, LOGOUTS_TOTAL, USERS_CREATED_TOTAL};

/// Landing page after a callback, successful or not
pub const WELCOME_PATH: &str = "/welcome";
/// Landing page after logout
pub const HOME_PATH: &str = "/";

/// Random bytes behind each state token
const STATE_TOKEN_BYTES: usize = 16;

/// Create authentication router
///
/// Routes:
/// - GET /oauth/login - Redirect to the provider
/// - GET /oauth/callback - OAuth callback
/// - ANY /logout - Logout
pub fn auth_router() -> Router<AppState> {
    Router::new()
        .route("/oauth/login", get(oauth_login))
        .route("/oauth/callback", get(oauth_callback))
        .route("/logout", any(logout))
}

// =============================================================================
// Login
// =============================================================================

/// GET /oauth/login
///
/// Redirects user to the provider authorization page.
///
/// # Steps
/// 1. Generate CSRF state token
/// 2. Store state in the session
/// 3. Redirect to the provider with client_id, redirect_uri, scope, state
async fn oauth_login(
    State(state): State<AppState>,
    mut session: Session,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let token = generate_csrf_state();
    let authorization_url = state.provider.authorization_url(&token)?;

    session.data.state = Some(token);
    let jar = session.save(&state, jar).await?;

    tracing::debug!(
        provider = %state.provider.provider_name(),
        "Redirecting to identity provider"
    );

    Ok((jar, Redirect::to(authorization_url.as_str())))
}

// =============================================================================
// Callback
// =============================================================================

/// Query parameters from the provider callback
#[derive(Debug, Deserialize)]
struct CallbackQuery {
    /// Authorization code
    code: Option<String>,
    /// CSRF state token
    state: Option<String>,
    /// Set by the provider when the user denied access
    error: Option<String>,
    error_description: Option<String>,
}

/// GET /oauth/callback
///
/// Handles OAuth callback from the provider.
///
/// # Steps
/// 1. Compare the callback state with the stored one, consuming it on a match
/// 2. Exchange code for access token
/// 3. Fetch the user's profile and keep it in the session
/// 4. Find or create the local user and log them in
/// 5. Redirect to the welcome page
async fn oauth_callback(
    State(state): State<AppState>,
    mut session: Session,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, AppError> {
    let min_level = state.config.messages.min_level;

    if !verify_csrf_state(session.data.state.as_deref(), query.state.as_deref()) {
        // The stored state is left in place on a mismatch.
        tracing::warn!(
            had_stored_state = session.data.state.is_some(),
            had_callback_state = query.state.is_some(),
            "OAuth state mismatch"
        );
        LOGINS_TOTAL.with_label_values(&["state_mismatch"]).inc();
        messages::add(
            &mut session.data,
            min_level,
            MessageLevel::Error,
            "State information mismatch!",
        );
        let jar = session.save(&state, jar).await?;
        return Ok((jar, Redirect::to(WELCOME_PATH)).into_response());
    }
    session.data.take_state();

    if let Some(error) = query.error {
        tracing::info!(%error, "Identity provider declined authorization");
        LOGINS_TOTAL.with_label_values(&["denied"]).inc();
        let text = match query.error_description {
            Some(description) => format!("Login failed: {description}"),
            None => format!("Login failed: {error}"),
        };
        messages::add(&mut session.data, min_level, MessageLevel::Error, text);
        let jar = session.save(&state, jar).await?;
        return Ok((jar, Redirect::to(WELCOME_PATH)).into_response());
    }

    let outcome = match query.code.as_deref().filter(|code| !code.is_empty()) {
        Some(code) => complete_login(&state, &mut session.data, code).await,
        None => Err(AppError::Validation(
            "missing authorization code".to_string(),
        )),
    };

    let user = match outcome {
        Ok(user) => user,
        Err(error) => {
            LOGINS_TOTAL.with_label_values(&["failed"]).inc();
            // Persist the consumed state and any fetched profile before failing.
            session.save(&state, jar).await?;
            return Err(error);
        }
    };

    session.cycle_id();
    let jar = session.save(&state, jar).await?;

    LOGINS_TOTAL.with_label_values(&["authenticated"]).inc();
    tracing::info!(user_id = %user.id, username = %user.username, "User logged in");

    // Redirect to hide the callback URL from the browser history
    Ok((jar, Redirect::to(WELCOME_PATH)).into_response())
}

/// Exchange the code, fetch the profile and log the matching user in.
///
/// The profile is stored on the session as soon as it is fetched, even if
/// resolving the local user fails afterwards.
async fn complete_login(
    state: &AppState,
    session: &mut SessionData,
    code: &str,
) -> Result<User, AppError> {
    let token = state.provider.exchange_code(code).await?;
    let profile = state.provider.fetch_profile(&token).await?;
    session.profile = Some(profile.clone());

    let user = resolve_user(
        state.users.as_ref(),
        &state.config.oauth,
        &profile,
        session,
        state.config.messages.min_level,
    )
    .await?;
    session.user_id = Some(user.id.clone());

    Ok(user)
}

/// Find the local user for a provider profile, creating it on first login.
///
/// Existing users are returned as stored; their email is not refreshed.
/// Repository errors propagate instead of being read as "not found".
async fn resolve_user(
    users: &dyn UserRepository,
    fields: &OAuthConfig,
    profile: &Profile,
    session: &mut SessionData,
    min_level: MessageLevel,
) -> Result<User, AppError> {
    let username = profile
        .get(&fields.username_field)
        .and_then(Value::as_str)
        .filter(|username| !username.is_empty())
        .ok_or_else(|| {
            AppError::Upstream(format!(
                "provider profile has no {} field",
                fields.username_field
            ))
        })?;

    if let Some(user) = users.find_by_username(username).await? {
        messages::add(
            session,
            min_level,
            MessageLevel::Debug,
            format!("User {} already exists, Authenticated? true", user.username),
        );
        return Ok(user);
    }

    let email = profile
        .get(&fields.email_field)
        .and_then(Value::as_str)
        .unwrap_or("");
    let user = users.create(username, email).await?;

    USERS_CREATED_TOTAL.inc();
    tracing::info!(user_id = %user.id, username = %user.username, "User created");
    messages::add(
        session,
        min_level,
        MessageLevel::Debug,
        format!("User {} is created, Authenticated? true", user.username),
    );

    Ok(user)
}

// =============================================================================
// Logout
// =============================================================================

/// ANY /logout
///
/// Flushes the session and redirects home.
async fn logout(
    State(state): State<AppState>,
    mut session: Session,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let was_authenticated = session.data.is_authenticated();

    session.flush();
    messages::add(
        &mut session.data,
        state.config.messages.min_level,
        MessageLevel::Success,
        "You are successfully logged out",
    );
    let jar = session.save(&state, jar).await?;

    LOGOUTS_TOTAL.inc();
    tracing::info!(was_authenticated, "Logged out");

    Ok((jar, Redirect::to(HOME_PATH)))
}

// =============================================================================
// Helpers
// =============================================================================

/// Generate a random CSRF state token (URL-safe, 16 bytes of entropy)
pub fn generate_csrf_state() -> String {
    let mut bytes = [0_u8; STATE_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Verify the callback state matches the one stored at login.
///
/// A missing value on either side never matches.
pub fn verify_csrf_state(expected: Option<&str>, received: Option<&str>) -> bool {
    match (expected, received) {
        (Some(expected), Some(received)) => expected == received,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MockUserRepository;
    use chrono::Utc;
    use mockall::predicate::eq;

    fn profile(json: serde_json::Value) -> Profile {
        match json {
            Value::Object(map) => map,
            _ => panic!("profile must be an object"),
        }
    }

    fn oauth_fields() -> OAuthConfig {
        crate::config::tests::valid_config().oauth
    }

    fn user(username: &str, email: &str) -> User {
        User {
            id: crate::data::EntityId::new().0,
            username: username.to_string(),
            email: email.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn state_tokens_have_16_bytes_of_entropy() {
        let token = generate_csrf_state();

        assert_eq!(URL_SAFE_NO_PAD.decode(&token).unwrap().len(), 16);
        assert_ne!(token, generate_csrf_state());
    }

    #[test]
    fn state_verification_requires_both_sides() {
        assert!(verify_csrf_state(Some("abc"), Some("abc")));
        assert!(!verify_csrf_state(Some("abc"), Some("abd")));
        assert!(!verify_csrf_state(None, Some("abc")));
        assert!(!verify_csrf_state(Some("abc"), None));
        assert!(!verify_csrf_state(None, None));
    }

    #[tokio::test]
    async fn resolve_user_creates_missing_user() {
        let mut users = MockUserRepository::new();
        users
            .expect_find_by_username()
            .with(eq("alice"))
            .times(1)
            .returning(|_| Ok(None));
        users
            .expect_create()
            .with(eq("alice"), eq("a@x.com"))
            .times(1)
            .returning(|username, email| Ok(user(username, email)));

        let mut session = SessionData::default();
        let resolved = resolve_user(
            &users,
            &oauth_fields(),
            &profile(serde_json::json!({"username": "alice", "email": "a@x.com"})),
            &mut session,
            MessageLevel::Debug,
        )
        .await
        .unwrap();

        assert_eq!(resolved.username, "alice");
        assert_eq!(
            session.messages[0].text,
            "User alice is created, Authenticated? true"
        );
    }

    #[tokio::test]
    async fn resolve_user_reuses_existing_user_without_refresh() {
        let existing = user("alice", "old@x.com");
        let returned = existing.clone();

        let mut users = MockUserRepository::new();
        users
            .expect_find_by_username()
            .times(1)
            .returning(move |_| Ok(Some(returned.clone())));
        users.expect_create().never();

        let mut session = SessionData::default();
        let resolved = resolve_user(
            &users,
            &oauth_fields(),
            &profile(serde_json::json!({"username": "alice", "email": "new@x.com"})),
            &mut session,
            MessageLevel::Info,
        )
        .await
        .unwrap();

        assert_eq!(resolved, existing);
        assert_eq!(resolved.email, "old@x.com");
        // Debug notices are below the default threshold
        assert!(session.messages.is_empty());
    }

    #[tokio::test]
    async fn resolve_user_propagates_lookup_failure() {
        let mut users = MockUserRepository::new();
        users
            .expect_find_by_username()
            .returning(|_| Err(AppError::Database(sqlx::Error::PoolTimedOut)));
        users.expect_create().never();

        let mut session = SessionData::default();
        let result = resolve_user(
            &users,
            &oauth_fields(),
            &profile(serde_json::json!({"username": "alice", "email": "a@x.com"})),
            &mut session,
            MessageLevel::Debug,
        )
        .await;

        assert!(matches!(result, Err(AppError::Database(_))));
    }

    #[tokio::test]
    async fn resolve_user_requires_username() {
        let mut users = MockUserRepository::new();
        users.expect_find_by_username().never();
        users.expect_create().never();

        let mut session = SessionData::default();
        let result = resolve_user(
            &users,
            &oauth_fields(),
            &profile(serde_json::json!({"login": "alice"})),
            &mut session,
            MessageLevel::Debug,
        )
        .await;

        assert!(matches!(result, Err(AppError::Upstream(_))));
    }

    #[tokio::test]
    async fn resolve_user_reads_configured_username_field() {
        let mut users = MockUserRepository::new();
        users
            .expect_find_by_username()
            .with(eq("octocat"))
            .returning(|_| Ok(None));
        users
            .expect_create()
            .with(eq("octocat"), eq(""))
            .times(1)
            .returning(|username, email| Ok(user(username, email)));

        let mut fields = oauth_fields();
        fields.username_field = "login".to_string();
        let mut session = SessionData::default();
        let resolved = resolve_user(
            &users,
            &fields,
            &profile(serde_json::json!({"login": "octocat", "username": "ignored"})),
            &mut session,
            MessageLevel::Info,
        )
        .await
        .unwrap();

        assert_eq!(resolved.username, "octocat");
    }

    #[tokio::test]
    async fn resolve_user_defaults_missing_email_to_empty() {
        let mut users = MockUserRepository::new();
        users.expect_find_by_username().returning(|_| Ok(None));
        users
            .expect_create()
            .with(eq("bob"), eq(""))
            .times(1)
            .returning(|username, email| Ok(user(username, email)));

        let mut session = SessionData::default();
        let resolved = resolve_user(
            &users,
            &oauth_fields(),
            &profile(serde_json::json!({"username": "bob"})),
            &mut session,
            MessageLevel::Info,
        )
        .await
        .unwrap();

        assert_eq!(resolved.email, "");
    }
}
