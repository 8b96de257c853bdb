//! Session management
//!
//! Session contents live server-side in a [`SessionStore`]; the browser
//! only holds the session id in an HMAC-signed cookie.
//!
//! [`SessionStore`]: crate::data::SessionStore

use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::AppState;
use crate::data::SessionData;
use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

const SESSION_ID_BYTES: usize = 32;

/// Generate a fresh random session id (base64url, no padding)
pub fn generate_session_id() -> String {
    let mut bytes = [0_u8; SESSION_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Create a signed cookie value for a session id
///
/// Format: `{session_id}.{base64(hmac_sha256(session_id))}`
pub fn sign_session_id(session_id: &str, secret: &str) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Session(e.to_string()))?;
    mac.update(session_id.as_bytes());
    let signature = mac.finalize().into_bytes();

    Ok(format!("{}.{}", session_id, URL_SAFE_NO_PAD.encode(signature)))
}

/// Verify a signed cookie value and return the session id
///
/// # Errors
/// `Unauthorized` if the value is malformed, `InvalidSignature` if the
/// signature does not match.
pub fn verify_session_cookie(value: &str, secret: &str) -> Result<String, AppError> {
    let (session_id, signature_b64) = value.split_once('.').ok_or(AppError::Unauthorized)?;
    if session_id.is_empty() || signature_b64.contains('.') {
        return Err(AppError::Unauthorized);
    }

    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AppError::Unauthorized)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Session(e.to_string()))?;
    mac.update(session_id.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| AppError::InvalidSignature)?;

    Ok(session_id.to_string())
}

/// The caller's session for the duration of one request
///
/// Extracted from the request; handlers mutate [`Session::data`] and
/// must call [`Session::save`] and return the resulting cookie jar.
#[derive(Debug)]
pub struct Session {
    id: Option<String>,
    /// Issue a new id on save and drop the old record
    rotate: bool,
    pub data: SessionData,
}

impl Session {
    /// A session with no stored record yet
    pub fn new() -> Self {
        Self {
            id: None,
            rotate: false,
            data: SessionData::default(),
        }
    }

    /// Load the session referenced by the request's cookie.
    ///
    /// A missing, forged, unknown or expired cookie yields a fresh session.
    pub async fn load(state: &AppState, jar: &CookieJar) -> Result<Self, AppError> {
        let config = &state.config.session;
        let Some(cookie) = jar.get(&config.cookie_name) else {
            return Ok(Self::new());
        };

        let session_id = match verify_session_cookie(cookie.value(), &config.secret) {
            Ok(id) => id,
            Err(AppError::Session(message)) => return Err(AppError::Session(message)),
            Err(error) => {
                tracing::debug!(%error, "Ignoring invalid session cookie");
                return Ok(Self::new());
            }
        };

        match state.sessions.load(&session_id).await? {
            Some(data) => Ok(Self {
                id: Some(session_id),
                rotate: false,
                data,
            }),
            None => Ok(Self::new()),
        }
    }

    /// Current session id, if the session has been stored before
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Keep the contents but move them to a new session id on save.
    ///
    /// Called on login so an id planted before authentication is useless
    /// afterwards.
    pub fn cycle_id(&mut self) {
        self.rotate = true;
    }

    /// Drop every stored value and start over under a new id.
    pub fn flush(&mut self) {
        self.data = SessionData::default();
        self.rotate = true;
    }

    /// Persist the session and return `jar` with the session cookie set.
    pub async fn save(self, state: &AppState, jar: CookieJar) -> Result<CookieJar, AppError> {
        let config = &state.config.session;

        let session_id = match (self.id, self.rotate) {
            (Some(id), false) => id,
            (previous, _) => {
                if let Some(previous) = previous {
                    state.sessions.delete(&previous).await?;
                }
                generate_session_id()
            }
        };

        let expires_at = Utc::now() + Duration::seconds(config.max_age);
        state
            .sessions
            .save(&session_id, &self.data, expires_at)
            .await?;

        let cookie = Cookie::build((
            config.cookie_name.clone(),
            sign_session_id(&session_id, &config.secret)?,
        ))
        .path("/")
        .http_only(true)
        .secure(state.config.should_use_secure_cookies())
        // Lax so the cookie survives the top-level redirect back from the provider
        .same_site(SameSite::Lax)
        .build();

        Ok(jar.add(cookie))
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Session
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);
        Session::load(&app_state, &jar).await
    }
}
