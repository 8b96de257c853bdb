//! Common test utilities for E2E tests

#![allow(dead_code)]

use axum::{
    Form, Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use provider_login::{
    AppState,
    auth::session::verify_session_cookie,
    config,
    data::SessionData,
};
use reqwest::header::{COOKIE, LOCATION, SET_COOKIE};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const GOOD_CODE: &str = "good-code";
pub const ACCESS_TOKEN: &str = "fake-access-token";
pub const CALLBACK_URL: &str = "http://localhost:8080/oauth/callback";
pub const SESSION_SECRET: &str = "test-secret-key-32-bytes-long!!!";

// =============================================================================
// Fake identity provider
// =============================================================================

#[derive(Default)]
pub struct ProviderRecorder {
    /// Profile served by the userinfo endpoint
    pub profile: Mutex<Value>,
    /// Form bodies received by the token endpoint
    pub token_requests: Mutex<Vec<HashMap<String, String>>>,
    /// Authorization headers received by the userinfo endpoint
    pub userinfo_authorizations: Mutex<Vec<String>>,
}

/// Minimal OAuth2 provider: a token endpoint and a userinfo endpoint
pub struct FakeProvider {
    pub addr: String,
    pub recorder: Arc<ProviderRecorder>,
}

impl FakeProvider {
    pub async fn start() -> Self {
        let recorder = Arc::new(ProviderRecorder {
            profile: Mutex::new(json!({
                "username": "alice",
                "email": "a@x.com",
                "name": "Alice"
            })),
            ..Default::default()
        });

        let app = Router::new()
            .route("/token", post(token_endpoint))
            .route("/userinfo", get(userinfo_endpoint))
            .with_state(recorder.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, recorder }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    pub fn set_profile(&self, profile: Value) {
        *self.recorder.profile.lock().unwrap() = profile;
    }

    pub fn token_requests(&self) -> Vec<HashMap<String, String>> {
        self.recorder.token_requests.lock().unwrap().clone()
    }

    pub fn userinfo_authorizations(&self) -> Vec<String> {
        self.recorder.userinfo_authorizations.lock().unwrap().clone()
    }
}

async fn token_endpoint(
    State(recorder): State<Arc<ProviderRecorder>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let code = form.get("code").cloned().unwrap_or_default();
    recorder.token_requests.lock().unwrap().push(form);

    if code != GOOD_CODE {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "bad_verification_code",
                "error_description": "The code passed is incorrect or expired."
            })),
        )
            .into_response();
    }

    Json(json!({
        "access_token": ACCESS_TOKEN,
        "scope": "read:user",
        "token_type": "bearer"
    }))
    .into_response()
}

async fn userinfo_endpoint(
    State(recorder): State<Arc<ProviderRecorder>>,
    headers: HeaderMap,
) -> Response {
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    recorder
        .userinfo_authorizations
        .lock()
        .unwrap()
        .push(authorization.clone());

    if authorization != format!("Bearer {ACCESS_TOKEN}") {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let profile = recorder.profile.lock().unwrap().clone();
    Json(profile).into_response()
}

// =============================================================================
// Application under test
// =============================================================================

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub provider: FakeProvider,
    pub _temp_dir: TempDir,
    /// Never follows redirects so Location headers can be inspected
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance with in-memory sessions
    pub async fn new() -> Self {
        Self::with_session_backend(config::SessionBackend::Memory).await
    }

    pub async fn with_session_backend(backend: config::SessionBackend) -> Self {
        let provider = FakeProvider::start().await;

        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                domain: "localhost".to_string(),
                protocol: "http".to_string(),
            },
            database: config::DatabaseConfig { path: db_path },
            oauth: config::OAuthConfig {
                provider_name: "Fake".to_string(),
                client_id: "test-client-id".to_string(),
                client_secret: "test-client-secret".to_string(),
                authorization_uri: provider.url("/authorize"),
                token_uri: provider.url("/token"),
                userinfo_uri: provider.url("/userinfo"),
                callback_url: CALLBACK_URL.to_string(),
                scopes: vec!["read:user".to_string()],
                request_timeout_seconds: 10,
                username_field: "username".to_string(),
                email_field: "email".to_string(),
            },
            session: config::SessionConfig {
                secret: SESSION_SECRET.to_string(),
                cookie_name: "sessionid".to_string(),
                max_age: 3600,
                backend,
            },
            messages: config::MessagesConfig::default(),
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        // Initialize app state
        let state = AppState::new(config).await.unwrap();

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());

        let app = provider_login::build_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            provider,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// GET with an optional `Cookie` header
    pub async fn get(&self, path: &str, cookie: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(self.url(path));
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }
        request.send().await.expect("request succeeds")
    }

    /// Start a login. Returns the session cookie and the response.
    pub async fn begin_login(&self, cookie: Option<&str>) -> (String, reqwest::Response) {
        let response = self.get("/oauth/login", cookie).await;
        let cookie = session_cookie(&response).expect("login sets a session cookie");
        (cookie, response)
    }

    /// Hit the callback as the provider's redirect would.
    pub async fn callback(&self, cookie: &str, code: &str, state: &str) -> reqwest::Response {
        self.client
            .get(self.url("/oauth/callback"))
            .query(&[("code", code), ("state", state)])
            .header(COOKIE, cookie)
            .send()
            .await
            .expect("request succeeds")
    }

    /// Full happy path: login, then callback with the issued state.
    /// Returns the cookie of the authenticated session.
    pub async fn login(&self) -> String {
        let (cookie, response) = self.begin_login(None).await;
        let state = query_param(&location(&response), "state").expect("state parameter");

        let response = self.callback(&cookie, GOOD_CODE, &state).await;
        assert_eq!(response.status(), reqwest::StatusCode::SEE_OTHER);
        session_cookie(&response).unwrap_or(cookie)
    }

    /// Server-side data behind a `sessionid=...` cookie pair
    pub async fn session_data(&self, cookie: &str) -> Option<SessionData> {
        let value = cookie.split_once('=').map(|(_, v)| v)?;
        let session_id = verify_session_cookie(value, SESSION_SECRET).ok()?;
        self.state.sessions.load(&session_id).await.unwrap()
    }
}

/// `name=value` pair of the session cookie set by a response
pub fn session_cookie(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|raw| raw.split(';').next())
        .find(|pair| pair.starts_with("sessionid="))
        .map(ToString::to_string)
}

pub fn location(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .expect("location header")
        .to_string()
}

pub fn query_param(url: &str, key: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}
