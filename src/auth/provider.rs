//! Identity provider client
//!
//! Shapes the three OAuth2 authorization-code grant requests:
//! the browser authorization URL, the code-for-token exchange and the
//! bearer-authenticated userinfo fetch. No retries.

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{Map, Value};
use std::fmt;
use std::time::{Duration, Instant};
use url::Url;

use crate::config::OAuthConfig;
use crate::data::Profile;
use crate::error::AppError;
use crate::metrics::observe_upstream;

/// Successful token endpoint response
#[derive(Clone, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub scope: Option<String>,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[redacted]")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// OAuth2 client for one configured provider
pub struct ProviderClient {
    http: reqwest::Client,
    config: OAuthConfig,
}

impl ProviderClient {
    pub fn new(config: &OAuthConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("provider-login/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            http,
            config: config.clone(),
        })
    }

    pub fn provider_name(&self) -> &str {
        &self.config.provider_name
    }

    /// Build the provider authorization URL for a login attempt.
    ///
    /// Query parameters already present on the configured endpoint are kept.
    pub fn authorization_url(&self, state: &str) -> Result<Url, AppError> {
        let mut url = Url::parse(&self.config.authorization_uri).map_err(|e| {
            AppError::Config(format!("oauth.authorization_uri is not a valid URL: {e}"))
        })?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.callback_url);
            if !self.config.scopes.is_empty() {
                query.append_pair("scope", &self.config.scopes.join(" "));
            }
            query.append_pair("state", state);
        }

        Ok(url)
    }

    /// Exchange an authorization code for an access token.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, AppError> {
        let started = Instant::now();
        let result = self
            .http
            .post(&self.config.token_uri)
            .header(ACCEPT, "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.callback_url.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(error) => {
                observe_upstream("token", "transport_error", started.elapsed());
                return Err(error.into());
            }
        };

        let status = response.status();
        observe_upstream("token", status.as_str(), started.elapsed());

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(ToOwned::to_owned);
        let body = response.text().await?;

        let parsed = parse_token_response(content_type.as_deref(), &body);
        if !status.is_success() {
            // Prefer the provider's own error description when it sent one.
            return Err(match parsed {
                Err(AppError::Upstream(message)) if message.contains("returned error") => {
                    AppError::Upstream(message)
                }
                _ => AppError::Upstream(format!("token endpoint responded with {status}")),
            });
        }

        let token = parsed?;
        tracing::debug!(
            token_type = %token.token_type,
            scope = ?token.scope,
            "Exchanged authorization code for access token"
        );
        Ok(token)
    }

    /// Fetch the user's profile with the access token.
    pub async fn fetch_profile(&self, token: &TokenResponse) -> Result<Profile, AppError> {
        let started = Instant::now();
        let result = self
            .http
            .get(&self.config.userinfo_uri)
            .header(ACCEPT, "application/json")
            .bearer_auth(&token.access_token)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(error) => {
                observe_upstream("userinfo", "transport_error", started.elapsed());
                return Err(error.into());
            }
        };

        let status = response.status();
        observe_upstream("userinfo", status.as_str(), started.elapsed());

        if !status.is_success() {
            return Err(AppError::Upstream(format!(
                "userinfo endpoint responded with {status}"
            )));
        }

        let value: Value = response.json().await?;
        match value {
            Value::Object(profile) => {
                tracing::debug!(fields = profile.len(), "Fetched provider profile");
                Ok(profile)
            }
            other => Err(AppError::Upstream(format!(
                "userinfo endpoint returned a non-object JSON value: {}",
                json_kind(&other)
            ))),
        }
    }
}

/// Parse a token endpoint body.
///
/// JSON is the norm; some providers (GitHub without an `Accept` header)
/// answer with a form-encoded body instead.
pub fn parse_token_response(content_type: Option<&str>, body: &str) -> Result<TokenResponse, AppError> {
    let is_form = match content_type {
        Some(content_type) => content_type
            .to_ascii_lowercase()
            .starts_with("application/x-www-form-urlencoded"),
        None => !body.trim_start().starts_with('{'),
    };

    let fields: Map<String, Value> = if is_form {
        url::form_urlencoded::parse(body.as_bytes())
            .map(|(key, value)| (key.into_owned(), Value::String(value.into_owned())))
            .collect()
    } else {
        serde_json::from_str(body)
            .map_err(|e| AppError::Upstream(format!("token response is not valid JSON: {e}")))?
    };

    if let Some(error) = fields.get("error").and_then(Value::as_str) {
        let description = fields
            .get("error_description")
            .and_then(Value::as_str)
            .unwrap_or("no description");
        return Err(AppError::Upstream(format!(
            "token endpoint returned error {error}: {description}"
        )));
    }

    let access_token = string_field(&fields, "access_token")
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Upstream("token response has no access_token".to_string()))?;

    let token_type = string_field(&fields, "token_type").unwrap_or_else(|| "Bearer".to_string());
    if !token_type.eq_ignore_ascii_case("bearer") {
        return Err(AppError::Upstream(format!(
            "unsupported token type {token_type}"
        )));
    }

    let scope = match fields.get("scope") {
        Some(Value::String(scope)) => Some(scope.clone()),
        Some(Value::Array(scopes)) => Some(
            scopes
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" "),
        ),
        _ => None,
    };

    let expires_in = match fields.get("expires_in") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    };

    Ok(TokenResponse {
        access_token,
        token_type,
        scope,
        expires_in,
        refresh_token: string_field(&fields, "refresh_token"),
    })
}

fn string_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields.get(key).and_then(Value::as_str).map(ToOwned::to_owned)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
