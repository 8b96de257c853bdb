//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::{Deserialize, Deserializer};
use std::{net::IpAddr, path::PathBuf};

use crate::messages::MessageLevel;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub oauth: OAuthConfig,
    pub session: SessionConfig,
    #[serde(default)]
    pub messages: MessagesConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "login.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the service
    ///
    /// # Returns
    /// Full URL like "https://login.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// OAuth2 identity provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// Human readable provider name shown on the sign-in link
    pub provider_name: String,
    pub client_id: String,
    pub client_secret: String,
    /// Provider authorization endpoint (browser redirect target)
    pub authorization_uri: String,
    /// Provider token endpoint (code exchange)
    pub token_uri: String,
    /// Provider userinfo endpoint (profile fetch)
    pub userinfo_uri: String,
    /// Our callback URL, registered with the provider
    pub callback_url: String,
    /// Requested scopes
    #[serde(default, deserialize_with = "deserialize_scopes")]
    pub scopes: Vec<String>,
    /// Timeout applied to every outbound provider request
    pub request_timeout_seconds: u64,
    /// Profile field holding the local username (default: "username")
    #[serde(default = "default_username_field")]
    pub username_field: String,
    /// Profile field holding the email address (default: "email")
    #[serde(default = "default_email_field")]
    pub email_field: String,
}

fn default_username_field() -> String {
    "username".to_string()
}

fn default_email_field() -> String {
    "email".to_string()
}

/// Session cookie and storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Cookie signing key (32+ bytes)
    pub secret: String,
    /// Session cookie name (default: "sessionid")
    pub cookie_name: String,
    /// Session max age in seconds (default: 1209600 = 14 days)
    pub max_age: i64,
    /// Where session records live
    #[serde(default)]
    pub backend: SessionBackend,
}

/// Session storage backend selector
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    #[default]
    Memory,
    Database,
}

/// Flash message configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesConfig {
    /// Messages below this level are discarded (default: info)
    #[serde(default = "default_min_level")]
    pub min_level: MessageLevel,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            min_level: default_min_level(),
        }
    }
}

fn default_min_level() -> MessageLevel {
    MessageLevel::Info
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

/// Accepts either a list or a single space/comma separated string,
/// so scopes can be set from one environment variable.
fn deserialize_scopes<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scopes {
        List(Vec<String>),
        Joined(String),
    }

    let scopes = match Scopes::deserialize(deserializer)? {
        Scopes::List(list) => list,
        Scopes::Joined(joined) => joined
            .split(|c: char| c == ',' || c.is_whitespace())
            .map(ToString::to_string)
            .collect(),
    };

    Ok(scopes
        .into_iter()
        .map(|scope| scope.trim().to_string())
        .filter(|scope| !scope.is_empty())
        .collect())
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (PROVIDER_LOGIN__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.domain", "localhost")?
            .set_default("server.protocol", "http")?
            .set_default("database.path", "data/provider-login.db")?
            .set_default("oauth.provider_name", "Provider")?
            .set_default("oauth.request_timeout_seconds", 30)?
            .set_default("session.cookie_name", "sessionid")?
            .set_default("session.max_age", 1_209_600)?
            .set_default("session.backend", "memory")?
            .set_default("messages.min_level", "info")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (PROVIDER_LOGIN__*)
            .add_source(
                Environment::with_prefix("PROVIDER_LOGIN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn should_use_secure_cookies(&self) -> bool {
        self.server.protocol.eq_ignore_ascii_case("https")
            || !is_local_server_domain(&self.server.domain)
    }

    pub(crate) fn validate(&self) -> Result<(), crate::error::AppError> {
        const MIN_SESSION_SECRET_BYTES: usize = 32;

        if self.session.secret.len() < MIN_SESSION_SECRET_BYTES {
            return Err(crate::error::AppError::Config(format!(
                "session.secret must be at least {} bytes",
                MIN_SESSION_SECRET_BYTES
            )));
        }

        if self.session.max_age <= 0 {
            return Err(crate::error::AppError::Config(
                "session.max_age must be greater than 0".to_string(),
            ));
        }

        if self.session.cookie_name.trim().is_empty() {
            return Err(crate::error::AppError::Config(
                "session.cookie_name must not be empty".to_string(),
            ));
        }

        if self.oauth.client_id.trim().is_empty() || self.oauth.client_secret.trim().is_empty() {
            return Err(crate::error::AppError::Config(
                "oauth.client_id and oauth.client_secret are required".to_string(),
            ));
        }

        for (key, value) in [
            ("oauth.authorization_uri", &self.oauth.authorization_uri),
            ("oauth.token_uri", &self.oauth.token_uri),
            ("oauth.userinfo_uri", &self.oauth.userinfo_uri),
            ("oauth.callback_url", &self.oauth.callback_url),
        ] {
            validate_http_url(key, value)?;
        }

        if !self.should_use_secure_cookies() {
            let host = normalized_server_host(&self.server.domain);
            tracing::warn!(
                host = %host,
                protocol = %self.server.protocol,
                "Using insecure session cookies for local development"
            );
        } else if !self.server.protocol.eq_ignore_ascii_case("https") {
            return Err(crate::error::AppError::Config(
                "server.protocol must be https for non-local server domains".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_http_url(key: &str, value: &str) -> Result<(), crate::error::AppError> {
    let parsed = url::Url::parse(value)
        .map_err(|e| crate::error::AppError::Config(format!("{key} is not a valid URL: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(crate::error::AppError::Config(format!(
            "{key} must use http or https, got {scheme}"
        ))),
    }
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    // Bracketed IPv6 hosts come back from the URL parser with brackets.
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}
