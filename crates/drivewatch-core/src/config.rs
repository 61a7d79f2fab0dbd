//! Configuration module for drivewatch.
//!
//! Provides typed configuration structs that map to the YAML configuration
//! file, with loading, validation, and defaults. Credentials never live in
//! the file; they are read from the environment into [`Secrets`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::domain::ScopeId;

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for drivewatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub watch: WatchConfig,
    pub reconcile: ReconcileConfig,
    pub server: ServerConfig,
    pub drive: DriveConfig,
    pub events: EventsConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Which scopes are watched and how their channels are maintained.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Folder ids to watch; `root` is the top of the drive.
    pub scopes: Vec<String>,
    /// Also watch every cached folder beneath the configured scopes.
    pub recursive: bool,
    /// Public URL the remote store delivers notifications to.
    pub callback_url: String,
    /// Requested lifetime of a new channel, in seconds.
    pub channel_ttl_secs: u64,
    /// Channels expiring within this many seconds are renewed.
    pub renewal_window_secs: u64,
    /// Seconds between periodic channel checks.
    pub check_interval_secs: u64,
}

/// Reconciliation worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Maximum scopes reconciled in parallel.
    pub workers: usize,
    /// Seconds between full re-reconciliations of every watched scope.
    /// `0` disables the periodic pass.
    pub full_interval_secs: u64,
}

/// Inbound HTTP endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the notification endpoint binds to.
    pub listen: String,
    /// Loopback socket address for the control routes used by the CLI.
    pub control_listen: String,
}

/// Remote store API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub api_base_url: String,
    pub token_url: String,
    /// Items requested per listing page.
    pub page_size: u32,
    /// Attempts for a throttled or failed request before giving up.
    pub max_retries: u32,
}

/// Where reconciled events are delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// `log` or `http`.
    pub sink: String,
    /// Target URL for the `http` sink.
    pub url: Option<String>,
}

/// Durable state location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database: PathBuf,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `text` or `json`.
    pub format: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/drivewatch/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("drivewatch")
            .join("config.yaml")
    }

    /// Configured watch scopes, parsed
    ///
    /// # Errors
    /// Returns the first entry that is not a valid scope id
    pub fn watch_scopes(&self) -> Result<Vec<ScopeId>, crate::domain::DomainError> {
        self.watch.scopes.iter().map(ScopeId::new).collect()
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            scopes: vec![ScopeId::ROOT.to_string()],
            recursive: false,
            callback_url: "https://localhost:8787/notifications".to_string(),
            channel_ttl_secs: 86_400,
            renewal_window_secs: 300,
            check_interval_secs: 60,
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            full_interval_secs: 0,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8787".to_string(),
            control_listen: "127.0.0.1:8788".to_string(),
        }
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://www.googleapis.com/drive/v3".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            page_size: 1000,
            max_retries: 5,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            sink: "log".to_string(),
            url: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("drivewatch")
                .join("state.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"watch.scopes"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

/// Valid values for `events.sink`.
const VALID_EVENT_SINKS: &[&str] = &["log", "http"];

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: String| {
            errors.push(ValidationError {
                field: field.into(),
                message,
            });
        };

        // --- watch ---
        if self.watch.scopes.is_empty() {
            push("watch.scopes", "at least one scope is required".into());
        }
        for scope in &self.watch.scopes {
            if let Err(e) = ScopeId::new(scope) {
                push("watch.scopes", e.to_string());
            }
        }
        if !is_http_url(&self.watch.callback_url) {
            push(
                "watch.callback_url",
                format!("must be an http(s) URL, got '{}'", self.watch.callback_url),
            );
        }
        if self.watch.channel_ttl_secs == 0 {
            push("watch.channel_ttl_secs", "must be greater than 0".into());
        }
        if self.watch.renewal_window_secs >= self.watch.channel_ttl_secs {
            push(
                "watch.renewal_window_secs",
                "must be smaller than watch.channel_ttl_secs".into(),
            );
        }
        if self.watch.check_interval_secs == 0 {
            push("watch.check_interval_secs", "must be greater than 0".into());
        }

        // --- reconcile ---
        if self.reconcile.workers == 0 {
            push("reconcile.workers", "must be greater than 0".into());
        }

        // --- server ---
        if self.server.listen.parse::<std::net::SocketAddr>().is_err() {
            push(
                "server.listen",
                format!("not a socket address: '{}'", self.server.listen),
            );
        }
        match self.server.control_listen.parse::<std::net::SocketAddr>() {
            Ok(addr) if addr.ip().is_loopback() => {}
            Ok(_) => push(
                "server.control_listen",
                format!(
                    "must be a loopback address, got '{}'",
                    self.server.control_listen
                ),
            ),
            Err(_) => push(
                "server.control_listen",
                format!("not a socket address: '{}'", self.server.control_listen),
            ),
        }

        // --- drive ---
        if !is_http_url(&self.drive.api_base_url) {
            push("drive.api_base_url", "must be an http(s) URL".into());
        }
        if !is_http_url(&self.drive.token_url) {
            push("drive.token_url", "must be an http(s) URL".into());
        }
        if self.drive.page_size == 0 || self.drive.page_size > 1000 {
            push("drive.page_size", "must be between 1 and 1000".into());
        }

        // --- events ---
        if !VALID_EVENT_SINKS.contains(&self.events.sink.as_str()) {
            push(
                "events.sink",
                format!(
                    "invalid sink '{}'; expected one of: {}",
                    self.events.sink,
                    VALID_EVENT_SINKS.join(", ")
                ),
            );
        }
        if self.events.sink == "http" {
            match &self.events.url {
                Some(url) if is_http_url(url) => {}
                _ => push("events.url", "an http(s) URL is required for the http sink".into()),
            }
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            push(
                "logging.level",
                format!(
                    "invalid level '{}'; expected one of: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            );
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            push(
                "logging.format",
                format!(
                    "invalid format '{}'; expected one of: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            );
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

/// Environment variable holding the webhook HMAC key
pub const ENV_WEBHOOK_SECRET: &str = "DRIVEWATCH_WEBHOOK_SECRET";
/// Environment variable holding the OAuth client id
pub const ENV_CLIENT_ID: &str = "DRIVEWATCH_CLIENT_ID";
/// Environment variable holding the OAuth client secret
pub const ENV_CLIENT_SECRET: &str = "DRIVEWATCH_CLIENT_SECRET";
/// Environment variable holding the OAuth refresh token
pub const ENV_REFRESH_TOKEN: &str = "DRIVEWATCH_REFRESH_TOKEN";

/// Credentials read from the environment
///
/// Values are wiped from memory when dropped.
pub struct Secrets {
    pub webhook_secret: Zeroizing<String>,
    pub client_id: String,
    pub client_secret: Zeroizing<String>,
    pub refresh_token: Zeroizing<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl Secrets {
    /// Reads every credential from the process environment
    ///
    /// # Errors
    /// Names the first variable that is missing or empty
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads credentials through an arbitrary lookup function
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &str| -> anyhow::Result<Zeroizing<String>> {
            match lookup(key) {
                Some(value) if !value.is_empty() => Ok(Zeroizing::new(value)),
                _ => anyhow::bail!("environment variable {key} is not set"),
            }
        };

        Ok(Self {
            webhook_secret: require(ENV_WEBHOOK_SECRET)?,
            client_id: require(ENV_CLIENT_ID)?.to_string(),
            client_secret: require(ENV_CLIENT_SECRET)?,
            refresh_token: require(ENV_REFRESH_TOKEN)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
