use serde::{Deserialize, Serialize};

/// Top-level client configuration.
///
/// `api_url` and `anon_key` are the two opaque connection identifiers handed
/// out by the hosted backend; everything else has a usable default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub api_url: String,
    pub anon_key: String,
    pub table: String,
    pub oauth_provider: String,
    pub redirect_url: String,
    /// Overrides the platform data directory (session cache location).
    pub data_dir: Option<String>,
    pub http_timeout_secs: u64,
    pub realtime: RealtimeSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            anon_key: String::new(),
            table: "bookmarks".to_string(),
            oauth_provider: "google".to_string(),
            redirect_url: "http://localhost:3000/auth/callback".to_string(),
            data_dir: None,
            http_timeout_secs: 15,
            realtime: RealtimeSettings::default(),
        }
    }
}

/// Policy points for the change channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RealtimeSettings {
    pub reauth: ReauthPolicy,
    pub reconnect: ReconnectSettings,
}

/// What happens to an open channel when the bearer token is refreshed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReauthPolicy {
    /// Re-arm the authorizer, then close the channel and open a fresh one.
    #[default]
    Resubscribe,
    /// Re-arm the authorizer and keep the existing channel.
    InPlace,
}

/// Automatic reconnection of a dropped change channel. Off by default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectSettings {
    pub enabled: bool,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 300_000,
        }
    }
}
