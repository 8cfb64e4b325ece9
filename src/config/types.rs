//! Configuration types

use serde::{Deserialize, Serialize};
use url::Url;

use crate::bot::config::TradeConfig;
use crate::common::errors::{ClientError, Result};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Venue endpoint and credentials
    #[serde(default)]
    pub venue: VenueConfig,
    /// Transport tuning
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Bot loop pacing
    #[serde(default)]
    pub engine: EngineConfig,
    /// Bot run started by the CLI (optional)
    #[serde(default)]
    pub bot: Option<BotSection>,
    /// General application settings
    #[serde(default)]
    pub settings: AppSettings,
}

/// Venue endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    /// Websocket endpoint without query parameters
    #[serde(default = "default_websocket_url")]
    pub websocket_url: String,
    /// Registered application id sent as `app_id`
    #[serde(default = "default_app_id")]
    pub app_id: String,
    /// Response language sent as `l`
    #[serde(default = "default_language")]
    pub language: String,
    /// API token used to authorize the session
    #[serde(default)]
    pub api_token: Option<String>,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            websocket_url: default_websocket_url(),
            app_id: default_app_id(),
            language: default_language(),
            api_token: None,
        }
    }
}

impl VenueConfig {
    /// Full socket URL including `app_id` and language
    pub fn endpoint(&self) -> Result<Url> {
        Url::parse_with_params(
            &self.websocket_url,
            &[("app_id", self.app_id.as_str()), ("l", self.language.as_str())],
        )
        .map_err(|e| ClientError::Configuration(format!("invalid websocket url: {}", e)))
    }
}

fn default_websocket_url() -> String {
    "wss://ws.derivws.com/websockets/v3".to_string()
}

fn default_app_id() -> String {
    "1089".to_string()
}

fn default_language() -> String {
    "EN".to_string()
}

/// Transport tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Seconds before an unanswered request fails
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Reconnect attempt `n` waits `n * reconnect_base_delay_ms`
    #[serde(default = "default_reconnect_base_delay")]
    pub reconnect_base_delay_ms: u64,
    /// Reconnect attempts before giving up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Keep-alive ping interval in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
    /// Re-issue active streams after a reconnect
    #[serde(default = "default_true")]
    pub resubscribe_on_reconnect: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout(),
            reconnect_base_delay_ms: default_reconnect_base_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            heartbeat_interval_seconds: default_heartbeat_interval(),
            resubscribe_on_reconnect: true,
        }
    }
}

fn default_request_timeout() -> u64 {
    30
}

fn default_reconnect_base_delay() -> u64 {
    2000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// Bot loop pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_inter_trade_delay")]
    pub inter_trade_delay_ms: u64,
    /// Sleep after a failed trade attempt
    #[serde(default = "default_error_backoff")]
    pub error_backoff_ms: u64,
    /// Re-check interval while paused
    #[serde(default = "default_pause_poll")]
    pub pause_poll_ms: u64,
    /// Wait when no purchase directive holds
    #[serde(default = "default_tick_poll")]
    pub tick_poll_ms: u64,
    #[serde(default = "default_trade_history_capacity")]
    pub trade_history_capacity: usize,
    #[serde(default = "default_tick_history_capacity")]
    pub tick_history_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            inter_trade_delay_ms: default_inter_trade_delay(),
            error_backoff_ms: default_error_backoff(),
            pause_poll_ms: default_pause_poll(),
            tick_poll_ms: default_tick_poll(),
            trade_history_capacity: default_trade_history_capacity(),
            tick_history_capacity: default_tick_history_capacity(),
        }
    }
}

fn default_inter_trade_delay() -> u64 {
    1000
}

fn default_error_backoff() -> u64 {
    5000
}

fn default_pause_poll() -> u64 {
    1000
}

fn default_tick_poll() -> u64 {
    1000
}

fn default_trade_history_capacity() -> usize {
    50
}

fn default_tick_history_capacity() -> usize {
    200
}

/// Bot run launched from the command line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSection {
    #[serde(flatten)]
    pub trade: TradeConfig,
    /// Path to a JSON trade-intent program
    #[serde(default)]
    pub program: Option<String>,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
