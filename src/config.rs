//! Configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    // =========================================================================
    // Platform credentials
    // =========================================================================
    /// Bot token presented on Identify and on every REST call
    pub bot_token: String,

    /// Parent channel under which per-user support threads are created
    pub support_channel_id: String,

    /// Gateway endpoint (duplex event stream)
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// REST API base URL
    #[serde(default = "default_api_base")]
    pub api_base: String,

    // =========================================================================
    // Gateway session
    // =========================================================================
    /// Capability bitmask declared on Identify
    #[serde(default = "default_intents")]
    pub intents: u64,

    /// Client metadata declared on Identify
    #[serde(default)]
    pub client_properties: ClientProperties,

    /// Maximum wait for the Hello frame after the transport opens
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Upper bound on remembered message ids per connection
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    /// Secondary automated identity whose messages are tagged as assistant replies
    #[serde(default)]
    pub assistant_bot_id: Option<String>,

    /// Let self-authored messages through (tagged `is_self`) instead of dropping them
    #[serde(default)]
    pub mirror_self_messages: bool,

    // =========================================================================
    // Threads
    // =========================================================================
    /// Namespace prefix for thread names
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,

    /// Minutes of inactivity before the platform auto-archives a thread
    #[serde(default = "default_auto_archive_minutes")]
    pub thread_auto_archive_minutes: u32,

    /// Check that a cached thread still exists before reusing it
    #[serde(default = "default_true")]
    pub verify_cached_threads: bool,

    /// REST request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    // =========================================================================
    // Assistant auto-responder
    // =========================================================================
    /// Token of the assistant identity (enables the auto-responder)
    #[serde(default)]
    pub assistant_bot_token: Option<String>,

    /// Canned reply posted by the auto-responder
    #[serde(default = "default_auto_reply_text")]
    pub auto_reply_text: String,

    /// Delay before the auto-responder replies, in milliseconds
    #[serde(default = "default_auto_reply_delay")]
    pub auto_reply_delay_ms: u64,

    // =========================================================================
    // Reconnect policy (binary only)
    // =========================================================================
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay_secs: u64,
}

/// Identify metadata (`properties` object)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for ClientProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "thread-bridge".to_string(),
            device: "thread-bridge".to_string(),
        }
    }
}

fn default_gateway_url() -> String {
    "wss://gateway.discord.gg/?v=10&encoding=json".to_string()
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_intents() -> u64 {
    32767
}

fn default_handshake_timeout() -> u64 {
    30
}

fn default_dedup_capacity() -> usize {
    10_000
}

fn default_thread_name_prefix() -> String {
    "Support-".to_string()
}

fn default_auto_archive_minutes() -> u32 {
    1440
}

fn default_true() -> bool {
    true
}

fn default_http_timeout() -> u64 {
    10
}

fn default_auto_reply_text() -> String {
    "Thank you for your message. How can I assist you further?".to_string()
}

fn default_auto_reply_delay() -> u64 {
    1000
}

fn default_reconnect_delay() -> u64 {
    1
}

fn default_reconnect_max_delay() -> u64 {
    60
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

impl BridgeConfig {
    /// Minimal configuration with every optional field at its default
    pub fn new(bot_token: impl Into<String>, support_channel_id: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            support_channel_id: support_channel_id.into(),
            gateway_url: default_gateway_url(),
            api_base: default_api_base(),
            intents: default_intents(),
            client_properties: ClientProperties::default(),
            handshake_timeout_secs: default_handshake_timeout(),
            dedup_capacity: default_dedup_capacity(),
            assistant_bot_id: None,
            mirror_self_messages: false,
            thread_name_prefix: default_thread_name_prefix(),
            thread_auto_archive_minutes: default_auto_archive_minutes(),
            verify_cached_threads: true,
            http_timeout_secs: default_http_timeout(),
            assistant_bot_token: None,
            auto_reply_text: default_auto_reply_text(),
            auto_reply_delay_ms: default_auto_reply_delay(),
            reconnect_delay_secs: default_reconnect_delay(),
            reconnect_max_delay_secs: default_reconnect_max_delay(),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let bot_token = std::env::var("BOT_TOKEN").context("BOT_TOKEN is required")?;
        let support_channel_id =
            std::env::var("SUPPORT_CHANNEL_ID").context("SUPPORT_CHANNEL_ID is required")?;

        let mut config = Self::new(bot_token, support_channel_id);

        if let Ok(url) = std::env::var("GATEWAY_URL") {
            config.gateway_url = url;
        }
        if let Ok(base) = std::env::var("API_BASE") {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(intents) = env_parse("GATEWAY_INTENTS") {
            config.intents = intents;
        }
        if let Ok(os) = std::env::var("CLIENT_OS") {
            config.client_properties.os = os;
        }
        if let Ok(browser) = std::env::var("CLIENT_BROWSER") {
            config.client_properties.browser = browser;
        }
        if let Ok(device) = std::env::var("CLIENT_DEVICE") {
            config.client_properties.device = device;
        }
        if let Some(secs) = env_parse("HANDSHAKE_TIMEOUT_SECS") {
            config.handshake_timeout_secs = secs;
        }
        if let Some(capacity) = env_parse("DEDUP_CAPACITY") {
            config.dedup_capacity = capacity;
        }
        config.assistant_bot_id = std::env::var("ASSISTANT_BOT_ID").ok();
        config.mirror_self_messages = env_flag("MIRROR_SELF_MESSAGES", false);

        if let Ok(prefix) = std::env::var("THREAD_NAME_PREFIX") {
            config.thread_name_prefix = prefix;
        }
        if let Some(minutes) = env_parse("THREAD_AUTO_ARCHIVE_MINUTES") {
            config.thread_auto_archive_minutes = minutes;
        }
        config.verify_cached_threads = env_flag("VERIFY_CACHED_THREADS", true);
        if let Some(secs) = env_parse("HTTP_TIMEOUT_SECS") {
            config.http_timeout_secs = secs;
        }

        config.assistant_bot_token = std::env::var("ASSISTANT_BOT_TOKEN").ok();
        if let Ok(text) = std::env::var("AUTO_REPLY_TEXT") {
            config.auto_reply_text = text;
        }
        if let Some(ms) = env_parse("AUTO_REPLY_DELAY_MS") {
            config.auto_reply_delay_ms = ms;
        }

        if let Some(secs) = env_parse("RECONNECT_DELAY_SECS") {
            config.reconnect_delay_secs = secs;
        }
        if let Some(secs) = env_parse("RECONNECT_MAX_DELAY_SECS") {
            config.reconnect_max_delay_secs = secs;
        }

        Ok(config)
    }

    /// Settings consumed by the gateway client
    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            url: self.gateway_url.clone(),
            token: self.bot_token.clone(),
            intents: self.intents,
            properties: self.client_properties.clone(),
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            dedup_capacity: self.dedup_capacity,
            assistant_id: self.assistant_bot_id.clone(),
            mirror_self: self.mirror_self_messages,
        }
    }

    /// Settings consumed by the thread bridge
    pub fn bridge(&self) -> BridgeSettings {
        BridgeSettings {
            channel_id: self.support_channel_id.clone(),
            name_prefix: self.thread_name_prefix.clone(),
            auto_archive_minutes: self.thread_auto_archive_minutes,
            verify_cached: self.verify_cached_threads,
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Gateway client settings
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub url: String,
    pub token: String,
    pub intents: u64,
    pub properties: ClientProperties,
    pub handshake_timeout: Duration,
    pub dedup_capacity: usize,
    pub assistant_id: Option<String>,
    pub mirror_self: bool,
}

/// Thread bridge settings
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub channel_id: String,
    pub name_prefix: String,
    pub auto_archive_minutes: u32,
    pub verify_cached: bool,
}
