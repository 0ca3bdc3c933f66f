//! Hub configuration.
//!
//! Env vars win, an optional TOML file provides defaults, hard-coded
//! defaults are the fallback. Loaded once in `main` via [`HubConfig::load`].

use std::time::Duration;

use serde::Deserialize;

use crate::error::{HubError, HubResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Address the HTTP/WebSocket server binds to.
    pub bind_addr: String,

    /// Pub/sub broker WebSocket URL.
    pub pubsub_url: String,

    /// Optional bulk-load seed endpoint, consulted once at startup.
    pub bulk_load_url: Option<String>,

    /// Order service polling endpoint.
    pub order_service_url: Option<String>,
    /// Strategy service polling endpoint.
    pub strategy_service_url: Option<String>,
    /// Account service polling endpoint.
    pub account_service_url: Option<String>,

    /// Interval between backend polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Bounded timeout for a single poll call, in milliseconds.
    pub poll_timeout_ms: u64,

    /// Fast-class broadcast cadence, in milliseconds.
    pub fast_tick_ms: u64,
    /// Slow-class broadcast cadence, in milliseconds.
    pub slow_tick_ms: u64,

    /// Capacity of the Store writer's input delta channel.
    pub delta_channel_capacity: usize,
    /// Capacity of a single client's outbound queue.
    pub client_queue_capacity: usize,

    /// Heartbeat ping interval, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Read deadline for a pong/frame before the client is terminated, in seconds.
    pub read_deadline_secs: u64,
    /// Write deadline for a single outbound frame, in seconds.
    pub write_deadline_secs: u64,

    /// Max control messages per client per window, enforced by a token
    /// bucket that throttles (drops) messages over the cap; this alone never
    /// closes the connection.
    pub control_rate_limit: u32,
    /// Window, in seconds, over which `control_rate_limit` applies.
    pub control_rate_window_secs: u64,
    /// Consecutive rejected or rate-limited control messages before the
    /// connection is closed.
    pub control_violation_threshold: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            pubsub_url: "ws://127.0.0.1:6379".to_string(),
            bulk_load_url: None,
            order_service_url: None,
            strategy_service_url: None,
            account_service_url: None,
            poll_interval_ms: 30_000,
            poll_timeout_ms: 5_000,
            fast_tick_ms: 100,
            slow_tick_ms: 250,
            delta_channel_capacity: 4096,
            client_queue_capacity: 256,
            heartbeat_interval_secs: 30,
            read_deadline_secs: 60,
            write_deadline_secs: 5,
            control_rate_limit: 20,
            control_rate_window_secs: 10,
            control_violation_threshold: 10,
        }
    }
}

impl HubConfig {
    /// Load from an optional TOML file (`HUB_CONFIG_FILE`, default `hub.toml`
    /// if present) overlaid with environment variables.
    pub fn load() -> HubResult<Self> {
        let mut cfg = Self::from_file().unwrap_or_default();
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file() -> Option<Self> {
        let path = std::env::var("HUB_CONFIG_FILE").unwrap_or_else(|_| "hub.toml".to_string());
        let text = std::fs::read_to_string(path).ok()?;
        toml::from_str(&text).ok()
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("HUB_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Ok(v) = std::env::var("HUB_PUBSUB_URL") {
            self.pubsub_url = v;
        }
        if let Ok(v) = std::env::var("HUB_BULK_LOAD_URL") {
            self.bulk_load_url = Some(v);
        }
        if let Ok(v) = std::env::var("HUB_ORDER_SERVICE_URL") {
            self.order_service_url = Some(v);
        }
        if let Ok(v) = std::env::var("HUB_STRATEGY_SERVICE_URL") {
            self.strategy_service_url = Some(v);
        }
        if let Ok(v) = std::env::var("HUB_ACCOUNT_SERVICE_URL") {
            self.account_service_url = Some(v);
        }
        if let Ok(v) = env_u64("HUB_POLL_INTERVAL_MS") {
            self.poll_interval_ms = v;
        }
        if let Ok(v) = env_u64("HUB_POLL_TIMEOUT_MS") {
            self.poll_timeout_ms = v;
        }
        if let Ok(v) = env_u64("HUB_FAST_TICK_MS") {
            self.fast_tick_ms = v;
        }
        if let Ok(v) = env_u64("HUB_SLOW_TICK_MS") {
            self.slow_tick_ms = v;
        }
        if let Ok(v) = std::env::var("HUB_DELTA_CHANNEL_CAPACITY").ok().and_then(|s| s.parse().ok()) {
            self.delta_channel_capacity = v;
        }
        if let Ok(v) = std::env::var("HUB_CLIENT_QUEUE_CAPACITY").ok().and_then(|s| s.parse().ok()) {
            self.client_queue_capacity = v;
        }
        if let Ok(v) = env_u64("HUB_HEARTBEAT_INTERVAL_SECS") {
            self.heartbeat_interval_secs = v;
        }
        if let Ok(v) = env_u64("HUB_READ_DEADLINE_SECS") {
            self.read_deadline_secs = v;
        }
        if let Ok(v) = env_u64("HUB_WRITE_DEADLINE_SECS") {
            self.write_deadline_secs = v;
        }
        if let Some(v) = std::env::var("HUB_CONTROL_RATE_LIMIT").ok().and_then(|s| s.parse().ok()) {
            self.control_rate_limit = v;
        }
        if let Ok(v) = env_u64("HUB_CONTROL_RATE_WINDOW_SECS") {
            self.control_rate_window_secs = v;
        }
        if let Some(v) = std::env::var("HUB_CONTROL_VIOLATION_THRESHOLD").ok().and_then(|s| s.parse().ok()) {
            self.control_violation_threshold = v;
        }
    }

    fn validate(&self) -> HubResult<()> {
        if self.fast_tick_ms == 0 || self.slow_tick_ms == 0 {
            return Err(HubError::Config("tick cadence must be non-zero".into()));
        }
        if self.client_queue_capacity == 0 {
            return Err(HubError::Config("client_queue_capacity must be non-zero".into()));
        }
        if self.control_violation_threshold == 0 {
            return Err(HubError::Config("control_violation_threshold must be non-zero".into()));
        }
        Ok(())
    }

    pub fn fast_tick(&self) -> Duration {
        Duration::from_millis(self.fast_tick_ms)
    }

    pub fn slow_tick(&self) -> Duration {
        Duration::from_millis(self.slow_tick_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

fn env_u64(key: &str) -> Result<u64, ()> {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).ok_or(())
}
