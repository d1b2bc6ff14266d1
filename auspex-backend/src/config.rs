use std::env::var;
use std::time::Duration;

use anyhow::{Context, Result};
use auspex_state::Platform;
use dotenvy::dotenv;

use crate::platform::PipelineSettings;
use crate::stream::StreamSettings;

pub const DEFAULT_STREAM_ENDPOINT: &str = "wss://push.planetside2.com/streaming";

/// Application configuration with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    /// Env: PORT (default: 3000)
    pub port: u16,

    /// Credential for the event stream, e.g. "s:example"
    /// Env: SERVICE_ID (required)
    pub service_id: String,

    /// Env: STREAM_ENDPOINT (default: wss://push.planetside2.com/streaming)
    pub stream_endpoint: String,

    /// Platforms to track
    /// Env: PLATFORMS, comma separated (default: "pc,ps4us,ps4eu")
    pub platforms: Vec<Platform>,

    /// How long a logout is held back waiting for a re-login
    /// Env: RELOGIN_DELAY_SECS (default: 180)
    pub relogin_delay: Duration,

    /// Env: RELOGIN_FLUSH_SECS (default: 60)
    pub relogin_flush_interval: Duration,

    /// Per-subscriber queue size on each platform's bus
    /// Env: BUS_QUEUE_CAPACITY (default: 4096)
    pub bus_queue_capacity: usize,

    /// Env: BACKOFF_BASE_SECS (default: 1)
    pub backoff_base: Duration,

    /// Env: BACKOFF_MAX_SECS (default: 60)
    pub backoff_max: Duration,

    /// Number of recent payload fingerprints kept for duplicate suppression
    /// Env: DEDUP_WINDOW (default: 4096)
    pub dedup_window: usize,

    /// Request body size limit in bytes
    /// Env: REQUEST_BODY_LIMIT (default: 65536 = 64KB)
    pub request_body_limit: usize,

    /// Request timeout in seconds
    /// Env: REQUEST_TIMEOUT_SECS (default: 30)
    pub request_timeout: Duration,

    /// Env: RATE_LIMIT_PER_SEC (default: 20)
    pub rate_limit_per_sec: u64,

    /// Env: RATE_LIMIT_BURST (default: 40)
    pub rate_limit_burst: u32,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Result<Self> {
        let _ = dotenv(); //for debugging mostly
        let defaults = Self::default();
        Ok(Self {
            port: env_or_default("PORT", defaults.port),
            service_id: var("SERVICE_ID").context("SERVICE_ID environment variable is required")?,
            stream_endpoint: env_or_default_string("STREAM_ENDPOINT", DEFAULT_STREAM_ENDPOINT),
            platforms: match var("PLATFORMS") {
                Ok(list) => parse_platforms(&list)?,
                Err(_) => defaults.platforms,
            },
            relogin_delay: Duration::from_secs(env_or_default("RELOGIN_DELAY_SECS", 180)),
            relogin_flush_interval: Duration::from_secs(env_or_default("RELOGIN_FLUSH_SECS", 60)),
            bus_queue_capacity: env_or_default("BUS_QUEUE_CAPACITY", defaults.bus_queue_capacity),
            backoff_base: Duration::from_secs(env_or_default("BACKOFF_BASE_SECS", 1)),
            backoff_max: Duration::from_secs(env_or_default("BACKOFF_MAX_SECS", 60)),
            dedup_window: env_or_default("DEDUP_WINDOW", defaults.dedup_window),
            request_body_limit: env_or_default("REQUEST_BODY_LIMIT", defaults.request_body_limit),
            request_timeout: Duration::from_secs(env_or_default("REQUEST_TIMEOUT_SECS", 30)),
            rate_limit_per_sec: env_or_default("RATE_LIMIT_PER_SEC", defaults.rate_limit_per_sec),
            rate_limit_burst: env_or_default("RATE_LIMIT_BURST", defaults.rate_limit_burst),
        })
    }

    /// Settings shared by every platform subtree
    pub fn pipeline(&self) -> PipelineSettings {
        PipelineSettings {
            stream: StreamSettings {
                endpoint: self.stream_endpoint.clone(),
                service_id: self.service_id.clone(),
                backoff_base: self.backoff_base,
                backoff_max: self.backoff_max,
                dedup_window: self.dedup_window,
            },
            bus_capacity: self.bus_queue_capacity,
            relogin_delay: self.relogin_delay,
            relogin_flush_interval: self.relogin_flush_interval,
        }
    }
}

impl Default for Config {
    /// Create configuration with all default values
    fn default() -> Self {
        Self {
            port: 3000,
            service_id: String::new(),
            stream_endpoint: DEFAULT_STREAM_ENDPOINT.to_string(),
            platforms: Platform::ALL.to_vec(),
            relogin_delay: Duration::from_secs(180),
            relogin_flush_interval: Duration::from_secs(60),
            bus_queue_capacity: 4096,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            dedup_window: 4096,
            request_body_limit: 64 * 1024, // 64 KB
            request_timeout: Duration::from_secs(30),
            rate_limit_per_sec: 20,
            rate_limit_burst: 40,
        }
    }
}

/// Parse a comma separated platform list, ignoring blanks and repeats
pub fn parse_platforms(list: &str) -> Result<Vec<Platform>> {
    let mut platforms = Vec::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let platform: Platform = name.parse().with_context(|| format!("invalid PLATFORMS entry {name:?}"))?;
        if !platforms.contains(&platform) {
            platforms.push(platform);
        }
    }
    anyhow::ensure!(!platforms.is_empty(), "PLATFORMS must name at least one platform");
    Ok(platforms)
}

/// Parse environment variable or return default value
fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

/// Parse environment variable string or return default value
fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}
