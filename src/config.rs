use anyhow::{Context, Result};
use std::{env, time::Duration};

/// Application configuration loaded and validated at startup.
///
/// Loaded once in `main` and handed to the components that need it; nothing
/// reads the environment after startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// UI server configuration
    pub http: HttpConfig,

    /// Hub device client configuration
    pub hub: HubConfig,
}

#[derive(Clone, Debug)]
pub struct HttpConfig {
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Base URL of the hub's local HTTP API.
    pub base_url: String,
    /// Per-request timeout for control requests.
    pub request_timeout: Duration,
    /// Status poll cadence while the hub is reachable.
    pub poll_fast: Duration,
    /// Status poll cadence while the hub is degraded or unreachable.
    pub poll_slow: Duration,
    /// Number of station slots the hub manages.
    pub station_capacity: usize,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Ok(Self {
            http: HttpConfig::load()?,
            hub: HubConfig::load()?,
        })
    }
}

impl HttpConfig {
    fn load() -> Result<Self> {
        let port = env::var("UI_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .context("failed to parse UI_PORT: invalid format")?;

        Ok(Self { port })
    }
}

impl HubConfig {
    fn load() -> Result<Self> {
        let base_url = env::var("HUB_URL").unwrap_or_else(|_| "http://192.168.4.1".to_string());

        let request_timeout = Self::millis("HUB_TIMEOUT_MS", 15_000)?;
        let poll_fast = Self::millis("POLL_FAST_MS", 3_000)?;
        let poll_slow = Self::millis("POLL_SLOW_MS", 30_000)?;

        let station_capacity = env::var("STATION_CAPACITY")
            .unwrap_or_else(|_| "50".to_string())
            .parse::<usize>()
            .context("failed to parse STATION_CAPACITY: invalid format")?;

        Ok(Self {
            base_url,
            request_timeout,
            poll_fast,
            poll_slow,
            station_capacity,
        })
    }

    fn millis(key: &str, default: u64) -> Result<Duration> {
        let ms = env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<u64>()
            .with_context(|| format!("failed to parse {key}: invalid format"))?;

        Ok(Duration::from_millis(ms))
    }
}
