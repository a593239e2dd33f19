use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_RING_CAPACITY: usize = 200;

#[derive(Debug, Clone)]
pub struct DashConfig {
    pub base_url: Url,
    pub ring_capacity: usize,
    pub reconnect_delay_ms: u64,
    pub watchdog_period_ms: u64,
    pub liveness_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub http_timeout_secs: u64,
    pub stats_reload_ms: u64,
    pub stats_dir: Option<PathBuf>,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl DashConfig {
    pub fn from_env() -> Result<Self> {
        let raw_base =
            std::env::var("DASH_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());
        let base_url = Url::parse(&raw_base).with_context(|| format!("DASH_BASE_URL {}", raw_base))?;
        Ok(Self {
            base_url,
            ring_capacity: env_or("DASH_RING_CAPACITY", DEFAULT_RING_CAPACITY).max(1),
            reconnect_delay_ms: env_or("DASH_RECONNECT_MS", 2_000),
            watchdog_period_ms: env_or("DASH_WATCHDOG_MS", 5_000),
            liveness_timeout_ms: env_or("DASH_LIVENESS_MS", 5_000),
            connect_timeout_ms: env_or("DASH_CONNECT_TIMEOUT_MS", 5_000),
            http_timeout_secs: env_or("DASH_HTTP_TIMEOUT_SECS", 10),
            stats_reload_ms: env_or("DASH_STATS_RELOAD_MS", 2_000),
            stats_dir: std::env::var("DASH_STATS_DIR").ok().map(PathBuf::from),
        })
    }

    pub fn with_base(base_url: Url) -> Self {
        Self {
            base_url,
            ring_capacity: DEFAULT_RING_CAPACITY,
            reconnect_delay_ms: 2_000,
            watchdog_period_ms: 5_000,
            liveness_timeout_ms: 5_000,
            connect_timeout_ms: 5_000,
            http_timeout_secs: 10,
            stats_reload_ms: 2_000,
            stats_dir: None,
        }
    }

    /// `/ws` on the dashboard origin, ws for http and wss for https.
    pub fn stream_url(&self) -> Result<Url> {
        stream_url_for(&self.base_url)
    }

    pub fn stats_reload_delay(&self) -> Duration {
        Duration::from_millis(self.stats_reload_ms)
    }
}

pub fn stream_url_for(base: &Url) -> Result<Url> {
    let scheme = match base.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(anyhow!("unsupported origin scheme: {}", other)),
    };
    let mut url = base.join("/ws").context("join /ws")?;
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("cannot switch {} to {}", base, scheme))?;
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
