use anyhow::Result;
use rand::Rng;
use serde_json::json;
use std::future::Future;
use tokio::time::{sleep, Duration};

use crate::logging::{log, obj, v_str, Domain, Level};

/// Backoff for dashboard API calls. `max_retries` counts attempts after the
/// first one.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 250,
            max_delay_ms: 5000,
            jitter_factor: 0.3,
        }
    }
}

impl RetryConfig {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let doubled = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(32))
            .min(self.max_delay_ms) as f64;
        let spread = doubled * self.jitter_factor;
        let offset = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        Duration::from_millis((doubled + offset).max(0.0) as u64)
    }
}

/// Run `operation` until it succeeds or the retries are spent, sleeping with
/// jittered exponential backoff in between. Returns the last error.
pub async fn retry_async<F, Fut, T>(config: &RetryConfig, label: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = config.max_retries + 1;
    let mut attempt = 0;
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        attempt += 1;
        if attempt >= attempts {
            return Err(err);
        }
        let delay = config.delay_for_attempt(attempt - 1);
        log(
            Level::Warn,
            Domain::System,
            "retry",
            obj(&[
                ("operation", v_str(label)),
                ("attempt", json!(attempt)),
                ("of", json!(attempts)),
                ("error", v_str(&format!("{:#}", err))),
                ("delay_ms", json!(delay.as_millis() as u64)),
            ]),
        );
        sleep(delay).await;
    }
}
