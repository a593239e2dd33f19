use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::config::DashConfig;
use crate::control::ControlApi;
use crate::results::loader::ResultSource;
use crate::results::rows::{decode_rows_payload, FileListing, Row};

/// Reply body of `POST /api/control`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ControlReply {
    #[serde(default)]
    pub success: bool,
    pub message: Option<String>,
}

/// Client for the dashboard's JSON endpoints.
#[derive(Clone)]
pub struct DashboardApi {
    client: Client,
    base: Url,
}

impl DashboardApi {
    pub fn new(base: Url, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base,
        }
    }

    pub fn from_config(cfg: &DashConfig) -> Self {
        Self::new(cfg.base_url.clone(), Duration::from_secs(cfg.http_timeout_secs))
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("join {} onto {}", path, self.base))
    }

    async fn expect_success(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(anyhow!("{} HTTP error {}: {}", what, status.as_u16(), body.trim()))
    }

    /// `GET /api/stats`
    pub async fn list_files(&self) -> Result<FileListing> {
        let resp = self
            .client
            .get(self.url("/api/stats")?)
            .send()
            .await
            .context("list files")?;
        let resp = Self::expect_success(resp, "list files").await?;
        let listing: FileListing = resp.json().await.context("decode file listing")?;
        Ok(listing)
    }

    /// `GET /api/csv-data?file=<path>`, raw body.
    pub async fn fetch_result_payload(&self, path: &str) -> Result<String> {
        let resp = self
            .client
            .get(self.url("/api/csv-data")?)
            .query(&[("file", path)])
            .send()
            .await
            .with_context(|| format!("fetch {}", path))?;
        let resp = Self::expect_success(resp, path).await?;
        resp.text().await.with_context(|| format!("read {}", path))
    }
}

#[async_trait]
impl ResultSource for DashboardApi {
    async fn fetch_rows(&self, path: &str) -> Result<Vec<Row>> {
        let body = self.fetch_result_payload(path).await?;
        decode_rows_payload(path, &body)
    }
}

#[async_trait]
impl ControlApi for DashboardApi {
    /// `POST /api/control?action=..&k=v..` with an empty form body.
    async fn post_control(&self, action: &str, params: &[(&str, &str)]) -> Result<ControlReply> {
        let mut url = self.url("/api/control")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("action", action);
            for (k, v) in params {
                query.append_pair(k, v);
            }
        }
        let resp = self
            .client
            .post(url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body("")
            .send()
            .await
            .with_context(|| format!("send {}", action))?;
        let resp = Self::expect_success(resp, action).await?;
        let reply: ControlReply = resp
            .json()
            .await
            .with_context(|| format!("decode {} reply", action))?;
        Ok(reply)
    }
}
