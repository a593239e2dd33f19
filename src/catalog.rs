use anyhow::Result;
use async_trait::async_trait;

use crate::api::DashboardApi;
use crate::config::DashConfig;
use crate::results::loader::ResultSource;
use crate::results::local::LocalResultSource;
use crate::results::rows::{FileListing, Row};
use crate::retry::{retry_async, RetryConfig};

/// Result files either behind the dashboard API or in a local statistics
/// directory (`DASH_STATS_DIR`).
pub enum Catalog {
    Remote(DashboardApi),
    Local(LocalResultSource),
}

impl Catalog {
    pub fn from_config(cfg: &DashConfig) -> Self {
        match &cfg.stats_dir {
            Some(dir) => Catalog::Local(LocalResultSource::new(dir.clone())),
            None => Catalog::Remote(DashboardApi::from_config(cfg)),
        }
    }

    pub async fn listing(&self, retry: &RetryConfig) -> Result<FileListing> {
        match self {
            Catalog::Remote(api) => retry_async(retry, "list_files", || api.list_files()).await,
            Catalog::Local(local) => local.listing(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Catalog::Remote(_) => "remote".to_string(),
            Catalog::Local(local) => format!("local:{}", local.root().display()),
        }
    }
}

#[async_trait]
impl ResultSource for Catalog {
    async fn fetch_rows(&self, path: &str) -> Result<Vec<Row>> {
        match self {
            Catalog::Remote(api) => api.fetch_rows(path).await,
            Catalog::Local(local) => local.fetch_rows(path).await,
        }
    }
}
