use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::json;

use super::rows::{AlgorithmGroup, FileSets, ResultFile, Row};
use crate::logging::{log, log_file_failure, obj, Domain, Level};

/// Where result rows come from: the dashboard HTTP API or a local directory.
#[async_trait]
pub trait ResultSource: Send + Sync {
    async fn fetch_rows(&self, path: &str) -> Result<Vec<Row>>;
}

/// Successful loads of one batch, split by group. Order within a group
/// follows the input lists.
#[derive(Debug, Clone, Default)]
pub struct LoadedResults {
    pub baseline: Vec<ResultFile>,
    pub custom: Vec<ResultFile>,
    pub failed: usize,
}

impl LoadedResults {
    pub fn group(&self, group: AlgorithmGroup) -> &[ResultFile] {
        match group {
            AlgorithmGroup::Baseline => &self.baseline,
            AlgorithmGroup::Custom => &self.custom,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.baseline.is_empty() && self.custom.is_empty()
    }
}

pub struct MultiFileLoader<S> {
    source: S,
}

impl<S: ResultSource> MultiFileLoader<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    async fn load_one(&self, path: &str, group: AlgorithmGroup) -> Option<ResultFile> {
        match self.source.fetch_rows(path).await {
            Ok(rows) => {
                log(
                    Level::Debug,
                    Domain::Results,
                    "file_loaded",
                    obj(&[("path", json!(path)), ("rows", json!(rows.len()))]),
                );
                Some(ResultFile {
                    path: path.to_string(),
                    group,
                    rows,
                })
            }
            Err(err) => {
                log_file_failure(path, &format!("{:#}", err));
                None
            }
        }
    }

    /// Fetch every file of both groups concurrently and wait for all of them.
    /// Failed fetches are logged and left out. Returns `None` without fetching
    /// anything when both lists are empty.
    pub async fn load(&self, sets: &FileSets) -> Option<LoadedResults> {
        if sets.is_empty() {
            return None;
        }
        let tasks = sets
            .baseline
            .iter()
            .map(|p| (p, AlgorithmGroup::Baseline))
            .chain(sets.custom.iter().map(|p| (p, AlgorithmGroup::Custom)))
            .map(|(path, group)| self.load_one(path, group));
        // join_all keeps input order, so each group's list stays in listing order.

        let mut loaded = LoadedResults::default();
        for file in join_all(tasks).await {
            match file {
                Some(f) if f.group == AlgorithmGroup::Baseline => loaded.baseline.push(f),
                Some(f) => loaded.custom.push(f),
                None => loaded.failed += 1,
            }
        }
        log(
            Level::Info,
            Domain::Results,
            "batch_loaded",
            obj(&[
                ("requested", json!(sets.total())),
                ("baseline", json!(loaded.baseline.len())),
                ("custom", json!(loaded.custom.len())),
                ("failed", json!(loaded.failed)),
            ]),
        );
        Some(loaded)
    }

    /// Load the batch and hand the complete result to `on_complete`, which
    /// runs at most once.
    pub async fn load_with<T, F>(&self, sets: &FileSets, on_complete: F) -> Option<T>
    where
        F: FnOnce(LoadedResults) -> T,
    {
        self.load(sets).await.map(on_complete)
    }
}
