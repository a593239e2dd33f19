use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use super::aggregate::{hash_series, AggregatedSeries};
use super::rows::{AlgorithmGroup, ResultMetric};
use crate::logging::ProfileScope;

/// One group's values projected onto the shared index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectedSeries {
    columns: Vec<Vec<Option<f64>>>,
}

impl ProjectedSeries {
    pub fn values(&self, metric: ResultMetric) -> &[Option<f64>] {
        self.columns
            .get(metric.slot())
            .map(|c| c.as_slice())
            .unwrap_or(&[])
    }

    pub fn summary(&self, metric: ResultMetric) -> SeriesSummary {
        let present: Vec<f64> = self.values(metric).iter().flatten().copied().collect();
        SeriesSummary {
            points: present.len(),
            mean: if present.is_empty() {
                None
            } else {
                Some(present.iter().sum::<f64>() / present.len() as f64)
            },
            last: present.last().copied(),
        }
    }
}

/// Reported points of one projected column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesSummary {
    pub points: usize,
    pub mean: Option<f64>,
    pub last: Option<f64>,
}

impl SeriesSummary {
    pub fn render(&self) -> String {
        match (self.mean, self.last) {
            (Some(mean), Some(last)) => format!("mean={:.2} last={:.2} n={}", mean, last, self.points),
            _ => "no data".to_string(),
        }
    }
}

/// Baseline and custom series over one sorted union of time indices. Every
/// column has exactly `time_indices.len()` entries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonDataset {
    pub time_indices: Vec<i64>,
    pub baseline: ProjectedSeries,
    pub custom: ProjectedSeries,
}

impl ComparisonDataset {
    pub fn series(&self, group: AlgorithmGroup) -> &ProjectedSeries {
        match group {
            AlgorithmGroup::Baseline => &self.baseline,
            AlgorithmGroup::Custom => &self.custom,
        }
    }

    pub fn len(&self) -> usize {
        self.time_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time_indices.is_empty()
    }

    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hash_series(&mut hasher, &self.time_indices, &self.baseline.columns);
        hash_series(&mut hasher, &[], &self.custom.columns);
        hex::encode(hasher.finalize())
    }
}

/// Sorted, deduplicated union of both index sets.
fn union_indices(a: Option<&AggregatedSeries>, b: Option<&AggregatedSeries>) -> Vec<i64> {
    let left = a.map(|s| s.time_indices.as_slice()).unwrap_or(&[]);
    let right = b.map(|s| s.time_indices.as_slice()).unwrap_or(&[]);
    let mut out = Vec::with_capacity(left.len().max(right.len()));
    let (mut i, mut j) = (0, 0);
    while i < left.len() || j < right.len() {
        let next = match (left.get(i), right.get(j)) {
            (Some(&l), Some(&r)) if l == r => {
                i += 1;
                j += 1;
                l
            }
            (Some(&l), Some(&r)) if l < r => {
                i += 1;
                l
            }
            (Some(_), Some(&r)) => {
                j += 1;
                r
            }
            (Some(&l), None) => {
                i += 1;
                l
            }
            (None, Some(&r)) => {
                j += 1;
                r
            }
            (None, None) => break,
        };
        out.push(next);
    }
    out
}

/// Copy each target index's value from `source`, `None` where the source has
/// no such index. An absent source projects to all `None`.
fn project(source: Option<&AggregatedSeries>, target: &[i64]) -> ProjectedSeries {
    let columns = ResultMetric::ALL
        .iter()
        .map(|&metric| match source {
            None => vec![None; target.len()],
            Some(series) => {
                let values = series.values(metric);
                target
                    .iter()
                    .map(|&t| series.position(t).and_then(|i| values.get(i).copied().flatten()))
                    .collect()
            }
        })
        .collect();
    ProjectedSeries { columns }
}

pub fn merge(baseline: Option<&AggregatedSeries>, custom: Option<&AggregatedSeries>) -> ComparisonDataset {
    let time_indices = union_indices(baseline, custom);
    let _scope = ProfileScope::with_context("merge", &[("points", json!(time_indices.len()))]);
    ComparisonDataset {
        baseline: project(baseline, &time_indices),
        custom: project(custom, &time_indices),
        time_indices,
    }
}
