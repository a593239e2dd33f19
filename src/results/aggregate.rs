//! Per-group averaging of result files over a shared time index.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use super::rows::{ResultFile, ResultMetric};
use crate::logging::ProfileScope;

/// Sorted time indices with one value column per metric. `None` marks a time
/// index no file reported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedSeries {
    pub time_indices: Vec<i64>,
    columns: Vec<Vec<Option<f64>>>,
}

impl AggregatedSeries {
    pub fn values(&self, metric: ResultMetric) -> &[Option<f64>] {
        self.columns
            .get(metric.slot())
            .map(|c| c.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.time_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time_indices.is_empty()
    }

    pub fn position(&self, time_index: i64) -> Option<usize> {
        self.time_indices.binary_search(&time_index).ok()
    }

    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hash_series(&mut hasher, &self.time_indices, &self.columns);
        hex::encode(hasher.finalize())
    }
}

pub(crate) fn hash_series(hasher: &mut Sha256, indices: &[i64], columns: &[Vec<Option<f64>>]) {
    hasher.update((indices.len() as u64).to_le_bytes());
    for t in indices {
        hasher.update(t.to_le_bytes());
    }
    for column in columns {
        for v in column {
            match v {
                Some(x) => {
                    hasher.update([1u8]);
                    hasher.update(x.to_bits().to_le_bytes());
                }
                None => hasher.update([0u8]),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Accum {
    sum: f64,
    count: u32,
}

impl Accum {
    fn push(&mut self, v: f64) {
        self.sum += v;
        self.count += 1;
    }

    fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

/// Average every metric per time index across `files`. Files are visited in
/// path order so the result does not depend on fetch completion order.
/// Returns `None` when `files` is empty.
pub fn aggregate(files: &[ResultFile]) -> Option<AggregatedSeries> {
    if files.is_empty() {
        return None;
    }
    let rows_total: usize = files.iter().map(|f| f.rows.len()).sum();
    let _scope = ProfileScope::with_context(
        "aggregate",
        &[("files", json!(files.len())), ("rows", json!(rows_total))],
    );

    let mut ordered: Vec<&ResultFile> = files.iter().collect();
    ordered.sort_by(|a, b| a.path.cmp(&b.path));

    let mut by_index: BTreeMap<i64, [Accum; ResultMetric::COUNT]> = BTreeMap::new();
    for file in ordered {
        for row in &file.rows {
            let slots = by_index.entry(row.time_index).or_default();
            for metric in ResultMetric::ALL {
                slots[metric.slot()].push(row.get(metric));
            }
        }
    }

    let mut time_indices = Vec::with_capacity(by_index.len());
    let mut columns: Vec<Vec<Option<f64>>> = (0..ResultMetric::COUNT)
        .map(|_| Vec::with_capacity(by_index.len()))
        .collect();
    for (t, slots) in by_index {
        time_indices.push(t);
        for metric in ResultMetric::ALL {
            columns[metric.slot()].push(slots[metric.slot()].mean());
        }
    }

    Some(AggregatedSeries {
        time_indices,
        columns,
    })
}
