//! Bounded history of accepted live samples, the source of the live chart.

use std::collections::VecDeque;

use serde::Serialize;

use crate::sample::{LiveMetric, Sample};

/// Admits a time index only if it is strictly after the last admitted one.
#[derive(Debug, Clone, Default)]
pub struct TimeStepGuard {
    last: Option<u64>,
}

impl TimeStepGuard {
    pub fn admit(&mut self, time_index: u64) -> bool {
        match self.last {
            Some(last) if time_index <= last => false,
            _ => {
                self.last = Some(time_index);
                true
            }
        }
    }

    pub fn last(&self) -> Option<u64> {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Parallel per-metric columns under one shared index column, capped at
/// `capacity` entries. All columns always have the same length.
#[derive(Debug, Clone)]
pub struct RingBufferStore {
    capacity: usize,
    guard: TimeStepGuard,
    indices: VecDeque<u64>,
    columns: Vec<VecDeque<f64>>,
}

impl RingBufferStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            guard: TimeStepGuard::default(),
            indices: VecDeque::with_capacity(capacity + 1),
            columns: (0..LiveMetric::COUNT)
                .map(|_| VecDeque::with_capacity(capacity + 1))
                .collect(),
        }
    }

    /// Returns false (and stores nothing) for a duplicate or regressed index.
    pub fn accept(&mut self, sample: &Sample) -> bool {
        if !self.guard.admit(sample.time_index) {
            return false;
        }
        self.indices.push_back(sample.time_index);
        for metric in LiveMetric::ALL {
            self.columns[metric.slot()].push_back(sample.get(metric));
        }
        while self.indices.len() > self.capacity {
            self.indices.pop_front();
            for column in self.columns.iter_mut() {
                column.pop_front();
            }
        }
        true
    }

    pub fn last_index(&self) -> Option<u64> {
        self.guard.last()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.guard.reset();
        self.indices.clear();
        for column in self.columns.iter_mut() {
            column.clear();
        }
    }

    /// Owned copy for the chart; never aliases the live columns.
    pub fn snapshot(&self) -> LiveSnapshot {
        LiveSnapshot {
            time_indices: self.indices.iter().copied().collect(),
            columns: self
                .columns
                .iter()
                .map(|c| c.iter().copied().collect())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LiveSnapshot {
    pub time_indices: Vec<u64>,
    columns: Vec<Vec<f64>>,
}

impl LiveSnapshot {
    pub fn series(&self, metric: LiveMetric) -> &[f64] {
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
}
