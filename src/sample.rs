//! Decoded stream messages.
//!
//! The server pushes one JSON object per simulation tick. Numeric fields the
//! server leaves out read as 0; anything with the wrong shape is a decode
//! failure and the message is dropped by the caller.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::results::rows::AlgorithmGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveMetric {
    VehicleCount,
    AverageSpeed,
    TotalThroughput,
    AverageWaitTime,
    PlatoonCount,
    IntersectionCount,
    IntersectionQueueSize,
    TrafficDensity,
}

impl LiveMetric {
    pub const COUNT: usize = 8;

    pub const ALL: [LiveMetric; Self::COUNT] = [
        LiveMetric::VehicleCount,
        LiveMetric::AverageSpeed,
        LiveMetric::TotalThroughput,
        LiveMetric::AverageWaitTime,
        LiveMetric::PlatoonCount,
        LiveMetric::IntersectionCount,
        LiveMetric::IntersectionQueueSize,
        LiveMetric::TrafficDensity,
    ];

    pub fn slot(self) -> usize {
        self as usize
    }

    /// Wire field name.
    pub fn field(self) -> &'static str {
        match self {
            LiveMetric::VehicleCount => "vehicle_count",
            LiveMetric::AverageSpeed => "average_speed",
            LiveMetric::TotalThroughput => "total_throughput",
            LiveMetric::AverageWaitTime => "average_wait_time",
            LiveMetric::PlatoonCount => "platoon_count",
            LiveMetric::IntersectionCount => "intersection_count",
            LiveMetric::IntersectionQueueSize => "intersection_queue_size",
            LiveMetric::TrafficDensity => "traffic_density",
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireSample {
    time_step: Option<serde_json::Number>,
    vehicle_count: Option<f64>,
    average_speed: Option<f64>,
    total_throughput: Option<f64>,
    average_wait_time: Option<f64>,
    platoon_count: Option<f64>,
    intersection_count: Option<f64>,
    intersection_queue_size: Option<f64>,
    traffic_density: Option<f64>,
    using_custom_algo: Option<bool>,
    #[serde(default)]
    benchmark_mode: bool,
    benchmark_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub time_index: u64,
    pub values: [f64; LiveMetric::COUNT],
    pub using_custom_algo: Option<bool>,
    pub benchmark: Option<String>,
}

impl Sample {
    pub fn new(time_index: u64) -> Self {
        Self {
            time_index,
            values: [0.0; LiveMetric::COUNT],
            using_custom_algo: None,
            benchmark: None,
        }
    }

    pub fn with(mut self, metric: LiveMetric, value: f64) -> Self {
        self.values[metric.slot()] = value;
        self
    }

    pub fn get(&self, metric: LiveMetric) -> f64 {
        self.values[metric.slot()]
    }

    pub fn decode(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text).context("stream payload is not JSON")?;
        if !value.is_object() {
            return Err(anyhow!("stream payload is not an object"));
        }
        let wire: WireSample = serde_json::from_value(value).context("stream payload shape")?;

        let time_index = match wire.time_step {
            None => 0,
            Some(n) => n
                .as_u64()
                .ok_or_else(|| anyhow!("time_step must be a non-negative integer, got {}", n))?,
        };

        let mut values = [0.0; LiveMetric::COUNT];
        let fields = [
            (LiveMetric::VehicleCount, wire.vehicle_count),
            (LiveMetric::AverageSpeed, wire.average_speed),
            (LiveMetric::TotalThroughput, wire.total_throughput),
            (LiveMetric::AverageWaitTime, wire.average_wait_time),
            (LiveMetric::PlatoonCount, wire.platoon_count),
            (LiveMetric::IntersectionCount, wire.intersection_count),
            (LiveMetric::IntersectionQueueSize, wire.intersection_queue_size),
            (LiveMetric::TrafficDensity, wire.traffic_density),
        ];
        for (metric, raw) in fields {
            values[metric.slot()] = raw.unwrap_or(0.0);
        }

        let benchmark = if wire.benchmark_mode {
            Some(wire.benchmark_name.unwrap_or_default())
        } else {
            None
        };

        Ok(Self {
            time_index,
            values,
            using_custom_algo: wire.using_custom_algo,
            benchmark,
        })
    }

    pub fn algorithm(&self) -> AlgorithmGroup {
        AlgorithmGroup::from_custom_flag(self.using_custom_algo.unwrap_or(false))
    }
}

/// The metric cards: last accepted sample, formatted for display.
#[derive(Debug, Clone, PartialEq)]
pub struct Readout {
    pub time_index: u64,
    pub algorithm: AlgorithmGroup,
    pub values: [f64; LiveMetric::COUNT],
    pub benchmark: Option<String>,
}

impl From<&Sample> for Readout {
    fn from(sample: &Sample) -> Self {
        Self {
            time_index: sample.time_index,
            algorithm: sample.algorithm(),
            values: sample.values,
            benchmark: sample.benchmark.clone(),
        }
    }
}

impl Readout {
    pub fn get(&self, metric: LiveMetric) -> f64 {
        self.values[metric.slot()]
    }

    pub fn render(&self) -> String {
        let mut line = format!(
            "step={} algo={} vehicles={} platoons={} speed={:.1} m/s throughput={} intersections={} wait={:.1} s queue={} density={:.1}%",
            self.time_index,
            self.algorithm.display_name(),
            self.get(LiveMetric::VehicleCount),
            self.get(LiveMetric::PlatoonCount),
            self.get(LiveMetric::AverageSpeed),
            self.get(LiveMetric::TotalThroughput),
            self.get(LiveMetric::IntersectionCount),
            self.get(LiveMetric::AverageWaitTime),
            self.get(LiveMetric::IntersectionQueueSize),
            self.get(LiveMetric::TrafficDensity),
        );
        if let Some(name) = &self.benchmark {
            line.push_str(&format!(" benchmark={}", name));
        }
        line
    }
}
