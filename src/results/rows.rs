use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::logging::{log, obj, v_str, Domain, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmGroup {
    Baseline,
    Custom,
}

impl AlgorithmGroup {
    pub fn from_custom_flag(is_custom: bool) -> Self {
        if is_custom {
            AlgorithmGroup::Custom
        } else {
            AlgorithmGroup::Baseline
        }
    }

    /// Value of the `algorithm` control parameter.
    pub fn wire_name(self) -> &'static str {
        match self {
            AlgorithmGroup::Baseline => "sumo",
            AlgorithmGroup::Custom => "custom",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            AlgorithmGroup::Baseline => "SUMO",
            AlgorithmGroup::Custom => "Custom",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sumo" | "baseline" => Some(AlgorithmGroup::Baseline),
            "custom" => Some(AlgorithmGroup::Custom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultMetric {
    Throughput,
    WaitTime,
    Speed,
    PlatoonSize,
}

impl ResultMetric {
    pub const COUNT: usize = 4;

    pub const ALL: [ResultMetric; Self::COUNT] = [
        ResultMetric::Throughput,
        ResultMetric::WaitTime,
        ResultMetric::Speed,
        ResultMetric::PlatoonSize,
    ];

    pub fn slot(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            ResultMetric::Throughput => "Total Throughput",
            ResultMetric::WaitTime => "Average Wait Time (s)",
            ResultMetric::Speed => "Average Speed (m/s)",
            ResultMetric::PlatoonSize => "Average Platoon Size",
        }
    }
}

/// One CSV row of a result file after typed decode.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub time_index: i64,
    pub values: [f64; ResultMetric::COUNT],
}

fn cell_text(cell: &Value) -> Option<String> {
    match cell {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Leading-integer parse: "12", "12.9" and "12abc" all read as 12.
fn parse_int_prefix(text: &str) -> Option<i64> {
    let bytes = text.as_bytes();
    let mut end = 0;
    if end < bytes.len() && (bytes[end] == b'-' || bytes[end] == b'+') {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == digits_start {
        return None;
    }
    text[..end].parse().ok()
}

fn int_cell(fields: &Map<String, Value>, key: &str) -> Option<i64> {
    fields.get(key).and_then(cell_text).and_then(|t| parse_int_prefix(&t))
}

fn float_cell(fields: &Map<String, Value>, key: &str) -> f64 {
    fields
        .get(key)
        .and_then(cell_text)
        .and_then(|t| t.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

impl Row {
    pub fn new(time_index: i64) -> Self {
        Self {
            time_index,
            values: [0.0; ResultMetric::COUNT],
        }
    }

    pub fn with(mut self, metric: ResultMetric, value: f64) -> Self {
        self.values[metric.slot()] = value;
        self
    }

    pub fn get(&self, metric: ResultMetric) -> f64 {
        self.values[metric.slot()]
    }

    /// Missing or unparsable cells read as 0. Throughput prefers
    /// `TotalThroughput` and falls back to `ThroughputCount`.
    pub fn decode(fields: &Map<String, Value>) -> Self {
        let throughput = if fields.get("TotalThroughput").and_then(cell_text).is_some() {
            int_cell(fields, "TotalThroughput")
        } else {
            int_cell(fields, "ThroughputCount")
        };
        Row::new(int_cell(fields, "TimeStep").unwrap_or(0))
            .with(ResultMetric::Throughput, throughput.unwrap_or(0) as f64)
            .with(ResultMetric::WaitTime, float_cell(fields, "AverageWaitTime"))
            .with(ResultMetric::Speed, float_cell(fields, "AverageSpeed"))
            .with(ResultMetric::PlatoonSize, float_cell(fields, "AveragePlatoonSize"))
    }
}

/// A loaded result file. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultFile {
    pub path: String,
    pub group: AlgorithmGroup,
    pub rows: Vec<Row>,
}

/// Decode a `{ rows: [...] }` payload into rows.
pub fn decode_rows_payload(path: &str, body: &str) -> Result<Vec<Row>> {
    let value: Value =
        serde_json::from_str(body).with_context(|| format!("{} payload is not JSON", path))?;
    let Value::Object(top) = value else {
        return Err(anyhow!("{} payload is not an object", path));
    };
    let raw_rows = match top.get("rows") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(rows)) => rows,
        Some(_) => return Err(anyhow!("{} rows is not an array", path)),
    };

    let mut rows = Vec::with_capacity(raw_rows.len());
    let mut skipped = 0usize;
    for raw in raw_rows {
        match raw {
            Value::Object(fields) => rows.push(Row::decode(fields)),
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        log(
            Level::Warn,
            Domain::Results,
            "rows_skipped",
            obj(&[("path", v_str(path)), ("skipped", serde_json::json!(skipped))]),
        );
    }
    Ok(rows)
}

// =============================================================================
// File listing
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub algo: Option<String>,
}

impl FileEntry {
    /// An explicit `algo` wins (`sumo` is baseline, anything else custom);
    /// without one the name decides.
    pub fn group(&self) -> AlgorithmGroup {
        match self.algo.as_deref().map(str::trim) {
            Some(algo) if !algo.is_empty() => {
                AlgorithmGroup::from_custom_flag(!algo.eq_ignore_ascii_case("sumo"))
            }
            _ => AlgorithmGroup::from_custom_flag(!self.name.to_lowercase().contains("sumo")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileListing {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub files: Vec<FileEntry>,
}

fn null_as_empty<'de, D>(de: D) -> std::result::Result<Vec<FileEntry>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<FileEntry>>::deserialize(de)?.unwrap_or_default())
}

/// File paths split by algorithm group, in listing order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileSets {
    pub baseline: Vec<String>,
    pub custom: Vec<String>,
}

impl FileSets {
    pub fn from_listing(listing: &FileListing) -> Self {
        let mut sets = FileSets::default();
        for entry in &listing.files {
            match entry.group() {
                AlgorithmGroup::Baseline => sets.baseline.push(entry.path.clone()),
                AlgorithmGroup::Custom => sets.custom.push(entry.path.clone()),
            }
        }
        sets
    }

    pub fn total(&self) -> usize {
        self.baseline.len() + self.custom.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn contains(&self, path: &str) -> bool {
        self.baseline.iter().chain(self.custom.iter()).any(|p| p == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_decode_string_cells() {
        let row = Row::decode(&fields(json!({
            "TimeStep": "12",
            "TotalThroughput": "40",
            "AverageWaitTime": "2.5",
            "AverageSpeed": "9.75",
            "AveragePlatoonSize": "3"
        })));
        assert_eq!(row.time_index, 12);
        assert_eq!(row.get(ResultMetric::Throughput), 40.0);
        assert_eq!(row.get(ResultMetric::WaitTime), 2.5);
        assert_eq!(row.get(ResultMetric::Speed), 9.75);
        assert_eq!(row.get(ResultMetric::PlatoonSize), 3.0);
    }

    #[test]
    fn test_throughput_falls_back_to_count() {
        let row = Row::decode(&fields(json!({"TimeStep": 3, "ThroughputCount": "7"})));
        assert_eq!(row.get(ResultMetric::Throughput), 7.0);

        let row = Row::decode(&fields(json!({"TimeStep": 3, "TotalThroughput": "", "ThroughputCount": 4})));
        assert_eq!(row.get(ResultMetric::Throughput), 4.0);
    }

    #[test]
    fn test_integer_cells_truncate() {
        let row = Row::decode(&fields(json!({"TimeStep": "15.9", "TotalThroughput": "8.7"})));
        assert_eq!(row.time_index, 15);
        assert_eq!(row.get(ResultMetric::Throughput), 8.0);
    }

    #[test]
    fn test_malformed_cells_read_as_zero() {
        let row = Row::decode(&fields(json!({
            "TimeStep": "n/a",
            "AverageWaitTime": "slow",
            "AverageSpeed": true,
            "AveragePlatoonSize": "NaN"
        })));
        assert_eq!(row.time_index, 0);
        assert_eq!(row.values, [0.0; ResultMetric::COUNT]);
    }

    #[test]
    fn test_payload_shapes() {
        assert!(decode_rows_payload("a", r#"{"rows":null}"#).unwrap().is_empty());
        assert!(decode_rows_payload("a", r#"{}"#).unwrap().is_empty());
        assert!(decode_rows_payload("a", r#"[]"#).is_err());
        assert!(decode_rows_payload("a", r#"{"rows":"x"}"#).is_err());
        let rows = decode_rows_payload("a", r#"{"rows":[{"TimeStep":"1"}, 5, {"TimeStep":"2"}]}"#).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_group_classification() {
        let entry = |name: &str, algo: Option<&str>| FileEntry {
            name: name.to_string(),
            path: format!("statistics/{}", name),
            size: String::new(),
            time: String::new(),
            algo: algo.map(str::to_string),
        };
        assert_eq!(entry("run_SUMO_1.csv", None).group(), AlgorithmGroup::Baseline);
        assert_eq!(entry("run_1.csv", None).group(), AlgorithmGroup::Custom);
        assert_eq!(entry("run_1.csv", Some("")).group(), AlgorithmGroup::Custom);
        assert_eq!(entry("run_1.csv", Some("sumo")).group(), AlgorithmGroup::Baseline);
        assert_eq!(entry("sumo_run.csv", Some("custom")).group(), AlgorithmGroup::Custom);
        assert_eq!(entry("sumo_run.csv", Some("unknown")).group(), AlgorithmGroup::Custom);
    }

    #[test]
    fn test_file_sets_from_listing() {
        let listing: FileListing = serde_json::from_str(
            r#"{"files":[
                {"name":"a.csv","path":"statistics/sumo/a.csv","size":"1.00 KB","time":"t","algo":"sumo"},
                {"name":"b.csv","path":"statistics/custom/b.csv","size":"1.00 KB","time":"t","algo":"custom"},
                {"name":"sumo_c.csv","path":"statistics/sumo_c.csv"}
            ]}"#,
        )
        .unwrap();
        let sets = FileSets::from_listing(&listing);
        assert_eq!(sets.baseline, vec!["statistics/sumo/a.csv", "statistics/sumo_c.csv"]);
        assert_eq!(sets.custom, vec!["statistics/custom/b.csv"]);
        assert_eq!(sets.total(), 3);
        assert!(sets.contains("statistics/custom/b.csv"));
    }

    #[test]
    fn test_null_file_list() {
        let listing: FileListing = serde_json::from_str(r#"{"files":null}"#).unwrap();
        assert!(FileSets::from_listing(&listing).is_empty());
    }
}
