//! Structured logging for the dashboard client.
//!
//! Records are JSON lines with a run id, a monotonically increasing sequence
//! number, a level, a domain and a free-form `data` object. They go to the
//! console and to per-run files under `LOG_DIR/<run_id>/`:
//! - `events.jsonl`: info and above
//! - `trace.jsonl`: trace and debug

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "fatal" => Some(Level::Fatal),
            _ => None,
        }
    }

    /// Minimum level from `LOG_LEVEL`, read once per process.
    pub fn from_env() -> Self {
        static MIN_LEVEL: OnceLock<Level> = OnceLock::new();
        *MIN_LEVEL.get_or_init(|| {
            std::env::var("LOG_LEVEL")
                .ok()
                .and_then(|v| Level::parse(&v))
                .unwrap_or(Level::Info)
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Stream,  // Connection lifecycle, watchdog
    Live,    // Guard decisions, ring buffer
    Results, // File listing, fetches, aggregation, merge
    Control, // Control commands
    System,  // Startup, shutdown, profiling
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Stream => "stream",
            Domain::Live => "live",
            Domain::Results => "results",
            Domain::Control => "control",
            Domain::System => "system",
        }
    }

    pub fn is_enabled(&self) -> bool {
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static PROFILE_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();
static CONSOLE_STDERR: OnceLock<bool> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    to_stderr: bool,
    events: Option<Mutex<BufWriter<File>>>,
    trace: Option<Mutex<BufWriter<File>>>,
}

fn open_log(path: PathBuf) -> Option<Mutex<BufWriter<File>>> {
    match File::create(&path) {
        Ok(f) => Some(Mutex::new(BufWriter::new(f))),
        Err(err) => {
            eprintln!("[log] failed to create {}: {}", path.display(), err);
            None
        }
    }
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("dash-{}-{}", ts_epoch_ms(), process::id()));
        let to_stderr = CONSOLE_STDERR.get().copied().unwrap_or(false)
            || matches!(std::env::var("LOG_STDERR").as_deref(), Ok("1") | Ok("true"));
        let base = std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string());
        let mut run_dir = PathBuf::from(base);
        run_dir.push(&run_id);

        let (events, trace) = match create_dir_all(&run_dir) {
            Ok(()) => {
                let _ = std::fs::write(
                    run_dir.join("manifest.json"),
                    json!({
                        "run_id": run_id,
                        "ts": ts_now(),
                        "pid": process::id(),
                        "log_dir": run_dir.to_string_lossy(),
                    })
                    .to_string(),
                );
                (
                    open_log(run_dir.join("events.jsonl")),
                    open_log(run_dir.join("trace.jsonl")),
                )
            }
            Err(err) => {
                eprintln!("[log] failed to create run dir: {}", err);
                (None, None)
            }
        };

        RunContext {
            run_id,
            to_stderr,
            events,
            trace,
        }
    })
}

/// Send console records to stderr regardless of `LOG_STDERR`. Only effective
/// before the first record is emitted.
pub fn console_to_stderr() {
    let _ = CONSOLE_STDERR.set(true);
}

fn write_line(writer: &Option<Mutex<BufWriter<File>>>, line: &str) {
    if let Some(writer) = writer {
        if let Ok(mut w) = writer.lock() {
            let _ = writeln!(w, "{}", line);
            let _ = w.flush();
        }
    }
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["conn_id", "path", "action", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    emit_record(level, domain.as_str(), event, fields);
}

fn emit_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));

    let line = Value::Object(entry).to_string();
    match level {
        Level::Trace | Level::Debug => write_line(&ctx.trace, &line),
        _ => write_line(&ctx.events, &line),
    }
    if ctx.to_stderr {
        eprintln!("{}", line);
    } else {
        println!("{}", line);
    }
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

pub fn log_conn_state(conn_id: u64, from: &str, to: &str, reason: &str) {
    log(
        Level::Info,
        Domain::Stream,
        "conn_state",
        obj(&[
            ("conn_id", json!(conn_id)),
            ("from", v_str(from)),
            ("to", v_str(to)),
            ("reason", v_str(reason)),
        ]),
    );
}

pub fn log_malformed(conn_id: u64, err: &str, preview: &str) {
    log(
        Level::Warn,
        Domain::Stream,
        "malformed_payload",
        obj(&[
            ("conn_id", json!(conn_id)),
            ("error", v_str(err)),
            ("preview", v_str(preview)),
        ]),
    );
}

pub fn log_sample_rejected(time_index: u64, last_index: Option<u64>) {
    log(
        Level::Debug,
        Domain::Live,
        "sample_rejected",
        obj(&[
            ("time_index", json!(time_index)),
            ("last_index", last_index.map(|v| json!(v)).unwrap_or(Value::Null)),
        ]),
    );
}

pub fn log_file_failure(path: &str, err: &str) {
    log(
        Level::Warn,
        Domain::Results,
        "file_load_failed",
        obj(&[("path", v_str(path)), ("error", v_str(err))]),
    );
}

pub fn log_comparison(points: usize, baseline_files: usize, custom_files: usize, published: bool) {
    log(
        Level::Info,
        Domain::Results,
        "comparison",
        obj(&[
            ("points", json!(points)),
            ("baseline_files", json!(baseline_files)),
            ("custom_files", json!(custom_files)),
            ("published", json!(published)),
        ]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

/// First `max` chars of a payload, single line, for log previews.
pub fn preview(text: &str, max: usize) -> String {
    text.chars().take(max).collect::<String>().replace('\n', "\\n")
}

// =============================================================================
// Profiling Scope
// =============================================================================

/// Profiling scope that emits structured timing on drop.
pub struct ProfileScope {
    label: &'static str,
    context: Option<Map<String, Value>>,
    started: Instant,
    enabled: bool,
}

impl ProfileScope {
    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        let enabled = Self::should_sample();
        Self {
            label,
            context: if enabled { Some(obj(fields)) } else { None },
            started: Instant::now(),
            enabled,
        }
    }

    fn should_sample() -> bool {
        std::env::var("PROFILE_SAMPLE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .map(|p| {
                if p >= 1.0 {
                    true
                } else if p <= 0.0 {
                    false
                } else {
                    let seq = PROFILE_SEQ.fetch_add(1, Ordering::SeqCst);
                    let bucket = (seq % 10_000) as f64 / 10_000.0;
                    bucket < p
                }
            })
            .unwrap_or(true)
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let mut fields = self.context.take().unwrap_or_default();
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_ms".to_string(), v_num(elapsed_ms));
        log(Level::Trace, Domain::System, "profile", fields);
    }
}
