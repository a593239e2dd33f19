//! Result files read straight from a statistics directory, for running a
//! comparison without the dashboard server.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Component, Path, PathBuf};

use super::loader::ResultSource;
use super::rows::{FileEntry, FileListing, Row};

fn algo_from_path(path: &str) -> &'static str {
    if path.contains("custom") {
        "custom"
    } else if path.contains("sumo") {
        "sumo"
    } else {
        "unknown"
    }
}

fn walk_csv(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("read {}", dir.display()))?
        .flatten()
        .collect();
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let path = entry.path();
        // Symlinked directories are not descended into.
        let is_dir = entry
            .file_type()
            .with_context(|| format!("stat {}", path.display()))?
            .is_dir();
        if is_dir {
            walk_csv(&path, out)?;
        } else if path.extension().map(|e| e == "csv").unwrap_or(false) {
            out.push(path);
        }
    }
    Ok(())
}

/// `path` strings are relative to the parent of `root` with `/` separators,
/// the same shape the server lists (`statistics/...`).
pub fn scan_statistics_dir(root: &Path) -> Result<FileListing> {
    let mut found = Vec::new();
    walk_csv(root, &mut found)?;
    let base = root.parent().unwrap_or_else(|| Path::new(""));

    let mut files = Vec::with_capacity(found.len());
    for path in found {
        let meta = fs::metadata(&path).with_context(|| format!("stat {}", path.display()))?;
        let rel = path.strip_prefix(base).unwrap_or(&path);
        let web_path = rel.to_string_lossy().replace('\\', "/");
        let time = meta
            .modified()
            .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        files.push(FileEntry {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            algo: Some(algo_from_path(&web_path).to_string()),
            path: web_path,
            size: format!("{:.2} KB", meta.len() as f64 / 1024.0),
            time,
        });
    }
    Ok(FileListing { files })
}

/// Comma split honoring double-quoted cells (`"a,b"`, `""` for a literal
/// quote). Quoted cells never span lines.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                cell.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => cells.push(std::mem::take(&mut cell).trim().to_string()),
            _ => cell.push(c),
        }
    }
    cells.push(cell.trim().to_string());
    cells
}

/// Header row plus data rows into header-keyed maps. Cells past the header
/// are dropped, short rows keep the columns they have.
pub fn parse_csv(text: &str) -> Result<Vec<Map<String, Value>>> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header = split_csv_line(lines.next().ok_or_else(|| anyhow!("missing CSV header"))?);
    Ok(lines
        .map(|line| {
            header
                .iter()
                .zip(split_csv_line(line))
                .map(|(k, v)| (k.clone(), Value::String(v)))
                .collect()
        })
        .collect())
}

pub struct LocalResultSource {
    root: PathBuf,
}

impl LocalResultSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Listing paths start with the directory name; anything escaping the
    /// directory is refused.
    fn resolve(&self, web_path: &str) -> Result<PathBuf> {
        let rel = Path::new(web_path);
        if rel.is_absolute() || rel.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(anyhow!("invalid file path: {}", web_path));
        }
        let dir_name = self
            .root
            .file_name()
            .ok_or_else(|| anyhow!("statistics dir has no name"))?;
        let inner = rel
            .strip_prefix(dir_name)
            .map_err(|_| anyhow!("path {} not under statistics directory", web_path))?;
        Ok(self.root.join(inner))
    }

    pub fn listing(&self) -> Result<FileListing> {
        scan_statistics_dir(&self.root)
    }
}

#[async_trait]
impl ResultSource for LocalResultSource {
    async fn fetch_rows(&self, path: &str) -> Result<Vec<Row>> {
        let full = self.resolve(path)?;
        let text = tokio::task::spawn_blocking(move || fs::read_to_string(&full))
            .await
            .context("read task")?
            .with_context(|| format!("open {}", path))?;
        Ok(parse_csv(&text)?.iter().map(Row::decode).collect())
    }
}
