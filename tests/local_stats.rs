use std::fs;
use std::path::Path;
use tempfile::TempDir;

use simdash::results::load_comparison;
use simdash::results::loader::{MultiFileLoader, ResultSource};
use simdash::results::local::{scan_statistics_dir, LocalResultSource};
use simdash::results::rows::{AlgorithmGroup, FileSets, ResultMetric};

const HEADER: &str = "TimeStep,TotalThroughput,AverageWaitTime,AverageSpeed,AveragePlatoonSize";

fn write_csv(path: &Path, rows: &[&str]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut out = String::from(HEADER);
    out.push('\n');
    for row in rows {
        out.push_str(row);
        out.push('\n');
    }
    fs::write(path, out).unwrap();
}

fn stats_dir() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("statistics");
    write_csv(&root.join("sumo").join("run1.csv"), &["1,10,2.0,8.0,1.0", "2,12,2.5,7.5,1.0"]);
    write_csv(&root.join("custom").join("run1.csv"), &["2,14,1.0,9.0,3.0", "3,16,0.5,9.5,3.0"]);
    write_csv(&root.join("misc.csv"), &["1,1,1,1,1"]);
    fs::write(root.join("notes.txt"), "ignored").unwrap();
    (dir, root)
}

#[test]
fn scan_lists_csv_files_with_algo() {
    let (_dir, root) = stats_dir();
    let listing = scan_statistics_dir(&root).unwrap();
    let paths: Vec<&str> = listing.files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "statistics/custom/run1.csv",
            "statistics/misc.csv",
            "statistics/sumo/run1.csv"
        ]
    );
    let misc = &listing.files[1];
    assert_eq!(misc.algo.as_deref(), Some("unknown"));
    assert_eq!(misc.group(), AlgorithmGroup::Custom);
    assert!(misc.size.ends_with("KB"));

    let sets = FileSets::from_listing(&listing);
    assert_eq!(sets.baseline, vec!["statistics/sumo/run1.csv".to_string()]);
    assert_eq!(sets.custom.len(), 2);
}

#[tokio::test]
async fn local_source_reads_rows() {
    let (_dir, root) = stats_dir();
    let source = LocalResultSource::new(&root);
    let rows = source.fetch_rows("statistics/sumo/run1.csv").await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].time_index, 2);
    assert_eq!(rows[1].get(ResultMetric::Throughput), 12.0);
    assert_eq!(rows[1].get(ResultMetric::WaitTime), 2.5);

    assert!(source.fetch_rows("statistics/sumo/absent.csv").await.is_err());
    assert!(source.fetch_rows("statistics/../outside.csv").await.is_err());
}

#[tokio::test]
async fn local_directory_feeds_comparison() {
    let (_dir, root) = stats_dir();
    let source = LocalResultSource::new(&root);
    let sets = FileSets::from_listing(&source.listing().unwrap());
    let loader = MultiFileLoader::new(source);
    let comparison = load_comparison(&loader, &sets).await.unwrap();
    let ds = comparison.dataset;
    assert_eq!(ds.time_indices, vec![1, 2, 3]);
    assert_eq!(ds.baseline.values(ResultMetric::Throughput), &[Some(10.0), Some(12.0), None]);
    // Only misc.csv reports step 1 on the custom side.
    assert_eq!(ds.custom.values(ResultMetric::Throughput), &[Some(1.0), Some(14.0), Some(16.0)]);
}

#[test]
fn missing_directory_is_an_error() {
    let dir = TempDir::new().unwrap();
    assert!(scan_statistics_dir(&dir.path().join("nope")).is_err());
}

#[cfg(unix)]
#[tokio::test]
async fn symlinked_directories_are_not_followed() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("statistics");
    write_csv(&root.join("sumo").join("a.csv"), &["1,10,2.0,8.0,1.0"]);
    std::os::unix::fs::symlink(&root, root.join("sumo").join("loop")).unwrap();

    let source = LocalResultSource::new(&root);
    let listing = source.listing().unwrap();
    let paths: Vec<&str> = listing.files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["statistics/sumo/a.csv"]);

    let sets = FileSets::from_listing(&listing);
    let comparison = load_comparison(&MultiFileLoader::new(source), &sets).await.unwrap();
    assert_eq!(comparison.baseline_files, 1);
    assert_eq!(comparison.dataset.baseline.values(ResultMetric::Throughput), &[Some(10.0)]);
}
