pub mod aggregate;
pub mod loader;
pub mod local;
pub mod merge;
pub mod rows;

use crate::logging::{log, obj, v_str, Domain, Level};

use self::aggregate::aggregate;
use self::loader::{LoadedResults, MultiFileLoader, ResultSource};
use self::merge::{merge, ComparisonDataset};
use self::rows::FileSets;

/// A merged dataset together with how many files fed each side.
#[derive(Debug, Clone)]
pub struct Comparison {
    pub dataset: ComparisonDataset,
    pub baseline_files: usize,
    pub custom_files: usize,
    pub failed_files: usize,
}

/// Aggregate each group and merge. `None` when neither group has a file.
pub fn compare_loaded(loaded: LoadedResults) -> Option<Comparison> {
    if loaded.is_empty() {
        log(
            Level::Warn,
            Domain::Results,
            "comparison_skipped",
            obj(&[("msg", v_str("no data available for comparison"))]),
        );
        return None;
    }
    let baseline = aggregate(&loaded.baseline);
    let custom = aggregate(&loaded.custom);
    Some(Comparison {
        dataset: merge(baseline.as_ref(), custom.as_ref()),
        baseline_files: loaded.baseline.len(),
        custom_files: loaded.custom.len(),
        failed_files: loaded.failed,
    })
}

/// Fetch all files of `sets` and build the comparison from whatever loaded.
pub async fn load_comparison<S: ResultSource>(
    loader: &MultiFileLoader<S>,
    sets: &FileSets,
) -> Option<Comparison> {
    loader.load_with(sets, compare_loaded).await.flatten()
}
