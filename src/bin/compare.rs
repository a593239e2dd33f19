use simdash::catalog::Catalog;
use simdash::config::DashConfig;
use simdash::logging::console_to_stderr;
use simdash::results::load_comparison;
use simdash::results::loader::MultiFileLoader;
use simdash::results::rows::{FileSets, ResultMetric};
use simdash::retry::RetryConfig;

#[tokio::main]
async fn main() {
    console_to_stderr();
    let cfg = match DashConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("config error: {:#}", err);
            std::process::exit(1);
        }
    };
    // Optional first argument overrides DASH_STATS_DIR.
    let catalog = match std::env::args().nth(1) {
        Some(dir) => Catalog::Local(simdash::results::local::LocalResultSource::new(dir)),
        None => Catalog::from_config(&cfg),
    };
    let listing = match catalog.listing(&RetryConfig::default()).await {
        Ok(listing) => listing,
        Err(err) => {
            eprintln!("failed to list statistics files: {:#}", err);
            std::process::exit(1);
        }
    };
    let sets = FileSets::from_listing(&listing);
    eprintln!(
        "source={} baseline_files={} custom_files={}",
        catalog.describe(),
        sets.baseline.len(),
        sets.custom.len()
    );

    let loader = MultiFileLoader::new(catalog);
    let comparison = match load_comparison(&loader, &sets).await {
        Some(c) => c,
        None => {
            eprintln!("no data available for comparison");
            std::process::exit(2);
        }
    };

    for metric in ResultMetric::ALL {
        eprintln!(
            "{:<24} baseline: {} | custom: {}",
            metric.label(),
            comparison.dataset.baseline.summary(metric).render(),
            comparison.dataset.custom.summary(metric).render()
        );
    }
    if comparison.failed_files > 0 {
        eprintln!("failed_files={}", comparison.failed_files);
    }
    eprintln!("digest={}", comparison.dataset.digest());

    match serde_json::to_string_pretty(&comparison.dataset) {
        Ok(text) => println!("{}", text),
        Err(err) => {
            eprintln!("serialize failed: {}", err);
            std::process::exit(1);
        }
    }
}
