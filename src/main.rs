use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::time::{interval, sleep_until, Duration, Instant, MissedTickBehavior};

use simdash::api::DashboardApi;
use simdash::catalog::Catalog;
use simdash::config::DashConfig;
use simdash::control::{ControlCommand, ControlCommandSender, ControlOutcome};
use simdash::live::LiveSnapshot;
use simdash::logging::{console_to_stderr, log, obj, v_str, Domain, Level};
use simdash::results::load_comparison;
use simdash::results::loader::MultiFileLoader;
use simdash::results::merge::ComparisonDataset;
use simdash::results::rows::{AlgorithmGroup, FileSets, ResultMetric};
use simdash::retry::RetryConfig;
use simdash::sample::LiveMetric;
use simdash::session::{session, ComparisonPublisher, SessionView};
use simdash::stream::{ReconnectingStreamClient, StreamTiming, WsConnector};

const HELP: &str = "commands: switch <sumo|custom> | reload | open <path> | status | help | quit";

#[derive(Debug, PartialEq)]
enum Input {
    Switch(AlgorithmGroup),
    Reload,
    Open(String),
    Status,
    Help,
    Quit,
    Unknown(String),
}

fn parse_input(line: &str) -> Option<Input> {
    let mut parts = line.split_whitespace();
    let cmd = parts.next()?;
    let arg = parts.next();
    let input = match (cmd, arg) {
        ("switch", Some(raw)) => match AlgorithmGroup::parse(raw) {
            Some(group) => Input::Switch(group),
            None => Input::Unknown(line.trim().to_string()),
        },
        ("reload", None) => Input::Reload,
        ("open", Some(path)) => Input::Open(path.to_string()),
        ("status", None) => Input::Status,
        ("help", _) => Input::Help,
        ("quit" | "exit", _) => Input::Quit,
        _ => Input::Unknown(line.trim().to_string()),
    };
    Some(input)
}

enum Event {
    Line(std::io::Result<Option<String>>),
    Render,
    Comparison,
    ReloadDue,
    Interrupt,
}

async fn reload_due(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

struct Dashboard {
    cfg: DashConfig,
    loader: MultiFileLoader<Catalog>,
    publisher: ComparisonPublisher,
    control: ControlCommandSender<DashboardApi>,
    view: SessionView,
    retry: RetryConfig,
    sets: FileSets,
    pending_reload: Option<Instant>,
}

impl Dashboard {
    /// Re-list result files and, when baseline files exist, rebuild the comparison.
    async fn refresh(&mut self) {
        match self.loader.source().listing(&self.retry).await {
            Ok(listing) => {
                self.sets = FileSets::from_listing(&listing);
                println!(
                    "statistics: {} SUMO file(s), {} Custom file(s)",
                    self.sets.baseline.len(),
                    self.sets.custom.len()
                );
                if self.sets.baseline.is_empty() {
                    println!("No SUMO statistics files available yet");
                    return;
                }
                self.compare().await;
            }
            Err(err) => {
                log(
                    Level::Error,
                    Domain::Results,
                    "listing_failed",
                    obj(&[("error", v_str(&format!("{:#}", err)))]),
                );
                println!("error: failed to load statistics files: {:#}", err);
            }
        }
    }

    async fn compare(&mut self) {
        match load_comparison(&self.loader, &self.sets).await {
            Some(comparison) => {
                let failed = comparison.failed_files;
                if !self.publisher.publish(comparison) {
                    println!("comparison unchanged");
                }
                if failed > 0 {
                    println!("{} file(s) failed to load", failed);
                }
            }
            None => println!("No data available for comparison"),
        }
    }

    async fn switch(&mut self, target: AlgorithmGroup) {
        match self.control.send(ControlCommand::ChangeAlgorithm(target)).await {
            Ok(ControlOutcome::Applied { message }) => {
                println!("{}", message);
                self.pending_reload = Some(Instant::now() + self.cfg.stats_reload_delay());
            }
            Ok(ControlOutcome::AlreadyActive(group)) => {
                println!("Already using {} algorithm", group.display_name())
            }
            Err(err) => println!("error: failed to execute change_algo command: {:#}", err),
        }
    }

    async fn open(&mut self, path: &str) {
        if !self.sets.contains(path) {
            println!("unknown file {}", path);
            return;
        }
        // Any listed file reloads the whole comparison.
        self.compare().await;
    }

    fn status(&self) {
        let algorithm = self
            .view
            .current_algorithm()
            .map(|g| g.display_name())
            .unwrap_or("unknown");
        println!("algorithm: {}", algorithm);
        println!("simulation started: {}", *self.view.started.borrow());
        println!("live points: {}", self.view.live.borrow().len());
        println!(
            "files: {} SUMO, {} Custom",
            self.sets.baseline.len(),
            self.sets.custom.len()
        );
        match self.view.comparison.borrow().as_deref() {
            Some(dataset) => println!("comparison: {} time steps", dataset.len()),
            None => println!("comparison: none"),
        }
    }

    async fn handle(&mut self, input: Input) {
        match input {
            Input::Switch(group) => self.switch(group).await,
            Input::Reload => self.refresh().await,
            Input::Open(path) => self.open(&path).await,
            Input::Status => self.status(),
            Input::Help => println!("{}", HELP),
            Input::Unknown(raw) => println!("unknown command: {} ({})", raw, HELP),
            Input::Quit => {}
        }
    }
}

fn render_live(view: &SessionView, snapshot: &LiveSnapshot) {
    match view.readout.borrow().as_ref() {
        Some(readout) => println!("{}", readout.render()),
        None => println!("waiting for simulation data"),
    }
    if let (Some(first), Some(last)) = (snapshot.time_indices.first(), snapshot.time_indices.last()) {
        let speed = snapshot.series(LiveMetric::AverageSpeed);
        let peak = speed.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        println!(
            "  chart: {} points, steps {}..{}, peak speed {:.1} m/s",
            snapshot.len(),
            first,
            last,
            peak
        );
    }
}

fn render_comparison(dataset: &ComparisonDataset) {
    println!("comparison over {} time steps", dataset.len());
    for metric in ResultMetric::ALL {
        println!(
            "  {:<24} SUMO {} | Custom {}",
            metric.label(),
            dataset.baseline.summary(metric).render(),
            dataset.custom.summary(metric).render()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    console_to_stderr();
    let cfg = DashConfig::from_env()?;
    let stream_url = cfg.stream_url()?;
    let catalog = Catalog::from_config(&cfg);

    log(
        Level::Info,
        Domain::System,
        "dashboard_started",
        obj(&[
            ("base_url", v_str(cfg.base_url.as_str())),
            ("stream_url", v_str(stream_url.as_str())),
            ("results", v_str(&catalog.describe())),
            ("ring_capacity", json!(cfg.ring_capacity)),
        ]),
    );

    let (live, publisher, view) = session(cfg.ring_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut client =
        ReconnectingStreamClient::new(WsConnector, stream_url, StreamTiming::from_config(&cfg), live);
    let stream_task = tokio::spawn(async move {
        client.run(shutdown_rx).await;
        client.stats()
    });

    let mut dash = Dashboard {
        control: ControlCommandSender::new(DashboardApi::from_config(&cfg), view.clone()),
        loader: MultiFileLoader::new(catalog),
        publisher,
        view: view.clone(),
        retry: RetryConfig::default(),
        sets: FileSets::default(),
        pending_reload: None,
        cfg,
    };

    println!("{}", HELP);
    dash.refresh().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut render = interval(Duration::from_secs(1));
    render.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut live_rx = view.live.clone();
    let mut started_rx = view.started.clone();
    let mut comparison_rx = view.comparison.clone();

    loop {
        let event = tokio::select! {
            line = lines.next_line() => Event::Line(line),
            _ = render.tick() => Event::Render,
            changed = comparison_rx.changed() => match changed {
                Ok(()) => Event::Comparison,
                Err(_) => continue,
            },
            _ = reload_due(dash.pending_reload) => Event::ReloadDue,
            _ = tokio::signal::ctrl_c() => Event::Interrupt,
        };

        match event {
            Event::Line(Ok(Some(line))) => match parse_input(&line) {
                Some(Input::Quit) => break,
                Some(input) => dash.handle(input).await,
                None => {}
            },
            Event::Line(Ok(None)) | Event::Interrupt => break,
            Event::Line(Err(err)) => {
                log(
                    Level::Error,
                    Domain::System,
                    "stdin_failed",
                    obj(&[("error", v_str(&err.to_string()))]),
                );
                break;
            }
            Event::Render => {
                if started_rx.has_changed().unwrap_or(false) && *started_rx.borrow_and_update() {
                    println!("Simulation started");
                }
                if live_rx.has_changed().unwrap_or(false) {
                    let snapshot: Arc<LiveSnapshot> = live_rx.borrow_and_update().clone();
                    render_live(&view, &snapshot);
                }
            }
            Event::Comparison => {
                let dataset = comparison_rx.borrow_and_update().clone();
                if let Some(dataset) = dataset {
                    render_comparison(&dataset);
                }
            }
            Event::ReloadDue => {
                dash.pending_reload = None;
                dash.refresh().await;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    match stream_task.await {
        Ok(stats) => log(
            Level::Info,
            Domain::System,
            "dashboard_stopped",
            obj(&[
                ("connect_attempts", json!(stats.connect_attempts)),
                ("accepted", json!(stats.accepted)),
                ("rejected", json!(stats.rejected)),
                ("malformed", json!(stats.malformed)),
            ]),
        ),
        Err(err) => log(
            Level::Error,
            Domain::System,
            "stream_task_failed",
            obj(&[("error", v_str(&err.to_string()))]),
        ),
    }
    Ok(())
}
