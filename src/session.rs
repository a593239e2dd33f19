//! Session state shared between the stream client, the comparison loader,
//! the control sender and the view.
//!
//! Each piece of state has one writer. Readers only ever see whole values
//! published through `watch` channels, never a half-applied update.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::live::{LiveSnapshot, RingBufferStore};
use crate::logging::{log, log_comparison, log_sample_rejected, obj, v_str, Domain, Level};
use crate::results::merge::ComparisonDataset;
use crate::results::rows::AlgorithmGroup;
use crate::results::Comparison;
use crate::sample::{Readout, Sample};

/// Requests applied by the live session's owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Drop live history and readout, optionally announcing the algorithm now active.
    Reset { active: Option<AlgorithmGroup> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    Accepted,
    /// First accepted sample of the run.
    Started,
    Rejected,
}

/// Writer side of the live state. Owned by the stream client task.
pub struct LiveSession {
    store: RingBufferStore,
    started: bool,
    snapshot_tx: watch::Sender<Arc<LiveSnapshot>>,
    readout_tx: watch::Sender<Option<Readout>>,
    active_tx: watch::Sender<Option<AlgorithmGroup>>,
    started_tx: watch::Sender<bool>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
}

impl LiveSession {
    pub fn ingest(&mut self, sample: &Sample) -> Ingest {
        if !self.store.accept(sample) {
            log_sample_rejected(sample.time_index, self.store.last_index());
            return Ingest::Rejected;
        }
        self.snapshot_tx.send_replace(Arc::new(self.store.snapshot()));
        self.readout_tx.send_replace(Some(Readout::from(sample)));

        if self.started || sample.time_index == 0 {
            return Ingest::Accepted;
        }
        self.started = true;
        self.started_tx.send_replace(true);
        if let Some(custom) = sample.using_custom_algo {
            self.active_tx
                .send_replace(Some(AlgorithmGroup::from_custom_flag(custom)));
        }
        log(
            Level::Info,
            Domain::Live,
            "simulation_started",
            obj(&[
                ("time_index", serde_json::json!(sample.time_index)),
                (
                    "algorithm",
                    sample
                        .using_custom_algo
                        .map(|c| v_str(AlgorithmGroup::from_custom_flag(c).wire_name()))
                        .unwrap_or(serde_json::Value::Null),
                ),
            ]),
        );
        Ingest::Started
    }

    pub fn apply(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Reset { active } => {
                self.store.clear();
                self.snapshot_tx.send_replace(Arc::new(LiveSnapshot::default()));
                self.readout_tx.send_replace(None);
                if active.is_some() {
                    self.active_tx.send_replace(active);
                }
                log(
                    Level::Info,
                    Domain::Live,
                    "session_reset",
                    obj(&[(
                        "active",
                        active
                            .map(|g| v_str(g.wire_name()))
                            .unwrap_or(serde_json::Value::Null),
                    )]),
                );
            }
        }
    }

    /// Next queued command; pending forever once every sender is gone.
    pub async fn next_command(&mut self) -> SessionCommand {
        match self.commands.recv().await {
            Some(cmd) => cmd,
            None => std::future::pending().await,
        }
    }

    pub fn has_started(&self) -> bool {
        self.started
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

/// Writer side of the comparison dataset.
pub struct ComparisonPublisher {
    tx: watch::Sender<Option<Arc<ComparisonDataset>>>,
    digest: Option<String>,
}

impl ComparisonPublisher {
    /// Replace the published dataset. Returns false, publishing nothing, when
    /// the dataset is identical to the current one.
    pub fn publish(&mut self, comparison: Comparison) -> bool {
        let digest = comparison.dataset.digest();
        let changed = self.digest.as_deref() != Some(digest.as_str());
        if changed {
            self.digest = Some(digest);
            self.tx.send_replace(Some(Arc::new(comparison.dataset.clone())));
        }
        log_comparison(
            comparison.dataset.len(),
            comparison.baseline_files,
            comparison.custom_files,
            changed,
        );
        changed
    }
}

/// Read side handed to the view and to the control sender.
#[derive(Clone)]
pub struct SessionView {
    pub live: watch::Receiver<Arc<LiveSnapshot>>,
    pub readout: watch::Receiver<Option<Readout>>,
    pub active: watch::Receiver<Option<AlgorithmGroup>>,
    pub started: watch::Receiver<bool>,
    pub comparison: watch::Receiver<Option<Arc<ComparisonDataset>>>,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionView {
    /// Algorithm shown on the dashboard: the latest readout's, else the one
    /// announced at start or by the last switch.
    pub fn current_algorithm(&self) -> Option<AlgorithmGroup> {
        self.readout
            .borrow()
            .as_ref()
            .map(|r| r.algorithm)
            .or(*self.active.borrow())
    }

    pub fn request(&self, command: SessionCommand) -> bool {
        self.commands.send(command).is_ok()
    }
}

pub fn session(ring_capacity: usize) -> (LiveSession, ComparisonPublisher, SessionView) {
    let (snapshot_tx, live) = watch::channel(Arc::new(LiveSnapshot::default()));
    let (readout_tx, readout) = watch::channel(None);
    let (active_tx, active) = watch::channel(None);
    let (started_tx, started) = watch::channel(false);
    let (comparison_tx, comparison) = watch::channel(None);
    let (commands_tx, commands) = mpsc::unbounded_channel();

    (
        LiveSession {
            store: RingBufferStore::new(ring_capacity),
            started: false,
            snapshot_tx,
            readout_tx,
            active_tx,
            started_tx,
            commands,
        },
        ComparisonPublisher {
            tx: comparison_tx,
            digest: None,
        },
        SessionView {
            live,
            readout,
            active,
            started,
            comparison,
            commands: commands_tx,
        },
    )
}
