//! Reconnecting stream client.
//!
//! One task owns the connection, the reconnect timer, the watchdog and the
//! live session. A replaced connection is dropped, so nothing it still had in
//! flight can reach the session.

use serde_json::json;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep_until, timeout, Duration, Instant, MissedTickBehavior};
use url::Url;

use super::transport::{StreamConnection, StreamConnector};
use super::watchdog::{LivenessWatchdog, ReconnectTimer};
use crate::config::DashConfig;
use crate::logging::{log, log_conn_state, log_malformed, obj, preview, Domain, Level};
use crate::sample::Sample;
use crate::session::{Ingest, LiveSession, SessionCommand};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Idle,
    Connecting,
    Open,
    /// Closed with a reconnect pending.
    Closed,
}

impl ConnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnState::Idle => "idle",
            ConnState::Connecting => "connecting",
            ConnState::Open => "open",
            ConnState::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StreamTiming {
    pub reconnect_delay: Duration,
    pub watchdog_period: Duration,
    pub max_silence: Duration,
    pub connect_timeout: Duration,
}

impl Default for StreamTiming {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(2),
            watchdog_period: Duration::from_secs(5),
            max_silence: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl StreamTiming {
    pub fn from_config(cfg: &DashConfig) -> Self {
        Self {
            reconnect_delay: Duration::from_millis(cfg.reconnect_delay_ms),
            watchdog_period: Duration::from_millis(cfg.watchdog_period_ms.max(1)),
            max_silence: Duration::from_millis(cfg.liveness_timeout_ms),
            connect_timeout: Duration::from_millis(cfg.connect_timeout_ms.max(1)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub connect_attempts: u64,
    pub reconnects_scheduled: u64,
    pub forced_reconnects: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub malformed: u64,
}

enum Wake {
    Frame(Option<anyhow::Result<String>>),
    ReconnectDue,
    WatchdogTick,
    Command(SessionCommand),
    Shutdown,
}

async fn next_frame(conn: &mut Option<Box<dyn StreamConnection>>) -> Option<anyhow::Result<String>> {
    match conn {
        Some(c) => c.next_text().await,
        None => std::future::pending().await,
    }
}

async fn reconnect_due(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

pub struct ReconnectingStreamClient<C> {
    connector: C,
    url: Url,
    timing: StreamTiming,
    state: ConnState,
    conn: Option<Box<dyn StreamConnection>>,
    conn_id: u64,
    reconnect: ReconnectTimer,
    watchdog: LivenessWatchdog,
    session: LiveSession,
    stats: ClientStats,
}

impl<C: StreamConnector> ReconnectingStreamClient<C> {
    pub fn new(connector: C, url: Url, timing: StreamTiming, session: LiveSession) -> Self {
        Self {
            connector,
            url,
            timing,
            state: ConnState::Idle,
            conn: None,
            conn_id: 0,
            reconnect: ReconnectTimer::new(timing.reconnect_delay),
            watchdog: LivenessWatchdog::new(timing.watchdog_period, timing.max_silence, Instant::now()),
            session,
            stats: ClientStats::default(),
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn stats(&self) -> ClientStats {
        self.stats
    }

    pub fn session(&self) -> &LiveSession {
        &self.session
    }

    fn transition(&mut self, to: ConnState, reason: &str) {
        if self.state != to {
            log_conn_state(self.conn_id, self.state.as_str(), to.as_str(), reason);
        }
        self.state = to;
    }

    /// Replace any current connection with a fresh one. The old connection is
    /// closed best-effort; its errors are ignored.
    pub async fn connect(&mut self) {
        if let Some(mut stale) = self.conn.take() {
            let _ = timeout(self.timing.connect_timeout, stale.close()).await;
        }
        self.conn_id += 1;
        self.stats.connect_attempts += 1;
        self.transition(ConnState::Connecting, "connect");

        match timeout(self.timing.connect_timeout, self.connector.connect(&self.url)).await {
            Ok(Ok(conn)) => {
                self.conn = Some(conn);
                self.reconnect.disarm();
                self.transition(ConnState::Open, "handshake");
            }
            Ok(Err(err)) => self.handle_close(&format!("{:#}", err)),
            Err(_) => self.handle_close("connect timeout"),
        }
    }

    /// Close or error from Connecting/Open. Arms at most one reconnect.
    pub fn handle_close(&mut self, reason: &str) {
        self.conn = None;
        self.transition(ConnState::Closed, reason);
        if self.reconnect.arm(Instant::now()) {
            self.stats.reconnects_scheduled += 1;
            log(
                Level::Info,
                Domain::Stream,
                "reconnect_scheduled",
                obj(&[
                    ("conn_id", json!(self.conn_id)),
                    ("delay_ms", json!(self.timing.reconnect_delay.as_millis() as u64)),
                ]),
            );
        }
    }

    pub fn handle_text(&mut self, text: &str) {
        if self.state != ConnState::Open {
            return;
        }
        self.watchdog.record(Instant::now());
        let sample = match Sample::decode(text) {
            Ok(s) => s,
            Err(err) => {
                self.stats.malformed += 1;
                log_malformed(self.conn_id, &format!("{:#}", err), &preview(text, 240));
                return;
            }
        };
        match self.session.ingest(&sample) {
            Ingest::Rejected => self.stats.rejected += 1,
            Ingest::Accepted | Ingest::Started => self.stats.accepted += 1,
        }
    }

    async fn check_liveness(&mut self) {
        let now = Instant::now();
        if !self.watchdog.is_stale(now) {
            return;
        }
        self.stats.forced_reconnects += 1;
        log(
            Level::Warn,
            Domain::Stream,
            "stream_stalled",
            obj(&[
                ("conn_id", json!(self.conn_id)),
                ("state", json!(self.state.as_str())),
                ("silence_ms", json!(self.watchdog.silence(now).as_millis() as u64)),
            ]),
        );
        self.connect().await;
    }

    /// Run until `shutdown` flips to true or its sender is dropped.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        self.connect().await;
        let period = self.watchdog.period();
        let mut watchdog_tick = interval_at(Instant::now() + period, period);
        watchdog_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            let wake = tokio::select! {
                frame = next_frame(&mut self.conn) => Wake::Frame(frame),
                _ = reconnect_due(self.reconnect.deadline()) => Wake::ReconnectDue,
                _ = watchdog_tick.tick() => Wake::WatchdogTick,
                cmd = self.session.next_command() => Wake::Command(cmd),
                changed = shutdown.changed() => match changed {
                    Ok(()) => continue,
                    Err(_) => Wake::Shutdown,
                },
            };

            match wake {
                Wake::Frame(Some(Ok(text))) => self.handle_text(&text),
                Wake::Frame(Some(Err(err))) => self.handle_close(&format!("{:#}", err)),
                Wake::Frame(None) => self.handle_close("closed by peer"),
                Wake::ReconnectDue => {
                    self.reconnect.disarm();
                    self.connect().await;
                }
                Wake::WatchdogTick => self.check_liveness().await,
                Wake::Command(cmd) => self.session.apply(cmd),
                Wake::Shutdown => break,
            }
        }

        if let Some(mut conn) = self.conn.take() {
            let _ = timeout(self.timing.connect_timeout, conn.close()).await;
        }
        self.transition(ConnState::Idle, "shutdown");
        log(
            Level::Info,
            Domain::Stream,
            "client_stopped",
            obj(&[
                ("connect_attempts", json!(self.stats.connect_attempts)),
                ("reconnects_scheduled", json!(self.stats.reconnects_scheduled)),
                ("forced_reconnects", json!(self.stats.forced_reconnects)),
                ("accepted", json!(self.stats.accepted)),
                ("rejected", json!(self.stats.rejected)),
                ("malformed", json!(self.stats.malformed)),
            ]),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::session;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct DeadConnection;

    #[async_trait]
    impl StreamConnection for DeadConnection {
        async fn next_text(&mut self) -> Option<Result<String>> {
            std::future::pending().await
        }

        async fn close(&mut self) -> Result<()> {
            Err(anyhow!("already gone"))
        }
    }

    struct CountingConnector {
        connects: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StreamConnector for CountingConnector {
        async fn connect(&self, _url: &Url) -> Result<Box<dyn StreamConnection>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(DeadConnection))
        }
    }

    fn client() -> (ReconnectingStreamClient<CountingConnector>, Arc<AtomicUsize>) {
        let connects = Arc::new(AtomicUsize::new(0));
        let (live, _, _) = session(8);
        let client = ReconnectingStreamClient::new(
            CountingConnector {
                connects: connects.clone(),
            },
            Url::parse("ws://127.0.0.1:1/ws").unwrap(),
            StreamTiming::default(),
            live,
        );
        (client, connects)
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_close_schedules_one_reconnect() {
        let (mut client, connects) = client();
        client.connect().await;
        assert_eq!(client.state(), ConnState::Open);

        client.handle_close("error");
        client.handle_close("close");
        client.handle_close("close again");
        assert_eq!(client.state(), ConnState::Closed);
        assert_eq!(client.stats().reconnects_scheduled, 1);

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            client.run(rx).await;
            client
        });
        // run() connects immediately, which disarms the pending timer; the
        // timer firing on its own is covered by the scripted tests below.
        tokio::time::sleep(Duration::from_secs(3)).await;
        tx.send(true).unwrap();
        let client = task.await.unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 2);
        assert_eq!(client.stats().reconnects_scheduled, 1);
        assert_eq!(client.state(), ConnState::Idle);
    }

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Refuse,
        Hang,
        CloseOnFirstFrame,
        Silent,
    }

    struct ClosingConnection;

    #[async_trait]
    impl StreamConnection for ClosingConnection {
        async fn next_text(&mut self) -> Option<Result<String>> {
            None
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// Plays `steps` in order, then hands out silent connections.
    struct ScriptedConnector {
        steps: Mutex<VecDeque<Step>>,
        attempts: Arc<Mutex<Vec<Instant>>>,
    }

    #[async_trait]
    impl StreamConnector for ScriptedConnector {
        async fn connect(&self, _url: &Url) -> Result<Box<dyn StreamConnection>> {
            self.attempts.lock().unwrap().push(Instant::now());
            let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Silent);
            match step {
                Step::Refuse => return Err(anyhow!("connection refused")),
                Step::Hang => std::future::pending::<()>().await,
                Step::CloseOnFirstFrame => return Ok(Box::new(ClosingConnection)),
                Step::Silent => {}
            }
            Ok(Box::new(DeadConnection))
        }
    }

    type Attempts = Arc<Mutex<Vec<Instant>>>;

    fn scripted(steps: &[Step]) -> (ReconnectingStreamClient<ScriptedConnector>, Attempts) {
        let attempts: Attempts = Arc::new(Mutex::new(Vec::new()));
        let (live, _, _) = session(8);
        let timing = StreamTiming {
            watchdog_period: Duration::from_secs(60),
            max_silence: Duration::from_secs(60),
            ..StreamTiming::default()
        };
        let client = ReconnectingStreamClient::new(
            ScriptedConnector {
                steps: Mutex::new(steps.iter().copied().collect()),
                attempts: attempts.clone(),
            },
            Url::parse("ws://127.0.0.1:1/ws").unwrap(),
            timing,
            live,
        );
        (client, attempts)
    }

    async fn run_for(
        mut client: ReconnectingStreamClient<ScriptedConnector>,
        span: Duration,
    ) -> ReconnectingStreamClient<ScriptedConnector> {
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            client.run(rx).await;
            client
        });
        tokio::time::sleep(span).await;
        tx.send(true).unwrap();
        task.await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_handshakes_retry_after_fixed_delay() {
        let (client, attempts) = scripted(&[Step::Refuse, Step::Refuse]);
        let delay = client.timing.reconnect_delay;
        let client = run_for(client, Duration::from_secs(6)).await;

        let at = attempts.lock().unwrap().clone();
        assert_eq!(at.len(), 3);
        assert_eq!(at[1] - at[0], delay);
        assert_eq!(at[2] - at[1], delay);
        assert_eq!(client.stats().connect_attempts, 3);
        assert_eq!(client.stats().reconnects_scheduled, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout_closes_and_schedules_one_reconnect() {
        let (mut client, attempts) = scripted(&[Step::Hang]);
        let timing = client.timing;
        let start = Instant::now();
        client.connect().await;

        assert_eq!(Instant::now() - start, timing.connect_timeout);
        assert_eq!(client.state(), ConnState::Closed);
        assert_eq!(client.stats().reconnects_scheduled, 1);
        assert_eq!(
            client.reconnect.deadline(),
            Some(start + timing.connect_timeout + timing.reconnect_delay)
        );
        assert_eq!(attempts.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_close_reconnects_once_after_delay() {
        let (client, attempts) = scripted(&[Step::CloseOnFirstFrame]);
        let delay = client.timing.reconnect_delay;
        let client = run_for(client, Duration::from_secs(3)).await;

        let at = attempts.lock().unwrap().clone();
        assert_eq!(at.len(), 2);
        assert_eq!(at[1] - at[0], delay);
        assert_eq!(client.stats().reconnects_scheduled, 1);
        assert_eq!(client.stats().connect_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_text_ignored_unless_open() {
        let (mut client, _) = client();
        client.handle_text(r#"{"time_step":1}"#);
        assert_eq!(client.stats().accepted, 0);
        client.connect().await;
        client.handle_text(r#"{"time_step":1}"#);
        client.handle_text("garbage");
        assert_eq!(client.stats().accepted, 1);
        assert_eq!(client.stats().malformed, 1);
        assert_eq!(client.state(), ConnState::Open);
        assert_eq!(client.session().len(), 1);
    }
}
