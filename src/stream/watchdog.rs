use tokio::time::{Duration, Instant};

/// Tracks the last message receipt and reports a stalled stream. Knows
/// nothing about the connection itself.
#[derive(Debug, Clone)]
pub struct LivenessWatchdog {
    period: Duration,
    max_silence: Duration,
    last_seen: Instant,
}

impl LivenessWatchdog {
    pub fn new(period: Duration, max_silence: Duration, now: Instant) -> Self {
        Self {
            period,
            max_silence,
            last_seen: now,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn record(&mut self, now: Instant) {
        self.last_seen = now;
    }

    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        self.silence(now) > self.max_silence
    }
}

/// Single pending reconnect. Arming while armed is a no-op.
#[derive(Debug, Clone)]
pub struct ReconnectTimer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl ReconnectTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Returns true only if this call armed the timer.
    pub fn arm(&mut self, now: Instant) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(now + self.delay);
        true
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }
}
