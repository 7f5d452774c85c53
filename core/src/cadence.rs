//! Fixed-period duty scheduling for the driver loop

/// Fires at most once per `period_ms`; the first check always fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    period_ms: u64,
    last_ms: Option<u64>,
}

impl Cadence {
    pub const fn new(period_ms: u64) -> Self {
        Self {
            period_ms,
            last_ms: None,
        }
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    /// Whether the duty should run at `now_ms`; stamps the run if so
    pub fn due(&mut self, now_ms: u64) -> bool {
        let due = match self.last_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.period_ms,
        };
        if due {
            self.last_ms = Some(now_ms);
        }
        due
    }

    /// Make the next check fire
    pub fn reset(&mut self) {
        self.last_ms = None;
    }

    /// Record a run at `now_ms` that happened outside [`due`](Self::due)
    pub fn mark(&mut self, now_ms: u64) {
        self.last_ms = Some(now_ms);
    }
}

/// Periods used by the board's driver loop
pub mod periods {
    pub const QUEUE_TICK_MS: u64 = 100;
    /// Must stay below the 60 s due window or reminders get skipped
    pub const REMINDER_CHECK_MS: u64 = 30_000;
    pub const COMMAND_POLL_MS: u64 = 30_000;
    pub const RELOAD_MS: u64 = 5 * 60_000;
    /// Reload period until the reminders document has been read once
    pub const RELOAD_RETRY_MS: u64 = 10_000;
    pub const STATUS_MS: u64 = 5 * 60_000;
    pub const HEALTH_MS: u64 = 60_000;
}
