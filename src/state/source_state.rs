use crate::state::PollCursor;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// Longest wait a source will ever schedule, whatever a server asks for
pub const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

fn deadline(now: Instant, wait: Duration) -> Instant {
    let wait = wait.min(MAX_WAIT);
    now.checked_add(wait).unwrap_or(now)
}

/// Where a source currently is in its poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcePhase {
    Idle,
    Fetching,
    Normalizing,
    Persisting,
    /// Waiting out a rate limit or repeated transient failures
    BackoffWait,
}

impl SourcePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Normalizing => "normalizing",
            Self::Persisting => "persisting",
            Self::BackoffWait => "backoff_wait",
        }
    }
}

/// Exponential backoff capped at a maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Delay before attempt number `failures` + 1
    ///
    /// `initial * 2^(failures - 1)`, capped at `max`. A server-provided
    /// `retry_after` is a floor and may exceed the cap.
    pub fn delay_for(&self, failures: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let exponential = self
            .initial
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max);

        match retry_after {
            Some(floor) => exponential.max(floor),
            None => exponential,
        }
    }
}

/// Tracks the state of one source between and during cycles
///
/// Owned by the source's worker task; nothing else mutates it.
#[derive(Debug, Clone)]
pub struct SourceState {
    pub phase: SourcePhase,

    /// Only replaced after a fully persisted cycle
    pub cursor: PollCursor,

    /// Failed cycles since the last success
    pub consecutive_failures: u32,

    /// End of the current BackoffWait, if any
    pub backoff_until: Option<Instant>,

    /// Earliest time the next cycle may start
    pub next_due: Instant,

    pub last_success: Option<DateTime<Utc>>,

    pub completed_cycles: u64,
}

impl SourceState {
    /// Creates a state that is due immediately
    pub fn new(cursor: PollCursor, now: Instant) -> Self {
        Self {
            phase: SourcePhase::Idle,
            cursor,
            consecutive_failures: 0,
            backoff_until: None,
            next_due: now,
            last_success: None,
            completed_cycles: 0,
        }
    }

    /// Checks whether a cycle may start now
    pub fn can_poll(&self, now: Instant) -> bool {
        self.time_until_next_poll(now).is_none()
    }

    /// Returns None if a cycle can start now, or the duration to wait otherwise
    pub fn time_until_next_poll(&self, now: Instant) -> Option<Duration> {
        let due = match self.backoff_until {
            Some(until) => until.max(self.next_due),
            None => self.next_due,
        };
        if now < due {
            Some(due - now)
        } else {
            None
        }
    }

    pub fn is_backing_off(&self, now: Instant) -> bool {
        matches!(self.backoff_until, Some(until) if now < until)
    }

    /// Moves into a working phase, leaving BackoffWait if it has expired
    pub fn enter(&mut self, phase: SourcePhase) {
        if phase != SourcePhase::BackoffWait {
            self.backoff_until = None;
        }
        self.phase = phase;
    }

    /// Records a fully persisted cycle
    ///
    /// A full page (`has_more`) makes the source due again immediately so it
    /// can catch up; `min_delay` (a server backoff hint) still applies.
    pub fn record_success(
        &mut self,
        cursor: PollCursor,
        now: Instant,
        interval: Duration,
        has_more: bool,
        min_delay: Option<Duration>,
    ) {
        self.cursor = cursor;
        self.consecutive_failures = 0;
        self.backoff_until = None;
        self.phase = SourcePhase::Idle;
        self.last_success = Some(Utc::now());
        self.completed_cycles += 1;

        let wait = if has_more { Duration::ZERO } else { interval };
        self.next_due = deadline(now, wait.max(min_delay.unwrap_or(Duration::ZERO)));
    }

    /// Records a failed cycle that waits for the regular interval
    ///
    /// The cursor is left untouched so the same window is fetched again.
    pub fn record_failure(&mut self, now: Instant, interval: Duration) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.phase = SourcePhase::Idle;
        self.next_due = deadline(now, interval);
    }

    /// Enters BackoffWait and returns how long it lasts
    pub fn enter_backoff(
        &mut self,
        now: Instant,
        policy: &BackoffPolicy,
        retry_after: Option<Duration>,
    ) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let delay = policy
            .delay_for(self.consecutive_failures, retry_after)
            .min(MAX_WAIT);
        self.backoff_until = Some(deadline(now, delay));
        self.next_due = deadline(now, delay);
        self.phase = SourcePhase::BackoffWait;
        delay
    }
}
