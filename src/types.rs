use std::fmt;
use std::time::Duration;

use chrono::NaiveDateTime;

/// One request extracted from a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Thread id of the caller on the recorded server
    pub origin_id: String,
    /// Recorded timestamp, `None` when the line carried none
    pub timestamp: Option<NaiveDateTime>,
    /// Wall-clock time at which the line was parsed
    pub parsed_at: NaiveDateTime,
    /// Request text, e.g. `add([a b c])`
    pub request: String,
    /// 1-based line number in the source log
    pub line: usize,
}

impl LogEntry {
    /// Recorded timestamp, or the parse instant standing in for it.
    pub fn effective_time(&self) -> NaiveDateTime {
        self.timestamp.unwrap_or(self.parsed_at)
    }

    pub fn is_synthetic(&self) -> bool {
        self.timestamp.is_none()
    }
}

/// A request paired with its pacing target relative to the log start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedRequest {
    pub offset: Duration,
    pub request: String,
}

impl TimedRequest {
    pub fn new(offset: Duration, request: impl Into<String>) -> Self {
        Self {
            offset,
            request: request.into(),
        }
    }
}

/// What to do with a line whose timestamp has the right shape but is not a
/// valid date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampPolicy {
    /// Warn and drop the line
    #[default]
    Skip,
    /// Abort the run
    Strict,
}

/// How a worker waits for the next request's offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Pacing {
    /// Sleep until the deadline
    #[default]
    Sleep,
    /// Spin on the clock, yielding to the scheduler between checks
    Spin,
}

impl fmt::Display for Pacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pacing::Sleep => write!(f, "sleep"),
            Pacing::Spin => write!(f, "spin"),
        }
    }
}

/// Aggregate timing of a finished replay.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReplayStats {
    /// Requests sent to the server, failed ones included
    pub requests_replayed: usize,
    /// Requests that were malformed or rejected by the server
    pub failed_requests: usize,
    /// Requests never sent because their worker lost its connection or was cancelled
    pub abandoned_requests: usize,
    /// Number of distinct origins in the log
    pub origins: usize,
    pub recorded_timespan: Duration,
    pub actual_timespan: Duration,
    /// `actual / recorded`; `None` when nothing was recorded over time
    pub slowdown_ratio: Option<f64>,
}

impl ReplayStats {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn slowdown(recorded: Duration, actual: Duration) -> Option<f64> {
        if recorded.is_zero() {
            None
        } else {
            Some(actual.as_secs_f64() / recorded.as_secs_f64())
        }
    }
}
