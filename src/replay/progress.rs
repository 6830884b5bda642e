//! Progress reporting. Workers only send events; nothing here feeds back
//! into the replay.

use std::time::Duration;

use console::style;
use tokio::sync::mpsc;

use crate::error::DispatchError;
use crate::types::ReplayStats;

/// Result of one dispatched request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Malformed(String),
    Remote(String),
    Connection(String),
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok)
    }
}

impl From<&DispatchError> for Outcome {
    fn from(e: &DispatchError) -> Self {
        match e {
            DispatchError::Malformed(msg) => Outcome::Malformed(msg.clone()),
            DispatchError::Remote { .. } => Outcome::Remote(e.to_string()),
            DispatchError::Connection(io) => Outcome::Connection(io.to_string()),
        }
    }
}

/// Messages from workers to the reporter.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Dispatched {
        origin: String,
        offset: Duration,
        /// How far past its offset the request actually went out
        lateness: Duration,
        request: String,
        outcome: Outcome,
    },
    /// Requests of an origin that will never be sent.
    Abandoned {
        origin: String,
        reason: String,
        count: usize,
    },
}

/// What a sink receives for each dispatched request.
#[derive(Debug, Clone)]
pub struct RequestReport<'a> {
    pub origin: &'a str,
    pub offset: Duration,
    pub lateness: Duration,
    /// Fraction of the replayable requests done so far, in `0.0..=1.0`
    pub progress: f64,
    pub request: &'a str,
    pub outcome: &'a Outcome,
}

pub trait ProgressSink: Send {
    fn on_request(&mut self, report: &RequestReport<'_>);

    fn on_abandoned(&mut self, _origin: &str, _reason: &str, _count: usize) {}

    fn on_finished(&mut self, stats: &ReplayStats);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn on_request(&mut self, _report: &RequestReport<'_>) {}

    fn on_finished(&mut self, _stats: &ReplayStats) {}
}

/// Cumulative progress. Abandoned requests leave the denominator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Progress {
    total: usize,
    done: usize,
    excluded: usize,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub fn record_done(&mut self) {
        self.done += 1;
    }

    pub fn exclude(&mut self, count: usize) {
        self.excluded += count;
    }

    pub fn fraction(&self) -> f64 {
        let expected = self.total.saturating_sub(self.excluded);
        if expected == 0 {
            1.0
        } else {
            (self.done as f64 / expected as f64).min(1.0)
        }
    }
}

/// Drain worker events into `sink` until every sender is gone.
pub(crate) async fn forward<S: ProgressSink>(
    mut events: mpsc::UnboundedReceiver<ProgressEvent>,
    mut sink: S,
    mut progress: Progress,
) -> S {
    while let Some(event) = events.recv().await {
        match event {
            ProgressEvent::Dispatched {
                origin,
                offset,
                lateness,
                request,
                outcome,
            } => {
                progress.record_done();
                sink.on_request(&RequestReport {
                    origin: &origin,
                    offset,
                    lateness,
                    progress: progress.fraction(),
                    request: &request,
                    outcome: &outcome,
                });
            }
            ProgressEvent::Abandoned { origin, reason, count } => {
                progress.exclude(count);
                sink.on_abandoned(&origin, &reason, count);
            }
        }
    }
    sink
}

/// Prints one line per request and a final summary on stdout.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    quiet: bool,
}

impl ConsoleReporter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

pub fn format_duration(d: Duration) -> String {
    let ms = d.as_secs_f64() * 1000.0;
    if ms >= 1000.0 {
        format!("{:.3}s", d.as_secs_f64())
    } else {
        format!("{:.1}ms", ms)
    }
}

pub fn format_ratio(ratio: Option<f64>) -> String {
    match ratio {
        Some(r) => format!("{:.3}", r),
        None => "n/a".to_string(),
    }
}

impl ProgressSink for ConsoleReporter {
    fn on_request(&mut self, report: &RequestReport<'_>) {
        if self.quiet {
            return;
        }
        let head = format!(
            "[{:>3}% - THREAD {} @ +{} (late {})]",
            (report.progress * 100.0).floor() as u32,
            report.origin,
            format_duration(report.offset),
            format_duration(report.lateness),
        );
        match report.outcome {
            Outcome::Ok => println!("{} {}", style(head).green(), report.request),
            Outcome::Malformed(msg) => println!(
                "{} {} {}",
                style(head).yellow(),
                report.request,
                style(format!("[SYNTAX ERROR] {}", msg)).yellow()
            ),
            Outcome::Remote(msg) => println!(
                "{} {} {}",
                style(head).red(),
                report.request,
                style(format!("[ORO ERROR] {}", msg)).red()
            ),
            Outcome::Connection(msg) => println!(
                "{} {} {}",
                style(head).red().bold(),
                report.request,
                style(format!("[CONNECTION ERROR] {}", msg)).red()
            ),
        }
    }

    fn on_abandoned(&mut self, origin: &str, reason: &str, count: usize) {
        if self.quiet {
            return;
        }
        println!(
            "{}",
            style(format!(
                "[THREAD {} GIVEN UP: {} request(s) not replayed - {}]",
                origin, count, reason
            ))
            .red()
        );
    }

    fn on_finished(&mut self, stats: &ReplayStats) {
        println!();
        println!("{}", style("━━━ Replay summary ━━━").cyan().bold());
        println!("  Requests replayed:  {}", stats.requests_replayed);
        if stats.failed_requests > 0 {
            println!("  Failed requests:    {}", style(stats.failed_requests).red());
        }
        if stats.abandoned_requests > 0 {
            println!("  Abandoned requests: {}", style(stats.abandoned_requests).red());
        }
        println!("  Origins:            {}", stats.origins);
        println!("  Recorded timespan:  {}", format_duration(stats.recorded_timespan));
        println!("  Actual timespan:    {}", format_duration(stats.actual_timespan));
        println!("  Slowdown ratio:     {}", format_ratio(stats.slowdown_ratio));
    }
}
