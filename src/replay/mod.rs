//! Concurrent replay of a timeline: one worker and one connection per origin,
//! all paced from a single start instant.

pub mod progress;
pub mod worker;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::error::Result;
use crate::log::{LogParser, Timeline};
use crate::oro::Connector;
use crate::types::{Pacing, ReplayStats, TimestampPolicy};

pub use progress::{ConsoleReporter, NullSink, Outcome, Progress, ProgressEvent, ProgressSink, RequestReport};
pub use worker::{OriginWorker, WorkerReport};

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayConfig {
    pub pacing: Pacing,
    pub timestamp_policy: TimestampPolicy,
}

/// Lifecycle of a replay run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    Parsing,
    Scheduled,
    Running,
    Completed,
}

impl std::fmt::Display for ReplayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayState::Parsing => write!(f, "parsing"),
            ReplayState::Scheduled => write!(f, "scheduled"),
            ReplayState::Running => write!(f, "running"),
            ReplayState::Completed => write!(f, "completed"),
        }
    }
}

/// Drives a replay from log to final statistics.
pub struct Replayer<K> {
    connector: Arc<K>,
    config: ReplayConfig,
    state: ReplayState,
}

impl<K> Replayer<K>
where
    K: Connector + 'static,
{
    pub fn new(connector: K, config: ReplayConfig) -> Self {
        Self {
            connector: Arc::new(connector),
            config,
            state: ReplayState::Parsing,
        }
    }

    pub fn state(&self) -> ReplayState {
        self.state
    }

    fn transition(&mut self, next: ReplayState) {
        tracing::debug!(from = %self.state, to = %next, "replay state");
        self.state = next;
    }

    /// Build the timeline of a log file.
    pub fn load(&self, path: &Path) -> Result<Timeline> {
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8_lossy(&bytes);
        self.parse(text.lines())
    }

    /// Build the timeline of in-memory log lines.
    pub fn parse<I, S>(&self, lines: I) -> Result<Timeline>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let timeline = Timeline::build(LogParser::new(lines.into_iter(), self.config.timestamp_policy))?;
        tracing::info!(
            requests = timeline.len(),
            origins = timeline.origin_count(),
            "Parsed log"
        );
        Ok(timeline)
    }

    /// Parse `lines` and replay them.
    pub async fn replay_lines<I, S, P>(
        &mut self,
        lines: I,
        sink: P,
        cancel: watch::Receiver<bool>,
    ) -> Result<ReplayStats>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        P: ProgressSink + 'static,
    {
        self.state = ReplayState::Parsing;
        let timeline = self.parse(lines)?;
        Ok(self.run(timeline, sink, cancel).await)
    }

    /// Replay a timeline and wait for every origin to finish.
    ///
    /// Per-request and per-connection failures are reported to `sink` and
    /// counted in the returned stats; they never fail the run.
    pub async fn run<P>(&mut self, timeline: Timeline, mut sink: P, cancel: watch::Receiver<bool>) -> ReplayStats
    where
        P: ProgressSink + 'static,
    {
        let mut stats = ReplayStats {
            origins: timeline.origin_count(),
            recorded_timespan: timeline.recorded_timespan(),
            ..ReplayStats::empty()
        };

        if timeline.is_empty() {
            tracing::info!("Nothing to replay");
            self.transition(ReplayState::Completed);
            sink.on_finished(&stats);
            return stats;
        }

        let total = timeline.len();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let reporter = tokio::spawn(progress::forward(events_rx, sink, Progress::new(total)));

        // Scheduled: every origin gets its own connection before the clock starts
        self.transition(ReplayState::Scheduled);
        let mut opening = JoinSet::new();
        // Origins whose connect task has not reported back yet
        let mut unopened: HashMap<String, usize> = HashMap::new();
        for seq in timeline {
            unopened.insert(seq.origin_id.clone(), seq.requests.len());
            let connector = Arc::clone(&self.connector);
            opening.spawn(async move {
                let conn = connector.open().await;
                (seq, conn)
            });
        }

        let mut workers = Vec::new();
        while let Some(joined) = opening.join_next().await {
            if let Ok((seq, _)) = &joined {
                unopened.remove(&seq.origin_id);
            }
            match joined {
                Ok((seq, Ok(conn))) => {
                    workers.push(OriginWorker::new(seq.origin_id, conn, seq.requests));
                }
                Ok((seq, Err(e))) => {
                    tracing::error!(origin = %seq.origin_id, "Connection failed: {}", e);
                    stats.abandoned_requests += seq.requests.len();
                    let _ = events_tx.send(ProgressEvent::Abandoned {
                        origin: seq.origin_id,
                        reason: e.to_string(),
                        count: seq.requests.len(),
                    });
                }
                Err(e) => tracing::error!("Connection task failed: {}", e),
            }
        }
        for (origin, count) in unopened {
            stats.abandoned_requests += count;
            let _ = events_tx.send(ProgressEvent::Abandoned {
                origin,
                reason: "connection task failed".to_string(),
                count,
            });
        }

        // Running: the start instant is fixed before any worker exists
        self.transition(ReplayState::Running);
        let replay_start = Instant::now();
        tracing::info!(workers = workers.len(), pacing = %self.config.pacing, "Replay started");

        let mut running = JoinSet::new();
        for worker in workers {
            running.spawn(worker.run(replay_start, self.config.pacing, events_tx.clone(), cancel.clone()));
        }
        drop(events_tx);

        while let Some(joined) = running.join_next().await {
            match joined {
                Ok(report) => {
                    stats.requests_replayed += report.dispatched;
                    stats.failed_requests += report.failed;
                    stats.abandoned_requests += report.abandoned;
                }
                Err(e) => tracing::error!("Worker task failed: {}", e),
            }
        }
        stats.actual_timespan = replay_start.elapsed();
        stats.slowdown_ratio = ReplayStats::slowdown(stats.recorded_timespan, stats.actual_timespan);

        self.transition(ReplayState::Completed);
        tracing::info!(
            replayed = stats.requests_replayed,
            failed = stats.failed_requests,
            abandoned = stats.abandoned_requests,
            "Replay finished"
        );

        match reporter.await {
            Ok(mut sink) => sink.on_finished(&stats),
            Err(e) => tracing::error!("Progress reporter failed: {}", e),
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConnectError, DispatchError};
    use crate::oro::{Connection, Request};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<(usize, String, Instant)>>>;

    /// Hands out numbered in-memory connections; refuses ids in `refuse`
    /// and panics on ids in `panic_on`.
    #[derive(Default)]
    struct MemoryConnector {
        log: Log,
        opened: Arc<AtomicUsize>,
        refuse: Vec<usize>,
        panic_on: Vec<usize>,
    }

    struct MemoryConnection {
        id: usize,
        log: Log,
    }

    #[async_trait]
    impl Connection for MemoryConnection {
        async fn dispatch(&mut self, request: &Request) -> std::result::Result<String, DispatchError> {
            self.log
                .lock()
                .unwrap()
                .push((self.id, request.to_string(), Instant::now()));
            Ok(String::new())
        }

        async fn close(&mut self) {}
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        type Conn = MemoryConnection;

        async fn open(&self) -> std::result::Result<MemoryConnection, ConnectError> {
            let id = self.opened.fetch_add(1, Ordering::SeqCst);
            if self.panic_on.contains(&id) {
                panic!("connector blew up on {}", id);
            }
            if self.refuse.contains(&id) {
                return Err(ConnectError::Timeout {
                    addr: "memory".to_string(),
                });
            }
            Ok(MemoryConnection {
                id,
                log: Arc::clone(&self.log),
            })
        }
    }

    #[derive(Clone, Default)]
    struct Finished(Arc<Mutex<Option<ReplayStats>>>);

    impl ProgressSink for Finished {
        fn on_request(&mut self, _report: &RequestReport<'_>) {}

        fn on_finished(&mut self, stats: &ReplayStats) {
            *self.0.lock().unwrap() = Some(stats.clone());
        }
    }

    fn no_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn test_empty_log_completes_without_connecting() {
        let connector = MemoryConnector::default();
        let opened = Arc::clone(&connector.opened);
        let mut replayer = Replayer::new(connector, ReplayConfig::default());
        let sink = Finished::default();

        let stats = replayer
            .replay_lines(["no requests here"], sink.clone(), no_cancel())
            .await
            .unwrap();

        assert_eq!(stats.requests_replayed, 0);
        assert_eq!(stats.slowdown_ratio, None);
        assert_eq!(opened.load(Ordering::SeqCst), 0);
        assert_eq!(replayer.state(), ReplayState::Completed);
        assert_eq!(sink.0.lock().unwrap().clone(), Some(stats));
    }

    #[tokio::test]
    async fn test_one_connection_per_origin() {
        let connector = MemoryConnector::default();
        let log = Arc::clone(&connector.log);
        let opened = Arc::clone(&connector.opened);
        let mut replayer = Replayer::new(connector, ReplayConfig::default());

        let lines = [
            "20230101 10:00:00.000 thread 1 >> Got incoming request: listAgents()",
            "20230101 10:00:00.010 thread 1 >> Got incoming request: reset()",
            "20230101 10:00:00.020 thread 1 >> Got incoming request: stats()",
        ];
        let stats = replayer.replay_lines(lines, NullSink, no_cancel()).await.unwrap();

        assert_eq!(stats.requests_replayed, 3);
        assert_eq!(stats.origins, 1);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        let log = log.lock().unwrap();
        let sent: Vec<_> = log.iter().map(|(id, r, _)| (*id, r.as_str())).collect();
        assert_eq!(sent, vec![(0, "listAgents()"), (0, "reset()"), (0, "stats()")]);
    }

    #[tokio::test]
    async fn test_slowdown_is_reported() {
        let mut replayer = Replayer::new(MemoryConnector::default(), ReplayConfig::default());
        let lines = [
            "20230101 10:00:00.000 thread 1 >> Got incoming request: reset()",
            "20230101 10:00:00.040 thread 2 >> Got incoming request: reset()",
        ];
        let stats = replayer.replay_lines(lines, NullSink, no_cancel()).await.unwrap();

        assert_eq!(stats.recorded_timespan, Duration::from_millis(40));
        assert!(stats.actual_timespan >= Duration::from_millis(40));
        assert!(stats.slowdown_ratio.unwrap() >= 1.0);
    }

    #[tokio::test]
    async fn test_refused_connection_does_not_stop_other_origins() {
        let connector = MemoryConnector {
            refuse: vec![0],
            ..Default::default()
        };
        let log = Arc::clone(&connector.log);
        let mut replayer = Replayer::new(connector, ReplayConfig::default());
        let lines = [
            "20230101 10:00:00.000 thread 1 >> Got incoming request: reset()",
            "20230101 10:00:00.000 thread 2 >> Got incoming request: reset()",
            "20230101 10:00:00.001 thread 2 >> Got incoming request: stats()",
        ];
        let stats = replayer.replay_lines(lines, NullSink, no_cancel()).await.unwrap();

        // Whichever origin got connection 0 was dropped, the other one ran
        assert_eq!(stats.requests_replayed + stats.abandoned_requests, 3);
        assert!(stats.requests_replayed >= 1);
        assert_eq!(log.lock().unwrap().len(), stats.requests_replayed);
    }

    #[tokio::test]
    async fn test_panicking_connect_task_counts_requests_as_abandoned() {
        let connector = MemoryConnector {
            panic_on: vec![0],
            ..Default::default()
        };
        let mut replayer = Replayer::new(connector, ReplayConfig::default());
        let sink = Finished::default();
        let lines = [
            "20230101 10:00:00.000 thread 1 >> Got incoming request: reset()",
            "20230101 10:00:00.001 thread 1 >> Got incoming request: stats()",
            "20230101 10:00:00.000 thread 2 >> Got incoming request: reset()",
        ];
        let stats = replayer.replay_lines(lines, sink.clone(), no_cancel()).await.unwrap();

        assert_eq!(stats.requests_replayed + stats.abandoned_requests, 3);
        assert!(stats.abandoned_requests >= 1);
        assert_eq!(replayer.state(), ReplayState::Completed);
        assert_eq!(sink.0.lock().unwrap().clone(), Some(stats));
    }

    #[tokio::test]
    async fn test_cancel_before_start_abandons_everything() {
        let connector = MemoryConnector::default();
        let log = Arc::clone(&connector.log);
        let mut replayer = Replayer::new(connector, ReplayConfig::default());
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let lines = [
            "20230101 10:00:00.000 thread 1 >> Got incoming request: reset()",
            "20230101 10:00:05.000 thread 2 >> Got incoming request: reset()",
        ];
        let stats = replayer.replay_lines(lines, NullSink, rx).await.unwrap();

        assert_eq!(stats.requests_replayed, 0);
        assert_eq!(stats.abandoned_requests, 2);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_strict_timestamps_fail_the_run() {
        let config = ReplayConfig {
            timestamp_policy: TimestampPolicy::Strict,
            ..Default::default()
        };
        let mut replayer = Replayer::new(MemoryConnector::default(), config);
        let lines = ["20230101 10:61:00.000 thread 1 >> Got incoming request: reset()"];
        assert!(replayer.replay_lines(lines, NullSink, no_cancel()).await.is_err());
    }
}
