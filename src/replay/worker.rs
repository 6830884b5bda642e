use std::collections::VecDeque;
use std::time::Instant;

use tokio::sync::{mpsc, watch};

use crate::oro::{Connection, Request};
use crate::replay::progress::{Outcome, ProgressEvent};
use crate::types::{Pacing, TimedRequest};

/// What a worker did before it finished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub origin_id: String,
    /// Requests sent (or attempted) on the connection
    pub dispatched: usize,
    /// Dispatched requests that did not succeed
    pub failed: usize,
    /// Requests left in the queue when the worker gave up
    pub abandoned: usize,
    pub cancelled: bool,
}

/// Replays the requests of one origin on its own connection.
pub struct OriginWorker<C> {
    origin_id: String,
    connection: C,
    queue: VecDeque<TimedRequest>,
}

impl<C: Connection> OriginWorker<C> {
    pub fn new(origin_id: impl Into<String>, connection: C, requests: Vec<TimedRequest>) -> Self {
        Self {
            origin_id: origin_id.into(),
            connection,
            queue: requests.into(),
        }
    }

    pub fn origin_id(&self) -> &str {
        &self.origin_id
    }

    /// Append a request behind the ones already queued.
    pub fn enqueue(&mut self, request: TimedRequest) {
        self.queue.push_back(request);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Send every queued request in order, none before `replay_start + offset`.
    ///
    /// Request failures are reported and skipped; a broken connection or a
    /// cancellation ends the run and the rest of the queue is abandoned.
    /// The connection is closed before returning.
    pub async fn run(
        mut self,
        replay_start: Instant,
        pacing: Pacing,
        events: mpsc::UnboundedSender<ProgressEvent>,
        mut cancel: watch::Receiver<bool>,
    ) -> WorkerReport {
        let mut report = WorkerReport {
            origin_id: self.origin_id.clone(),
            ..Default::default()
        };

        while let Some(next) = self.queue.pop_front() {
            let deadline = replay_start + next.offset;

            let on_time = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => false,
                _ = wait_until(deadline, pacing) => true,
            };
            if !on_time {
                self.queue.push_front(next);
                report.cancelled = true;
                self.abandon(&mut report, &events, "replay cancelled");
                break;
            }

            let lateness = Instant::now().saturating_duration_since(deadline);
            let result = match Request::parse(&next.request) {
                Ok(request) => self.connection.dispatch(&request).await,
                Err(e) => Err(e),
            };
            report.dispatched += 1;

            let outcome = match &result {
                Ok(_) => {
                    tracing::debug!(origin = %self.origin_id, request = %next.request, "replayed");
                    Outcome::Ok
                }
                Err(e) => {
                    report.failed += 1;
                    if e.is_request_local() {
                        tracing::warn!(origin = %self.origin_id, request = %next.request, "request failed: {}", e);
                    } else {
                        tracing::error!(origin = %self.origin_id, request = %next.request, "{}", e);
                    }
                    Outcome::from(e)
                }
            };
            let connection_lost = matches!(outcome, Outcome::Connection(_));

            let _ = events.send(ProgressEvent::Dispatched {
                origin: self.origin_id.clone(),
                offset: next.offset,
                lateness,
                request: next.request,
                outcome,
            });

            if connection_lost {
                self.abandon(&mut report, &events, "connection lost");
                break;
            }
        }

        self.connection.close().await;
        tracing::debug!(
            origin = %report.origin_id,
            dispatched = report.dispatched,
            failed = report.failed,
            abandoned = report.abandoned,
            "worker finished"
        );
        report
    }

    fn abandon(
        &mut self,
        report: &mut WorkerReport,
        events: &mpsc::UnboundedSender<ProgressEvent>,
        reason: &str,
    ) {
        let count = self.queue.len();
        self.queue.clear();
        report.abandoned += count;
        if count > 0 {
            tracing::warn!(origin = %self.origin_id, count, "abandoning requests: {}", reason);
            let _ = events.send(ProgressEvent::Abandoned {
                origin: self.origin_id.clone(),
                reason: reason.to_string(),
                count,
            });
        }
    }
}

/// Resolves once the flag is raised; never resolves if nobody can raise it.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|raised| *raised).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn wait_until(deadline: Instant, pacing: Pacing) {
    match pacing {
        Pacing::Sleep => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        Pacing::Spin => {
            while Instant::now() < deadline {
                tokio::task::yield_now().await;
            }
        }
    }
}
