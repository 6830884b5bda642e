use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveDateTime;

use crate::error::ParseError;
use crate::types::{LogEntry, TimedRequest};

/// The requests of one origin, in log order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginSequence {
    pub origin_id: String,
    pub requests: Vec<TimedRequest>,
}

/// Per-origin request sequences with offsets from the start of the log.
///
/// Origins are kept in the order they were first seen in the log.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Timeline {
    origins: Vec<OriginSequence>,
    index: HashMap<String, usize>,
    log_start: Option<NaiveDateTime>,
    recorded_timespan: Duration,
}

impl Timeline {
    /// Build a timeline from parser output, stopping at the first fatal
    /// parse error.
    pub fn build<I>(entries: I) -> Result<Self, ParseError>
    where
        I: IntoIterator<Item = Result<LogEntry, ParseError>>,
    {
        let entries = entries.into_iter().collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_entries(entries))
    }

    pub fn from_entries(entries: Vec<LogEntry>) -> Self {
        // Earliest real timestamp; synthetic ones only count when there is no real one
        let log_start = entries
            .iter()
            .filter_map(|e| e.timestamp)
            .min()
            .or_else(|| entries.iter().map(LogEntry::effective_time).min());

        let mut timeline = Timeline {
            log_start,
            ..Default::default()
        };
        let Some(start) = log_start else {
            return timeline;
        };

        let synthetic = entries.iter().filter(|e| e.is_synthetic()).count();
        if synthetic > 0 && synthetic < entries.len() {
            tracing::warn!(
                synthetic,
                total = entries.len(),
                "log mixes timestamped and untimestamped requests; untimestamped ones are paced from parse time"
            );
        }

        for entry in entries {
            let offset = (entry.effective_time() - start).to_std().unwrap_or(Duration::ZERO);
            timeline.push(entry.origin_id, offset, entry.request, entry.line);
        }

        timeline.recorded_timespan = timeline
            .origins
            .iter()
            .filter_map(|seq| seq.requests.last())
            .map(|r| r.offset)
            .max()
            .unwrap_or(Duration::ZERO);

        tracing::debug!(
            origins = timeline.origins.len(),
            requests = timeline.len(),
            timespan_ms = timeline.recorded_timespan.as_millis() as u64,
            "timeline built"
        );
        timeline
    }

    fn push(&mut self, origin_id: String, offset: Duration, request: String, line: usize) {
        let idx = match self.index.get(&origin_id) {
            Some(&idx) => idx,
            None => {
                let idx = self.origins.len();
                self.index.insert(origin_id.clone(), idx);
                self.origins.push(OriginSequence {
                    origin_id,
                    requests: Vec::new(),
                });
                idx
            }
        };

        let seq = &mut self.origins[idx];
        let floor = seq.requests.last().map_or(Duration::ZERO, |r| r.offset);
        let offset = if offset < floor {
            tracing::debug!(
                origin = %seq.origin_id,
                line,
                "timestamp goes backwards within origin; keeping log order"
            );
            floor
        } else {
            offset
        };
        seq.requests.push(TimedRequest::new(offset, request));
    }

    /// Total number of requests.
    pub fn len(&self) -> usize {
        self.origins.iter().map(|seq| seq.requests.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    pub fn origin_count(&self) -> usize {
        self.origins.len()
    }

    pub fn get(&self, origin_id: &str) -> Option<&[TimedRequest]> {
        self.index
            .get(origin_id)
            .map(|&idx| self.origins[idx].requests.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = &OriginSequence> {
        self.origins.iter()
    }

    pub fn log_start(&self) -> Option<NaiveDateTime> {
        self.log_start
    }

    /// Offset of the latest request in the log.
    pub fn recorded_timespan(&self) -> Duration {
        self.recorded_timespan
    }
}

impl IntoIterator for Timeline {
    type Item = OriginSequence;
    type IntoIter = std::vec::IntoIter<OriginSequence>;

    fn into_iter(self) -> Self::IntoIter {
        self.origins.into_iter()
    }
}
