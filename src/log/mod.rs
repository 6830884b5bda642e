//! Extraction of replayable requests from an oro-server log.
//!
//! The server writes one line per incoming request:
//!
//! ```text
//! [20230101 10:00:00.000 thread 42] >> Got incoming request: add([a b c])
//! ```
//!
//! Lines without a timestamp (`thread 42 ... Got incoming request: ...`) are
//! accepted too and get the parse instant as a stand-in timestamp. Anything
//! else is ignored.

pub mod timeline;

use std::sync::OnceLock;

use chrono::{Local, NaiveDateTime};
use regex::Regex;

use crate::error::ParseError;
use crate::types::{LogEntry, TimestampPolicy};

pub use timeline::Timeline;

/// Timestamp layout written by the server's logger.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d %H:%M:%S%.f";

const REQUEST_MARKER: &str = "Got incoming request: ";

struct LinePatterns {
    timestamped: Regex,
    bare: Regex,
}

fn patterns() -> &'static LinePatterns {
    static PATTERNS: OnceLock<LinePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| LinePatterns {
        timestamped: Regex::new(r"(\d{8} \d{2}:\d{2}:\d{2}(?:\.\d+)?)\s+thread (\d+)")
            .expect("timestamp pattern is valid"),
        bare: Regex::new(r"thread (\d+)").expect("thread pattern is valid"),
    })
}

/// Parse a log timestamp such as `20230101 10:00:00.050000`.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT).ok()
}

/// Extract the entry carried by one line, if any.
///
/// Origin and timestamp are only looked for before the request marker, so
/// request text mentioning a thread never changes the origin.
/// `parsed_at` is the stand-in timestamp used when the line has none.
pub fn parse_line(
    line_no: usize,
    line: &str,
    policy: TimestampPolicy,
    parsed_at: NaiveDateTime,
) -> Result<Option<LogEntry>, ParseError> {
    let Some(pos) = line.find(REQUEST_MARKER) else {
        return Ok(None);
    };
    let (head, tail) = line.split_at(pos);
    let request = tail[REQUEST_MARKER.len()..].trim_end();
    if request.is_empty() {
        return Ok(None);
    }

    let patterns = patterns();

    if let Some(caps) = patterns.timestamped.captures(head) {
        let stamp = &caps[1];
        return match parse_timestamp(stamp) {
            Some(timestamp) => Ok(Some(LogEntry {
                origin_id: caps[2].to_string(),
                timestamp: Some(timestamp),
                parsed_at,
                request: request.to_string(),
                line: line_no,
            })),
            None => match policy {
                TimestampPolicy::Strict => Err(ParseError::BadTimestamp {
                    line: line_no,
                    text: stamp.to_string(),
                }),
                TimestampPolicy::Skip => {
                    tracing::warn!(line = line_no, timestamp = stamp, "skipping line with malformed timestamp");
                    Ok(None)
                }
            },
        };
    }

    Ok(patterns.bare.captures(head).map(|caps| LogEntry {
        origin_id: caps[1].to_string(),
        timestamp: None,
        parsed_at,
        request: request.to_string(),
        line: line_no,
    }))
}

/// Lazy iterator of the entries found in a sequence of log lines.
pub struct LogParser<I> {
    lines: std::iter::Enumerate<I>,
    policy: TimestampPolicy,
    failed: bool,
}

impl<I, S> LogParser<I>
where
    I: Iterator<Item = S>,
    S: AsRef<str>,
{
    pub fn new(lines: I, policy: TimestampPolicy) -> Self {
        Self {
            lines: lines.enumerate(),
            policy,
            failed: false,
        }
    }
}

impl<I, S> Iterator for LogParser<I>
where
    I: Iterator<Item = S>,
    S: AsRef<str>,
{
    type Item = Result<LogEntry, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        for (idx, line) in self.lines.by_ref() {
            let parsed_at = Local::now().naive_local();
            match parse_line(idx + 1, line.as_ref(), self.policy, parsed_at) {
                Ok(Some(entry)) => return Some(Ok(entry)),
                Ok(None) => continue,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
