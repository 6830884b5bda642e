//! logplayer - replays recorded oro-server request logs
//!
//! Every `thread <id>` of the recorded server becomes one concurrent worker
//! with its own connection, and requests are sent no earlier than their
//! recorded offset from the start of the log.
//!
//! # Example
//!
//! ```
//! use logplayer::{LogParser, Timeline, TimestampPolicy};
//! use std::time::Duration;
//!
//! let log = "\
//! 20230101 10:00:00.000000 thread 1 >> Got incoming request: listAgents()
//! 20230101 10:00:00.050000 thread 2 >> Got incoming request: reset()";
//!
//! let timeline = Timeline::build(LogParser::new(log.lines(), TimestampPolicy::Skip)).unwrap();
//! assert_eq!(timeline.origin_count(), 2);
//! assert_eq!(timeline.get("2").unwrap()[0].offset, Duration::from_millis(50));
//! ```

pub mod error;
pub mod log;
pub mod oro;
pub mod replay;
pub mod types;

pub use error::{ConnectError, DispatchError, ParseError, ReplayError, Result};
pub use log::{LogParser, Timeline};
pub use oro::{Connection, Connector, MethodTable, Request, TcpConnector};
pub use replay::{ConsoleReporter, NullSink, ProgressSink, ReplayConfig, ReplayState, Replayer};
pub use types::{LogEntry, Pacing, ReplayStats, TimedRequest, TimestampPolicy};
