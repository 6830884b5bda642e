use thiserror::Error;

/// Fatal problems found while turning a log into a timeline.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("line {line}: malformed timestamp '{text}'")]
    BadTimestamp { line: usize, text: String },
}

/// A worker could not get a connection to the remote service.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("could not connect to {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to {addr}")]
    Timeout { addr: String },
}

/// Failure of a single replayed request.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The request text could not be understood locally; nothing was sent.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The server answered with an error frame.
    #[error("server error {exception}: {message}")]
    Remote { exception: String, message: String },

    /// The connection broke; the worker cannot continue on it.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),
}

impl DispatchError {
    /// True when the error only concerns the request itself and the
    /// connection can keep being used.
    pub fn is_request_local(&self) -> bool {
        !matches!(self, DispatchError::Connection(_))
    }
}

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReplayError>;
