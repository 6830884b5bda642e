//! Client side of the oro-server text protocol.
//!
//! A request is the method name, one line per argument and a terminator:
//!
//! ```text
//! find
//! ?x
//! [?x rdf:type Robot]
//! #end#
//! ```
//!
//! The server answers `ok` or `error` frames closed by the same terminator,
//! and may interleave `event` frames for registered watchers.

pub mod reader;
pub mod request;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::{ConnectError, DispatchError};

pub use reader::{Response, ResponseReader};
pub use request::{Arg, ArgKind, MethodTable, Request};

pub const MESSAGE_TERMINATOR: &str = "#end#";
pub const DEFAULT_PORT: u16 = 6969;

/// One live connection, owned by a single worker.
#[async_trait]
pub trait Connection: Send {
    /// Send a request and wait for its reply.
    async fn dispatch(&mut self, request: &Request) -> Result<String, DispatchError>;

    /// Release the connection. Calling it again does nothing.
    async fn close(&mut self);
}

/// Opens connections to the remote service.
#[async_trait]
pub trait Connector: Send + Sync {
    type Conn: Connection + 'static;

    async fn open(&self) -> Result<Self::Conn, ConnectError>;
}

/// Connects to an oro-server over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
    connect_timeout: Duration,
    methods: Arc<MethodTable>,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(5),
            methods: Arc::new(MethodTable::oro()),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_methods(mut self, methods: MethodTable) -> Self {
        self.methods = Arc::new(methods);
        self
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Conn = OroConnection;

    async fn open(&self) -> Result<OroConnection, ConnectError> {
        let addr = self.addr();
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(ConnectError::Io { addr, source }),
            Err(_) => return Err(ConnectError::Timeout { addr }),
        };
        stream
            .set_nodelay(true)
            .map_err(|source| ConnectError::Io { addr: addr.clone(), source })?;
        tracing::debug!("Connected to {}", addr);
        Ok(OroConnection::new(stream, Arc::clone(&self.methods)))
    }
}

pub struct OroConnection {
    reader: ResponseReader<OwnedReadHalf>,
    writer: Option<OwnedWriteHalf>,
    methods: Arc<MethodTable>,
}

impl OroConnection {
    pub fn new(stream: TcpStream, methods: Arc<MethodTable>) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: ResponseReader::new(reader),
            writer: Some(writer),
            methods,
        }
    }
}

#[async_trait]
impl Connection for OroConnection {
    async fn dispatch(&mut self, request: &Request) -> Result<String, DispatchError> {
        let request = self.methods.validate(request)?;
        let writer = self.writer.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotConnected, "connection already closed")
        })?;

        writer.write_all(&request.encode()).await?;
        writer.flush().await?;

        match self.reader.read_response().await? {
            Some(Response::Ok(value)) => Ok(value),
            Some(Response::Error { exception, message }) => {
                Err(DispatchError::Remote { exception, message })
            }
            None => Err(DispatchError::Connection(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            ))),
        }
    }

    async fn close(&mut self) {
        let Some(mut writer) = self.writer.take() else {
            return;
        };
        let goodbye = format!("close\n{}\n", MESSAGE_TERMINATOR);
        if let Err(e) = writer.write_all(goodbye.as_bytes()).await {
            tracing::debug!("Error sending close: {}", e);
        }
        let _ = writer.shutdown().await;
    }
}
