use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use super::MESSAGE_TERMINATOR;

/// A reply frame from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(String),
    Error { exception: String, message: String },
}

pub struct ResponseReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> ResponseReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next reply, skipping event notifications.
    ///
    /// Returns `None` on a clean EOF between frames.
    pub async fn read_response(&mut self) -> io::Result<Option<Response>> {
        loop {
            let Some(mut lines) = self.read_frame().await? else {
                return Ok(None);
            };
            if lines.is_empty() {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "empty frame"));
            }

            let status = lines.remove(0);
            match status.as_str() {
                "ok" => return Ok(Some(Response::Ok(lines.join("\n")))),
                "error" => {
                    let exception = if lines.is_empty() {
                        String::new()
                    } else {
                        lines.remove(0)
                    };
                    return Ok(Some(Response::Error {
                        exception,
                        message: lines.join("\n"),
                    }));
                }
                "event" => {
                    tracing::trace!(id = lines.first().map(String::as_str).unwrap_or(""), "skipping event frame");
                    continue;
                }
                other => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("unexpected reply status '{}'", other),
                    ))
                }
            }
        }
    }

    /// Lines up to the terminator, without it.
    async fn read_frame(&mut self) -> io::Result<Option<Vec<String>>> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).await?;
            if n == 0 {
                if lines.is_empty() {
                    return Ok(None); // EOF
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed in the middle of a reply",
                ));
            }

            let line = line.trim_end_matches(['\r', '\n']);
            if line == MESSAGE_TERMINATOR {
                return Ok(Some(lines));
            }
            // Blank lines between frames carry nothing
            if lines.is_empty() && line.is_empty() {
                continue;
            }
            lines.push(line.to_string());
        }
    }
}
