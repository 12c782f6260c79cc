//! LadishClient - the front-end side of the Unix socket protocol.
//!
//! One request is in flight at a time. Events that arrive while waiting for a
//! reply are dropped; call `subscribe` to receive them instead.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tracing::debug;

use crate::{Event, Frame, FrameError, Reply, Request};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: String,
        source: std::io::Error,
    },

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("daemon closed the connection")]
    Closed,

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("unexpected frame from daemon: {0}")]
    Unexpected(String),
}

pub struct LadishClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    next_id: u64,
    timeout: Duration,
}

impl LadishClient {
    /// Connect to a running daemon.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| ClientError::Connect {
                path: path.display().to_string(),
                source,
            })?;
        let (read, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(read).lines(),
            writer,
            next_id: 1,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send a request and wait for its reply.
    pub async fn request(&mut self, request: Request) -> Result<Reply, ClientError> {
        let id = self.next_id;
        self.next_id += 1;

        let bytes = Frame::Request { id, request }.encode()?;
        self.writer.write_all(&bytes).await?;

        let timeout = self.timeout;
        tokio::time::timeout(timeout, self.read_reply(id))
            .await
            .map_err(|_| ClientError::Timeout(timeout))?
    }

    async fn read_reply(&mut self, id: u64) -> Result<Reply, ClientError> {
        loop {
            let line = self.lines.next_line().await?.ok_or(ClientError::Closed)?;
            match Frame::decode(&line)? {
                Frame::Reply { id: got, reply } if got == id => return Ok(reply),
                Frame::Reply { id: got, .. } => {
                    return Err(ClientError::Unexpected(format!(
                        "reply for request {} while waiting for {}",
                        got, id
                    )))
                }
                Frame::Event { event } => {
                    debug!(?event, "dropping event on request connection");
                }
                Frame::Request { .. } => {
                    return Err(ClientError::Unexpected("request".to_string()));
                }
            }
        }
    }

    /// Subscribe to daemon events. Consumes the client.
    pub async fn subscribe(mut self) -> Result<EventStream, ClientError> {
        match self.request(Request::Subscribe).await? {
            Reply::Subscribed => Ok(EventStream { lines: self.lines }),
            other => Err(ClientError::Unexpected(format!("{:?}", other))),
        }
    }
}

/// Events from a subscribed connection.
pub struct EventStream {
    lines: Lines<BufReader<OwnedReadHalf>>,
}

impl EventStream {
    /// Next event, or `None` once the daemon closes the connection.
    pub async fn next(&mut self) -> Result<Option<Event>, ClientError> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            match Frame::decode(&line)? {
                Frame::Event { event } => return Ok(Some(event)),
                other => debug!(?other, "ignoring non-event frame on event stream"),
            }
        }
    }
}
