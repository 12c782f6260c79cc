//! Unix socket front door.
//!
//! Each connection gets its own task that decodes request frames, forwards
//! them to the daemon actor and writes the replies back. After `Subscribe`
//! the same connection also carries broadcast events.

use std::path::PathBuf;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ladishproto::{ErrorKind, Event, Frame, Reply, Request, MAX_FRAME_LEN};

use crate::daemon::DaemonHandle;

pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    daemon: DaemonHandle,
}

impl Server {
    /// Bind `socket_path`, replacing a stale socket left by an earlier run.
    pub fn bind(socket_path: impl Into<PathBuf>, daemon: DaemonHandle) -> Result<Self> {
        let socket_path = socket_path.into();
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        if socket_path.exists() {
            debug!(path = %socket_path.display(), "removing stale socket");
            std::fs::remove_file(&socket_path)
                .with_context(|| format!("removing stale socket {}", socket_path.display()))?;
        }

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("binding {}", socket_path.display()))?;

        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&socket_path, perms)
                .with_context(|| format!("restricting {}", socket_path.display()))?;
        }

        info!(path = %socket_path.display(), "listening");
        Ok(Self {
            socket_path,
            listener,
            daemon,
        })
    }

    /// Accept connections until `shutdown` fires, then remove the socket.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                conn = self.listener.accept() => match conn {
                    Ok((stream, _)) => {
                        let daemon = self.daemon.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, daemon, shutdown).await {
                                warn!("connection ended with error: {:#}", e);
                            }
                        });
                    }
                    Err(e) => error!("accept failed: {}", e),
                },
            }
        }

        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            warn!(path = %self.socket_path.display(), "failed to remove socket: {}", e);
        }
        info!("server stopped");
        Ok(())
    }
}

async fn write_frame(writer: &mut OwnedWriteHalf, frame: &Frame) -> Result<()> {
    let bytes = frame.encode()?;
    writer.write_all(&bytes).await?;
    Ok(())
}

async fn handle_connection(
    stream: UnixStream,
    daemon: DaemonHandle,
    shutdown: CancellationToken,
) -> Result<()> {
    debug!("connection accepted");
    let (read, mut writer) = stream.into_split();
    let mut lines = FramedRead::new(read, LinesCodec::new_with_max_length(MAX_FRAME_LEN));
    let mut events: Option<broadcast::Receiver<Event>> = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next() => {
                let line = match line {
                    None => break,
                    Some(Ok(line)) => line,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        // The codec is done after an error, so this ends the connection
                        warn!(limit = MAX_FRAME_LEN, "request line too long, closing connection");
                        let reply = Reply::error(
                            ErrorKind::InvalidArgs,
                            format!("request line exceeds {} bytes", MAX_FRAME_LEN),
                        );
                        write_frame(&mut writer, &Frame::Reply { id: 0, reply }).await?;
                        break;
                    }
                    Some(Err(LinesCodecError::Io(e))) => return Err(e.into()),
                };
                if line.trim().is_empty() {
                    continue;
                }
                let (id, reply) = match Frame::decode(&line) {
                    Ok(Frame::Request { id, request: Request::Subscribe }) => {
                        if events.is_none() {
                            events = Some(daemon.subscribe());
                            debug!("connection subscribed");
                        }
                        (id, Reply::Subscribed)
                    }
                    Ok(Frame::Request { id, request }) => (id, daemon.request(request).await),
                    Ok(other) => (
                        0,
                        Reply::error(ErrorKind::InvalidArgs, format!("expected a request, got {:?}", other)),
                    ),
                    Err(e) => (0, Reply::error(ErrorKind::InvalidArgs, e.to_string())),
                };
                write_frame(&mut writer, &Frame::Reply { id, reply }).await?;
            }
            event = recv_event(&mut events) => match event {
                Ok(event) => write_frame(&mut writer, &Frame::Event { event }).await?,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    debug!("connection closed");
    Ok(())
}

/// Next event for a subscribed connection. Never resolves otherwise.
async fn recv_event(
    events: &mut Option<broadcast::Receiver<Event>>,
) -> Result<Event, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::sync::mpsc;

    use crate::daemon::Daemon;
    use crate::jack::LoopbackBackend;
    use crate::recent::RecentStore;
    use crate::session::{Session, SessionConfig};
    use crate::store::StudioStore;
    use crate::supervisor::tests::FakeProcesses;

    #[tokio::test]
    async fn test_oversized_request_line_closes_connection() {
        let dir = tempfile::tempdir().unwrap();
        let (jack_tx, jack_rx) = mpsc::unbounded_channel();
        let (_exit_tx, exit_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(16);
        let session = Session::new(
            SessionConfig {
                working_dir: dir.path().to_path_buf(),
                ..SessionConfig::default()
            },
            events,
            Box::new(LoopbackBackend::new(jack_tx)),
            Arc::new(FakeProcesses::default()),
            StudioStore::new(dir.path().join("studios")),
            RecentStore::open(dir.path().join("recent"), 10),
        );
        let shutdown = CancellationToken::new();
        let (daemon, handle) = Daemon::new(session, shutdown.clone());
        tokio::spawn(daemon.run(jack_rx, exit_rx));

        let (client, server) = UnixStream::pair().unwrap();
        let conn = tokio::spawn(handle_connection(server, handle, shutdown.clone()));
        let (read, mut write) = client.into_split();
        let mut replies = BufReader::new(read).lines();

        let ping = Frame::Request {
            id: 1,
            request: Request::Ping,
        };
        write.write_all(&ping.encode().unwrap()).await.unwrap();
        let line = replies.next_line().await.unwrap().unwrap();
        assert_eq!(
            Frame::decode(&line).unwrap(),
            Frame::Reply {
                id: 1,
                reply: Reply::Pong
            }
        );

        // The server may hang up before the whole line is written
        tokio::spawn(async move {
            let mut big = vec![b'x'; MAX_FRAME_LEN + 1];
            big.push(b'\n');
            let _ = write.write_all(&big).await;
        });

        let line = replies.next_line().await.unwrap().unwrap();
        assert!(matches!(
            Frame::decode(&line).unwrap(),
            Frame::Reply {
                id: 0,
                reply: Reply::Error {
                    kind: ErrorKind::InvalidArgs,
                    ..
                }
            }
        ));
        assert_eq!(replies.next_line().await.unwrap(), None);
        conn.await.unwrap().unwrap();
        shutdown.cancel();
    }
}
