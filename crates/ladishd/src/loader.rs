//! Child process spawning, output logging and exit reporting.
//!
//! Every app runs under `sh -c` in its own process group. Its output is
//! logged line by line and its exit is reported as a [`ChildExit`] on the
//! channel handed to [`Loader::new`].

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Stdio;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Environment variable carrying the app name into the child.
pub const APP_NAME_ENV: &str = "LADISH_APP_NAME";

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("spawned '{0}' but it has no pid")]
    NoPid(String),

    #[error("failed to send {signal:?} to {pid}: {source}")]
    Signal {
        pid: u32,
        signal: Signal,
        source: std::io::Error,
    },
}

/// Exit of a spawned child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    pub pid: u32,
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Polite stop, sent to the whole process group.
    Term,
    /// Forced stop, sent to the whole process group.
    Kill,
    /// Level 1 save request, sent to the app process only.
    Usr1,
}

impl Signal {
    fn raw(self) -> libc::c_int {
        match self {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
            Signal::Usr1 => libc::SIGUSR1,
        }
    }

    fn targets_group(self) -> bool {
        !matches!(self, Signal::Usr1)
    }
}

/// What the supervisor needs from the process layer.
pub trait ProcessControl: Send + Sync {
    fn spawn(&self, req: SpawnRequest<'_>) -> Result<u32, LoaderError>;
    fn signal(&self, pid: u32, signal: Signal) -> Result<(), LoaderError>;
}

#[derive(Debug, Clone, Copy)]
pub struct SpawnRequest<'a> {
    /// Studio name, for log context.
    pub project: &'a str,
    pub app_name: &'a str,
    pub working_dir: &'a Path,
    pub terminal: bool,
    pub commandline: &'a str,
}

/// Spawns children on the current tokio runtime.
pub struct Loader {
    terminal: String,
    exits: mpsc::UnboundedSender<ChildExit>,
}

impl Loader {
    pub fn new(terminal: impl Into<String>, exits: mpsc::UnboundedSender<ChildExit>) -> Self {
        Self {
            terminal: terminal.into(),
            exits,
        }
    }

    /// Spawn `commandline` and return the child's pid.
    pub fn execute(&self, req: SpawnRequest<'_>) -> Result<u32, LoaderError> {
        let mut cmd = if req.terminal {
            let mut cmd = Command::new(&self.terminal);
            cmd.arg("-e")
                .arg("sh")
                .arg("-c")
                .arg(format!("{} && sh || sh", req.commandline));
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(req.commandline);
            cmd
        };

        cmd.current_dir(req.working_dir)
            .env(APP_NAME_ENV, req.app_name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(false);

        let mut child = cmd.spawn().map_err(|source| LoaderError::Spawn {
            command: req.commandline.to_string(),
            source,
        })?;
        let pid = child
            .id()
            .ok_or_else(|| LoaderError::NoPid(req.commandline.to_string()))?;

        info!(
            project = req.project,
            app = req.app_name,
            pid,
            terminal = req.terminal,
            "spawned '{}'",
            req.commandline
        );

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(log_output(stdout, req.project.to_string(), req.app_name.to_string(), false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_output(stderr, req.project.to_string(), req.app_name.to_string(), true));
        }

        let exits = self.exits.clone();
        let app = req.app_name.to_string();
        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => ChildExit {
                    pid,
                    code: status.code(),
                    signal: status.signal(),
                },
                Err(e) => {
                    warn!(pid, app = %app, "failed to wait for child: {}", e);
                    ChildExit {
                        pid,
                        code: None,
                        signal: None,
                    }
                }
            };
            debug!(pid, app = %app, ?exit, "child exited");
            // Daemon gone means nobody cares any more
            let _ = exits.send(exit);
        });

        Ok(pid)
    }
}

impl ProcessControl for Loader {
    fn spawn(&self, req: SpawnRequest<'_>) -> Result<u32, LoaderError> {
        self.execute(req)
    }

    fn signal(&self, pid: u32, signal: Signal) -> Result<(), LoaderError> {
        send_signal(pid, signal)
    }
}

/// Send `signal` to `pid`, or to its process group for stop signals.
pub fn send_signal(pid: u32, signal: Signal) -> Result<(), LoaderError> {
    let target = pid as libc::pid_t;
    let target = if signal.targets_group() { -target } else { target };
    // SAFETY: kill(2) has no memory-safety preconditions
    let rc = unsafe { libc::kill(target, signal.raw()) };
    if rc == -1 {
        return Err(LoaderError::Signal {
            pid,
            signal,
            source: std::io::Error::last_os_error(),
        });
    }
    debug!(pid, ?signal, "signal sent");
    Ok(())
}

async fn log_output(stream: impl AsyncRead + Unpin, project: String, app: String, is_stderr: bool) {
    let mut lines = BufReader::new(stream).lines();
    let mut log = OutputLog::default();

    let emit = |entry: LogEntry| {
        let text = match entry {
            LogEntry::Line(line) => line,
            LogEntry::Repeating => "last line repeating...".to_string(),
            LogEntry::Repeated(n) => format!("last line repeated {} times", n),
        };
        if is_stderr {
            warn!(project = %project, app = %app, "{}", text);
        } else {
            info!(project = %project, app = %app, "{}", text);
        }
    };

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                for entry in log.push(line) {
                    emit(entry);
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(app = %app, "output stream error: {}", e);
                break;
            }
        }
    }

    if let Some(entry) = log.finish() {
        emit(entry);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Line(String),
    Repeating,
    Repeated(usize),
}

/// Collapses runs of identical output lines.
#[derive(Debug, Default)]
pub struct OutputLog {
    last: Option<String>,
    repeats: usize,
}

impl OutputLog {
    /// Feed one line, returning what should be logged now.
    pub fn push(&mut self, line: String) -> Vec<LogEntry> {
        if self.last.as_deref() == Some(line.as_str()) {
            self.repeats += 1;
            return if self.repeats == 1 {
                vec![LogEntry::Repeating]
            } else {
                Vec::new()
            };
        }

        let mut out = Vec::with_capacity(2);
        if self.repeats > 0 {
            out.push(LogEntry::Repeated(self.repeats));
        }
        self.repeats = 0;
        out.push(LogEntry::Line(line.clone()));
        self.last = Some(line);
        out
    }

    /// Flush a pending repeat count at end of stream.
    pub fn finish(&mut self) -> Option<LogEntry> {
        let repeats = std::mem::take(&mut self.repeats);
        (repeats > 0).then_some(LogEntry::Repeated(repeats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_repeated_lines_are_collapsed() {
        let mut log = OutputLog::default();
        let mut out = Vec::new();
        for line in ["xrun", "xrun", "xrun", "xrun", "ok"] {
            out.extend(log.push(line.to_string()));
        }
        out.extend(log.finish());

        assert_eq!(
            out,
            vec![
                LogEntry::Line("xrun".to_string()),
                LogEntry::Repeating,
                LogEntry::Repeated(3),
                LogEntry::Line("ok".to_string()),
            ]
        );
    }

    #[test]
    fn test_finish_flushes_trailing_run() {
        let mut log = OutputLog::default();
        log.push("a".to_string());
        log.push("a".to_string());
        assert_eq!(log.finish(), Some(LogEntry::Repeated(1)));
        assert_eq!(log.finish(), None);
    }

    #[tokio::test]
    async fn test_execute_reports_exit_code() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let loader = Loader::new("xterm", tx);
        let dir = tempfile::tempdir().unwrap();

        let pid = loader
            .execute(SpawnRequest {
                project: "test",
                app_name: "exiter",
                working_dir: dir.path(),
                terminal: false,
                commandline: "test \"$LADISH_APP_NAME\" = exiter && exit 7",
            })
            .unwrap();

        let exit = rx.recv().await.unwrap();
        assert_eq!(exit.pid, pid);
        assert_eq!(exit.code, Some(7));
    }

    #[tokio::test]
    async fn test_term_signal_reaches_group() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let loader = Loader::new("xterm", tx);
        let dir = tempfile::tempdir().unwrap();

        let pid = loader
            .execute(SpawnRequest {
                project: "test",
                app_name: "sleeper",
                working_dir: dir.path(),
                terminal: false,
                commandline: "sleep 30",
            })
            .unwrap();

        loader.signal(pid, Signal::Term).unwrap();
        let exit = tokio::time::timeout(std::time::Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit.pid, pid);
        assert_eq!(exit.signal, Some(libc::SIGTERM));
    }

    #[test]
    fn test_spawn_in_missing_dir_fails() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let (tx, _rx) = mpsc::unbounded_channel();
            let loader = Loader::new("xterm", tx);
            let err = loader
                .execute(SpawnRequest {
                    project: "test",
                    app_name: "nowhere",
                    working_dir: Path::new("/definitely/not/here"),
                    terminal: false,
                    commandline: "true",
                })
                .unwrap_err();
            assert!(matches!(err, LoaderError::Spawn { .. }));
        });
    }
}
