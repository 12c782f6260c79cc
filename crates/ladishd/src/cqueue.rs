//! Serialized execution of studio and app commands.
//!
//! Commands run one at a time from the head of the queue. A command that has
//! to wait for something outside the daemon (a process exit, a JACK event)
//! returns [`CommandState::Waiting`] and is run again on the next tick or
//! event. A failure drops the whole queue.

use std::collections::VecDeque;

use thiserror::Error;
use tracing::{debug, error, info};

use ladishproto::{ErrorKind, Reply};

use crate::graph::GraphError;
use crate::jack::JackError;
use crate::store::StoreError;
use crate::supervisor::SupervisorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Pending,
    Waiting,
    Done,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("no studio is loaded")]
    NoStudio,

    #[error("{0}")]
    InvalidState(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("a cancel is in progress")]
    Busy,

    #[error("{0}")]
    Timeout(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Jack(#[from] JackError),
}

impl CommandError {
    /// Protocol error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommandError::NoStudio => ErrorKind::NoStudio,
            CommandError::InvalidState(_) => ErrorKind::InvalidState,
            CommandError::NotFound(_) => ErrorKind::NotFound,
            CommandError::Busy => ErrorKind::Busy,
            CommandError::Timeout(_) => ErrorKind::Failed,
            CommandError::Graph(e) => match e {
                GraphError::ClientNotFound(_)
                | GraphError::PortNotFound(_)
                | GraphError::ConnectionNotFound(_) => ErrorKind::NotFound,
                GraphError::AlreadyConnected(..) | GraphError::FutureVersion { .. } => {
                    ErrorKind::InvalidArgs
                }
                _ => ErrorKind::Failed,
            },
            CommandError::Supervisor(e) => match e {
                SupervisorError::NotFound(_) => ErrorKind::NotFound,
                SupervisorError::DuplicateName(_) | SupervisorError::EmptyCommand => {
                    ErrorKind::InvalidArgs
                }
                SupervisorError::Running(_)
                | SupervisorError::NotRunning(_)
                | SupervisorError::ReadOnlyWhileRunning { .. } => ErrorKind::InvalidState,
                SupervisorError::Loader(_) => ErrorKind::Failed,
            },
            CommandError::Store(e) => match e {
                StoreError::NotFound(_) | StoreError::TemplateNotFound(_) => ErrorKind::NotFound,
                StoreError::AlreadyExists(_)
                | StoreError::TemplateExists(_)
                | StoreError::InvalidName(_) => ErrorKind::InvalidArgs,
                _ => ErrorKind::Failed,
            },
            CommandError::Jack(_) => ErrorKind::Failed,
        }
    }

    pub fn into_reply(self) -> Reply {
        Reply::error(self.kind(), self.to_string())
    }
}

/// One step of studio or app work, run against a context `C`.
pub trait Command<C>: Send {
    fn name(&self) -> &'static str;

    /// Advance the command. Called again while it reports `Waiting`.
    fn run(&mut self, ctx: &mut C) -> Result<CommandState, CommandError>;

    /// The queue was cancelled while this command waited. The next `run`
    /// should finish as soon as it can.
    fn cancel(&mut self, _ctx: &mut C) {}
}

pub struct CommandQueue<C> {
    queue: VecDeque<Box<dyn Command<C>>>,
    head_waiting: bool,
    cancelling: bool,
    last_failed: Option<&'static str>,
}

impl<C> Default for CommandQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> CommandQueue<C> {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            head_waiting: false,
            cancelling: false,
            last_failed: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_cancelling(&self) -> bool {
        self.cancelling
    }

    /// Name of the command whose failure last cleared the queue.
    pub fn last_failed(&self) -> Option<&'static str> {
        self.last_failed
    }

    /// Append `cmd` and run the queue.
    pub fn add(&mut self, cmd: Box<dyn Command<C>>, ctx: &mut C) -> Result<(), CommandError> {
        self.push(cmd)?;
        self.run(ctx)
    }

    /// Append several commands as one unit, then run the queue.
    pub fn add_all(
        &mut self,
        cmds: Vec<Box<dyn Command<C>>>,
        ctx: &mut C,
    ) -> Result<(), CommandError> {
        if self.cancelling {
            return Err(CommandError::Busy);
        }
        for cmd in cmds {
            self.push(cmd)?;
        }
        self.run(ctx)
    }

    fn push(&mut self, cmd: Box<dyn Command<C>>) -> Result<(), CommandError> {
        if self.cancelling {
            return Err(CommandError::Busy);
        }
        debug!(command = cmd.name(), queued = self.queue.len(), "command queued");
        self.queue.push_back(cmd);
        Ok(())
    }

    /// Run commands from the head until one waits or the queue is empty.
    pub fn run(&mut self, ctx: &mut C) -> Result<(), CommandError> {
        while let Some(head) = self.queue.front_mut() {
            match head.run(ctx) {
                Ok(CommandState::Done) => {
                    debug!(command = head.name(), "command done");
                    self.queue.pop_front();
                    self.head_waiting = false;
                }
                Ok(CommandState::Waiting | CommandState::Pending) => {
                    self.head_waiting = true;
                    return Ok(());
                }
                Err(e) => {
                    error!(command = head.name(), "command failed: {}", e);
                    self.last_failed = Some(head.name());
                    self.clear();
                    return Err(e);
                }
            }
        }
        self.cancelling = false;
        Ok(())
    }

    /// Cancel queued work. A waiting head survives and is asked to cancel;
    /// anything else is dropped.
    pub fn cancel(&mut self, ctx: &mut C) -> Result<(), CommandError> {
        if self.queue.is_empty() {
            return Ok(());
        }
        if !self.head_waiting {
            info!(dropped = self.queue.len(), "command queue cancelled");
            self.clear();
            return Ok(());
        }

        self.queue.truncate(1);
        self.cancelling = true;
        if let Some(head) = self.queue.front_mut() {
            info!(command = head.name(), "cancelling waiting command");
            head.cancel(ctx);
        }
        self.run(ctx)
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.head_waiting = false;
        self.cancelling = false;
    }
}
