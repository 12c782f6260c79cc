use tracing::info;

use ladishproto::AppLevel;

use crate::cqueue::{Command, CommandError, CommandState};
use crate::session::Session;
use crate::supervisor::SupervisorError;
use crate::virtualizer;

/// Add an app from a command line. It starts right away when the studio runs.
pub struct NewApp {
    commandline: String,
    name: String,
    terminal: bool,
    level: AppLevel,
}

impl NewApp {
    pub fn new(
        commandline: impl Into<String>,
        name: impl Into<String>,
        terminal: bool,
        level: AppLevel,
    ) -> Self {
        Self {
            commandline: commandline.into(),
            name: name.into(),
            terminal,
            level,
        }
    }
}

impl Command<Session> for NewApp {
    fn name(&self) -> &'static str {
        "new_app"
    }

    fn run(&mut self, session: &mut Session) -> Result<CommandState, CommandError> {
        let dir = session.config.working_dir.clone();
        let studio = session.studio_mut()?;
        let start_in = studio.started.then_some(dir.as_path());
        let id = studio.supervisor.run_custom(
            &self.commandline,
            &self.name,
            self.terminal,
            self.level,
            start_in,
        )?;
        info!(studio = %studio.name, id, commandline = %self.commandline, "app added");
        Ok(CommandState::Done)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Started,
    Stopped,
    Kill,
}

/// Start, stop or kill one app. Stopping waits for the process to exit and
/// for its JACK clients to go away.
pub struct ChangeAppState {
    id: u64,
    target: TargetState,
    signalled: bool,
    cancelled: bool,
}

impl ChangeAppState {
    pub fn new(id: u64, target: TargetState) -> Self {
        Self {
            id,
            target,
            signalled: false,
            cancelled: false,
        }
    }
}

impl Command<Session> for ChangeAppState {
    fn name(&self) -> &'static str {
        match self.target {
            TargetState::Started => "start_app",
            TargetState::Stopped => "stop_app",
            TargetState::Kill => "kill_app",
        }
    }

    fn run(&mut self, session: &mut Session) -> Result<CommandState, CommandError> {
        let dir = session.config.working_dir.clone();
        let studio = session.studio_mut()?;

        if self.target == TargetState::Started {
            if !studio.started {
                return Err(CommandError::InvalidState(
                    "apps can only be started while the studio runs".to_string(),
                ));
            }
            studio.supervisor.start_app(self.id, &dir)?;
            return Ok(CommandState::Done);
        }

        let app = studio
            .supervisor
            .find_app_by_id(self.id)
            .ok_or(SupervisorError::NotFound(self.id))?;
        let (uuid, name, running) = (app.uuid, app.name.clone(), app.is_running());

        if !self.signalled {
            self.signalled = true;
            if running {
                match self.target {
                    TargetState::Kill => studio.supervisor.kill_app(self.id)?,
                    _ => studio.supervisor.stop_app(self.id)?,
                }
            }
        }

        if self.cancelled {
            return Ok(CommandState::Done);
        }
        if running || !virtualizer::is_hidden_app(&studio.jack_graph, uuid, &name) {
            return Ok(CommandState::Waiting);
        }
        info!(studio = %studio.name, app = %name, "app stopped");
        Ok(CommandState::Done)
    }

    fn cancel(&mut self, _session: &mut Session) {
        self.cancelled = true;
    }
}

/// Drop a stopped app and every graph client it owned.
pub struct RemoveApp {
    id: u64,
}

impl RemoveApp {
    pub fn new(id: u64) -> Self {
        Self { id }
    }
}

impl Command<Session> for RemoveApp {
    fn name(&self) -> &'static str {
        "remove_app"
    }

    fn run(&mut self, session: &mut Session) -> Result<CommandState, CommandError> {
        let studio = session.studio_mut()?;
        let app = studio
            .supervisor
            .find_app_by_id(self.id)
            .ok_or(SupervisorError::NotFound(self.id))?;
        if app.is_running() {
            return Err(SupervisorError::Running(app.name.clone()).into());
        }
        let uuid = app.uuid;

        virtualizer::remove_app(&mut studio.jack_graph, &mut studio.studio_graph, uuid)?;
        studio.supervisor.remove(self.id)?;
        Ok(CommandState::Done)
    }
}
