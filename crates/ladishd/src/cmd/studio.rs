use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use ladishproto::{AppLevel, Event};

use crate::cqueue::{Command, CommandError, CommandState};
use crate::jack::JackBackend;
use crate::session::Session;
use crate::store::StoreError;
use crate::studio::Studio;
use crate::virtualizer;

/// Extra time given to killed apps before the server goes down anyway.
const KILL_GRACE: Duration = Duration::from_secs(2);

fn generated_name() -> String {
    format!("Studio {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))
}

fn require_unloaded(session: &Session) -> Result<(), CommandError> {
    match &session.studio {
        Some(studio) => Err(CommandError::InvalidState(format!(
            "studio '{}' is still loaded",
            studio.name
        ))),
        None => Ok(()),
    }
}

// ============================================================================
// New / load / unload
// ============================================================================

pub struct NewStudio {
    name: String,
}

impl NewStudio {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Command<Session> for NewStudio {
    fn name(&self) -> &'static str {
        "new_studio"
    }

    fn run(&mut self, session: &mut Session) -> Result<CommandState, CommandError> {
        require_unloaded(session)?;
        let name = if self.name.trim().is_empty() {
            generated_name()
        } else {
            self.name.clone()
        };

        info!(studio = %name, "new studio");
        session.studio = Some(session.new_studio(&name));
        session.emit(Event::StudioAppeared { name });
        Ok(CommandState::Done)
    }
}

pub struct LoadStudio {
    name: String,
}

impl LoadStudio {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Command<Session> for LoadStudio {
    fn name(&self) -> &'static str {
        "load_studio"
    }

    fn run(&mut self, session: &mut Session) -> Result<CommandState, CommandError> {
        require_unloaded(session)?;
        let doc = session.store.load(&self.name)?;
        let mut studio = Studio::from_document(
            doc,
            session.store.path_for(&self.name),
            session.processes.clone(),
            session.events.clone(),
        )?;
        studio
            .supervisor
            .set_session_dir(Some(session.store.session_dir_for(&self.name)));

        info!(studio = %self.name, "studio loaded");
        session.studio = Some(studio);
        session.touch_recent(&self.name);
        session.emit(Event::StudioAppeared {
            name: self.name.clone(),
        });
        Ok(CommandState::Done)
    }
}

pub struct UnloadStudio;

impl Command<Session> for UnloadStudio {
    fn name(&self) -> &'static str {
        "unload_studio"
    }

    fn run(&mut self, session: &mut Session) -> Result<CommandState, CommandError> {
        let Some(studio) = session.studio.as_mut() else {
            return Ok(CommandState::Done);
        };
        if studio.started {
            return Err(CommandError::InvalidState(format!(
                "studio '{}' must be stopped before unloading",
                studio.name
            )));
        }

        info!(studio = %studio.name, "unloading studio");
        studio.clear();
        session.studio = None;
        session.emit(Event::StudioDisappeared);
        Ok(CommandState::Done)
    }
}

// ============================================================================
// Start / stop
// ============================================================================

pub struct StartStudio {
    deadline: Option<Instant>,
}

impl StartStudio {
    pub fn new() -> Self {
        Self { deadline: None }
    }
}

impl Default for StartStudio {
    fn default() -> Self {
        Self::new()
    }
}

impl Command<Session> for StartStudio {
    fn name(&self) -> &'static str {
        "start_studio"
    }

    fn run(&mut self, session: &mut Session) -> Result<CommandState, CommandError> {
        let deadline = match self.deadline {
            Some(deadline) => deadline,
            None => {
                let studio = session.studio()?;
                if studio.started {
                    info!(studio = %studio.name, "studio already started");
                    return Ok(CommandState::Done);
                }
                if studio.supervisor.has_running_apps() {
                    return Err(CommandError::InvalidState(
                        "apps from an earlier run are still alive; unload and reload the studio"
                            .to_string(),
                    ));
                }

                info!(studio = %studio.name, params = ?studio.jack_params, "starting JACK server");
                let params = studio.jack_params.clone();
                session.backend.configure(&params)?;
                let was_running = session.backend.is_started() && session.jack_started;
                session.backend.start_server()?;
                if was_running {
                    session.replay_jack_graph();
                }
                *self.deadline.insert(Instant::now() + session.config.start_timeout)
            }
        };

        if !session.jack_started {
            if Instant::now() >= deadline {
                return Err(CommandError::Timeout(
                    "JACK server did not report a start in time".to_string(),
                ));
            }
            return Ok(CommandState::Waiting);
        }

        let dir = session.config.working_dir.clone();
        let studio = session.studio_mut()?;
        studio.started = true;
        studio.supervisor.autorun(&dir);
        info!(studio = %studio.name, "studio started");
        session.emit(Event::StudioStarted);
        Ok(CommandState::Done)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopPhase {
    Idle,
    WaitingApps(Instant),
    WaitingKilled(Instant),
}

pub struct StopStudio {
    phase: StopPhase,
    cancelled: bool,
}

impl StopStudio {
    pub fn new() -> Self {
        Self {
            phase: StopPhase::Idle,
            cancelled: false,
        }
    }
}

impl Default for StopStudio {
    fn default() -> Self {
        Self::new()
    }
}

/// Apps still running or still showing JACK clients.
fn lingering_apps(studio: &Studio) -> usize {
    studio
        .supervisor
        .apps()
        .filter(|a| {
            a.is_running() || !virtualizer::is_hidden_app(&studio.jack_graph, a.uuid, &a.name)
        })
        .count()
}

impl Command<Session> for StopStudio {
    fn name(&self) -> &'static str {
        "stop_studio"
    }

    fn run(&mut self, session: &mut Session) -> Result<CommandState, CommandError> {
        let Some(studio) = session.studio.as_mut() else {
            return Ok(CommandState::Done);
        };

        if self.phase == StopPhase::Idle {
            if !studio.started {
                info!(studio = %studio.name, "studio already stopped");
                return Ok(CommandState::Done);
            }
            info!(studio = %studio.name, "stopping apps");
            studio.supervisor.stop_all();
            self.phase = StopPhase::WaitingApps(Instant::now() + session.config.stop_timeout);
        }

        let lingering = lingering_apps(studio);
        match self.phase {
            StopPhase::WaitingApps(deadline) if lingering > 0 => {
                if !self.cancelled && Instant::now() < deadline {
                    return Ok(CommandState::Waiting);
                }
                warn!(studio = %studio.name, lingering, "apps did not stop in time, killing");
                studio.supervisor.kill_all();
                self.phase = StopPhase::WaitingKilled(Instant::now() + KILL_GRACE);
                return Ok(CommandState::Waiting);
            }
            StopPhase::WaitingKilled(deadline) if lingering > 0 => {
                if Instant::now() < deadline {
                    return Ok(CommandState::Waiting);
                }
                warn!(studio = %studio.name, lingering, "stopping JACK with apps still around");
            }
            _ => {}
        }

        info!(studio = %studio.name, "stopping JACK server");
        if let Err(e) = session.backend.stop_server() {
            warn!("JACK server stop failed: {}", e);
        }
        session.jack_started = false;
        studio.hide_jack_objects();
        studio.started = false;
        info!(studio = %studio.name, "studio stopped");
        session.emit(Event::StudioStopped);
        Ok(CommandState::Done)
    }

    fn cancel(&mut self, _session: &mut Session) {
        self.cancelled = true;
    }
}

// ============================================================================
// Save / rename / delete
// ============================================================================

pub struct SaveStudio;

impl Command<Session> for SaveStudio {
    fn name(&self) -> &'static str {
        "save_studio"
    }

    fn run(&mut self, session: &mut Session) -> Result<CommandState, CommandError> {
        let studio = session.studio.as_mut().ok_or(CommandError::NoStudio)?;
        studio.supervisor.save_all();

        let sessions = session
            .store
            .adopt_sessions(studio.file.as_deref(), &studio.name)?;
        studio.supervisor.set_session_dir(Some(sessions));
        save_jack_sessions(studio, session.backend.as_mut())?;

        let params = session.backend.current_params();
        if !params.is_empty() {
            studio.jack_params = params;
        }

        let doc = studio.to_document();
        let path = session.store.save(&doc, studio.file.as_deref())?;
        studio.mark_saved(path);
        let name = studio.name.clone();
        session.touch_recent(&name);
        Ok(CommandState::Done)
    }
}

/// Have the server save every running JACK session app into its session
/// directory and keep the command lines that restore them.
fn save_jack_sessions(studio: &mut Studio, backend: &mut dyn JackBackend) -> Result<(), CommandError> {
    let mut commands = Vec::new();
    for app in studio.supervisor.apps() {
        if app.level != AppLevel::JackSession || !app.is_running() {
            continue;
        }
        let client = studio
            .jack_graph
            .clients_by_app(app.uuid)
            .find(|c| !c.hidden)
            .and_then(|c| c.jack_id);
        let (Some(client), Some(dir)) = (client, studio.supervisor.app_session_dir(app.uuid)) else {
            warn!(app = %app.name, "no JACK client to save the session of");
            continue;
        };
        match backend.session_save(client, &dir) {
            Ok(command) => {
                debug!(app = %app.name, dir = %dir.display(), "JACK session saved");
                commands.push((app.id, command));
            }
            Err(e) => warn!(app = %app.name, "JACK session save failed: {}", e),
        }
    }
    for (id, command) in commands {
        studio.supervisor.set_session_command(id, &command)?;
    }
    Ok(())
}

pub struct RenameStudio {
    name: String,
}

impl RenameStudio {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Command<Session> for RenameStudio {
    fn name(&self) -> &'static str {
        "rename_studio"
    }

    fn run(&mut self, session: &mut Session) -> Result<CommandState, CommandError> {
        let old = session.studio()?.name.clone();
        if old == self.name {
            return Ok(CommandState::Done);
        }
        session.store.rename(&old, &self.name)?;

        session.studio_mut()?.rename(self.name.clone());
        if let Err(e) = session.recent.rename(&old, &self.name) {
            warn!("cannot update recent studios: {}", e);
        }
        info!(old = %old, new = %self.name, "studio renamed");
        session.emit(Event::StudioRenamed {
            name: self.name.clone(),
        });
        Ok(CommandState::Done)
    }
}

pub struct DeleteStudio {
    name: String,
}

impl DeleteStudio {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Command<Session> for DeleteStudio {
    fn name(&self) -> &'static str {
        "delete_studio"
    }

    fn run(&mut self, session: &mut Session) -> Result<CommandState, CommandError> {
        if session.studio.as_ref().is_some_and(|s| s.name == self.name) {
            return Err(CommandError::InvalidState(format!(
                "studio '{}' is loaded",
                self.name
            )));
        }
        if self.name.trim().is_empty() {
            return Err(StoreError::InvalidName(self.name.clone()).into());
        }
        session.store.delete(&self.name)?;
        if let Err(e) = session.recent.remove(&self.name) {
            warn!("cannot update recent studios: {}", e);
        }
        Ok(CommandState::Done)
    }
}
