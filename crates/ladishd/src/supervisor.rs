//! App supervisor: the managed applications of one studio.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use ladishproto::{AppInfo, AppLevel, AppProperties, AppState, Event};

use crate::jack::SESSION_DIR_VAR;
use crate::loader::{LoaderError, ProcessControl, Signal, SpawnRequest};
use crate::procfs;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("app {0} not found")]
    NotFound(u64),

    #[error("an app named '{0}' already exists")]
    DuplicateName(String),

    #[error("app '{0}' is running")]
    Running(String),

    #[error("app '{0}' is not running")]
    NotRunning(String),

    #[error("cannot change {field} of '{app}' while it runs")]
    ReadOnlyWhileRunning { app: String, field: &'static str },

    #[error("empty command line")]
    EmptyCommand,

    #[error(transparent)]
    Loader(#[from] LoaderError),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

#[derive(Debug, Clone)]
pub struct App {
    pub id: u64,
    pub uuid: Uuid,
    pub name: String,
    pub commandline: String,
    pub terminal: bool,
    pub level: AppLevel,
    pub state: AppState,
    pub pid: Option<u32>,
    pub autorun: bool,
}

impl App {
    pub fn is_running(&self) -> bool {
        self.pid.is_some()
    }

    pub fn info(&self) -> AppInfo {
        AppInfo {
            id: self.id,
            name: self.name.clone(),
            running: self.is_running(),
            terminal: self.terminal,
            level: self.level,
            state: self.state,
        }
    }
}

pub struct AppSupervisor {
    name: String,
    version: u64,
    next_id: u64,
    apps: Vec<App>,
    processes: Arc<dyn ProcessControl>,
    events: Option<broadcast::Sender<Event>>,
    /// Root of the per-app JACK session directories.
    session_dir: Option<PathBuf>,
}

impl AppSupervisor {
    pub fn new(
        name: impl Into<String>,
        processes: Arc<dyn ProcessControl>,
        events: Option<broadcast::Sender<Event>>,
    ) -> Self {
        Self {
            name: name.into(),
            version: 0,
            next_id: 1,
            apps: Vec::new(),
            processes,
            events,
            session_dir: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_session_dir(&mut self, dir: Option<PathBuf>) {
        self.session_dir = dir;
    }

    /// Session directory of one app.
    pub fn app_session_dir(&self, uuid: Uuid) -> Option<PathBuf> {
        self.session_dir.as_ref().map(|d| d.join(uuid.to_string()))
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn apps(&self) -> impl Iterator<Item = &App> {
        self.apps.iter()
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn index(&self, id: u64) -> Result<usize> {
        self.apps
            .iter()
            .position(|a| a.id == id)
            .ok_or(SupervisorError::NotFound(id))
    }

    fn changed(&mut self, idx: usize) {
        self.version += 1;
        let app = self.apps[idx].info();
        self.emit(Event::AppStateChanged {
            version: self.version,
            app,
        });
    }

    /// `base`, or `base (2)`, `base (3)`, ... whichever is free first.
    pub fn unique_name(&self, base: &str) -> String {
        if self.find_app_by_name(base).is_none() {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{} ({})", base, n))
            .find(|candidate| self.find_app_by_name(candidate).is_none())
            .unwrap_or_else(|| base.to_string())
    }

    pub fn add(
        &mut self,
        name: &str,
        uuid: Option<Uuid>,
        commandline: &str,
        terminal: bool,
        autorun: bool,
        level: AppLevel,
    ) -> Result<u64> {
        if self.find_app_by_name(name).is_some() {
            return Err(SupervisorError::DuplicateName(name.to_string()));
        }

        let id = self.next_id;
        self.next_id += 1;
        let app = App {
            id,
            uuid: uuid.unwrap_or_else(Uuid::new_v4),
            name: name.to_string(),
            commandline: commandline.to_string(),
            terminal,
            level,
            state: AppState::Stopped,
            pid: None,
            autorun,
        };
        debug!(supervisor = %self.name, id, name, "app added");

        self.version += 1;
        self.emit(Event::AppAdded {
            version: self.version,
            app: app.info(),
        });
        self.apps.push(app);
        Ok(id)
    }

    /// Add an app from a bare command line, with autorun set. With a working
    /// directory the app is started right away, and removed again if the
    /// start fails.
    pub fn run_custom(
        &mut self,
        commandline: &str,
        name: &str,
        terminal: bool,
        level: AppLevel,
        start_in: Option<&Path>,
    ) -> Result<u64> {
        let commandline = commandline.trim();
        if commandline.is_empty() {
            return Err(SupervisorError::EmptyCommand);
        }
        let base = if name.trim().is_empty() {
            commandline
                .split_whitespace()
                .next()
                .map(|first| first.rsplit('/').next().unwrap_or(first))
                .ok_or(SupervisorError::EmptyCommand)?
                .to_string()
        } else {
            name.trim().to_string()
        };

        let name = self.unique_name(&base);
        let id = self.add(&name, None, commandline, terminal, true, level)?;
        if let Some(dir) = start_in {
            if let Err(e) = self.start_app(id, dir) {
                error!(supervisor = %self.name, app = %name, "execution failed: {}", e);
                self.remove(id)?;
                return Err(e);
            }
        }
        Ok(id)
    }

    pub fn start_app(&mut self, id: u64, dir: &Path) -> Result<()> {
        let idx = self.index(id)?;
        let app = &self.apps[idx];
        if app.is_running() {
            return Err(SupervisorError::Running(app.name.clone()));
        }

        let commandline = match self.app_session_dir(app.uuid) {
            Some(session) if app.commandline.contains(SESSION_DIR_VAR) => {
                // JACK session clients expect a trailing slash
                let session = format!("{}/", session.display());
                app.commandline.replace(SESSION_DIR_VAR, &session)
            }
            _ => app.commandline.clone(),
        };

        info!(supervisor = %self.name, app = %app.name, "starting app");
        let pid = self.processes.spawn(SpawnRequest {
            project: &self.name,
            app_name: &app.name,
            working_dir: dir,
            terminal: app.terminal,
            commandline: &commandline,
        })?;

        let app = &mut self.apps[idx];
        app.pid = Some(pid);
        app.state = AppState::Started;
        app.autorun = true;
        self.changed(idx);
        Ok(())
    }

    /// Send SIGTERM. The app stays listed until its exit is reported.
    pub fn stop_app(&mut self, id: u64) -> Result<()> {
        self.signal_stop(id, Signal::Term, AppState::Stopping, false)
    }

    /// Send SIGKILL.
    pub fn kill_app(&mut self, id: u64) -> Result<()> {
        self.signal_stop(id, Signal::Kill, AppState::Kill, false)
    }

    fn signal_stop(
        &mut self,
        id: u64,
        signal: Signal,
        state: AppState,
        keep_autorun: bool,
    ) -> Result<()> {
        let idx = self.index(id)?;
        let app = &self.apps[idx];
        let Some(pid) = app.pid else {
            return Err(SupervisorError::NotRunning(app.name.clone()));
        };

        info!(supervisor = %self.name, app = %app.name, pid, ?signal, "stopping app");
        if let Err(e) = self.processes.signal(pid, signal) {
            // The exit may simply not have been reaped yet
            warn!(app = %app.name, "{}", e);
        }

        let app = &mut self.apps[idx];
        if !keep_autorun {
            app.autorun = false;
        }
        if app.state != state {
            app.state = state;
            self.changed(idx);
        }
        Ok(())
    }

    /// Ask a running app to save its state.
    pub fn save_app(&self, id: u64) -> Result<()> {
        let app = &self.apps[self.index(id)?];
        let Some(pid) = app.pid else {
            return Ok(());
        };

        match app.level {
            AppLevel::Classic => {}
            AppLevel::L1 => {
                info!(app = %app.name, pid, "sending SIGUSR1 to save app");
                self.processes.signal(pid, Signal::Usr1)?;
            }
            AppLevel::Lash => {
                warn!(app = %app.name, "LASH save is not supported, skipping");
            }
            AppLevel::JackSession => {
                // Saved through the JACK server along with the studio
                debug!(app = %app.name, "JACK session app, saved by the server");
            }
        }
        Ok(())
    }

    pub fn save_all(&self) {
        for app in &self.apps {
            if let Err(e) = self.save_app(app.id) {
                error!(app = %app.name, "save failed: {}", e);
            }
        }
    }

    /// Replace the command line of a JACK session app with the one its last
    /// save returned. Allowed while the app runs.
    pub fn set_session_command(&mut self, id: u64, commandline: &str) -> Result<()> {
        let idx = self.index(id)?;
        if commandline.trim().is_empty() {
            return Err(SupervisorError::EmptyCommand);
        }
        let app = &mut self.apps[idx];
        if app.commandline == commandline {
            return Ok(());
        }
        debug!(app = %app.name, commandline, "session command updated");
        app.commandline = commandline.to_string();
        self.changed(idx);
        Ok(())
    }

    pub fn remove(&mut self, id: u64) -> Result<()> {
        let idx = self.index(id)?;
        if self.apps[idx].is_running() {
            return Err(SupervisorError::Running(self.apps[idx].name.clone()));
        }
        let app = self.apps.remove(idx);
        debug!(supervisor = %self.name, name = %app.name, "app removed");
        self.version += 1;
        self.emit(Event::AppRemoved {
            version: self.version,
            id: app.id,
        });
        Ok(())
    }

    /// Record a child exit. Returns false if no app owns `pid`.
    pub fn child_exit(&mut self, pid: u32, code: Option<i32>, signal: Option<i32>) -> bool {
        let Some(idx) = self.apps.iter().position(|a| a.pid == Some(pid)) else {
            return false;
        };

        let app = &mut self.apps[idx];
        if app.state == AppState::Started {
            warn!(
                supervisor = %self.name,
                app = %app.name,
                pid,
                ?code,
                ?signal,
                "app terminated unexpectedly"
            );
            app.autorun = false;
        } else {
            info!(supervisor = %self.name, app = %app.name, pid, ?code, ?signal, "app exited");
        }

        app.pid = None;
        app.state = AppState::Stopped;
        self.changed(idx);
        true
    }

    /// Start every stopped app flagged for autorun.
    pub fn autorun(&mut self, dir: &Path) {
        let pending: Vec<u64> = self
            .apps
            .iter()
            .filter(|a| a.autorun && !a.is_running())
            .map(|a| a.id)
            .collect();
        for id in pending {
            if let Err(e) = self.start_app(id, dir) {
                error!(supervisor = %self.name, id, "autorun failed: {}", e);
            }
        }
    }

    /// SIGTERM every app still in the started state. Autorun flags survive so
    /// the apps come back with the studio.
    pub fn stop_all(&mut self) {
        let started: Vec<u64> = self
            .apps
            .iter()
            .filter(|a| a.state == AppState::Started)
            .map(|a| a.id)
            .collect();
        for id in started {
            if let Err(e) = self.signal_stop(id, Signal::Term, AppState::Stopping, true) {
                warn!(supervisor = %self.name, id, "stop failed: {}", e);
            }
        }
    }

    /// SIGKILL every app that has not exited yet.
    pub fn kill_all(&mut self) {
        let running: Vec<u64> = self.apps.iter().filter(|a| a.is_running()).map(|a| a.id).collect();
        for id in running {
            if let Err(e) = self.signal_stop(id, Signal::Kill, AppState::Kill, true) {
                warn!(supervisor = %self.name, id, "kill failed: {}", e);
            }
        }
    }

    pub fn has_running_apps(&self) -> bool {
        self.apps.iter().any(App::is_running)
    }

    /// Forget every app. Running processes are left alone.
    pub fn clear(&mut self) {
        let ids: Vec<u64> = self.apps.iter().map(|a| a.id).collect();
        self.apps.clear();
        for id in ids {
            self.version += 1;
            self.emit(Event::AppRemoved {
                version: self.version,
                id,
            });
        }
    }

    pub fn find_app_by_id(&self, id: u64) -> Option<&App> {
        self.apps.iter().find(|a| a.id == id)
    }

    pub fn find_app_by_name(&self, name: &str) -> Option<&App> {
        self.apps.iter().find(|a| a.name == name)
    }

    pub fn find_app_by_uuid(&self, uuid: Uuid) -> Option<&App> {
        self.apps.iter().find(|a| a.uuid == uuid)
    }

    /// App owning `pid` or one of its ancestors.
    pub fn find_app_by_pid(&self, pid: u32) -> Option<&App> {
        self.find_app_by_pid_with(pid, procfs::parent_pid)
    }

    pub fn find_app_by_pid_with(
        &self,
        pid: u32,
        parent_of: impl Fn(u32) -> Option<u32>,
    ) -> Option<&App> {
        procfs::lineage(pid, parent_of)
            .into_iter()
            .find_map(|p| self.apps.iter().find(|a| a.pid == Some(p)))
    }

    pub fn get_app_properties(&self, id: u64) -> Result<AppProperties> {
        let app = &self.apps[self.index(id)?];
        Ok(AppProperties {
            name: app.name.clone(),
            commandline: app.commandline.clone(),
            terminal: app.terminal,
            level: app.level,
        })
    }

    /// Update app properties. Only the name may change while the app runs.
    pub fn set_app_properties(
        &mut self,
        id: u64,
        name: &str,
        commandline: &str,
        terminal: bool,
        level: AppLevel,
    ) -> Result<()> {
        let idx = self.index(id)?;
        let app = &self.apps[idx];

        if app.name != name && self.find_app_by_name(name).is_some() {
            return Err(SupervisorError::DuplicateName(name.to_string()));
        }

        if app.is_running() {
            let field = if app.commandline != commandline {
                Some("commandline")
            } else if app.terminal != terminal {
                Some("terminal")
            } else if app.level != level {
                Some("level")
            } else {
                None
            };
            if let Some(field) = field {
                return Err(SupervisorError::ReadOnlyWhileRunning {
                    app: app.name.clone(),
                    field,
                });
            }
        }

        let app = &mut self.apps[idx];
        app.name = name.to_string();
        app.commandline = commandline.to_string();
        app.terminal = terminal;
        app.level = level;
        self.changed(idx);
        Ok(())
    }

    pub fn list(&self) -> (u64, Vec<AppInfo>) {
        (self.version, self.apps.iter().map(App::info).collect())
    }
}
