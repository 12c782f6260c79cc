//! Everything commands operate on: the loaded studio and its collaborators.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use ladishproto::Event;

use crate::cqueue::CommandError;
use crate::jack::{JackBackend, JackEvent};
use crate::loader::{ChildExit, ProcessControl};
use crate::recent::RecentStore;
use crate::store::StudioStore;
use crate::studio::Studio;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a studio stop waits for apps before killing them.
    pub stop_timeout: Duration,
    /// How long a studio start waits for the server to report itself.
    pub start_timeout: Duration,
    /// JACK parameters new studios start with.
    pub jack_params: BTreeMap<String, String>,
    /// Working directory of spawned apps.
    pub working_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(10),
            start_timeout: Duration::from_secs(5),
            jack_params: BTreeMap::new(),
            working_dir: std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/")),
        }
    }
}

pub struct Session {
    pub config: SessionConfig,
    pub events: broadcast::Sender<Event>,
    pub backend: Box<dyn JackBackend>,
    pub processes: Arc<dyn ProcessControl>,
    pub store: StudioStore,
    pub recent: RecentStore,
    pub studio: Option<Studio>,
    /// Last server state reported by the backend.
    pub jack_started: bool,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        events: broadcast::Sender<Event>,
        backend: Box<dyn JackBackend>,
        processes: Arc<dyn ProcessControl>,
        store: StudioStore,
        recent: RecentStore,
    ) -> Self {
        Self {
            config,
            events,
            backend,
            processes,
            store,
            recent,
            studio: None,
            jack_started: false,
        }
    }

    pub fn emit(&self, event: Event) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn studio(&self) -> Result<&Studio, CommandError> {
        self.studio.as_ref().ok_or(CommandError::NoStudio)
    }

    pub fn studio_mut(&mut self) -> Result<&mut Studio, CommandError> {
        self.studio.as_mut().ok_or(CommandError::NoStudio)
    }

    pub fn new_studio(&self, name: &str) -> Studio {
        let mut studio = Studio::new(name, self.processes.clone(), self.events.clone());
        studio.jack_params = self.config.jack_params.clone();
        studio
            .supervisor
            .set_session_dir(Some(self.store.session_dir_for(name)));
        studio
    }

    /// Record `name` as recently used. Failures only cost the list entry.
    pub fn touch_recent(&mut self, name: &str) {
        if let Err(e) = self.recent.touch(name) {
            warn!(studio = name, "cannot update recent studios: {}", e);
        }
    }

    /// Apply a JACK event: server state first, then the studio graphs.
    pub fn handle_jack_event(&mut self, event: JackEvent) {
        match event {
            JackEvent::ServerStarted => self.jack_started = true,
            JackEvent::ServerStopped => {
                self.jack_started = false;
                if let Some(studio) = self.studio.as_mut().filter(|s| s.started) {
                    error!(studio = %studio.name, "JACK server stopped while the studio was running");
                    studio.started = false;
                    studio.supervisor.stop_all();
                    let _ = self.events.send(Event::StudioCrashed);
                }
            }
            _ => {}
        }

        match self.studio.as_mut() {
            Some(studio) => studio.handle_jack_event(&event, self.backend.as_mut()),
            None => debug!(?event, "no studio, JACK event ignored"),
        }
    }

    pub fn child_exit(&mut self, exit: ChildExit) {
        let handled = self
            .studio
            .as_mut()
            .is_some_and(|s| s.supervisor.child_exit(exit.pid, exit.code, exit.signal));
        if !handled {
            info!(pid = exit.pid, code = ?exit.code, signal = ?exit.signal, "unknown child exited");
        }
    }

    /// Feed the backend's current graph to the studio, for a server that was
    /// already running when the studio started.
    pub fn replay_jack_graph(&mut self) {
        for event in self.backend.current_graph() {
            self.handle_jack_event(event);
        }
    }
}
