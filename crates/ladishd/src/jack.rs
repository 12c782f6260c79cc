//! The live JACK graph as seen by the daemon.
//!
//! A [`JackBackend`] starts and stops the server, connects ports and reports
//! graph changes as [`JackEvent`]s on the channel it was built with. Ids are
//! the backend's own client and port ids.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum JackError {
    #[error("JACK server is not started")]
    NotStarted,

    #[error("failed to start JACK server: {0}")]
    ServerStart(String),

    #[error("unknown JACK port {0}")]
    UnknownPort(u64),

    #[error("unknown JACK client {0}")]
    UnknownClient(u64),

    #[error("JACK ports {0} and {1} must be one output and one input")]
    Direction(u64, u64),

    #[error("JACK ports {0} and {1} are already connected")]
    AlreadyConnected(u64, u64),

    #[error("JACK ports {0} and {1} are not connected")]
    NotConnected(u64, u64),

    #[error("JACK client error: {0}")]
    Client(String),

    #[error("{0} is not supported by this JACK backend")]
    Unsupported(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JackEvent {
    ServerStarted,
    ServerStopped,
    ClientAppeared {
        id: u64,
        name: String,
        pid: Option<u32>,
    },
    ClientDisappeared {
        id: u64,
    },
    PortAppeared {
        client_id: u64,
        port_id: u64,
        name: String,
        is_input: bool,
        is_terminal: bool,
        is_midi: bool,
    },
    PortDisappeared {
        client_id: u64,
        port_id: u64,
    },
    PortRenamed {
        client_id: u64,
        port_id: u64,
        old_name: String,
        new_name: String,
    },
    PortsConnected {
        client1_id: u64,
        port1_id: u64,
        client2_id: u64,
        port2_id: u64,
    },
    PortsDisconnected {
        client1_id: u64,
        port1_id: u64,
        client2_id: u64,
        port2_id: u64,
    },
}

pub trait JackBackend: Send {
    fn start_server(&mut self) -> Result<(), JackError>;
    fn stop_server(&mut self) -> Result<(), JackError>;
    fn is_started(&self) -> bool;
    fn connect_ports(&mut self, port1: u64, port2: u64) -> Result<(), JackError>;
    fn disconnect_ports(&mut self, port1: u64, port2: u64) -> Result<(), JackError>;
    fn client_pid(&self, client: u64) -> Option<u32>;
    /// Current clients, ports and connections replayed as appear/connect events.
    fn current_graph(&self) -> Vec<JackEvent>;

    /// Server parameters (`driver`, `rate`, `period`, driver extras) to use
    /// from the next start on. What a running server can take is applied now.
    fn configure(&mut self, params: &BTreeMap<String, String>) -> Result<(), JackError>;

    /// Parameters of the running server. Empty while stopped.
    fn current_params(&self) -> BTreeMap<String, String>;

    /// Ask a JACK-session client to save its state into `dir`. Returns the
    /// command line that restores it, with `${SESSION_DIR}` for the directory.
    fn session_save(&mut self, client: u64, dir: &Path) -> Result<String, JackError> {
        let _ = (client, dir);
        Err(JackError::Unsupported("JACK session save"))
    }
}

/// Placeholder JACK-session command lines use for their save directory.
pub const SESSION_DIR_VAR: &str = "${SESSION_DIR}";

/// Name JACK gives the hardware client.
pub const SYSTEM_CLIENT_NAME: &str = "system";

#[derive(Debug, Clone)]
struct LoopClient {
    name: String,
    pid: Option<u32>,
}

#[derive(Debug, Clone)]
struct LoopPort {
    client: u64,
    name: String,
    is_input: bool,
    is_terminal: bool,
    is_midi: bool,
}

#[derive(Debug, Default)]
struct LoopState {
    started: bool,
    next_id: u64,
    clients: BTreeMap<u64, LoopClient>,
    ports: BTreeMap<u64, LoopPort>,
    /// (output port, input port)
    connections: Vec<(u64, u64)>,
    params: BTreeMap<String, String>,
    /// Restore command lines of clients that answer session saves
    session_commands: BTreeMap<u64, String>,
}

impl LoopState {
    /// Forget everything the server knew. Returns whether it was running.
    fn reset(&mut self) -> bool {
        let was_started = std::mem::replace(&mut self.started, false);
        self.clients.clear();
        self.ports.clear();
        self.connections.clear();
        self.session_commands.clear();
        was_started
    }

    fn alloc(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn connect_event(&self, out: u64, inp: u64, connected: bool) -> JackEvent {
        let c1 = self.ports.get(&out).map_or(0, |p| p.client);
        let c2 = self.ports.get(&inp).map_or(0, |p| p.client);
        if connected {
            JackEvent::PortsConnected {
                client1_id: c1,
                port1_id: out,
                client2_id: c2,
                port2_id: inp,
            }
        } else {
            JackEvent::PortsDisconnected {
                client1_id: c1,
                port1_id: out,
                client2_id: c2,
                port2_id: inp,
            }
        }
    }
}

/// In-process model of a JACK server.
///
/// Starting it registers a `system` client with hardware-like ports. Other
/// clients are added through a [`LoopbackHandle`]. Used when no real server is
/// wanted, and by tests.
pub struct LoopbackBackend {
    state: Arc<Mutex<LoopState>>,
    events: mpsc::UnboundedSender<JackEvent>,
    capture_ports: usize,
    playback_ports: usize,
}

/// Drives a [`LoopbackBackend`] from outside, the way JACK clients would.
#[derive(Clone)]
pub struct LoopbackHandle {
    state: Arc<Mutex<LoopState>>,
    events: mpsc::UnboundedSender<JackEvent>,
}

fn lock(state: &Mutex<LoopState>) -> MutexGuard<'_, LoopState> {
    // A panic while holding the lock leaves plain data behind, still usable
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LoopbackBackend {
    pub fn new(events: mpsc::UnboundedSender<JackEvent>) -> Self {
        Self {
            state: Arc::new(Mutex::new(LoopState::default())),
            events,
            capture_ports: 2,
            playback_ports: 2,
        }
    }

    pub fn with_system_ports(mut self, capture: usize, playback: usize) -> Self {
        self.capture_ports = capture;
        self.playback_ports = playback;
        self
    }

    pub fn handle(&self) -> LoopbackHandle {
        LoopbackHandle {
            state: self.state.clone(),
            events: self.events.clone(),
        }
    }

    fn send(&self, event: JackEvent) {
        let _ = self.events.send(event);
    }
}

impl JackBackend for LoopbackBackend {
    fn start_server(&mut self) -> Result<(), JackError> {
        if lock(&self.state).started {
            return Ok(());
        }
        {
            let mut state = lock(&self.state);
            state.started = true;
        }
        info!("loopback JACK server started");
        self.send(JackEvent::ServerStarted);

        let handle = self.handle();
        let system = handle.add_client(SYSTEM_CLIENT_NAME, None)?;
        // JACK capture ports are outputs, playback ports are inputs
        for n in 1..=self.capture_ports {
            handle.add_port(system, &format!("capture_{}", n), false, true, false)?;
        }
        for n in 1..=self.playback_ports {
            handle.add_port(system, &format!("playback_{}", n), true, true, false)?;
        }
        Ok(())
    }

    fn stop_server(&mut self) -> Result<(), JackError> {
        if !lock(&self.state).reset() {
            return Ok(());
        }
        info!("loopback JACK server stopped");
        self.send(JackEvent::ServerStopped);
        Ok(())
    }

    fn is_started(&self) -> bool {
        lock(&self.state).started
    }

    fn connect_ports(&mut self, port1: u64, port2: u64) -> Result<(), JackError> {
        self.handle().connect(port1, port2)
    }

    fn disconnect_ports(&mut self, port1: u64, port2: u64) -> Result<(), JackError> {
        self.handle().disconnect(port1, port2)
    }

    fn client_pid(&self, client: u64) -> Option<u32> {
        lock(&self.state).clients.get(&client)?.pid
    }

    fn current_graph(&self) -> Vec<JackEvent> {
        let state = lock(&self.state);
        let mut events = Vec::new();
        for (id, client) in &state.clients {
            events.push(JackEvent::ClientAppeared {
                id: *id,
                name: client.name.clone(),
                pid: client.pid,
            });
        }
        for (id, port) in &state.ports {
            events.push(JackEvent::PortAppeared {
                client_id: port.client,
                port_id: *id,
                name: port.name.clone(),
                is_input: port.is_input,
                is_terminal: port.is_terminal,
                is_midi: port.is_midi,
            });
        }
        for (out, inp) in &state.connections {
            events.push(state.connect_event(*out, *inp, true));
        }
        events
    }

    fn configure(&mut self, params: &BTreeMap<String, String>) -> Result<(), JackError> {
        let mut state = lock(&self.state);
        if state.started && state.params != *params {
            debug!("loopback server running, parameters apply on next start");
        }
        state.params = params.clone();
        Ok(())
    }

    fn current_params(&self) -> BTreeMap<String, String> {
        let state = lock(&self.state);
        if !state.started {
            return BTreeMap::new();
        }
        let mut params: BTreeMap<String, String> = [
            ("driver", "loopback"),
            ("rate", LOOPBACK_RATE),
            ("period", LOOPBACK_PERIOD),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        params.extend(state.params.clone());
        params
    }

    fn session_save(&mut self, client: u64, dir: &Path) -> Result<String, JackError> {
        let handle = self.handle();
        let (name, command) = {
            let state = handle.started()?;
            let name = state
                .clients
                .get(&client)
                .ok_or(JackError::UnknownClient(client))?
                .name
                .clone();
            let command = state
                .session_commands
                .get(&client)
                .cloned()
                .ok_or(JackError::Unsupported("JACK session save"))?;
            (name, command)
        };
        std::fs::create_dir_all(dir)
            .and_then(|()| std::fs::write(dir.join(LOOPBACK_SESSION_FILE), &name))
            .map_err(|e| JackError::Client(format!("session save of {}: {}", name, e)))?;
        debug!(client = %name, dir = %dir.display(), "loopback session saved");
        Ok(command)
    }
}

const LOOPBACK_RATE: &str = "48000";
const LOOPBACK_PERIOD: &str = "1024";
/// File a loopback session client writes into its save directory.
pub const LOOPBACK_SESSION_FILE: &str = "session";

impl LoopbackHandle {
    fn send(&self, event: JackEvent) {
        let _ = self.events.send(event);
    }

    fn started(&self) -> Result<MutexGuard<'_, LoopState>, JackError> {
        let state = lock(&self.state);
        if !state.started {
            return Err(JackError::NotStarted);
        }
        Ok(state)
    }

    /// Lose the server without a stop request, the way a dying jackd does.
    pub fn crash(&self) {
        if !lock(&self.state).reset() {
            return;
        }
        warn!("loopback JACK server crashed");
        self.send(JackEvent::ServerStopped);
    }

    /// Make `client` answer session saves with `command`.
    pub fn set_session_command(&self, client: u64, command: &str) -> Result<(), JackError> {
        let mut state = self.started()?;
        if !state.clients.contains_key(&client) {
            return Err(JackError::UnknownClient(client));
        }
        state.session_commands.insert(client, command.to_string());
        Ok(())
    }

    pub fn add_client(&self, name: &str, pid: Option<u32>) -> Result<u64, JackError> {
        let id = {
            let mut state = self.started()?;
            let id = state.alloc();
            state.clients.insert(
                id,
                LoopClient {
                    name: name.to_string(),
                    pid,
                },
            );
            id
        };
        debug!(id, name, "loopback client registered");
        self.send(JackEvent::ClientAppeared {
            id,
            name: name.to_string(),
            pid,
        });
        Ok(id)
    }

    /// Remove a client, unregistering its ports and connections first.
    pub fn remove_client(&self, id: u64) -> Result<(), JackError> {
        let ports: Vec<u64> = {
            let state = self.started()?;
            if !state.clients.contains_key(&id) {
                return Err(JackError::UnknownClient(id));
            }
            state
                .ports
                .iter()
                .filter(|(_, p)| p.client == id)
                .map(|(pid, _)| *pid)
                .collect()
        };
        for port in ports {
            self.remove_port(port)?;
        }
        {
            let mut state = self.started()?;
            state.clients.remove(&id);
            state.session_commands.remove(&id);
        }
        self.send(JackEvent::ClientDisappeared { id });
        Ok(())
    }

    pub fn add_port(
        &self,
        client: u64,
        name: &str,
        is_input: bool,
        is_terminal: bool,
        is_midi: bool,
    ) -> Result<u64, JackError> {
        let id = {
            let mut state = self.started()?;
            if !state.clients.contains_key(&client) {
                return Err(JackError::UnknownClient(client));
            }
            let id = state.alloc();
            state.ports.insert(
                id,
                LoopPort {
                    client,
                    name: name.to_string(),
                    is_input,
                    is_terminal,
                    is_midi,
                },
            );
            id
        };
        self.send(JackEvent::PortAppeared {
            client_id: client,
            port_id: id,
            name: name.to_string(),
            is_input,
            is_terminal,
            is_midi,
        });
        Ok(id)
    }

    pub fn remove_port(&self, port: u64) -> Result<(), JackError> {
        let (client, dropped) = {
            let mut state = self.started()?;
            let client = state.ports.get(&port).ok_or(JackError::UnknownPort(port))?.client;
            let dropped: Vec<JackEvent> = state
                .connections
                .iter()
                .filter(|(o, i)| *o == port || *i == port)
                .map(|(o, i)| state.connect_event(*o, *i, false))
                .collect();
            state.connections.retain(|(o, i)| *o != port && *i != port);
            state.ports.remove(&port);
            (client, dropped)
        };
        for event in dropped {
            self.send(event);
        }
        self.send(JackEvent::PortDisappeared {
            client_id: client,
            port_id: port,
        });
        Ok(())
    }

    pub fn rename_port(&self, port: u64, new_name: &str) -> Result<(), JackError> {
        let (client, old_name) = {
            let mut state = self.started()?;
            let entry = state.ports.get_mut(&port).ok_or(JackError::UnknownPort(port))?;
            (entry.client, std::mem::replace(&mut entry.name, new_name.to_string()))
        };
        self.send(JackEvent::PortRenamed {
            client_id: client,
            port_id: port,
            old_name,
            new_name: new_name.to_string(),
        });
        Ok(())
    }

    /// Order a port pair as (output, input).
    fn orient(state: &LoopState, a: u64, b: u64) -> Result<(u64, u64), JackError> {
        let pa = state.ports.get(&a).ok_or(JackError::UnknownPort(a))?;
        let pb = state.ports.get(&b).ok_or(JackError::UnknownPort(b))?;
        match (pa.is_input, pb.is_input) {
            (false, true) => Ok((a, b)),
            (true, false) => Ok((b, a)),
            _ => Err(JackError::Direction(a, b)),
        }
    }

    pub fn connect(&self, a: u64, b: u64) -> Result<(), JackError> {
        let event = {
            let mut state = self.started()?;
            let (out, inp) = Self::orient(&state, a, b)?;
            if state.connections.contains(&(out, inp)) {
                return Err(JackError::AlreadyConnected(a, b));
            }
            state.connections.push((out, inp));
            state.connect_event(out, inp, true)
        };
        self.send(event);
        Ok(())
    }

    pub fn disconnect(&self, a: u64, b: u64) -> Result<(), JackError> {
        let event = {
            let mut state = self.started()?;
            let (out, inp) = Self::orient(&state, a, b)?;
            let before = state.connections.len();
            state.connections.retain(|c| *c != (out, inp));
            if state.connections.len() == before {
                return Err(JackError::NotConnected(a, b));
            }
            state.connect_event(out, inp, false)
        };
        self.send(event);
        Ok(())
    }

    /// Port id by `client:port` style names.
    pub fn port_by_name(&self, client: &str, port: &str) -> Option<u64> {
        let state = lock(&self.state);
        state
            .ports
            .iter()
            .find(|(_, p)| {
                p.name == port && state.clients.get(&p.client).is_some_and(|c| c.name == client)
            })
            .map(|(id, _)| *id)
    }

    pub fn client_by_name(&self, name: &str) -> Option<u64> {
        lock(&self.state)
            .clients
            .iter()
            .find(|(_, c)| c.name == name)
            .map(|(id, _)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<JackEvent>) -> Vec<JackEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn test_start_registers_system_ports() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut backend = LoopbackBackend::new(tx).with_system_ports(1, 1);
        backend.start_server().unwrap();
        assert!(backend.is_started());

        let events = drain(&mut rx);
        assert_eq!(events[0], JackEvent::ServerStarted);
        assert!(matches!(&events[1], JackEvent::ClientAppeared { name, .. } if name == "system"));
        assert!(matches!(
            &events[2],
            JackEvent::PortAppeared { name, is_input: false, is_terminal: true, .. } if name == "capture_1"
        ));
        assert!(matches!(
            &events[3],
            JackEvent::PortAppeared { name, is_input: true, .. } if name == "playback_1"
        ));
    }

    #[test]
    fn test_connect_orients_and_rejects_duplicates() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut backend = LoopbackBackend::new(tx);
        backend.start_server().unwrap();
        let handle = backend.handle();

        let synth = handle.add_client("synth", Some(4321)).unwrap();
        let out = handle.add_port(synth, "out_l", false, false, false).unwrap();
        let playback = handle.port_by_name("system", "playback_1").unwrap();
        drain(&mut rx);

        backend.connect_ports(playback, out).unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![JackEvent::PortsConnected {
                client1_id: synth,
                port1_id: out,
                client2_id: handle.client_by_name("system").unwrap(),
                port2_id: playback,
            }]
        );
        assert!(matches!(
            backend.connect_ports(out, playback),
            Err(JackError::AlreadyConnected(..))
        ));

        let capture = handle.port_by_name("system", "capture_1").unwrap();
        assert!(matches!(
            backend.connect_ports(out, capture),
            Err(JackError::Direction(..))
        ));
        assert_eq!(backend.client_pid(synth), Some(4321));
    }

    #[test]
    fn test_remove_client_cascades() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut backend = LoopbackBackend::new(tx);
        backend.start_server().unwrap();
        let handle = backend.handle();
        let synth = handle.add_client("synth", None).unwrap();
        let out = handle.add_port(synth, "out", false, false, false).unwrap();
        let playback = handle.port_by_name("system", "playback_1").unwrap();
        handle.connect(out, playback).unwrap();
        drain(&mut rx);

        handle.remove_client(synth).unwrap();
        let events = drain(&mut rx);
        assert!(matches!(events[0], JackEvent::PortsDisconnected { .. }));
        assert!(matches!(events[1], JackEvent::PortDisappeared { port_id, .. } if port_id == out));
        assert_eq!(events[2], JackEvent::ClientDisappeared { id: synth });
    }

    #[test]
    fn test_stopped_server_refuses_work() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut backend = LoopbackBackend::new(tx);
        assert!(matches!(backend.handle().add_client("x", None), Err(JackError::NotStarted)));
        backend.start_server().unwrap();
        assert!(!backend.current_graph().is_empty());
        backend.stop_server().unwrap();
        assert!(backend.current_graph().is_empty());
    }

    #[test]
    fn test_crash_reports_stop_and_allows_restart() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut backend = LoopbackBackend::new(tx).with_system_ports(1, 1);
        backend.start_server().unwrap();
        let handle = backend.handle();
        handle.add_client("synth", None).unwrap();
        drain(&mut rx);

        handle.crash();
        assert!(!backend.is_started());
        assert_eq!(drain(&mut rx), vec![JackEvent::ServerStopped]);
        assert!(handle.client_by_name("synth").is_none());

        // A second crash of a dead server is silent
        handle.crash();
        assert!(drain(&mut rx).is_empty());

        backend.start_server().unwrap();
        assert!(backend.is_started());
        assert_eq!(drain(&mut rx)[0], JackEvent::ServerStarted);
    }

    #[test]
    fn test_params_apply_from_next_start() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut backend = LoopbackBackend::new(tx);
        assert!(backend.current_params().is_empty());

        let params: BTreeMap<String, String> =
            [("rate".to_string(), "44100".to_string())].into_iter().collect();
        backend.configure(&params).unwrap();
        backend.start_server().unwrap();

        let current = backend.current_params();
        assert_eq!(current.get("rate").map(String::as_str), Some("44100"));
        assert_eq!(current.get("period").map(String::as_str), Some("1024"));
        assert_eq!(current.get("driver").map(String::as_str), Some("loopback"));
    }

    #[test]
    fn test_session_save_writes_into_dir() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut backend = LoopbackBackend::new(tx);
        backend.start_server().unwrap();
        let handle = backend.handle();
        let plain = handle.add_client("plain", None).unwrap();
        let synth = handle.add_client("synth", None).unwrap();
        handle
            .set_session_command(synth, "synth --session ${SESSION_DIR}")
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("synth");
        let command = backend.session_save(synth, &target).unwrap();
        assert_eq!(command, "synth --session ${SESSION_DIR}");
        assert_eq!(
            std::fs::read_to_string(target.join(LOOPBACK_SESSION_FILE)).unwrap(),
            "synth"
        );

        assert!(matches!(
            backend.session_save(plain, dir.path()),
            Err(JackError::Unsupported(_))
        ));
    }
}
