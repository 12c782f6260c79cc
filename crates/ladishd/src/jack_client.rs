//! JACK backend on a real server, via the `jack` crate.
//!
//! The daemon registers one client with no ports and listens to graph
//! notifications. JACK has no numeric client ids, so ids are assigned here
//! per client name and kept for as long as the server runs. Port ids are
//! JACK's own.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use ::jack::{Client, ClientOptions, ClientStatus, Control, NotificationHandler, PortFlags, PortId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::jack::{JackBackend, JackError, JackEvent};
use crate::procfs;

#[derive(Debug, Default)]
struct IdMap {
    next_client_id: u64,
    clients: HashMap<String, u64>,
    /// JACK port id -> (client id, full "client:port" name)
    ports: HashMap<u64, (u64, String)>,
}

impl IdMap {
    fn client_id(&mut self, name: &str) -> (u64, bool) {
        if let Some(id) = self.clients.get(name) {
            return (*id, false);
        }
        self.next_client_id += 1;
        let id = self.next_client_id;
        self.clients.insert(name.to_string(), id);
        (id, true)
    }

    /// Id for `name` and whether it should be announced. Without a replay
    /// set only new clients are; with one, each client once per replay.
    fn register(&mut self, name: &str, announced: Option<&mut HashSet<u64>>) -> (u64, bool) {
        let (id, new_client) = self.client_id(name);
        let announce = match announced {
            Some(seen) => seen.insert(id),
            None => new_client,
        };
        (id, announce)
    }

    fn client_name(&self, id: u64) -> Option<&str> {
        self.clients
            .iter()
            .find(|(_, client)| **client == id)
            .map(|(name, _)| name.as_str())
    }

    fn clear(&mut self) {
        self.clients.clear();
        self.ports.clear();
    }
}

/// Upper bound for the port id scan on replay. JACK ids are small and dense.
const MAX_PORT_ID: PortId = 4096;

fn lock(ids: &Mutex<IdMap>) -> MutexGuard<'_, IdMap> {
    ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn split_name(full: &str) -> (&str, &str) {
    full.split_once(':').unwrap_or(("", full))
}

/// Port appearance for the port `id`, registering its client if needed.
fn describe_port(
    client: &Client,
    ids: &Mutex<IdMap>,
    id: PortId,
    announced: Option<&mut HashSet<u64>>,
) -> Vec<JackEvent> {
    let Some(port) = client.port_by_id(id) else {
        return Vec::new();
    };
    let Ok(full) = port.name() else {
        return Vec::new();
    };
    let flags = port.flags();
    let is_midi = port
        .port_type()
        .map(|t| t.contains("midi"))
        .unwrap_or(false);

    let (client_name, port_name) = split_name(&full);
    let mut events = Vec::new();
    let mut map = lock(ids);
    let (client_id, announce) = map.register(client_name, announced);
    if announce {
        events.push(JackEvent::ClientAppeared {
            id: client_id,
            name: client_name.to_string(),
            pid: None,
        });
    }
    map.ports.insert(id as u64, (client_id, full.clone()));
    events.push(JackEvent::PortAppeared {
        client_id,
        port_id: id as u64,
        name: port_name.to_string(),
        is_input: flags.contains(PortFlags::IS_INPUT),
        is_terminal: flags.contains(PortFlags::IS_TERMINAL),
        is_midi,
    });
    events
}

struct Notifications {
    ids: Arc<Mutex<IdMap>>,
    events: mpsc::UnboundedSender<JackEvent>,
    /// Cleared when the server shuts the client down
    alive: Arc<AtomicBool>,
}

impl Notifications {
    fn send(&self, event: JackEvent) {
        let _ = self.events.send(event);
    }
}

impl NotificationHandler for Notifications {
    unsafe fn shutdown(&mut self, status: ClientStatus, reason: &str) {
        warn!(?status, reason, "JACK server shut the client down");
        self.alive.store(false, Ordering::SeqCst);
        lock(&self.ids).clear();
        self.send(JackEvent::ServerStopped);
    }

    fn client_registration(&mut self, _: &Client, name: &str, is_registered: bool) {
        if is_registered {
            let (id, new_client) = lock(&self.ids).client_id(name);
            if new_client {
                self.send(JackEvent::ClientAppeared {
                    id,
                    name: name.to_string(),
                    pid: None,
                });
            }
        } else {
            let removed = lock(&self.ids).clients.remove(name);
            if let Some(id) = removed {
                self.send(JackEvent::ClientDisappeared { id });
            }
        }
    }

    fn port_registration(&mut self, client: &Client, port_id: PortId, is_registered: bool) {
        if is_registered {
            for event in describe_port(client, &self.ids, port_id, None) {
                self.send(event);
            }
        } else {
            let removed = lock(&self.ids).ports.remove(&(port_id as u64));
            if let Some((client_id, _)) = removed {
                self.send(JackEvent::PortDisappeared {
                    client_id,
                    port_id: port_id as u64,
                });
            }
        }
    }

    fn port_rename(
        &mut self,
        _: &Client,
        port_id: PortId,
        old_name: &str,
        new_name: &str,
    ) -> Control {
        let client_id = {
            let mut map = lock(&self.ids);
            map.ports.get_mut(&(port_id as u64)).map(|(client_id, full)| {
                *full = new_name.to_string();
                *client_id
            })
        };
        if let Some(client_id) = client_id {
            self.send(JackEvent::PortRenamed {
                client_id,
                port_id: port_id as u64,
                old_name: split_name(old_name).1.to_string(),
                new_name: split_name(new_name).1.to_string(),
            });
        }
        Control::Continue
    }

    fn ports_connected(&mut self, _: &Client, a: PortId, b: PortId, are_connected: bool) {
        let (client1_id, client2_id) = {
            let map = lock(&self.ids);
            (
                map.ports.get(&(a as u64)).map_or(0, |p| p.0),
                map.ports.get(&(b as u64)).map_or(0, |p| p.0),
            )
        };
        let (port1_id, port2_id) = (a as u64, b as u64);
        self.send(if are_connected {
            JackEvent::PortsConnected {
                client1_id,
                port1_id,
                client2_id,
                port2_id,
            }
        } else {
            JackEvent::PortsDisconnected {
                client1_id,
                port1_id,
                client2_id,
                port2_id,
            }
        });
    }
}

pub struct JackClientBackend {
    client_name: String,
    events: mpsc::UnboundedSender<JackEvent>,
    ids: Arc<Mutex<IdMap>>,
    alive: Arc<AtomicBool>,
    params: BTreeMap<String, String>,
    active: Option<::jack::AsyncClient<Notifications, ()>>,
}

impl JackClientBackend {
    pub fn new(client_name: impl Into<String>, events: mpsc::UnboundedSender<JackEvent>) -> Self {
        Self {
            client_name: client_name.into(),
            events,
            ids: Arc::new(Mutex::new(IdMap::default())),
            alive: Arc::new(AtomicBool::new(false)),
            params: BTreeMap::new(),
            active: None,
        }
    }

    fn client(&self) -> Result<&Client, JackError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(JackError::NotStarted);
        }
        self.active
            .as_ref()
            .map(|a| a.as_client())
            .ok_or(JackError::NotStarted)
    }

    /// Apply what a running server accepts: the period. The sample rate is
    /// fixed once the server runs, so a mismatch is only reported.
    fn apply_params(&self, client: &Client) {
        if let Some(period) = self.params.get("period") {
            match period.parse::<u32>() {
                Ok(frames) if frames == client.buffer_size() => {}
                Ok(frames) => match client.set_buffer_size(frames) {
                    Ok(()) => info!(frames, "JACK period set"),
                    Err(e) => warn!(frames, "cannot set JACK period: {}", e),
                },
                Err(_) => warn!(%period, "ignoring non-numeric JACK period"),
            }
        }
        if let Some(rate) = self.params.get("rate") {
            if rate.parse::<usize>().ok() != Some(client.sample_rate()) {
                warn!(
                    requested = %rate,
                    running = client.sample_rate(),
                    "JACK server runs at a different sample rate"
                );
            }
        }
    }

    /// Full port names for two ids, ordered (output, input).
    fn port_pair(&self, a: u64, b: u64) -> Result<(String, String), JackError> {
        let client = self.client()?;
        let name_of = |id: u64| -> Result<(String, bool), JackError> {
            let port = client
                .port_by_id(id as PortId)
                .ok_or(JackError::UnknownPort(id))?;
            let name = port.name().map_err(|e| JackError::Client(e.to_string()))?;
            Ok((name, port.flags().contains(PortFlags::IS_INPUT)))
        };
        let (na, a_in) = name_of(a)?;
        let (nb, b_in) = name_of(b)?;
        match (a_in, b_in) {
            (false, true) => Ok((na, nb)),
            (true, false) => Ok((nb, na)),
            _ => Err(JackError::Direction(a, b)),
        }
    }

    fn replay(&self, client: &Client) -> Vec<JackEvent> {
        // Client ids stay; the studio graph knows clients by them
        lock(&self.ids).ports.clear();

        let mut announced = HashSet::new();
        let mut events = Vec::new();
        let mut outputs = Vec::new();
        let mut inputs = Vec::new();
        for id in 0..MAX_PORT_ID {
            let Some(port) = client.port_by_id(id) else {
                continue;
            };
            let Ok(name) = port.name() else {
                continue;
            };
            events.extend(describe_port(client, &self.ids, id, Some(&mut announced)));
            if port.flags().contains(PortFlags::IS_INPUT) {
                inputs.push((id, name));
            } else {
                outputs.push((id, port));
            }
        }

        for (out_id, out) in &outputs {
            for (in_id, in_name) in &inputs {
                if !out.is_connected_to(in_name).unwrap_or(false) {
                    continue;
                }
                let map = lock(&self.ids);
                events.push(JackEvent::PortsConnected {
                    client1_id: map.ports.get(&(*out_id as u64)).map_or(0, |p| p.0),
                    port1_id: *out_id as u64,
                    client2_id: map.ports.get(&(*in_id as u64)).map_or(0, |p| p.0),
                    port2_id: *in_id as u64,
                });
            }
        }
        events
    }
}

impl JackBackend for JackClientBackend {
    fn start_server(&mut self) -> Result<(), JackError> {
        if self.active.is_some() {
            if self.alive.load(Ordering::SeqCst) {
                return Ok(());
            }
            // The server went away under the old client
            if let Some(stale) = self.active.take() {
                if let Err(e) = stale.deactivate() {
                    debug!("dropping client of the lost server: {}", e);
                }
            }
            lock(&self.ids).clear();
        }

        // Opening a client without NO_START_SERVER lets libjack autostart jackd
        let (client, status) = Client::new(&self.client_name, ClientOptions::empty())
            .map_err(|e| JackError::ServerStart(e.to_string()))?;
        debug!(?status, "JACK client opened");

        self.alive.store(true, Ordering::SeqCst);
        let notifications = Notifications {
            ids: self.ids.clone(),
            events: self.events.clone(),
            alive: self.alive.clone(),
        };
        let active = client.activate_async(notifications, ()).map_err(|e| {
            self.alive.store(false, Ordering::SeqCst);
            JackError::Client(e.to_string())
        })?;
        info!(name = %self.client_name, "connected to JACK server");
        self.apply_params(active.as_client());

        let _ = self.events.send(JackEvent::ServerStarted);
        for event in self.replay(active.as_client()) {
            let _ = self.events.send(event);
        }
        self.active = Some(active);
        Ok(())
    }

    fn stop_server(&mut self) -> Result<(), JackError> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };
        let was_alive = self.alive.swap(false, Ordering::SeqCst);
        if let Err(e) = active.deactivate() {
            warn!("failed to deactivate JACK client: {}", e);
        }
        lock(&self.ids).clear();
        if !was_alive {
            // Already reported by the shutdown notification
            return Ok(());
        }
        info!("disconnected from JACK server");
        let _ = self.events.send(JackEvent::ServerStopped);
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.active.is_some() && self.alive.load(Ordering::SeqCst)
    }

    fn connect_ports(&mut self, port1: u64, port2: u64) -> Result<(), JackError> {
        let (out, inp) = self.port_pair(port1, port2)?;
        self.client()?
            .connect_ports_by_name(&out, &inp)
            .map_err(|e| JackError::Client(e.to_string()))
    }

    fn disconnect_ports(&mut self, port1: u64, port2: u64) -> Result<(), JackError> {
        let (out, inp) = self.port_pair(port1, port2)?;
        self.client()?
            .disconnect_ports_by_name(&out, &inp)
            .map_err(|e| JackError::Client(e.to_string()))
    }

    fn client_pid(&self, client: u64) -> Option<u32> {
        let name = lock(&self.ids).client_name(client)?.to_string();
        procfs::jack_client_pid(&name)
    }

    fn current_graph(&self) -> Vec<JackEvent> {
        match self.client() {
            Ok(client) => self.replay(client),
            Err(_) => Vec::new(),
        }
    }

    fn configure(&mut self, params: &BTreeMap<String, String>) -> Result<(), JackError> {
        self.params = params.clone();
        if let Ok(client) = self.client() {
            self.apply_params(client);
        }
        Ok(())
    }

    fn current_params(&self) -> BTreeMap<String, String> {
        let Ok(client) = self.client() else {
            return BTreeMap::new();
        };
        let mut params = self.params.clone();
        params.insert("rate".to_string(), client.sample_rate().to_string());
        params.insert("period".to_string(), client.buffer_size().to_string());
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_client_ids_are_stable_per_name() {
        let mut map = IdMap::default();
        let (synth, new) = map.client_id("synth");
        assert!(new);
        let (mixer, _) = map.client_id("mixer");
        assert_eq!(map.client_id("synth"), (synth, false));
        assert_ne!(synth, mixer);
        assert_eq!(map.client_name(mixer), Some("mixer"));

        map.clear();
        assert_eq!(map.client_name(synth), None);
    }

    #[test]
    fn test_replay_announces_known_clients_under_their_ids() {
        let mut map = IdMap::default();
        // Registered live before the replay
        let (synth, announce) = map.register("synth", None);
        assert!(announce);
        assert_eq!(map.register("synth", None), (synth, false));

        let mut replayed = HashSet::new();
        assert_eq!(map.register("synth", Some(&mut replayed)), (synth, true));
        // Second port of the same client
        assert_eq!(map.register("synth", Some(&mut replayed)), (synth, false));
        let (mixer, announce) = map.register("mixer", Some(&mut replayed));
        assert!(announce);
        assert_ne!(mixer, synth);

        // A later replay reports them again, same ids
        let mut again = HashSet::new();
        assert_eq!(map.register("synth", Some(&mut again)), (synth, true));
        assert_eq!(map.register("mixer", Some(&mut again)), (mixer, true));
    }
}
