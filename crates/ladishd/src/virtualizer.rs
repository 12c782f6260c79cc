//! Keeps the studio graph in step with the live JACK graph.
//!
//! JACK events land in the JACK graph first. Ports are then mirrored into the
//! studio graph under the same uuid, on a studio client chosen by owner: the
//! `system` client is split into Hardware Capture / Hardware Playback, app
//! clients get a studio client named after their app. Nothing is removed when
//! JACK objects go away; they are hidden and picked up again by name.

use tracing::{debug, info, warn};
use uuid::Uuid;

use ladishproto::{AppState, PortFlags, PortType};

use crate::graph::{
    Graph, GraphClient, GraphError, HARDWARE_CAPTURE_NAME, HARDWARE_CAPTURE_UUID, HARDWARE_PLAYBACK_NAME,
    HARDWARE_PLAYBACK_UUID,
};
use crate::jack::{JackBackend, JackEvent, SYSTEM_CLIENT_NAME};
use crate::room;
use crate::supervisor::AppSupervisor;

#[derive(Debug, Default)]
pub struct Virtualizer {
    system_client: Option<u64>,
}

impl Virtualizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// JACK id of the `system` client, while it is present.
    pub fn system_client(&self) -> Option<u64> {
        self.system_client
    }

    /// Apply one JACK event to both graphs.
    pub fn handle(
        &mut self,
        event: &JackEvent,
        jack: &mut Graph,
        studio: &mut Graph,
        apps: &AppSupervisor,
        backend: &mut dyn JackBackend,
    ) {
        let result = match event {
            JackEvent::ServerStarted => {
                info!("JACK server started");
                Ok(())
            }
            JackEvent::ServerStopped => {
                info!("JACK server stopped");
                self.stop(jack, studio);
                Ok(())
            }
            JackEvent::ClientAppeared { id, name, pid } => {
                let pid = pid.or_else(|| backend.client_pid(*id));
                self.client_appeared(*id, name, pid, jack, apps)
            }
            JackEvent::ClientDisappeared { id } => self.client_disappeared(*id, jack, studio),
            JackEvent::PortAppeared {
                client_id,
                port_id,
                name,
                is_input,
                is_terminal,
                is_midi,
            } => {
                let mut flags = if *is_input { PortFlags::INPUT } else { PortFlags::OUTPUT };
                if *is_terminal {
                    flags = flags | PortFlags::TERMINAL;
                }
                let port_type = if *is_midi { PortType::Midi } else { PortType::Audio };
                self.port_appeared(*client_id, *port_id, name, port_type, flags, jack, studio, apps, backend)
            }
            JackEvent::PortDisappeared { port_id, .. } => port_disappeared(*port_id, jack, studio),
            JackEvent::PortRenamed {
                port_id, new_name, ..
            } => port_renamed(*port_id, new_name, jack, studio),
            JackEvent::PortsConnected {
                port1_id, port2_id, ..
            } => ports_connected(*port1_id, *port2_id, jack, studio),
            JackEvent::PortsDisconnected {
                port1_id, port2_id, ..
            } => ports_disconnected(*port1_id, *port2_id, jack, studio, apps),
        };

        if let Err(e) = result {
            warn!(?event, "virtualizer could not apply JACK event: {}", e);
        }
    }

    fn client_appeared(
        &mut self,
        jack_id: u64,
        name: &str,
        pid: Option<u32>,
        jack: &mut Graph,
        apps: &AppSupervisor,
    ) -> Result<(), GraphError> {
        let existing = jack
            .client_by_name(name)
            .filter(|c| c.jack_id.is_none())
            .map(|c| c.uuid);

        let uuid = match existing {
            Some(uuid) => {
                debug!(name, jack_id, "known client reappeared");
                jack.show_client(uuid)?;
                uuid
            }
            None => {
                let uuid = Uuid::new_v4();
                jack.add_client(uuid, name, false)?;
                uuid
            }
        };
        jack.set_client_jack_id(uuid, Some(jack_id))?;
        jack.set_client_pid(uuid, pid)?;

        let app = pid
            .and_then(|pid| apps.find_app_by_pid(pid))
            .or_else(|| apps.find_app_by_name(name));
        if let Some(app) = app {
            debug!(client = name, app = %app.name, "client belongs to app");
            jack.set_client_app(uuid, Some(app.uuid))?;
        }

        if name == SYSTEM_CLIENT_NAME {
            self.system_client = Some(jack_id);
        }
        Ok(())
    }

    fn client_disappeared(
        &mut self,
        jack_id: u64,
        jack: &mut Graph,
        studio: &mut Graph,
    ) -> Result<(), GraphError> {
        if self.system_client == Some(jack_id) {
            self.system_client = None;
        }

        let Some(client) = jack.client_by_jack_id(jack_id) else {
            debug!(jack_id, "unknown client disappeared");
            return Ok(());
        };
        let uuid = client.uuid;
        let ports: Vec<Uuid> = jack.client_ports(uuid).iter().map(|p| p.uuid).collect();

        for port in &ports {
            jack.set_port_jack_id(*port, None)?;
            hide_studio_port(*port, studio)?;
        }
        jack.set_client_jack_id(uuid, None)?;
        jack.set_client_pid(uuid, None)?;
        jack.hide_client(uuid)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn port_appeared(
        &mut self,
        client_jack_id: u64,
        port_jack_id: u64,
        name: &str,
        port_type: PortType,
        flags: PortFlags,
        jack: &mut Graph,
        studio: &mut Graph,
        apps: &AppSupervisor,
        backend: &mut dyn JackBackend,
    ) -> Result<(), GraphError> {
        let Some(jclient) = jack.client_by_jack_id(client_jack_id) else {
            warn!(client_jack_id, port = name, "port of unknown client");
            return Ok(());
        };
        let jclient_uuid = jclient.uuid;
        let jclient_name = jclient.name.clone();
        let app_uuid = jclient.app;

        // JACK graph
        let existing = jack.port_by_name(jclient_uuid, name).map(|p| p.uuid);
        let uuid = match existing {
            Some(uuid) => {
                jack.adjust_port(uuid, port_type, flags)?;
                jack.show_port(uuid)?;
                uuid
            }
            None => {
                let uuid = Uuid::new_v4();
                jack.add_port(jclient_uuid, uuid, name, port_type, flags, false)?;
                uuid
            }
        };
        jack.set_port_jack_id(uuid, Some(port_jack_id))?;

        // Studio graph
        if studio.port(uuid).is_some() {
            studio.adjust_port(uuid, port_type, flags)?;
            studio.show_port(uuid)?;
        } else {
            let sclient = if self.system_client == Some(client_jack_id) {
                hardware_client(flags.is_input(), studio)?
            } else {
                let app = app_uuid
                    .and_then(|u| apps.find_app_by_uuid(u))
                    .map(|a| (a.uuid, a.name.as_str()));
                app_client(client_jack_id, &jclient_name, app, studio)?
            };
            studio.add_port(sclient, uuid, name, port_type, flags, false)?;
        }
        studio.set_port_jack_id(uuid, Some(port_jack_id))?;
        if let Some(owner) = studio.port_client(uuid).map(|c| c.uuid) {
            if owner != HARDWARE_CAPTURE_UUID && owner != HARDWARE_PLAYBACK_UUID {
                studio.set_client_jack_id(owner, Some(client_jack_id))?;
            }
        }

        // Restore studio connections that were waiting for this port
        for (p1, p2) in studio.pending_connections(uuid) {
            let ids = (
                studio.port(p1).and_then(|p| p.jack_id),
                studio.port(p2).and_then(|p| p.jack_id),
            );
            match ids {
                (Some(j1), Some(j2)) => {
                    debug!(j1, j2, "restoring studio connection");
                    if let Err(e) = backend.connect_ports(j1, j2) {
                        warn!("failed to restore connection {} -> {}: {}", j1, j2, e);
                    }
                }
                // Room links have no JACK side
                _ if room::is_link_port(studio, p1) || room::is_link_port(studio, p2) => {
                    if let Some(id) = studio.find_connection(p1, p2).map(|c| c.id) {
                        studio.show_connection(id)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Hide everything after the server went away. Rooms stay.
    pub fn stop(&mut self, jack: &mut Graph, studio: &mut Graph) {
        self.system_client = None;
        for graph in [jack, studio] {
            let clients: Vec<Uuid> = graph
                .clients()
                .map(|c| c.uuid)
                .filter(|c| !room::is_link_client(graph, *c))
                .collect();
            for client in clients {
                let ports: Vec<Uuid> = graph.client_ports(client).iter().map(|p| p.uuid).collect();
                for port in ports {
                    let _ = graph.set_port_jack_id(port, None);
                }
                let _ = graph.set_client_jack_id(client, None);
                let _ = graph.set_client_pid(client, None);
                if let Err(e) = graph.hide_client(client) {
                    warn!("failed to hide client on server stop: {}", e);
                }
            }
        }
    }
}

/// True when no visible JACK client belongs to the app.
pub fn is_hidden_app(jack: &Graph, app: Uuid, name: &str) -> bool {
    !jack
        .clients()
        .any(|c| !c.hidden && (c.app == Some(app) || (c.app.is_none() && c.name == name)))
}

/// Drop the clients a removed app leaves behind in both graphs.
pub fn remove_app(jack: &mut Graph, studio: &mut Graph, app: Uuid) -> Result<(), GraphError> {
    for graph in [jack, studio] {
        let owned: Vec<Uuid> = graph.clients_by_app(app).map(|c| c.uuid).collect();
        for client in owned {
            debug!(graph = %graph.kind(), %client, "removing client of removed app");
            graph.remove_client(client)?;
        }
    }
    Ok(())
}

fn hardware_client(is_input: bool, studio: &mut Graph) -> Result<Uuid, GraphError> {
    // JACK playback ports are inputs
    let (uuid, name) = if is_input {
        (HARDWARE_PLAYBACK_UUID, HARDWARE_PLAYBACK_NAME)
    } else {
        (HARDWARE_CAPTURE_UUID, HARDWARE_CAPTURE_NAME)
    };
    if studio.client(uuid).is_none() {
        studio.add_client(uuid, name, false)?;
    }
    Ok(uuid)
}

/// Studio client for the ports of a JACK client.
///
/// An app's first JACK client is shown under the app name, further ones as
/// `App (jack client)`. A hidden client with the same name (and app, when
/// both have one) is reused, so identities survive restarts.
fn app_client(
    jack_id: u64,
    jclient_name: &str,
    app: Option<(Uuid, &str)>,
    studio: &mut Graph,
) -> Result<Uuid, GraphError> {
    if let Some(client) = studio.client_by_jack_id(jack_id) {
        return Ok(client.uuid);
    }

    let app_uuid = app.map(|(uuid, _)| uuid);
    let (name, app_taken) = match app {
        Some((uuid, app_name)) => {
            let taken = studio
                .clients()
                .any(|c| c.jack_id.is_some() && c.app == Some(uuid) && c.name == app_name);
            if taken {
                (format!("{} ({})", app_name, jclient_name), true)
            } else {
                (app_name.to_string(), false)
            }
        }
        None => (jclient_name.to_string(), false),
    };

    let dormant = |c: &&GraphClient| {
        c.jack_id.is_none()
            && c.uuid != HARDWARE_CAPTURE_UUID
            && c.uuid != HARDWARE_PLAYBACK_UUID
            && !room::is_link_client(studio, c.uuid)
    };
    let by_name = studio
        .clients()
        .filter(dormant)
        .find(|c| {
            c.name == name
                && match (app_uuid, c.app) {
                    (Some(a), Some(b)) => a == b,
                    _ => true,
                }
        })
        .map(|c| c.uuid);
    // A renamed client of the app still counts for its first JACK client
    let dormant = by_name.or_else(|| {
        let app_uuid = app_uuid.filter(|_| !app_taken)?;
        studio
            .clients()
            .filter(dormant)
            .find(|c| c.app == Some(app_uuid))
            .map(|c| c.uuid)
    });

    let uuid = match dormant {
        Some(uuid) => uuid,
        None => {
            let uuid = Uuid::new_v4();
            studio.add_client(uuid, &name, false)?;
            uuid
        }
    };
    studio.set_client_jack_id(uuid, Some(jack_id))?;
    studio.set_client_app(uuid, app_uuid)?;
    Ok(uuid)
}

fn hide_studio_port(uuid: Uuid, studio: &mut Graph) -> Result<(), GraphError> {
    if studio.port(uuid).is_none() {
        return Ok(());
    }
    studio.set_port_jack_id(uuid, None)?;
    studio.hide_port(uuid)?;

    let Some(client) = studio.port_client(uuid).map(|c| c.uuid) else {
        return Ok(());
    };
    if studio.is_client_looks_empty(client)? {
        studio.set_client_jack_id(client, None)?;
        studio.hide_client(client)?;
    }
    Ok(())
}

fn port_disappeared(port_jack_id: u64, jack: &mut Graph, studio: &mut Graph) -> Result<(), GraphError> {
    let Some(uuid) = jack.port_by_jack_id(port_jack_id).map(|p| p.uuid) else {
        debug!(port_jack_id, "unknown port disappeared");
        return Ok(());
    };
    jack.set_port_jack_id(uuid, None)?;
    jack.hide_port(uuid)?;
    hide_studio_port(uuid, studio)
}

fn port_renamed(
    port_jack_id: u64,
    new_name: &str,
    jack: &mut Graph,
    studio: &mut Graph,
) -> Result<(), GraphError> {
    let Some(uuid) = jack.port_by_jack_id(port_jack_id).map(|p| p.uuid) else {
        return Ok(());
    };
    jack.rename_port(uuid, new_name)?;
    if studio.port(uuid).is_some() {
        studio.rename_port(uuid, new_name)?;
    }
    Ok(())
}

fn jack_pair(jack: &Graph, a: u64, b: u64) -> Option<(Uuid, Uuid)> {
    Some((
        jack.port_by_jack_id(a)?.uuid,
        jack.port_by_jack_id(b)?.uuid,
    ))
}

fn ports_connected(a: u64, b: u64, jack: &mut Graph, studio: &mut Graph) -> Result<(), GraphError> {
    let Some((p1, p2)) = jack_pair(jack, a, b) else {
        warn!(a, b, "connection between unknown ports");
        return Ok(());
    };

    for graph in [jack, studio] {
        if graph.port(p1).is_none() || graph.port(p2).is_none() {
            continue;
        }
        match graph.add_connection(p1, p2, false) {
            Ok(_) | Err(GraphError::AlreadyConnected(..)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Remove a connection. In the studio graph a connection whose owner app is
/// being stopped is only hidden, so the studio keeps it for the next start.
fn ports_disconnected(
    a: u64,
    b: u64,
    jack: &mut Graph,
    studio: &mut Graph,
    apps: &AppSupervisor,
) -> Result<(), GraphError> {
    let Some((p1, p2)) = jack_pair(jack, a, b) else {
        return Ok(());
    };

    let going_away = [p1, p2].iter().any(|p| {
        jack.port_client(*p)
            .and_then(|c| c.app)
            .and_then(|app| apps.find_app_by_uuid(app))
            .is_some_and(|app| app.state != AppState::Started)
    });

    if let Some(id) = jack.find_connection(p1, p2).map(|c| c.id) {
        jack.remove_connection(id)?;
    }
    if let Some(id) = studio.find_connection(p1, p2).map(|c| c.id) {
        if going_away {
            studio.hide_connection(id)?;
        } else {
            studio.remove_connection(id)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jack::LoopbackBackend;
    use crate::supervisor::tests::FakeProcesses;
    use ladishproto::GraphKind;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct Rig {
        virt: Virtualizer,
        jack: Graph,
        studio: Graph,
        apps: AppSupervisor,
        backend: LoopbackBackend,
        rx: mpsc::UnboundedReceiver<JackEvent>,
    }

    impl Rig {
        fn new() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                virt: Virtualizer::new(),
                jack: Graph::new(GraphKind::Jack),
                studio: Graph::new(GraphKind::Studio),
                apps: AppSupervisor::new("test", Arc::new(FakeProcesses::default()), None),
                backend: LoopbackBackend::new(tx).with_system_ports(1, 1),
                rx,
            }
        }

        fn pump(&mut self) {
            while let Ok(event) = self.rx.try_recv() {
                self.virt.handle(
                    &event,
                    &mut self.jack,
                    &mut self.studio,
                    &self.apps,
                    &mut self.backend,
                );
            }
        }
    }

    #[test]
    fn test_system_ports_split_into_hardware_clients() {
        let mut rig = Rig::new();
        rig.backend.start_server().unwrap();
        rig.pump();

        assert!(rig.virt.system_client().is_some());
        let capture = rig.studio.client_ports(HARDWARE_CAPTURE_UUID);
        assert_eq!(capture.len(), 1);
        assert_eq!(capture[0].name, "capture_1");
        assert!(capture[0].flags.is_output());

        let playback = rig.studio.client_ports(HARDWARE_PLAYBACK_UUID);
        assert_eq!(playback[0].name, "playback_1");

        // Same uuid on both sides
        let jport = rig.jack.port_by_jack_id(capture[0].jack_id.unwrap()).unwrap();
        assert_eq!(jport.uuid, capture[0].uuid);
        rig.jack.check_integrity().unwrap();
        rig.studio.check_integrity().unwrap();
    }

    #[test]
    fn test_client_exit_hides_and_return_reuses_uuids() {
        let mut rig = Rig::new();
        rig.backend.start_server().unwrap();
        let handle = rig.backend.handle();
        let synth = handle.add_client("synth", None).unwrap();
        let out = handle.add_port(synth, "out", false, false, false).unwrap();
        let playback = handle.port_by_name("system", "playback_1").unwrap();
        handle.connect(out, playback).unwrap();
        rig.pump();

        let sclient = rig.studio.client_by_name("synth").unwrap().uuid;
        let port_uuid = rig.studio.client_ports(sclient)[0].uuid;
        assert_eq!(rig.studio.connections().filter(|c| !c.hidden).count(), 1);

        handle.remove_client(synth).unwrap();
        rig.pump();
        assert!(rig.studio.client(sclient).unwrap().hidden);
        assert!(rig.jack.client_by_name("synth").unwrap().hidden);
        // External client disconnects are real disconnects
        assert_eq!(rig.studio.connections().count(), 0);

        let synth = handle.add_client("synth", None).unwrap();
        handle.add_port(synth, "out", false, false, false).unwrap();
        rig.pump();
        assert!(!rig.studio.client(sclient).unwrap().hidden);
        assert_eq!(rig.studio.client_ports(sclient)[0].uuid, port_uuid);
    }

    #[test]
    fn test_pending_studio_connection_is_requested() {
        let mut rig = Rig::new();
        rig.backend.start_server().unwrap();
        rig.pump();

        // A loaded studio: hidden synth client with a hidden connection to playback
        let sclient = Uuid::new_v4();
        let port = Uuid::new_v4();
        let jclient = Uuid::new_v4();
        let playback = rig.studio.client_ports(HARDWARE_PLAYBACK_UUID)[0].uuid;
        rig.jack.add_client(jclient, "synth", true).unwrap();
        rig.jack
            .add_port(jclient, port, "out", PortType::Audio, PortFlags::OUTPUT, true)
            .unwrap();
        rig.studio.add_client(sclient, "synth", true).unwrap();
        rig.studio
            .add_port(sclient, port, "out", PortType::Audio, PortFlags::OUTPUT, true)
            .unwrap();
        let conn = rig.studio.add_connection(port, playback, true).unwrap();

        let handle = rig.backend.handle();
        let synth = handle.add_client("synth", None).unwrap();
        handle.add_port(synth, "out", false, false, false).unwrap();
        rig.pump();

        // The port reappeared, the virtualizer asked JACK to connect, and the
        // resulting PortsConnected showed the stored connection
        assert_eq!(rig.jack.client_by_name("synth").unwrap().uuid, jclient);
        assert!(!rig.studio.connection(conn).unwrap().hidden);
        assert_eq!(rig.studio.connections().count(), 1);
        rig.studio.check_integrity().unwrap();
    }

    #[test]
    fn test_app_client_named_after_app() {
        let mut rig = Rig::new();
        rig.apps
            .add("Synth One", None, "synth", false, false, ladishproto::AppLevel::Classic)
            .unwrap();
        rig.backend.start_server().unwrap();
        let handle = rig.backend.handle();
        // Exact name fallback: the JACK client is called like the app
        let synth = handle.add_client("Synth One", None).unwrap();
        handle.add_port(synth, "out", false, false, true).unwrap();
        rig.pump();

        let app_uuid = rig.apps.find_app_by_name("Synth One").unwrap().uuid;
        let sclient = rig.studio.client_by_name("Synth One").unwrap();
        assert_eq!(sclient.app, Some(app_uuid));
        assert_eq!(rig.studio.client_ports(sclient.uuid)[0].port_type, PortType::Midi);
        assert!(!is_hidden_app(&rig.jack, app_uuid, "Synth One"));

        handle.remove_client(synth).unwrap();
        rig.pump();
        assert!(is_hidden_app(&rig.jack, app_uuid, "Synth One"));

        remove_app(&mut rig.jack, &mut rig.studio, app_uuid).unwrap();
        assert!(rig.jack.client_by_name("Synth One").is_none());
        assert!(rig.studio.client_by_name("Synth One").is_none());
        rig.studio.check_integrity().unwrap();
    }

    #[test]
    fn test_server_stop_hides_everything() {
        let mut rig = Rig::new();
        rig.backend.start_server().unwrap();
        rig.pump();
        rig.backend.stop_server().unwrap();
        rig.pump();

        assert!(rig.jack.clients().all(|c| c.hidden && c.jack_id.is_none()));
        assert!(rig.studio.clients().all(|c| c.hidden));
        assert_eq!(rig.studio.snapshot(0).unwrap().clients.len(), 0);
        assert!(rig.virt.system_client().is_none());
    }

    #[test]
    fn test_second_client_of_app_gets_own_studio_client() {
        let mut rig = Rig::new();
        let id = rig
            .apps
            .add("Synth One", None, "synth", false, false, ladishproto::AppLevel::Classic)
            .unwrap();
        rig.apps.start_app(id, std::path::Path::new("/")).unwrap();
        let pid = rig.apps.find_app_by_id(id).unwrap().pid.unwrap();
        rig.backend.start_server().unwrap();
        let handle = rig.backend.handle();
        let audio = handle.add_client("synth", Some(pid)).unwrap();
        handle.add_port(audio, "out", false, false, false).unwrap();
        let midi = handle.add_client("synth-midi", Some(pid)).unwrap();
        handle.add_port(midi, "in", true, false, true).unwrap();
        rig.pump();

        let app_uuid = rig.apps.find_app_by_id(id).unwrap().uuid;
        let first = rig.studio.client_by_name("Synth One").unwrap().uuid;
        let second = rig.studio.client_by_name("Synth One (synth-midi)").unwrap().uuid;
        assert_ne!(first, second);
        assert_eq!(rig.studio.clients_by_app(app_uuid).count(), 2);
        assert_eq!(rig.studio.client_ports(second)[0].name, "in");

        handle.remove_client(audio).unwrap();
        handle.remove_client(midi).unwrap();
        rig.pump();
        assert!(rig.studio.client(first).unwrap().hidden);
        assert!(rig.studio.client(second).unwrap().hidden);

        let audio = handle.add_client("synth", Some(pid)).unwrap();
        handle.add_port(audio, "out", false, false, false).unwrap();
        let midi = handle.add_client("synth-midi", Some(pid)).unwrap();
        handle.add_port(midi, "in", true, false, true).unwrap();
        rig.pump();

        assert!(!rig.studio.client(first).unwrap().hidden);
        assert!(!rig.studio.client(second).unwrap().hidden);
        assert_eq!(rig.studio.clients_by_app(app_uuid).count(), 2);
        rig.studio.check_integrity().unwrap();
    }

    #[test]
    fn test_room_links_survive_server_stop() {
        use ladishproto::{RoomPort, RoomTemplateInfo};

        let mut rig = Rig::new();
        let template = RoomTemplateInfo {
            name: "Bus".to_string(),
            ports: vec![RoomPort {
                name: "send".to_string(),
                port_type: PortType::Audio,
                flags: PortFlags::OUTPUT,
            }],
        };
        let room = room::Room::create("Bus", &template, &mut rig.studio).unwrap();
        let link = rig.studio.client_ports(room.uuid)[0].uuid;

        rig.backend.start_server().unwrap();
        let handle = rig.backend.handle();
        let synth = handle.add_client("synth", None).unwrap();
        handle.add_port(synth, "out", false, false, false).unwrap();
        rig.pump();
        let sclient = rig.studio.client_by_name("synth").unwrap().uuid;
        let out = rig.studio.client_ports(sclient)[0].uuid;
        rig.studio.add_connection(out, link, false).unwrap();

        rig.backend.stop_server().unwrap();
        rig.pump();
        assert!(!rig.studio.client(room.uuid).unwrap().hidden);
        assert!(rig.studio.client(sclient).unwrap().hidden);
        assert!(rig.studio.find_connection(out, link).unwrap().hidden);

        rig.backend.start_server().unwrap();
        let synth = handle.add_client("synth", None).unwrap();
        handle.add_port(synth, "out", false, false, false).unwrap();
        rig.pump();
        // The returning client does not take over the room client
        assert_eq!(rig.studio.client_by_name("synth").unwrap().uuid, sclient);
        assert!(!rig.studio.find_connection(out, link).unwrap().hidden);
        rig.studio.check_integrity().unwrap();
    }
}
