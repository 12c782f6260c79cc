//! The studio: both graphs, its rooms, the app supervisor and the virtualizer.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use ladishproto::{Event, GraphKind};

use crate::graph::{Graph, GraphError};
use crate::jack::{JackBackend, JackEvent};
use crate::loader::ProcessControl;
use crate::room::Room;
use crate::store::{
    AppEntry, ClientEntry, ConnectionEntry, JackSection, PortEntry, StoreError, StudioFile,
    StudioSection, FORMAT_VERSION,
};
use crate::supervisor::AppSupervisor;
use crate::virtualizer::Virtualizer;

pub struct Studio {
    pub name: String,
    /// File the studio was last loaded from or saved to.
    pub file: Option<PathBuf>,
    pub started: bool,
    pub jack_graph: Graph,
    pub studio_graph: Graph,
    pub supervisor: AppSupervisor,
    pub virtualizer: Virtualizer,
    pub rooms: Vec<Room>,
    pub jack_params: BTreeMap<String, String>,
    saved_versions: (u64, u64, u64),
}

impl Studio {
    pub fn new(
        name: impl Into<String>,
        processes: Arc<dyn ProcessControl>,
        events: broadcast::Sender<Event>,
    ) -> Self {
        let name = name.into();
        let mut studio = Self {
            supervisor: AppSupervisor::new(name.clone(), processes, Some(events.clone())),
            jack_graph: Graph::with_events(GraphKind::Jack, events.clone()),
            studio_graph: Graph::with_events(GraphKind::Studio, events),
            name,
            file: None,
            started: false,
            virtualizer: Virtualizer::new(),
            rooms: Vec::new(),
            jack_params: BTreeMap::new(),
            saved_versions: (0, 0, 0),
        };
        studio.saved_versions = studio.versions();
        studio
    }

    /// Rebuild a studio from its document. Everything starts hidden and every
    /// app stopped, so it only becomes visible as JACK reports it.
    pub fn from_document(
        doc: StudioFile,
        file: PathBuf,
        processes: Arc<dyn ProcessControl>,
        events: broadcast::Sender<Event>,
    ) -> Result<Self, StoreError> {
        let corrupt = |e: &dyn std::fmt::Display| StoreError::Corrupt {
            name: doc.name.clone(),
            message: e.to_string(),
        };

        let mut studio = Self::new(doc.name.clone(), processes, events);
        studio.file = Some(file);
        studio.jack_params = doc.jack.params.clone();

        restore_clients(&mut studio.jack_graph, &doc.jack.clients).map_err(|e| corrupt(&e))?;
        restore_clients(&mut studio.studio_graph, &doc.studio.clients).map_err(|e| corrupt(&e))?;
        for conn in &doc.studio.connections {
            let id = studio
                .studio_graph
                .add_connection(conn.port1, conn.port2, true)
                .map_err(|e| corrupt(&e))?;
            *studio.studio_graph.connection_dict_mut(id).map_err(|e| corrupt(&e))? =
                conn.dict.clone();
        }
        *studio.studio_graph.dict_mut() = doc.studio.dict.clone();

        for entry in &doc.rooms {
            let room = Room::restore(entry, &mut studio.studio_graph).map_err(|e| corrupt(&e))?;
            studio.rooms.push(room);
        }

        for app in &doc.apps {
            studio
                .supervisor
                .add(
                    &app.name,
                    Some(app.uuid),
                    &app.commandline,
                    app.terminal,
                    app.autorun,
                    app.level,
                )
                .map_err(|e| corrupt(&e))?;
        }

        studio.saved_versions = studio.versions();
        info!(
            studio = %studio.name,
            apps = doc.apps.len(),
            clients = doc.studio.clients.len(),
            connections = doc.studio.connections.len(),
            rooms = doc.rooms.len(),
            "studio restored"
        );
        Ok(studio)
    }

    pub fn to_document(&self) -> StudioFile {
        StudioFile {
            format: FORMAT_VERSION,
            name: self.name.clone(),
            jack: JackSection {
                params: self.jack_params.clone(),
                clients: client_entries(&self.jack_graph),
            },
            studio: StudioSection {
                dict: self.studio_graph.dict().clone(),
                clients: client_entries(&self.studio_graph),
                connections: self
                    .studio_graph
                    .connections()
                    .map(|c| ConnectionEntry {
                        port1: c.port1,
                        port2: c.port2,
                        dict: c.dict.clone(),
                    })
                    .collect(),
            },
            apps: self
                .supervisor
                .apps()
                .map(|a| AppEntry {
                    name: a.name.clone(),
                    uuid: a.uuid,
                    commandline: a.commandline.clone(),
                    terminal: a.terminal,
                    level: a.level,
                    autorun: a.autorun,
                })
                .collect(),
            rooms: self.rooms.iter().map(Room::entry).collect(),
        }
    }

    pub fn room(&self, name: &str) -> Option<&Room> {
        self.rooms.iter().find(|r| r.name == name)
    }

    fn versions(&self) -> (u64, u64, u64) {
        (
            self.jack_graph.version(),
            self.studio_graph.version(),
            self.supervisor.version(),
        )
    }

    /// Changed since the last load or save.
    pub fn is_modified(&self) -> bool {
        self.versions() != self.saved_versions
    }

    pub fn mark_saved(&mut self, file: PathBuf) {
        self.file = Some(file);
        self.saved_versions = self.versions();
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.supervisor.set_name(self.name.clone());
    }

    pub fn graph(&self, kind: GraphKind) -> &Graph {
        match kind {
            GraphKind::Jack => &self.jack_graph,
            GraphKind::Studio => &self.studio_graph,
        }
    }

    pub fn graph_mut(&mut self, kind: GraphKind) -> &mut Graph {
        match kind {
            GraphKind::Jack => &mut self.jack_graph,
            GraphKind::Studio => &mut self.studio_graph,
        }
    }

    pub fn handle_jack_event(&mut self, event: &JackEvent, backend: &mut dyn JackBackend) {
        self.virtualizer.handle(
            event,
            &mut self.jack_graph,
            &mut self.studio_graph,
            &self.supervisor,
            backend,
        );
    }

    /// Hide everything JACK-backed, as after a server stop.
    pub fn hide_jack_objects(&mut self) {
        self.virtualizer.stop(&mut self.jack_graph, &mut self.studio_graph);
    }

    /// Drop every client and app. Running processes are left alone.
    pub fn clear(&mut self) {
        self.rooms.clear();
        self.studio_graph.clear();
        self.jack_graph.clear();
        self.supervisor.clear();
    }
}

fn client_entries(graph: &Graph) -> Vec<ClientEntry> {
    graph
        .clients()
        .map(|c| ClientEntry {
            uuid: c.uuid,
            name: c.name.clone(),
            app: c.app,
            ports: graph
                .client_ports(c.uuid)
                .into_iter()
                .map(|p| PortEntry {
                    uuid: p.uuid,
                    name: p.name.clone(),
                    port_type: p.port_type,
                    flags: p.flags,
                    link_override_uuid: p.link_override_uuid,
                    dict: p.dict.clone(),
                })
                .collect(),
            dict: c.dict.clone(),
        })
        .collect()
}

fn restore_clients(graph: &mut Graph, clients: &[ClientEntry]) -> Result<(), GraphError> {
    for client in clients {
        graph.add_client(client.uuid, &client.name, true)?;
        graph.set_client_app(client.uuid, client.app)?;
        *graph.client_dict_mut(client.uuid)? = client.dict.clone();
        for port in &client.ports {
            graph.add_port(client.uuid, port.uuid, &port.name, port.port_type, port.flags, true)?;
            if let Some(link) = port.link_override_uuid {
                graph.set_link_port_override_uuid(port.uuid, link)?;
            }
            *graph.port_dict_mut(port.uuid)? = port.dict.clone();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::HARDWARE_PLAYBACK_UUID;
    use crate::supervisor::tests::FakeProcesses;
    use ladishproto::{AppLevel, PortFlags, PortType};
    use pretty_assertions::assert_eq;

    fn studio(name: &str) -> Studio {
        let (tx, _) = broadcast::channel(64);
        Studio::new(name, Arc::new(FakeProcesses::default()), tx)
    }

    #[test]
    fn test_document_roundtrip_restores_hidden() {
        let mut s = studio("live");
        s.jack_params.insert("rate".to_string(), "48000".to_string());
        let synth = Uuid::new_v4();
        let out = Uuid::new_v4();
        let play = Uuid::new_v4();
        s.studio_graph.add_client(synth, "synth", false).unwrap();
        s.studio_graph
            .add_port(synth, out, "out", PortType::Audio, PortFlags::OUTPUT, false)
            .unwrap();
        s.studio_graph.add_client(HARDWARE_PLAYBACK_UUID, "Hardware Playback", false).unwrap();
        s.studio_graph
            .add_port(HARDWARE_PLAYBACK_UUID, play, "playback_1", PortType::Audio, PortFlags::INPUT, false)
            .unwrap();
        let conn = s.studio_graph.add_connection(out, play, false).unwrap();
        s.studio_graph.connection_dict_mut(conn).unwrap().set("color", "red");
        s.studio_graph.port_dict_mut(out).unwrap().set("x", "10");
        s.supervisor
            .add("synth", None, "synth -a", false, true, AppLevel::L1)
            .unwrap();

        let doc = s.to_document();
        let (tx, _) = broadcast::channel(64);
        let restored =
            Studio::from_document(doc.clone(), PathBuf::from("/x.json"), Arc::new(FakeProcesses::default()), tx)
                .unwrap();

        assert!(!restored.is_modified());
        assert_eq!(restored.to_document(), doc);
        assert!(restored.studio_graph.clients().all(|c| c.hidden));
        assert!(restored.studio_graph.connections().all(|c| c.hidden));
        assert_eq!(restored.studio_graph.port(out).unwrap().dict.get("x"), Some("10"));
        let app = restored.supervisor.find_app_by_name("synth").unwrap();
        assert!(app.autorun);
        assert!(!app.is_running());
        restored.studio_graph.check_integrity().unwrap();
    }

    #[test]
    fn test_modified_tracks_versions() {
        let mut s = studio("s");
        assert!(!s.is_modified());
        s.studio_graph.add_client(Uuid::new_v4(), "c", false).unwrap();
        assert!(s.is_modified());
        s.mark_saved(PathBuf::from("/s.json"));
        assert!(!s.is_modified());
    }

    #[test]
    fn test_dangling_connection_is_corrupt() {
        let mut doc = StudioFile::new("broken");
        doc.studio.connections.push(ConnectionEntry {
            port1: Uuid::new_v4(),
            port2: Uuid::new_v4(),
            dict: Default::default(),
        });
        let (tx, _) = broadcast::channel(8);
        let err = Studio::from_document(doc, PathBuf::from("/b.json"), Arc::new(FakeProcesses::default()), tx)
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn test_rooms_restore_visible() {
        use ladishproto::{RoomPort, RoomTemplateInfo};

        let mut s = studio("rooms");
        let template = RoomTemplateInfo {
            name: "Bus".to_string(),
            ports: vec![RoomPort {
                name: "return".to_string(),
                port_type: PortType::Midi,
                flags: PortFlags::INPUT,
            }],
        };
        let room = Room::create("Strings", &template, &mut s.studio_graph).unwrap();
        let room_uuid = room.uuid;
        s.rooms.push(room);

        let doc = s.to_document();
        assert_eq!(doc.rooms.len(), 1);
        let (tx, _) = broadcast::channel(64);
        let restored =
            Studio::from_document(doc.clone(), PathBuf::from("/r.json"), Arc::new(FakeProcesses::default()), tx)
                .unwrap();

        assert!(!restored.is_modified());
        assert_eq!(restored.to_document(), doc);
        let room = restored.room("Strings").unwrap();
        assert_eq!(room.uuid, room_uuid);
        assert!(!restored.studio_graph.client(room_uuid).unwrap().hidden);
        let ports = restored.studio_graph.client_ports(room_uuid);
        assert_eq!(ports.len(), 1);
        assert!(!ports[0].hidden);
        assert_eq!(ports[0].flags, PortFlags::OUTPUT);
        restored.studio_graph.check_integrity().unwrap();
    }
}
