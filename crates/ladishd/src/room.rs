//! Rooms.
//!
//! A room is a graph of its own, created from a template. Each template port
//! becomes a pair of link ports: one on the room graph, facing inwards, and
//! one on a studio client named after the room, facing the other way. The
//! studio port carries the room port's uuid as its link override, so either
//! uuid finds it.
//!
//! Link ports have no JACK counterpart. Connections to them live in the
//! studio graph only.

use tracing::{debug, info};
use uuid::Uuid;

use ladishproto::{GraphKind, RoomInfo, RoomPort, RoomTemplateInfo};

use crate::graph::{Graph, GraphError};
use crate::store::{RoomEntry, RoomPortEntry};

pub struct Room {
    pub uuid: Uuid,
    pub name: String,
    pub template: String,
    pub graph: Graph,
}

impl Room {
    /// Create a room from `template` and add its link client to `studio`.
    pub fn create(
        name: &str,
        template: &RoomTemplateInfo,
        studio: &mut Graph,
    ) -> Result<Self, GraphError> {
        let ports = template
            .ports
            .iter()
            .map(|p| (Uuid::new_v4(), p.clone()))
            .collect();
        Self::link(Uuid::new_v4(), name, &template.name, ports, studio)
    }

    /// Rebuild a saved room. Studio ports restored from the studio clients
    /// are reused and shown.
    pub fn restore(entry: &RoomEntry, studio: &mut Graph) -> Result<Self, GraphError> {
        let ports = entry
            .ports
            .iter()
            .map(|p| {
                let port = RoomPort {
                    name: p.name.clone(),
                    port_type: p.port_type,
                    flags: p.flags,
                };
                (p.uuid, port)
            })
            .collect();
        Self::link(entry.uuid, &entry.name, &entry.template, ports, studio)
    }

    fn link(
        uuid: Uuid,
        name: &str,
        template: &str,
        ports: Vec<(Uuid, RoomPort)>,
        studio: &mut Graph,
    ) -> Result<Self, GraphError> {
        if studio.client(uuid).is_some() {
            studio.show_client(uuid)?;
        } else {
            studio.add_client(uuid, name, false)?;
        }

        let mut graph = Graph::new(GraphKind::Studio);
        graph.add_client(uuid, name, false)?;
        for (port_uuid, port) in &ports {
            graph.add_port(uuid, *port_uuid, &port.name, port.port_type, port.flags, false)?;

            let existing = studio
                .port_by_uuid(*port_uuid, true)
                .filter(|p| p.link_override_uuid == Some(*port_uuid))
                .map(|p| p.uuid);
            match existing {
                Some(studio_port) => studio.show_port(studio_port)?,
                None => {
                    let studio_port = Uuid::new_v4();
                    studio.add_port(
                        uuid,
                        studio_port,
                        &port.name,
                        port.port_type,
                        port.flags.flipped(),
                        false,
                    )?;
                    studio.set_link_port_override_uuid(studio_port, *port_uuid)?;
                }
            }
        }
        show_link_connections(studio, uuid)?;

        debug!(room = name, ports = ports.len(), "room linked into studio");
        Ok(Self {
            uuid,
            name: name.to_string(),
            template: template.to_string(),
            graph,
        })
    }

    /// Drop the room's link client and every connection to it.
    pub fn remove(self, studio: &mut Graph) -> Result<(), GraphError> {
        studio.remove_client(self.uuid)?;
        info!(room = %self.name, "room removed");
        Ok(())
    }

    pub fn info(&self, studio: &Graph) -> RoomInfo {
        RoomInfo {
            name: self.name.clone(),
            uuid: self.uuid.to_string(),
            template: self.template.clone(),
            client_id: studio.client(self.uuid).map_or(0, |c| c.id),
        }
    }

    pub fn entry(&self) -> RoomEntry {
        RoomEntry {
            uuid: self.uuid,
            name: self.name.clone(),
            template: self.template.clone(),
            ports: self
                .graph
                .client_ports(self.uuid)
                .into_iter()
                .map(|p| RoomPortEntry {
                    uuid: p.uuid,
                    name: p.name.clone(),
                    port_type: p.port_type,
                    flags: p.flags,
                })
                .collect(),
        }
    }
}

/// True for a studio port that links into a room.
pub fn is_link_port(graph: &Graph, port: Uuid) -> bool {
    graph
        .port(port)
        .is_some_and(|p| p.link_override_uuid.is_some())
}

/// True for the studio client of a room.
pub fn is_link_client(graph: &Graph, client: Uuid) -> bool {
    graph
        .client_ports(client)
        .iter()
        .any(|p| p.link_override_uuid.is_some())
}

/// Show hidden connections of a room client whose other end is visible.
fn show_link_connections(studio: &mut Graph, client: Uuid) -> Result<(), GraphError> {
    let ports: Vec<Uuid> = studio.client_ports(client).iter().map(|p| p.uuid).collect();
    for port in ports {
        for (p1, p2) in studio.pending_connections(port) {
            if let Some(id) = studio.find_connection(p1, p2).map(|c| c.id) {
                studio.show_connection(id)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use ladishproto::{PortFlags, PortType};

    fn template() -> RoomTemplateInfo {
        RoomTemplateInfo {
            name: "Bus".to_string(),
            ports: vec![
                RoomPort {
                    name: "in".to_string(),
                    port_type: PortType::Audio,
                    flags: PortFlags::INPUT,
                },
                RoomPort {
                    name: "out".to_string(),
                    port_type: PortType::Audio,
                    flags: PortFlags::OUTPUT,
                },
            ],
        }
    }

    #[test]
    fn test_room_ports_face_the_studio() {
        let mut studio = Graph::new(GraphKind::Studio);
        let room = Room::create("Drums", &template(), &mut studio).unwrap();

        let client = studio.client(room.uuid).unwrap();
        assert_eq!(client.name, "Drums");
        assert!(!client.hidden);
        assert!(is_link_client(&studio, room.uuid));

        let inside = room.graph.client_ports(room.uuid);
        let outside = studio.client_ports(room.uuid);
        assert_eq!(inside.len(), 2);
        assert_eq!(outside.len(), 2);
        for (room_port, studio_port) in inside.iter().zip(&outside) {
            assert_eq!(room_port.name, studio_port.name);
            assert_eq!(room_port.flags.flipped(), studio_port.flags);
            assert_eq!(studio_port.link_override_uuid, Some(room_port.uuid));
            assert_eq!(
                studio.port_by_uuid(room_port.uuid, true).map(|p| p.uuid),
                Some(studio_port.uuid)
            );
            assert!(is_link_port(&studio, studio_port.uuid));
        }
        studio.check_integrity().unwrap();

        assert_eq!(
            room.info(&studio),
            RoomInfo {
                name: "Drums".to_string(),
                uuid: room.uuid.to_string(),
                template: "Bus".to_string(),
                client_id: client.id,
            }
        );
    }

    #[test]
    fn test_restore_reuses_studio_ports_and_connections() {
        let mut studio = Graph::new(GraphKind::Studio);
        let synth = Uuid::new_v4();
        let synth_out = Uuid::new_v4();
        studio.add_client(synth, "synth", false).unwrap();
        studio
            .add_port(synth, synth_out, "out", PortType::Audio, PortFlags::OUTPUT, false)
            .unwrap();

        let room = Room::create("Drums", &template(), &mut studio).unwrap();
        let entry = room.entry();
        let room_in = studio
            .port_by_uuid(entry.ports[1].uuid, true)
            .map(|p| p.uuid)
            .unwrap();
        studio.add_connection(synth_out, room_in, false).unwrap();

        // As after a load: everything restored hidden
        studio.hide_client(room.uuid).unwrap();
        let hidden = studio.find_connection(synth_out, room_in).unwrap();
        assert!(hidden.hidden);

        let restored = Room::restore(&entry, &mut studio).unwrap();
        assert_eq!(restored.uuid, room.uuid);
        assert_eq!(studio.client_ports(room.uuid).len(), 2);
        assert_eq!(
            studio.port_by_uuid(entry.ports[1].uuid, true).map(|p| p.uuid),
            Some(room_in)
        );
        assert!(!studio.find_connection(synth_out, room_in).unwrap().hidden);
        assert_eq!(restored.entry(), entry);

        restored.remove(&mut studio).unwrap();
        assert!(studio.client(room.uuid).is_none());
        assert!(studio.find_connection(synth_out, room_in).is_none());
        studio.check_integrity().unwrap();
    }
}
