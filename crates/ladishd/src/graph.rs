//! Client/port/connection graph with hide/show semantics.
//!
//! Two instances exist per studio: the JACK graph mirrors what the server
//! reports, the studio graph is the persistent virtual view. Objects that
//! disappear from JACK are hidden rather than removed so their identity,
//! dictionaries and connections survive until the client comes back.
//!
//! Clients and ports are nodes of a `StableGraph`. A client owns its ports
//! through `Owns` edges, and connections are port-to-port edges. Lookups by
//! uuid, protocol id, JACK id and link override go through index maps kept in
//! step with the graph; node slots are reused, so iteration follows ids.
//!
//! Every change bumps `version` by one. Visible changes are announced on the
//! event channel, tagged with the version they produced.

use std::collections::{BTreeMap, HashMap};

use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use ladishproto::{
    ClientInfo, ConnectionInfo, DictTarget, Event, GraphKind, GraphSnapshot, PortFlags, PortInfo,
    PortType,
};

use crate::dict::Dict;

/// Studio-side client that owns JACK `system` capture ports (JACK outputs).
pub const HARDWARE_CAPTURE_UUID: Uuid = Uuid::from_u128(0x47c1cd18_7b21_4389_bec4_6e0658e1d6b1);
pub const HARDWARE_CAPTURE_NAME: &str = "Hardware Capture";
/// Studio-side client that owns JACK `system` playback ports (JACK inputs).
pub const HARDWARE_PLAYBACK_UUID: Uuid = Uuid::from_u128(0xb2a0bb06_28d8_4bfe_956e_eb24378f9629);
pub const HARDWARE_PLAYBACK_NAME: &str = "Hardware Playback";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("client {0} not found")]
    ClientNotFound(Uuid),

    #[error("client {0} already exists")]
    DuplicateClient(Uuid),

    #[error("port {0} not found")]
    PortNotFound(Uuid),

    #[error("port {0} already exists")]
    DuplicatePort(Uuid),

    #[error("connection {0} not found")]
    ConnectionNotFound(u64),

    #[error("ports {0} and {1} are already connected")]
    AlreadyConnected(Uuid, Uuid),

    #[error("cannot show connection {0}: an endpoint port is hidden")]
    HiddenEndpoint(u64),

    #[error("known version {known} is newer than graph version {current}")]
    FutureVersion { known: u64, current: u64 },

    #[error("graph integrity violated: {0}")]
    Integrity(String),
}

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Clone)]
pub struct GraphPort {
    pub uuid: Uuid,
    pub id: u64,
    pub name: String,
    pub port_type: PortType,
    pub flags: PortFlags,
    pub hidden: bool,
    pub jack_id: Option<u64>,
    pub link_override_uuid: Option<Uuid>,
    pub dict: Dict,
}

impl GraphPort {
    /// UUID the port is persisted and looked up under.
    pub fn effective_uuid(&self) -> Uuid {
        self.link_override_uuid.unwrap_or(self.uuid)
    }

    fn info(&self) -> PortInfo {
        PortInfo {
            id: self.id,
            name: self.name.clone(),
            flags: self.flags,
            port_type: self.port_type,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraphClient {
    pub uuid: Uuid,
    pub id: u64,
    pub name: String,
    pub hidden: bool,
    pub jack_id: Option<u64>,
    pub pid: Option<u32>,
    pub app: Option<Uuid>,
    pub dict: Dict,
}

#[derive(Debug, Clone)]
pub struct GraphConnection {
    pub id: u64,
    pub port1: Uuid,
    pub port2: Uuid,
    pub hidden: bool,
    pub dict: Dict,
}

#[derive(Debug, Clone)]
enum Node {
    Client(GraphClient),
    Port(GraphPort),
}

impl Node {
    fn client(&self) -> Option<&GraphClient> {
        match self {
            Node::Client(c) => Some(c),
            Node::Port(_) => None,
        }
    }

    fn client_mut(&mut self) -> Option<&mut GraphClient> {
        match self {
            Node::Client(c) => Some(c),
            Node::Port(_) => None,
        }
    }

    fn port(&self) -> Option<&GraphPort> {
        match self {
            Node::Port(p) => Some(p),
            Node::Client(_) => None,
        }
    }

    fn port_mut(&mut self) -> Option<&mut GraphPort> {
        match self {
            Node::Port(p) => Some(p),
            Node::Client(_) => None,
        }
    }
}

/// Client -> port for ownership, port1 -> port2 for connections.
#[derive(Debug, Clone)]
enum Link {
    Owns,
    Connection(GraphConnection),
}

impl Link {
    fn connection(&self) -> Option<&GraphConnection> {
        match self {
            Link::Connection(c) => Some(c),
            Link::Owns => None,
        }
    }

    fn connection_mut(&mut self) -> Option<&mut GraphConnection> {
        match self {
            Link::Connection(c) => Some(c),
            Link::Owns => None,
        }
    }
}

pub struct Graph {
    kind: GraphKind,
    version: u64,
    next_client_id: u64,
    next_port_id: u64,
    next_connection_id: u64,
    inner: StableGraph<Node, Link>,
    clients: HashMap<Uuid, NodeIndex>,
    client_ids: BTreeMap<u64, NodeIndex>,
    client_jack_ids: HashMap<u64, NodeIndex>,
    ports: HashMap<Uuid, NodeIndex>,
    port_ids: BTreeMap<u64, NodeIndex>,
    port_jack_ids: HashMap<u64, NodeIndex>,
    link_overrides: HashMap<Uuid, NodeIndex>,
    connections: BTreeMap<u64, EdgeIndex>,
    dict: Dict,
    events: Option<broadcast::Sender<Event>>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("kind", &self.kind)
            .field("version", &self.version)
            .field("clients", &self.clients.len())
            .field("ports", &self.ports.len())
            .field("connections", &self.connections.len())
            .finish()
    }
}

impl Graph {
    pub fn new(kind: GraphKind) -> Self {
        Self {
            kind,
            version: 1,
            next_client_id: 1,
            next_port_id: 1,
            next_connection_id: 1,
            inner: StableGraph::new(),
            clients: HashMap::new(),
            client_ids: BTreeMap::new(),
            client_jack_ids: HashMap::new(),
            ports: HashMap::new(),
            port_ids: BTreeMap::new(),
            port_jack_ids: HashMap::new(),
            link_overrides: HashMap::new(),
            connections: BTreeMap::new(),
            dict: Dict::new(),
            events: None,
        }
    }

    /// A graph that announces visible changes on `events`.
    pub fn with_events(kind: GraphKind, events: broadcast::Sender<Event>) -> Self {
        let mut graph = Self::new(kind);
        graph.events = Some(events);
        graph
    }

    pub fn kind(&self) -> GraphKind {
        self.kind
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn dict(&self) -> &Dict {
        &self.dict
    }

    /// Graph dictionary for editing. Counts as a change.
    pub fn dict_mut(&mut self) -> &mut Dict {
        self.bump();
        &mut self.dict
    }

    /// Clients in id order.
    pub fn clients(&self) -> impl Iterator<Item = &GraphClient> {
        self.client_ids.values().filter_map(|idx| self.client_at(*idx))
    }

    /// Connections in id order.
    pub fn connections(&self) -> impl Iterator<Item = &GraphConnection> {
        self.connections.values().filter_map(|idx| self.connection_at(*idx))
    }

    fn bump(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.events {
            // No subscribers is fine
            let _ = tx.send(event);
        }
    }

    // ========================================================================
    // Index helpers
    // ========================================================================

    fn client_node(&self, uuid: Uuid) -> Result<NodeIndex> {
        self.clients.get(&uuid).copied().ok_or(GraphError::ClientNotFound(uuid))
    }

    fn port_node(&self, uuid: Uuid) -> Result<NodeIndex> {
        self.ports.get(&uuid).copied().ok_or(GraphError::PortNotFound(uuid))
    }

    fn connection_edge(&self, id: u64) -> Result<EdgeIndex> {
        self.connections
            .get(&id)
            .copied()
            .filter(|edge| self.connection_at(*edge).is_some())
            .ok_or(GraphError::ConnectionNotFound(id))
    }

    fn client_at(&self, idx: NodeIndex) -> Option<&GraphClient> {
        self.inner.node_weight(idx).and_then(Node::client)
    }

    fn port_at(&self, idx: NodeIndex) -> Option<&GraphPort> {
        self.inner.node_weight(idx).and_then(Node::port)
    }

    fn connection_at(&self, idx: EdgeIndex) -> Option<&GraphConnection> {
        self.inner.edge_weight(idx).and_then(Link::connection)
    }

    fn client_entry(&mut self, uuid: Uuid) -> Result<&mut GraphClient> {
        let idx = self.client_node(uuid)?;
        self.inner
            .node_weight_mut(idx)
            .and_then(Node::client_mut)
            .ok_or(GraphError::ClientNotFound(uuid))
    }

    fn port_entry(&mut self, uuid: Uuid) -> Result<&mut GraphPort> {
        let idx = self.port_node(uuid)?;
        self.inner
            .node_weight_mut(idx)
            .and_then(Node::port_mut)
            .ok_or(GraphError::PortNotFound(uuid))
    }

    fn connection_entry(&mut self, id: u64) -> Result<&mut GraphConnection> {
        let edge = self.connection_edge(id)?;
        self.inner
            .edge_weight_mut(edge)
            .and_then(Link::connection_mut)
            .ok_or(GraphError::ConnectionNotFound(id))
    }

    /// Client node owning the port node `port`.
    fn owner(&self, port: NodeIndex) -> Option<NodeIndex> {
        self.inner
            .edges_directed(port, Direction::Incoming)
            .find(|e| matches!(e.weight(), Link::Owns))
            .map(|e| e.source())
    }

    fn owner_id(&self, port: NodeIndex) -> u64 {
        self.owner(port)
            .and_then(|c| self.client_at(c))
            .map_or(0, |c| c.id)
    }

    fn owned_ports(&self, client: NodeIndex) -> Vec<&GraphPort> {
        let mut ports: Vec<&GraphPort> = self
            .inner
            .edges_directed(client, Direction::Outgoing)
            .filter(|e| matches!(e.weight(), Link::Owns))
            .filter_map(|e| self.port_at(e.target()))
            .collect();
        ports.sort_by_key(|p| p.id);
        ports
    }

    /// Ids of connections touching the port node `port`, ascending.
    fn touching(&self, port: NodeIndex) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .inner
            .edges_directed(port, Direction::Outgoing)
            .chain(self.inner.edges_directed(port, Direction::Incoming))
            .filter_map(|e| e.weight().connection().map(|c| c.id))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Connection edge between two port nodes, in either direction.
    fn connection_between(&self, a: NodeIndex, b: NodeIndex) -> Option<EdgeIndex> {
        self.inner
            .edges_directed(a, Direction::Outgoing)
            .chain(self.inner.edges_directed(a, Direction::Incoming))
            .filter(|e| e.weight().connection().is_some())
            .find(|e| {
                (e.source() == a && e.target() == b) || (e.source() == b && e.target() == a)
            })
            .map(|e| e.id())
    }

    /// Client id and port id for a port uuid, for event payloads.
    fn port_ids(&self, uuid: Uuid) -> (u64, u64) {
        match self.ports.get(&uuid) {
            Some(idx) => (self.owner_id(*idx), self.port_at(*idx).map_or(0, |p| p.id)),
            None => (0, 0),
        }
    }

    fn connection_event(&self, conn: &GraphConnection, version: u64, connected: bool) -> Event {
        let (client1_id, port1_id) = self.port_ids(conn.port1);
        let (client2_id, port2_id) = self.port_ids(conn.port2);
        if connected {
            Event::PortsConnected {
                graph: self.kind,
                version,
                connection_id: conn.id,
                client1_id,
                port1_id,
                client2_id,
                port2_id,
            }
        } else {
            Event::PortsDisconnected {
                graph: self.kind,
                version,
                connection_id: conn.id,
                client1_id,
                port1_id,
                client2_id,
                port2_id,
            }
        }
    }

    fn port_appeared_event(&self, client_id: u64, port: &GraphPort, version: u64) -> Event {
        Event::PortAppeared {
            graph: self.kind,
            version,
            client_id,
            port_id: port.id,
            name: port.name.clone(),
            flags: port.flags,
            port_type: port.port_type,
        }
    }

    // ========================================================================
    // Clients
    // ========================================================================

    /// Remove every client, port and connection. The graph dictionary stays.
    pub fn clear(&mut self) {
        debug!(graph = %self.kind, "clearing graph");
        let uuids: Vec<Uuid> = self.clients().map(|c| c.uuid).collect();
        for uuid in uuids.into_iter().rev() {
            // Cannot fail: the uuid was just read from the index
            let _ = self.remove_client(uuid);
        }
    }

    pub fn add_client(&mut self, uuid: Uuid, name: &str, hidden: bool) -> Result<u64> {
        if self.clients.contains_key(&uuid) {
            return Err(GraphError::DuplicateClient(uuid));
        }

        let id = self.next_client_id;
        self.next_client_id += 1;

        let idx = self.inner.add_node(Node::Client(GraphClient {
            uuid,
            id,
            name: name.to_string(),
            hidden,
            jack_id: None,
            pid: None,
            app: None,
            dict: Dict::new(),
        }));
        self.clients.insert(uuid, idx);
        self.client_ids.insert(id, idx);

        let version = self.bump();
        debug!(graph = %self.kind, id, name, hidden, "client added");
        if !hidden {
            self.emit(Event::ClientAppeared {
                graph: self.kind,
                version,
                client_id: id,
                name: name.to_string(),
            });
        }
        Ok(id)
    }

    /// Remove a client. Its ports and their connections go first.
    pub fn remove_client(&mut self, uuid: Uuid) -> Result<()> {
        let idx = self.client_node(uuid)?;
        let ports: Vec<Uuid> = self.owned_ports(idx).iter().map(|p| p.uuid).collect();
        for port in ports {
            self.remove_port(port)?;
        }

        let client = match self.inner.remove_node(idx) {
            Some(Node::Client(client)) => client,
            _ => return Err(GraphError::ClientNotFound(uuid)),
        };
        self.clients.remove(&uuid);
        self.client_ids.remove(&client.id);
        if let Some(jack_id) = client.jack_id {
            unindex(&mut self.client_jack_ids, &jack_id, idx);
        }

        let version = self.bump();
        debug!(graph = %self.kind, id = client.id, name = %client.name, "client removed");
        if !client.hidden {
            self.emit(Event::ClientDisappeared {
                graph: self.kind,
                version,
                client_id: client.id,
            });
        }
        Ok(())
    }

    pub fn rename_client(&mut self, uuid: Uuid, name: &str) -> Result<()> {
        let client = self.client_entry(uuid)?;
        let old_name = std::mem::replace(&mut client.name, name.to_string());
        let (client_id, hidden) = (client.id, client.hidden);
        let version = self.bump();
        if !hidden {
            self.emit(Event::ClientRenamed {
                graph: self.kind,
                version,
                client_id,
                old_name,
                new_name: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn hide_client(&mut self, uuid: Uuid) -> Result<()> {
        let idx = self.client_node(uuid)?;
        if self.client_at(idx).map_or(true, |c| c.hidden) {
            return Ok(());
        }

        let visible_ports: Vec<Uuid> = self
            .owned_ports(idx)
            .iter()
            .filter(|p| !p.hidden)
            .map(|p| p.uuid)
            .collect();
        for port in visible_ports {
            self.hide_port(port)?;
        }

        let client = self.client_entry(uuid)?;
        client.hidden = true;
        let client_id = client.id;
        let version = self.bump();
        self.emit(Event::ClientDisappeared {
            graph: self.kind,
            version,
            client_id,
        });
        Ok(())
    }

    /// Show a client. Its ports keep their own visibility.
    pub fn show_client(&mut self, uuid: Uuid) -> Result<()> {
        let client = self.client_entry(uuid)?;
        if !client.hidden {
            return Ok(());
        }

        client.hidden = false;
        let (client_id, name) = (client.id, client.name.clone());
        let version = self.bump();
        self.emit(Event::ClientAppeared {
            graph: self.kind,
            version,
            client_id,
            name,
        });
        Ok(())
    }

    /// True when the client has no ports at all.
    pub fn is_client_empty(&self, uuid: Uuid) -> Result<bool> {
        Ok(self.owned_ports(self.client_node(uuid)?).is_empty())
    }

    /// True when the client has no visible ports.
    pub fn is_client_looks_empty(&self, uuid: Uuid) -> Result<bool> {
        Ok(self
            .owned_ports(self.client_node(uuid)?)
            .iter()
            .all(|p| p.hidden))
    }

    pub fn client(&self, uuid: Uuid) -> Option<&GraphClient> {
        self.clients.get(&uuid).and_then(|idx| self.client_at(*idx))
    }

    /// Ports of a client in id order. Empty for an unknown client.
    pub fn client_ports(&self, uuid: Uuid) -> Vec<&GraphPort> {
        self.clients
            .get(&uuid)
            .map(|idx| self.owned_ports(*idx))
            .unwrap_or_default()
    }

    pub fn client_by_id(&self, id: u64) -> Option<&GraphClient> {
        self.client_ids.get(&id).and_then(|idx| self.client_at(*idx))
    }

    pub fn client_by_name(&self, name: &str) -> Option<&GraphClient> {
        self.clients().find(|c| c.name == name)
    }

    pub fn client_by_jack_id(&self, jack_id: u64) -> Option<&GraphClient> {
        self.client_jack_ids
            .get(&jack_id)
            .and_then(|idx| self.client_at(*idx))
    }

    pub fn clients_by_app(&self, app: Uuid) -> impl Iterator<Item = &GraphClient> {
        self.clients().filter(move |c| c.app == Some(app))
    }

    pub fn set_client_jack_id(&mut self, uuid: Uuid, jack_id: Option<u64>) -> Result<()> {
        let idx = self.client_node(uuid)?;
        let old = std::mem::replace(&mut self.client_entry(uuid)?.jack_id, jack_id);
        if let Some(old) = old {
            unindex(&mut self.client_jack_ids, &old, idx);
        }
        if let Some(jack_id) = jack_id {
            self.client_jack_ids.insert(jack_id, idx);
        }
        Ok(())
    }

    pub fn set_client_pid(&mut self, uuid: Uuid, pid: Option<u32>) -> Result<()> {
        self.client_entry(uuid)?.pid = pid;
        Ok(())
    }

    pub fn set_client_app(&mut self, uuid: Uuid, app: Option<Uuid>) -> Result<()> {
        self.client_entry(uuid)?.app = app;
        Ok(())
    }

    /// Client dictionary for editing. Counts as a change.
    pub fn client_dict_mut(&mut self, uuid: Uuid) -> Result<&mut Dict> {
        self.client_node(uuid)?;
        self.bump();
        Ok(&mut self.client_entry(uuid)?.dict)
    }

    // ========================================================================
    // Ports
    // ========================================================================

    /// Add a port. A port added to a hidden client starts hidden.
    pub fn add_port(
        &mut self,
        client: Uuid,
        uuid: Uuid,
        name: &str,
        port_type: PortType,
        flags: PortFlags,
        hidden: bool,
    ) -> Result<u64> {
        let client_idx = self.client_node(client)?;
        if self.ports.contains_key(&uuid) {
            return Err(GraphError::DuplicatePort(uuid));
        }
        let (client_id, client_hidden) = self
            .client_at(client_idx)
            .map(|c| (c.id, c.hidden))
            .ok_or(GraphError::ClientNotFound(client))?;

        let hidden = hidden || client_hidden;
        let id = self.next_port_id;
        self.next_port_id += 1;

        let idx = self.inner.add_node(Node::Port(GraphPort {
            uuid,
            id,
            name: name.to_string(),
            port_type,
            flags,
            hidden,
            jack_id: None,
            link_override_uuid: None,
            dict: Dict::new(),
        }));
        self.inner.add_edge(client_idx, idx, Link::Owns);
        self.ports.insert(uuid, idx);
        self.port_ids.insert(id, idx);

        let version = self.bump();
        debug!(graph = %self.kind, id, name, hidden, "port added");
        if !hidden {
            if let Some(port) = self.port_at(idx) {
                let event = self.port_appeared_event(client_id, port, version);
                self.emit(event);
            }
        }
        Ok(id)
    }

    /// Remove a port and its connections. Returns the owning client's uuid.
    pub fn remove_port(&mut self, uuid: Uuid) -> Result<Uuid> {
        let idx = self.port_node(uuid)?;
        for id in self.touching(idx) {
            self.remove_connection(id)?;
        }

        let (client_id, client_uuid) = self
            .owner(idx)
            .and_then(|c| self.client_at(c))
            .map(|c| (c.id, c.uuid))
            .ok_or_else(|| GraphError::Integrity(format!("port {} has no client", uuid)))?;

        let port = match self.inner.remove_node(idx) {
            Some(Node::Port(port)) => port,
            _ => return Err(GraphError::PortNotFound(uuid)),
        };
        self.ports.remove(&uuid);
        self.port_ids.remove(&port.id);
        if let Some(jack_id) = port.jack_id {
            unindex(&mut self.port_jack_ids, &jack_id, idx);
        }
        if let Some(link) = port.link_override_uuid {
            unindex(&mut self.link_overrides, &link, idx);
        }

        let version = self.bump();
        debug!(graph = %self.kind, id = port.id, name = %port.name, "port removed");
        if !port.hidden {
            self.emit(Event::PortDisappeared {
                graph: self.kind,
                version,
                client_id,
                port_id: port.id,
            });
        }
        Ok(client_uuid)
    }

    pub fn rename_port(&mut self, uuid: Uuid, name: &str) -> Result<()> {
        let client_id = self.owner_id(self.port_node(uuid)?);
        let port = self.port_entry(uuid)?;
        let old_name = std::mem::replace(&mut port.name, name.to_string());
        let (port_id, hidden) = (port.id, port.hidden);
        let version = self.bump();
        if !hidden {
            self.emit(Event::PortRenamed {
                graph: self.kind,
                version,
                client_id,
                port_id,
                old_name,
                new_name: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn adjust_port(&mut self, uuid: Uuid, port_type: PortType, flags: PortFlags) -> Result<()> {
        let port = self.port_entry(uuid)?;
        port.port_type = port_type;
        port.flags = flags;
        self.bump();
        Ok(())
    }

    /// Hide a port and every visible connection touching it.
    pub fn hide_port(&mut self, uuid: Uuid) -> Result<()> {
        let idx = self.port_node(uuid)?;
        if self.port_at(idx).map_or(true, |p| p.hidden) {
            return Ok(());
        }

        let visible: Vec<u64> = self
            .touching(idx)
            .into_iter()
            .filter(|id| self.connection(*id).is_some_and(|c| !c.hidden))
            .collect();
        for id in visible {
            self.hide_connection(id)?;
        }

        let client_id = self.owner_id(idx);
        let port = self.port_entry(uuid)?;
        port.hidden = true;
        let port_id = port.id;
        let version = self.bump();
        self.emit(Event::PortDisappeared {
            graph: self.kind,
            version,
            client_id,
            port_id,
        });
        Ok(())
    }

    /// Show a port, showing its client first if needed.
    pub fn show_port(&mut self, uuid: Uuid) -> Result<()> {
        let idx = self.port_node(uuid)?;
        if self.port_at(idx).map_or(true, |p| !p.hidden) {
            return Ok(());
        }

        let (client_id, client_uuid, client_hidden) = self
            .owner(idx)
            .and_then(|c| self.client_at(c))
            .map(|c| (c.id, c.uuid, c.hidden))
            .ok_or_else(|| GraphError::Integrity(format!("port {} has no client", uuid)))?;
        if client_hidden {
            self.show_client(client_uuid)?;
        }

        self.port_entry(uuid)?.hidden = false;
        let version = self.bump();
        if let Some(port) = self.port_at(idx) {
            let event = self.port_appeared_event(client_id, port, version);
            self.emit(event);
        }
        Ok(())
    }

    pub fn port(&self, uuid: Uuid) -> Option<&GraphPort> {
        self.ports.get(&uuid).and_then(|idx| self.port_at(*idx))
    }

    /// Client that owns `port`.
    pub fn port_client(&self, port: Uuid) -> Option<&GraphClient> {
        let idx = self.ports.get(&port)?;
        self.client_at(self.owner(*idx)?)
    }

    pub fn port_by_id(&self, id: u64) -> Option<&GraphPort> {
        self.port_ids.get(&id).and_then(|idx| self.port_at(*idx))
    }

    pub fn port_by_name(&self, client: Uuid, name: &str) -> Option<&GraphPort> {
        self.client_ports(client).into_iter().find(|p| p.name == name)
    }

    pub fn port_by_jack_id(&self, jack_id: u64) -> Option<&GraphPort> {
        self.port_jack_ids
            .get(&jack_id)
            .and_then(|idx| self.port_at(*idx))
    }

    /// Find a port by uuid, honouring link overrides when `use_link_override` is set.
    pub fn port_by_uuid(&self, uuid: Uuid, use_link_override: bool) -> Option<&GraphPort> {
        if !use_link_override {
            return self.port(uuid);
        }
        match self.link_overrides.get(&uuid) {
            Some(idx) => self.port_at(*idx),
            None => self.port(uuid).filter(|p| p.link_override_uuid.is_none()),
        }
    }

    pub fn set_port_jack_id(&mut self, uuid: Uuid, jack_id: Option<u64>) -> Result<()> {
        let idx = self.port_node(uuid)?;
        let old = std::mem::replace(&mut self.port_entry(uuid)?.jack_id, jack_id);
        if let Some(old) = old {
            unindex(&mut self.port_jack_ids, &old, idx);
        }
        if let Some(jack_id) = jack_id {
            self.port_jack_ids.insert(jack_id, idx);
        }
        Ok(())
    }

    pub fn set_link_port_override_uuid(&mut self, port: Uuid, override_uuid: Uuid) -> Result<()> {
        let idx = self.port_node(port)?;
        let old = self.port_entry(port)?.link_override_uuid.replace(override_uuid);
        if let Some(old) = old {
            unindex(&mut self.link_overrides, &old, idx);
        }
        self.link_overrides.insert(override_uuid, idx);
        Ok(())
    }

    /// Port dictionary for editing. Counts as a change.
    pub fn port_dict_mut(&mut self, uuid: Uuid) -> Result<&mut Dict> {
        self.port_node(uuid)?;
        self.bump();
        Ok(&mut self.port_entry(uuid)?.dict)
    }

    // ========================================================================
    // Connections
    // ========================================================================

    /// Connect two ports.
    ///
    /// A hidden connection between the same ports is shown and reused. A
    /// visible connection touching a hidden port is created hidden.
    pub fn add_connection(&mut self, port1: Uuid, port2: Uuid, hidden: bool) -> Result<u64> {
        let a = self.port_node(port1)?;
        let b = self.port_node(port2)?;
        let p1_hidden = self.port_at(a).map_or(true, |p| p.hidden);
        let p2_hidden = self.port_at(b).map_or(true, |p| p.hidden);

        let existing = self
            .connection_between(a, b)
            .and_then(|edge| self.connection_at(edge))
            .map(|c| (c.id, c.hidden));
        if let Some((id, existing_hidden)) = existing {
            if existing_hidden && !hidden && !p1_hidden && !p2_hidden {
                self.show_connection(id)?;
                return Ok(id);
            }
            return Err(GraphError::AlreadyConnected(port1, port2));
        }

        let hidden = hidden || p1_hidden || p2_hidden;
        let id = self.next_connection_id;
        self.next_connection_id += 1;

        let edge = self.inner.add_edge(
            a,
            b,
            Link::Connection(GraphConnection {
                id,
                port1,
                port2,
                hidden,
                dict: Dict::new(),
            }),
        );
        self.connections.insert(id, edge);

        let version = self.bump();
        debug!(graph = %self.kind, id, hidden, "connection added");
        if !hidden {
            if let Some(conn) = self.connection_at(edge) {
                let event = self.connection_event(conn, version, true);
                self.emit(event);
            }
        }
        Ok(id)
    }

    /// Remove a connection, returning its two ports.
    pub fn remove_connection(&mut self, id: u64) -> Result<(Uuid, Uuid)> {
        let edge = self.connection_edge(id)?;
        let conn = match self.inner.remove_edge(edge) {
            Some(Link::Connection(conn)) => conn,
            _ => return Err(GraphError::ConnectionNotFound(id)),
        };
        self.connections.remove(&id);

        let version = self.bump();
        debug!(graph = %self.kind, id, "connection removed");
        if !conn.hidden {
            self.emit(self.connection_event(&conn, version, false));
        }
        Ok((conn.port1, conn.port2))
    }

    pub fn hide_connection(&mut self, id: u64) -> Result<()> {
        let conn = self.connection_entry(id)?;
        if conn.hidden {
            return Ok(());
        }
        conn.hidden = true;
        self.emit_connection(id, false);
        Ok(())
    }

    pub fn show_connection(&mut self, id: u64) -> Result<()> {
        let (port1, port2) = match self.connection(id) {
            Some(c) if !c.hidden => return Ok(()),
            Some(c) => (c.port1, c.port2),
            None => return Err(GraphError::ConnectionNotFound(id)),
        };
        let endpoint_hidden = [port1, port2]
            .iter()
            .any(|p| self.port(*p).map_or(true, |port| port.hidden));
        if endpoint_hidden {
            return Err(GraphError::HiddenEndpoint(id));
        }

        self.connection_entry(id)?.hidden = false;
        self.emit_connection(id, true);
        Ok(())
    }

    fn emit_connection(&mut self, id: u64, connected: bool) {
        let version = self.bump();
        if let Some(conn) = self.connection(id) {
            let event = self.connection_event(conn, version, connected);
            self.emit(event);
        }
    }

    /// Connection between two ports, in either order.
    pub fn find_connection(&self, port1: Uuid, port2: Uuid) -> Option<&GraphConnection> {
        let a = self.ports.get(&port1)?;
        let b = self.ports.get(&port2)?;
        self.connection_at(self.connection_between(*a, *b)?)
    }

    pub fn connection(&self, id: u64) -> Option<&GraphConnection> {
        self.connections.get(&id).and_then(|edge| self.connection_at(*edge))
    }

    pub fn connection_ports(&self, id: u64) -> Option<(Uuid, Uuid)> {
        self.connection(id).map(|c| (c.port1, c.port2))
    }

    /// Connection dictionary for editing. Counts as a change.
    pub fn connection_dict_mut(&mut self, id: u64) -> Result<&mut Dict> {
        self.connection_edge(id)?;
        self.bump();
        Ok(&mut self.connection_entry(id)?.dict)
    }

    /// Hidden connections touching `port` whose endpoints are both visible.
    pub fn pending_connections(&self, port: Uuid) -> Vec<(Uuid, Uuid)> {
        let Some(idx) = self.ports.get(&port) else {
            return Vec::new();
        };
        let visible = |uuid: Uuid| self.port(uuid).is_some_and(|p| !p.hidden);
        self.touching(*idx)
            .into_iter()
            .filter_map(|id| self.connection(id))
            .filter(|c| c.hidden && visible(c.port1) && visible(c.port2))
            .map(|c| (c.port1, c.port2))
            .collect()
    }

    // ========================================================================
    // Dictionaries by protocol id
    // ========================================================================

    pub fn dict_for(&self, target: DictTarget) -> Option<&Dict> {
        match target {
            DictTarget::Graph => Some(&self.dict),
            DictTarget::Client { id } => self.client_by_id(id).map(|c| &c.dict),
            DictTarget::Port { id } => self.port_by_id(id).map(|p| &p.dict),
            DictTarget::Connection { id } => self.connection(id).map(|c| &c.dict),
        }
    }

    /// Dictionary for editing by protocol id. Counts as a change when found.
    pub fn dict_for_mut(&mut self, target: DictTarget) -> Option<&mut Dict> {
        self.dict_for(target)?;
        self.bump();
        match target {
            DictTarget::Graph => Some(&mut self.dict),
            DictTarget::Client { id } => {
                let idx = *self.client_ids.get(&id)?;
                self.inner
                    .node_weight_mut(idx)
                    .and_then(Node::client_mut)
                    .map(|c| &mut c.dict)
            }
            DictTarget::Port { id } => {
                let idx = *self.port_ids.get(&id)?;
                self.inner
                    .node_weight_mut(idx)
                    .and_then(Node::port_mut)
                    .map(|p| &mut p.dict)
            }
            DictTarget::Connection { id } => {
                let edge = *self.connections.get(&id)?;
                self.inner
                    .edge_weight_mut(edge)
                    .and_then(Link::connection_mut)
                    .map(|c| &mut c.dict)
            }
        }
    }

    // ========================================================================
    // Snapshot and integrity
    // ========================================================================

    /// Visible contents, or just the version if the caller is up to date.
    pub fn snapshot(&self, known_version: u64) -> Result<GraphSnapshot> {
        if known_version > self.version {
            return Err(GraphError::FutureVersion {
                known: known_version,
                current: self.version,
            });
        }

        if known_version == self.version {
            return Ok(GraphSnapshot {
                version: self.version,
                clients: Vec::new(),
                connections: Vec::new(),
            });
        }

        let clients = self
            .clients()
            .filter(|c| !c.hidden)
            .map(|c| ClientInfo {
                id: c.id,
                name: c.name.clone(),
                ports: self
                    .client_ports(c.uuid)
                    .into_iter()
                    .filter(|p| !p.hidden)
                    .map(GraphPort::info)
                    .collect(),
            })
            .collect();

        let connections = self
            .connections()
            .filter(|c| !c.hidden)
            .filter_map(|c| {
                let port1 = self.port(c.port1)?;
                let port2 = self.port(c.port2)?;
                let client1 = self.port_client(c.port1)?;
                let client2 = self.port_client(c.port2)?;
                Some(ConnectionInfo {
                    id: c.id,
                    client1_id: client1.id,
                    client1_name: client1.name.clone(),
                    port1_id: port1.id,
                    port1_name: port1.name.clone(),
                    client2_id: client2.id,
                    client2_name: client2.name.clone(),
                    port2_id: port2.id,
                    port2_name: port2.name.clone(),
                })
            })
            .collect();

        Ok(GraphSnapshot {
            version: self.version,
            clients,
            connections,
        })
    }

    /// Check that the indexes agree with the nodes, that every port has one
    /// owner, and that nothing visible hangs off something hidden.
    pub fn check_integrity(&self) -> Result<()> {
        let fail = |message: String| Err(GraphError::Integrity(message));

        for idx in self.inner.node_indices() {
            match self.inner.node_weight(idx) {
                Some(Node::Client(c)) => {
                    if self.clients.get(&c.uuid) != Some(&idx) || self.client_ids.get(&c.id) != Some(&idx) {
                        return fail(format!("client {} is not indexed", c.name));
                    }
                    if c.jack_id.is_some_and(|j| self.client_jack_ids.get(&j) != Some(&idx)) {
                        return fail(format!("client {} jack id is not indexed", c.name));
                    }
                }
                Some(Node::Port(p)) => {
                    if self.ports.get(&p.uuid) != Some(&idx) || self.port_ids.get(&p.id) != Some(&idx) {
                        return fail(format!("port {} is not indexed", p.name));
                    }
                    if p.jack_id.is_some_and(|j| self.port_jack_ids.get(&j) != Some(&idx)) {
                        return fail(format!("port {} jack id is not indexed", p.name));
                    }
                    let owners: Vec<NodeIndex> = self
                        .inner
                        .edges_directed(idx, Direction::Incoming)
                        .filter(|e| matches!(e.weight(), Link::Owns))
                        .map(|e| e.source())
                        .collect();
                    let [owner] = owners.as_slice() else {
                        return fail(format!("port {} has {} owners", p.name, owners.len()));
                    };
                    match self.client_at(*owner) {
                        Some(client) if client.hidden && !p.hidden => {
                            return fail(format!(
                                "visible port {} in hidden client {}",
                                p.name, client.name
                            ));
                        }
                        Some(_) => {}
                        None => return fail(format!("port {} is owned by a port", p.name)),
                    }
                }
                None => {}
            }
        }

        if self.clients.len() != self.client_ids.len()
            || self.ports.len() != self.port_ids.len()
            || self.clients.len() + self.ports.len() != self.inner.node_count()
        {
            return fail("stale index entries".to_string());
        }

        for (id, edge) in &self.connections {
            let conn = match self.connection_at(*edge) {
                Some(conn) if conn.id == *id => conn,
                _ => return fail(format!("connection {} is not indexed", id)),
            };
            for end in [conn.port1, conn.port2] {
                let Some(port) = self.port(end) else {
                    return fail(format!("connection {} references missing port {}", id, end));
                };
                if !conn.hidden && port.hidden {
                    return fail(format!("visible connection {} touches hidden port {}", id, port.name));
                }
            }
        }

        Ok(())
    }
}

/// Drop `key` from `map` only if it still points at `idx`.
fn unindex<K, I>(map: &mut HashMap<K, I>, key: &K, idx: I)
where
    K: std::hash::Hash + Eq,
    I: PartialEq,
{
    if map.get(key) == Some(&idx) {
        map.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn audio_out() -> PortFlags {
        PortFlags::OUTPUT | PortFlags::TERMINAL
    }

    fn audio_in() -> PortFlags {
        PortFlags::INPUT | PortFlags::TERMINAL
    }

    fn two_clients_connected(graph: &mut Graph) -> (Uuid, Uuid, Uuid, Uuid, u64) {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (pa, pb) = (Uuid::new_v4(), Uuid::new_v4());
        graph.add_client(a, "synth", false).unwrap();
        graph.add_client(b, "mixer", false).unwrap();
        graph.add_port(a, pa, "out_1", PortType::Audio, audio_out(), false).unwrap();
        graph.add_port(b, pb, "in_1", PortType::Audio, audio_in(), false).unwrap();
        let conn = graph.add_connection(pa, pb, false).unwrap();
        (a, b, pa, pb, conn)
    }

    #[test]
    fn test_versions_and_ids_start_at_one() {
        let mut graph = Graph::new(GraphKind::Studio);
        assert_eq!(graph.version(), 1);
        let id = graph.add_client(Uuid::new_v4(), "a", false).unwrap();
        assert_eq!(id, 1);
        assert_eq!(graph.version(), 2);
    }

    #[test]
    fn test_duplicate_client_and_port_rejected() {
        let mut graph = Graph::new(GraphKind::Jack);
        let c = Uuid::new_v4();
        let p = Uuid::new_v4();
        graph.add_client(c, "a", false).unwrap();
        assert_eq!(graph.add_client(c, "b", false), Err(GraphError::DuplicateClient(c)));
        graph.add_port(c, p, "x", PortType::Midi, audio_in(), false).unwrap();
        assert_eq!(
            graph.add_port(c, p, "y", PortType::Midi, audio_in(), false),
            Err(GraphError::DuplicatePort(p))
        );
        let missing = Uuid::new_v4();
        assert_eq!(
            graph.add_port(missing, Uuid::new_v4(), "z", PortType::Audio, audio_in(), false),
            Err(GraphError::ClientNotFound(missing))
        );
    }

    #[test]
    fn test_hidden_connection_is_reused() {
        let mut graph = Graph::new(GraphKind::Studio);
        let (_, _, pa, pb, conn) = two_clients_connected(&mut graph);

        graph.hide_connection(conn).unwrap();
        let version = graph.version();
        let again = graph.add_connection(pb, pa, false).unwrap();
        assert_eq!(again, conn);
        assert!(!graph.connection(conn).unwrap().hidden);
        assert_eq!(graph.version(), version + 1);

        assert_eq!(
            graph.add_connection(pa, pb, false),
            Err(GraphError::AlreadyConnected(pa, pb))
        );
    }

    #[test]
    fn test_hiding_port_hides_connections() {
        let mut graph = Graph::new(GraphKind::Studio);
        let (_, _, pa, pb, conn) = two_clients_connected(&mut graph);

        graph.hide_port(pa).unwrap();
        assert!(graph.connection(conn).unwrap().hidden);
        graph.check_integrity().unwrap();

        // both endpoints must be visible before it is pending again
        assert!(graph.pending_connections(pb).is_empty());
        graph.show_port(pa).unwrap();
        assert_eq!(graph.pending_connections(pb), vec![(pa, pb)]);
    }

    #[test]
    fn test_hide_client_hides_ports_and_show_port_shows_client() {
        let mut graph = Graph::new(GraphKind::Jack);
        let (a, _, pa, _, _) = two_clients_connected(&mut graph);

        graph.hide_client(a).unwrap();
        assert!(graph.port(pa).unwrap().hidden);
        assert!(graph.is_client_looks_empty(a).unwrap());
        assert!(!graph.is_client_empty(a).unwrap());

        graph.show_port(pa).unwrap();
        assert!(!graph.client(a).unwrap().hidden);
        graph.check_integrity().unwrap();
    }

    #[test]
    fn test_remove_client_removes_ports_and_connections() {
        let mut graph = Graph::new(GraphKind::Studio);
        let (a, _, pa, _, conn) = two_clients_connected(&mut graph);

        graph.remove_client(a).unwrap();
        assert!(graph.client(a).is_none());
        assert!(graph.port(pa).is_none());
        assert!(graph.connection(conn).is_none());
    }

    #[test]
    fn test_snapshot_versions() {
        let mut graph = Graph::new(GraphKind::Studio);
        let (a, _, _, _, _) = two_clients_connected(&mut graph);
        graph.hide_client(a).unwrap();

        let snap = graph.snapshot(0).unwrap();
        assert_eq!(snap.version, graph.version());
        assert_eq!(snap.clients.len(), 1);
        assert_eq!(snap.clients[0].name, "mixer");
        assert!(snap.connections.is_empty());

        let current = graph.snapshot(graph.version()).unwrap();
        assert!(current.clients.is_empty());

        assert!(matches!(
            graph.snapshot(graph.version() + 1),
            Err(GraphError::FutureVersion { .. })
        ));
    }

    #[test]
    fn test_events_carry_new_version_and_skip_hidden() {
        let (tx, mut rx) = broadcast::channel(64);
        let mut graph = Graph::with_events(GraphKind::Jack, tx);

        let hidden = Uuid::new_v4();
        graph.add_client(hidden, "ghost", true).unwrap();
        assert!(rx.try_recv().is_err());

        let c = Uuid::new_v4();
        let id = graph.add_client(c, "synth", false).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            Event::ClientAppeared {
                graph: GraphKind::Jack,
                version: 3,
                client_id: id,
                name: "synth".to_string(),
            }
        );

        graph.rename_client(c, "synth-2").unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            Event::ClientRenamed { version: 4, .. }
        ));
    }

    #[test]
    fn test_remove_visible_emits_connections_then_ports_then_client() {
        let (tx, mut rx) = broadcast::channel(64);
        let mut graph = Graph::with_events(GraphKind::Studio, tx);
        let (a, _, _, _, _) = two_clients_connected(&mut graph);
        while rx.try_recv().is_ok() {}

        graph.remove_client(a).unwrap();
        let order: Vec<&'static str> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|ev| match ev {
                Event::PortsDisconnected { .. } => "disconnected",
                Event::PortDisappeared { .. } => "port",
                Event::ClientDisappeared { .. } => "client",
                _ => "other",
            })
            .collect();
        assert_eq!(order, vec!["disconnected", "port", "client"]);
    }

    #[test]
    fn test_link_override_lookup() {
        let mut graph = Graph::new(GraphKind::Studio);
        let c = Uuid::new_v4();
        let p = Uuid::new_v4();
        let link = Uuid::new_v4();
        graph.add_client(c, "room link", false).unwrap();
        graph.add_port(c, p, "capture_1", PortType::Audio, audio_out(), false).unwrap();
        graph.set_link_port_override_uuid(p, link).unwrap();

        assert_eq!(graph.port_by_uuid(link, true).map(|p| p.uuid), Some(p));
        assert!(graph.port_by_uuid(link, false).is_none());
        assert_eq!(graph.port_by_uuid(p, false).map(|p| p.effective_uuid()), Some(link));
    }

    #[test]
    fn test_dict_by_protocol_id() {
        let mut graph = Graph::new(GraphKind::Studio);
        let (_, _, _, _, conn) = two_clients_connected(&mut graph);
        graph
            .dict_for_mut(DictTarget::Connection { id: conn })
            .unwrap()
            .set("color", "red");
        assert_eq!(
            graph.dict_for(DictTarget::Connection { id: conn }).unwrap().get("color"),
            Some("red")
        );
        assert!(graph.dict_for(DictTarget::Port { id: 999 }).is_none());
    }

    #[test]
    fn test_clear_empties_graph() {
        let mut graph = Graph::new(GraphKind::Jack);
        two_clients_connected(&mut graph);
        graph.dict_mut().set("k", "v");
        graph.clear();
        assert_eq!(graph.clients().count(), 0);
        assert_eq!(graph.connections().count(), 0);
        assert_eq!(graph.dict().get("k"), Some("v"));
    }

    #[test]
    fn test_hardware_uuids() {
        assert_eq!(
            HARDWARE_CAPTURE_UUID.to_string(),
            "47c1cd18-7b21-4389-bec4-6e0658e1d6b1"
        );
        assert_eq!(
            HARDWARE_PLAYBACK_UUID.to_string(),
            "b2a0bb06-28d8-4bfe-956e-eb24378f9629"
        );
    }

    #[test]
    fn test_jack_id_index_follows_updates() {
        let mut graph = Graph::new(GraphKind::Jack);
        let (a, _, pa, _, _) = two_clients_connected(&mut graph);

        graph.set_client_jack_id(a, Some(7)).unwrap();
        graph.set_port_jack_id(pa, Some(70)).unwrap();
        assert_eq!(graph.client_by_jack_id(7).map(|c| c.uuid), Some(a));
        assert_eq!(graph.port_by_jack_id(70).map(|p| p.uuid), Some(pa));

        graph.set_client_jack_id(a, Some(8)).unwrap();
        assert!(graph.client_by_jack_id(7).is_none());
        assert_eq!(graph.client_by_jack_id(8).map(|c| c.uuid), Some(a));

        graph.remove_port(pa).unwrap();
        assert!(graph.port_by_jack_id(70).is_none());
        graph.set_client_jack_id(a, None).unwrap();
        assert!(graph.client_by_jack_id(8).is_none());
        graph.check_integrity().unwrap();
    }

    #[test]
    fn test_iteration_follows_ids_after_slot_reuse() {
        let mut graph = Graph::new(GraphKind::Studio);
        let first = Uuid::new_v4();
        graph.add_client(first, "first", false).unwrap();
        graph.add_client(Uuid::new_v4(), "second", false).unwrap();
        graph.remove_client(first).unwrap();
        graph.add_client(Uuid::new_v4(), "third", false).unwrap();

        let names: Vec<&str> = graph.clients().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["second", "third"]);

        let c = graph.client_by_name("third").unwrap().uuid;
        let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());
        graph.add_port(c, p1, "a", PortType::Audio, audio_out(), false).unwrap();
        graph.add_port(c, p2, "b", PortType::Audio, audio_out(), false).unwrap();
        let ports: Vec<Uuid> = graph.client_ports(c).iter().map(|p| p.uuid).collect();
        assert_eq!(ports, vec![p1, p2]);
        assert_eq!(graph.port_by_name(c, "b").map(|p| p.uuid), Some(p2));
        graph.check_integrity().unwrap();
    }

    #[test]
    fn test_dict_edits_bump_version() {
        let mut graph = Graph::new(GraphKind::Studio);
        let (a, _, pa, _, conn) = two_clients_connected(&mut graph);

        let before = graph.version();
        graph.client_dict_mut(a).unwrap().set("x", "1");
        graph.port_dict_mut(pa).unwrap().set("y", "2");
        graph.connection_dict_mut(conn).unwrap().set("z", "3");
        graph.dict_mut().set("w", "4");
        assert_eq!(graph.version(), before + 4);

        assert!(graph.dict_for_mut(DictTarget::Client { id: 999 }).is_none());
        assert_eq!(graph.version(), before + 4);
        graph.dict_for_mut(DictTarget::Graph).unwrap().drop_key("w");
        assert_eq!(graph.version(), before + 5);
    }
}
