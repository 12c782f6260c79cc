//! Events broadcast to subscribed connections.

use serde::{Deserialize, Serialize};

use crate::types::{AppInfo, GraphKind, PortFlags, PortType};

/// Daemon events. Graph and app events carry the version reached after the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // Graph changes
    ClientAppeared {
        graph: GraphKind,
        version: u64,
        client_id: u64,
        name: String,
    },
    ClientRenamed {
        graph: GraphKind,
        version: u64,
        client_id: u64,
        old_name: String,
        new_name: String,
    },
    ClientDisappeared {
        graph: GraphKind,
        version: u64,
        client_id: u64,
    },
    PortAppeared {
        graph: GraphKind,
        version: u64,
        client_id: u64,
        port_id: u64,
        name: String,
        flags: PortFlags,
        port_type: PortType,
    },
    PortRenamed {
        graph: GraphKind,
        version: u64,
        client_id: u64,
        port_id: u64,
        old_name: String,
        new_name: String,
    },
    PortDisappeared {
        graph: GraphKind,
        version: u64,
        client_id: u64,
        port_id: u64,
    },
    PortsConnected {
        graph: GraphKind,
        version: u64,
        connection_id: u64,
        client1_id: u64,
        port1_id: u64,
        client2_id: u64,
        port2_id: u64,
    },
    PortsDisconnected {
        graph: GraphKind,
        version: u64,
        connection_id: u64,
        client1_id: u64,
        port1_id: u64,
        client2_id: u64,
        port2_id: u64,
    },

    // App supervisor
    AppAdded {
        version: u64,
        app: AppInfo,
    },
    AppStateChanged {
        version: u64,
        app: AppInfo,
    },
    AppRemoved {
        version: u64,
        id: u64,
    },

    // Studio lifecycle
    StudioAppeared {
        name: String,
    },
    StudioDisappeared,
    StudioStarted,
    StudioStopped,
    StudioRenamed {
        name: String,
    },
    /// The JACK server went away while the studio was started.
    StudioCrashed,

    // Rooms
    RoomAppeared {
        name: String,
        client_id: u64,
    },
    RoomDisappeared {
        name: String,
    },

    /// A queued command failed and the queue was cleared.
    CommandFailed {
        command: String,
        message: String,
    },
}

impl Event {
    /// Graph the event belongs to, if it is a graph event.
    pub fn graph(&self) -> Option<GraphKind> {
        match self {
            Event::ClientAppeared { graph, .. }
            | Event::ClientRenamed { graph, .. }
            | Event::ClientDisappeared { graph, .. }
            | Event::PortAppeared { graph, .. }
            | Event::PortRenamed { graph, .. }
            | Event::PortDisappeared { graph, .. }
            | Event::PortsConnected { graph, .. }
            | Event::PortsDisconnected { graph, .. } => Some(*graph),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_accessor() {
        let ev = Event::ClientDisappeared {
            graph: GraphKind::Jack,
            version: 4,
            client_id: 2,
        };
        assert_eq!(ev.graph(), Some(GraphKind::Jack));
        assert_eq!(Event::StudioStarted.graph(), None);
    }
}
