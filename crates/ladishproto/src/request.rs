//! Requests a front-end can send to the daemon.

use serde::{Deserialize, Serialize};

use crate::types::{AppLevel, DictTarget, GraphKind, RoomPort};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    // Control
    Ping,
    ListStudios,
    NewStudio {
        name: String,
    },
    LoadStudio {
        name: String,
    },
    DeleteStudio {
        name: String,
    },
    GetRecentStudios {
        max: usize,
    },
    IsStudioLoaded,
    /// Stop the running studio and shut the daemon down.
    Exit,
    /// Cancel queued studio work. A waiting command finishes early.
    CancelCommands,

    // Studio
    GetStudioName,
    RenameStudio {
        name: String,
    },
    SaveStudio,
    StartStudio,
    StopStudio,
    UnloadStudio,
    IsStudioStarted,
    /// Changed since the last load or save.
    IsStudioModified,

    // Rooms
    ListRoomTemplates,
    NewRoomTemplate {
        name: String,
        ports: Vec<RoomPort>,
    },
    DeleteRoomTemplate {
        name: String,
    },
    ListRooms,
    NewRoom {
        name: String,
        template: String,
    },
    DeleteRoom {
        name: String,
    },

    // Patchbay
    GetGraph {
        graph: GraphKind,
        known_version: u64,
    },
    ConnectPortsById {
        graph: GraphKind,
        port1_id: u64,
        port2_id: u64,
    },
    ConnectPortsByName {
        graph: GraphKind,
        client1: String,
        port1: String,
        client2: String,
        port2: String,
    },
    DisconnectPortsById {
        graph: GraphKind,
        port1_id: u64,
        port2_id: u64,
    },
    DisconnectPortsByName {
        graph: GraphKind,
        client1: String,
        port1: String,
        client2: String,
        port2: String,
    },
    DisconnectPortsByConnectionId {
        graph: GraphKind,
        connection_id: u64,
    },
    GetClientPid {
        graph: GraphKind,
        client_id: u64,
    },
    DictSet {
        graph: GraphKind,
        target: DictTarget,
        key: String,
        value: String,
    },
    DictGet {
        graph: GraphKind,
        target: DictTarget,
        key: String,
    },
    DictDrop {
        graph: GraphKind,
        target: DictTarget,
        key: String,
    },

    // App supervisor
    GetApps,
    RunCustom {
        terminal: bool,
        commandline: String,
        /// Empty derives a name from the command line.
        #[serde(default)]
        name: String,
        #[serde(default)]
        level: AppLevel,
    },
    StartApp {
        id: u64,
    },
    StopApp {
        id: u64,
    },
    KillApp {
        id: u64,
    },
    RemoveApp {
        id: u64,
    },
    GetAppProperties {
        id: u64,
    },
    SetAppProperties {
        id: u64,
        name: String,
        commandline: String,
        terminal: bool,
        level: AppLevel,
    },

    /// Turn this connection into an event stream. Replied to with `Subscribed`.
    Subscribe,
}

impl Request {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Ping => "ping",
            Request::ListStudios => "list_studios",
            Request::NewStudio { .. } => "new_studio",
            Request::LoadStudio { .. } => "load_studio",
            Request::DeleteStudio { .. } => "delete_studio",
            Request::GetRecentStudios { .. } => "get_recent_studios",
            Request::IsStudioLoaded => "is_studio_loaded",
            Request::Exit => "exit",
            Request::CancelCommands => "cancel_commands",
            Request::GetStudioName => "get_studio_name",
            Request::RenameStudio { .. } => "rename_studio",
            Request::SaveStudio => "save_studio",
            Request::StartStudio => "start_studio",
            Request::StopStudio => "stop_studio",
            Request::UnloadStudio => "unload_studio",
            Request::IsStudioStarted => "is_studio_started",
            Request::IsStudioModified => "is_studio_modified",
            Request::ListRoomTemplates => "list_room_templates",
            Request::NewRoomTemplate { .. } => "new_room_template",
            Request::DeleteRoomTemplate { .. } => "delete_room_template",
            Request::ListRooms => "list_rooms",
            Request::NewRoom { .. } => "new_room",
            Request::DeleteRoom { .. } => "delete_room",
            Request::GetGraph { .. } => "get_graph",
            Request::ConnectPortsById { .. } => "connect_ports_by_id",
            Request::ConnectPortsByName { .. } => "connect_ports_by_name",
            Request::DisconnectPortsById { .. } => "disconnect_ports_by_id",
            Request::DisconnectPortsByName { .. } => "disconnect_ports_by_name",
            Request::DisconnectPortsByConnectionId { .. } => "disconnect_ports_by_connection_id",
            Request::GetClientPid { .. } => "get_client_pid",
            Request::DictSet { .. } => "dict_set",
            Request::DictGet { .. } => "dict_get",
            Request::DictDrop { .. } => "dict_drop",
            Request::GetApps => "get_apps",
            Request::RunCustom { .. } => "run_custom",
            Request::StartApp { .. } => "start_app",
            Request::StopApp { .. } => "stop_app",
            Request::KillApp { .. } => "kill_app",
            Request::RemoveApp { .. } => "remove_app",
            Request::GetAppProperties { .. } => "get_app_properties",
            Request::SetAppProperties { .. } => "set_app_properties",
            Request::Subscribe => "subscribe",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_tagging() {
        let req = Request::GetGraph {
            graph: GraphKind::Studio,
            known_version: 3,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "get_graph", "graph": "studio", "known_version": 3})
        );
    }

    #[test]
    fn test_run_custom_defaults() {
        let req: Request = serde_json::from_str(
            r#"{"type":"run_custom","terminal":false,"commandline":"qsynth"}"#,
        )
        .unwrap();
        assert_eq!(
            req,
            Request::RunCustom {
                terminal: false,
                commandline: "qsynth".to_string(),
                name: String::new(),
                level: AppLevel::Classic,
            }
        );
        assert_eq!(req.name(), "run_custom");
    }

    #[test]
    fn test_room_template_request() {
        let req = Request::NewRoomTemplate {
            name: "Bus".to_string(),
            ports: vec![RoomPort {
                name: "send".to_string(),
                port_type: crate::types::PortType::Midi,
                flags: crate::types::PortFlags::OUTPUT,
            }],
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            serde_json::json!({
                "type": "new_room_template",
                "name": "Bus",
                "ports": [{"name": "send", "port_type": "midi", "flags": 2}],
            })
        );
        assert_eq!(req.name(), "new_room_template");
        assert_eq!(Request::CancelCommands.name(), "cancel_commands");
    }
}
