//! Shared value types: graph snapshots, port descriptors, app records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

/// Which graph a request or event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphKind {
    /// The live JACK graph, as reported by the server.
    Jack,
    /// The studio's persistent virtual graph.
    Studio,
}

impl fmt::Display for GraphKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphKind::Jack => f.write_str("jack"),
            GraphKind::Studio => f.write_str("studio"),
        }
    }
}

impl FromStr for GraphKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jack" => Ok(GraphKind::Jack),
            "studio" => Ok(GraphKind::Studio),
            other => Err(format!("unknown graph '{}', expected jack or studio", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    Audio,
    Midi,
}

impl PortType {
    /// Numeric code used in studio documents.
    pub fn code(self) -> u32 {
        match self {
            PortType::Audio => 0,
            PortType::Midi => 1,
        }
    }
}

/// Port direction and capability bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortFlags(u32);

impl PortFlags {
    pub const INPUT: PortFlags = PortFlags(0x1);
    pub const OUTPUT: PortFlags = PortFlags(0x2);
    pub const PHYSICAL: PortFlags = PortFlags(0x4);
    pub const CAN_MONITOR: PortFlags = PortFlags(0x8);
    pub const TERMINAL: PortFlags = PortFlags(0x10);

    pub const fn empty() -> Self {
        PortFlags(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        PortFlags(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: PortFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_input(self) -> bool {
        self.contains(Self::INPUT)
    }

    pub fn is_output(self) -> bool {
        self.contains(Self::OUTPUT)
    }

    pub fn is_terminal(self) -> bool {
        self.contains(Self::TERMINAL)
    }

    /// The same port seen from the other side: input and output swap.
    pub fn flipped(self) -> Self {
        let mut bits = self.0 & !(Self::INPUT.0 | Self::OUTPUT.0);
        if self.is_input() {
            bits |= Self::OUTPUT.0;
        }
        if self.is_output() {
            bits |= Self::INPUT.0;
        }
        PortFlags(bits)
    }
}

impl BitOr for PortFlags {
    type Output = PortFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        PortFlags(self.0 | rhs.0)
    }
}

impl fmt::Display for PortFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        for (flag, name) in [
            (Self::INPUT, "input"),
            (Self::OUTPUT, "output"),
            (Self::PHYSICAL, "physical"),
            (Self::CAN_MONITOR, "monitor"),
            (Self::TERMINAL, "terminal"),
        ] {
            if self.contains(flag) {
                names.push(name);
            }
        }
        if names.is_empty() {
            f.write_str("-")
        } else {
            f.write_str(&names.join(","))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub id: u64,
    pub name: String,
    pub flags: PortFlags,
    pub port_type: PortType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: u64,
    pub name: String,
    pub ports: Vec<PortInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: u64,
    pub client1_id: u64,
    pub client1_name: String,
    pub port1_id: u64,
    pub port1_name: String,
    pub client2_id: u64,
    pub client2_name: String,
    pub port2_id: u64,
    pub port2_name: String,
}

/// Visible contents of a graph at `version`.
///
/// When the caller already knows `version`, `clients` and `connections` are empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub version: u64,
    pub clients: Vec<ClientInfo>,
    pub connections: Vec<ConnectionInfo>,
}

/// How much session support an application has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AppLevel {
    /// No save support: the app is started and stopped, nothing else.
    #[default]
    #[serde(rename = "0")]
    Classic,
    /// Saves its state on SIGUSR1.
    #[serde(rename = "1")]
    L1,
    #[serde(rename = "lash")]
    Lash,
    #[serde(rename = "jacksession")]
    JackSession,
}

impl AppLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AppLevel::Classic => "0",
            AppLevel::L1 => "1",
            AppLevel::Lash => "lash",
            AppLevel::JackSession => "jacksession",
        }
    }
}

impl fmt::Display for AppLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" => Ok(AppLevel::Classic),
            "1" => Ok(AppLevel::L1),
            "lash" => Ok(AppLevel::Lash),
            "jacksession" => Ok(AppLevel::JackSession),
            other => Err(format!("unknown app level '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    #[default]
    Stopped,
    Started,
    /// SIGTERM sent, waiting for exit.
    Stopping,
    /// SIGKILL sent, waiting for exit.
    Kill,
}

impl AppState {
    pub fn is_running(self) -> bool {
        !matches!(self, AppState::Stopped)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub id: u64,
    pub name: String,
    pub running: bool,
    pub terminal: bool,
    pub level: AppLevel,
    pub state: AppState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppProperties {
    pub name: String,
    pub commandline: String,
    pub terminal: bool,
    pub level: AppLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudioSummary {
    pub name: String,
    pub modified: DateTime<Utc>,
}

/// A link port of a room template, as seen from inside the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomPort {
    pub name: String,
    pub port_type: PortType,
    pub flags: PortFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomTemplateInfo {
    pub name: String,
    pub ports: Vec<RoomPort>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub name: String,
    pub uuid: String,
    pub template: String,
    /// Studio-graph id of the room's link client.
    pub client_id: u64,
}

/// Object a dictionary operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DictTarget {
    Graph,
    Client { id: u64 },
    Port { id: u64 },
    Connection { id: u64 },
}
