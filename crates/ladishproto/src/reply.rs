//! Replies to requests.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{AppInfo, AppProperties, GraphSnapshot, RoomInfo, RoomTemplateInfo, StudioSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed request or arguments that can never succeed.
    InvalidArgs,
    /// The addressed studio, app, client, port or connection does not exist.
    NotFound,
    /// The operation needs a loaded studio and none is.
    NoStudio,
    /// The request conflicts with the current state (app running, already connected, ...).
    InvalidState,
    /// A command queue cancel is in progress.
    Busy,
    /// The operation was attempted and failed.
    Failed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidArgs => "invalid arguments",
            ErrorKind::NotFound => "not found",
            ErrorKind::NoStudio => "no studio loaded",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::Busy => "busy",
            ErrorKind::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Ok,
    Pong,
    Studios {
        studios: Vec<StudioSummary>,
    },
    RecentStudios {
        names: Vec<String>,
    },
    StudioName {
        name: String,
    },
    Bool {
        value: bool,
    },
    Graph {
        snapshot: GraphSnapshot,
    },
    ClientPid {
        pid: u32,
    },
    DictValue {
        value: String,
    },
    Apps {
        version: u64,
        apps: Vec<AppInfo>,
    },
    AppProperties {
        properties: AppProperties,
    },
    RoomTemplates {
        templates: Vec<RoomTemplateInfo>,
    },
    Rooms {
        rooms: Vec<RoomInfo>,
    },
    Subscribed,
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl Reply {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Reply::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_reply_shape() {
        let reply = Reply::error(ErrorKind::NoStudio, "load a studio first");
        assert!(reply.is_error());
        let json = serde_json::to_string(&reply).unwrap();
        assert_eq!(
            json,
            r#"{"type":"error","kind":"no_studio","message":"load a studio first"}"#
        );
    }
}
