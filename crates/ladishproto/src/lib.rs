//! ladishproto - wire protocol for the ladish session daemon
//!
//! Front-ends talk to `ladishd` over a Unix socket. Each side writes one
//! JSON [`Frame`] per line:
//!
//! - **request / reply**: a front-end sends a [`Request`] with an id and the
//!   daemon answers with a [`Reply`] carrying the same id.
//! - **events**: after [`Request::Subscribe`] the connection also receives
//!   [`Event`]s for graph, app and studio changes.
//!
//! Graph requests and events address a [`GraphKind`]: the live JACK graph or
//! the studio's virtual graph. Numeric client/port/connection ids are local
//! to one graph. Every graph event carries the graph version it produced, so
//! a front-end that polls with `GetGraph { known_version }` and also listens
//! to events can tell when it has missed something.

pub mod events;
pub mod frame;
pub mod reply;
pub mod request;
pub mod types;

#[cfg(feature = "client")]
pub mod client;

pub use events::Event;
pub use frame::{Frame, FrameError, MAX_FRAME_LEN};
pub use reply::{ErrorKind, Reply};
pub use request::Request;
pub use types::{
    AppInfo, AppLevel, AppProperties, AppState, ClientInfo, ConnectionInfo, DictTarget,
    GraphKind, GraphSnapshot, PortFlags, PortInfo, PortType, RoomInfo, RoomPort, RoomTemplateInfo,
    StudioSummary,
};

#[cfg(feature = "client")]
pub use client::{ClientError, EventStream, LadishClient};
