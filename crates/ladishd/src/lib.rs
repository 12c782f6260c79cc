//! ladishd - session manager daemon for JACK
//!
//! A studio is a saved JACK setup: the apps to run, the connections between
//! their ports and whatever front-ends stored on the canvas. The daemon keeps
//! two graphs per studio:
//!
//! - the **JACK graph** mirrors the live server, client for client;
//! - the **studio graph** is the persistent view front-ends edit. The
//!   `system` client is split into Hardware Capture and Hardware Playback,
//!   and app clients are named after their app.
//!
//! The [`virtualizer`] keeps both in step with JACK events. Clients and ports
//! that go away are hidden rather than removed, so a returning app gets its
//! old identity and connections back.
//!
//! Rooms are sub-graphs created from templates and linked into the studio
//! graph through pairs of link ports.
//!
//! Work that waits on the outside world (server start, apps exiting) runs
//! through the [`cqueue`] command queue, driven by the [`daemon`] actor.

pub mod cmd;
pub mod cqueue;
pub mod daemon;
pub mod dict;
pub mod escape;
pub mod graph;
pub mod jack;
pub mod loader;
pub mod procfs;
pub mod recent;
pub mod room;
pub mod server;
pub mod session;
pub mod store;
pub mod studio;
pub mod supervisor;
pub mod telemetry;
pub mod virtualizer;

#[cfg(feature = "jack")]
pub mod jack_client;

pub use cqueue::{Command, CommandError, CommandQueue, CommandState};
pub use daemon::{Daemon, DaemonHandle};
pub use graph::{Graph, GraphError};
pub use jack::{JackBackend, JackError, JackEvent, LoopbackBackend};
pub use loader::{ChildExit, Loader, ProcessControl};
pub use server::Server;
pub use session::{Session, SessionConfig};
pub use store::{StoreError, StudioStore};
pub use studio::Studio;
pub use supervisor::{AppSupervisor, SupervisorError};
