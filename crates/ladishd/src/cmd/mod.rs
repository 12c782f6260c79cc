//! Queued studio and app commands.

mod app;
mod room;
mod studio;

pub use app::{ChangeAppState, NewApp, RemoveApp, TargetState};
pub use room::{DeleteRoom, NewRoom};
pub use studio::{
    DeleteStudio, LoadStudio, NewStudio, RenameStudio, SaveStudio, StartStudio, StopStudio,
    UnloadStudio,
};

use crate::cqueue::Command;
use crate::session::Session;

pub type SessionCommand = Box<dyn Command<Session>>;

/// Stop and unload whatever is loaded.
pub fn unload_sequence() -> Vec<SessionCommand> {
    vec![Box::new(StopStudio::new()), Box::new(UnloadStudio)]
}

/// Replace the loaded studio (if any) with a new empty one.
pub fn new_studio_sequence(name: &str) -> Vec<SessionCommand> {
    let mut cmds = unload_sequence();
    cmds.push(Box::new(NewStudio::new(name)));
    cmds
}

/// Replace the loaded studio (if any) with a stored one and start it.
pub fn load_studio_sequence(name: &str) -> Vec<SessionCommand> {
    let mut cmds = unload_sequence();
    cmds.push(Box::new(LoadStudio::new(name)));
    cmds.push(Box::new(StartStudio::new()));
    cmds
}

/// Stop an app, then drop it and its graph clients.
pub fn remove_app_sequence(id: u64) -> Vec<SessionCommand> {
    vec![
        Box::new(ChangeAppState::new(id, TargetState::Stopped)),
        Box::new(RemoveApp::new(id)),
    ]
}
