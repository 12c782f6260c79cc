use tracing::info;

use ladishproto::Event;

use crate::cqueue::{Command, CommandError, CommandState};
use crate::room::Room;
use crate::session::Session;

pub struct NewRoom {
    name: String,
    template: String,
}

impl NewRoom {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
        }
    }
}

impl Command<Session> for NewRoom {
    fn name(&self) -> &'static str {
        "new_room"
    }

    fn run(&mut self, session: &mut Session) -> Result<CommandState, CommandError> {
        let template = session.store.room_templates().load(&self.template)?;
        let studio = session.studio_mut()?;
        let name = if self.name.trim().is_empty() {
            template.name.clone()
        } else {
            self.name.clone()
        };
        if studio.room(&name).is_some() || studio.studio_graph.client_by_name(&name).is_some() {
            return Err(CommandError::InvalidState(format!(
                "a client named '{}' already exists",
                name
            )));
        }

        let room = Room::create(&name, &template, &mut studio.studio_graph)?;
        let client_id = room.info(&studio.studio_graph).client_id;
        studio.rooms.push(room);
        info!(room = %name, template = %template.name, "room created");
        session.emit(Event::RoomAppeared { name, client_id });
        Ok(CommandState::Done)
    }
}

pub struct DeleteRoom {
    name: String,
}

impl DeleteRoom {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Command<Session> for DeleteRoom {
    fn name(&self) -> &'static str {
        "delete_room"
    }

    fn run(&mut self, session: &mut Session) -> Result<CommandState, CommandError> {
        let studio = session.studio_mut()?;
        let idx = studio
            .rooms
            .iter()
            .position(|r| r.name == self.name)
            .ok_or_else(|| CommandError::NotFound(format!("room '{}'", self.name)))?;
        let room = studio.rooms.remove(idx);
        room.remove(&mut studio.studio_graph)?;
        session.emit(Event::RoomDisappeared {
            name: self.name.clone(),
        });
        Ok(CommandState::Done)
    }
}
