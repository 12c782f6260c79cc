//! The daemon actor.
//!
//! One task owns the [`Session`] and the command queue. Requests from socket
//! connections, JACK events, child exits and ticks all arrive on that task,
//! so nothing in the session needs locking. Queued commands are re-run after
//! every message.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ladishproto::{DictTarget, ErrorKind, Event, GraphKind, Reply, Request, RoomTemplateInfo};

use crate::cmd::{self, SessionCommand};
use crate::cqueue::{CommandError, CommandQueue};
use crate::graph::Graph;
use crate::jack::{JackError, JackEvent};
use crate::loader::ChildExit;
use crate::room;
use crate::session::Session;

/// How often waiting commands are re-checked when nothing else happens.
pub const TICK_INTERVAL: Duration = Duration::from_millis(250);

const MAILBOX_DEPTH: usize = 64;

pub enum DaemonMessage {
    Request {
        request: Request,
        reply: oneshot::Sender<Reply>,
    },
}

/// Cheap, cloneable access to the actor.
#[derive(Clone)]
pub struct DaemonHandle {
    tx: mpsc::Sender<DaemonMessage>,
    events: broadcast::Sender<Event>,
}

impl DaemonHandle {
    pub async fn request(&self, request: Request) -> Reply {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(DaemonMessage::Request { request, reply })
            .await
            .is_err()
        {
            return Reply::error(ErrorKind::Failed, "daemon is shutting down");
        }
        rx.await
            .unwrap_or_else(|_| Reply::error(ErrorKind::Failed, "daemon dropped the request"))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}

pub struct Daemon {
    session: Session,
    queue: CommandQueue<Session>,
    rx: mpsc::Receiver<DaemonMessage>,
    shutdown: CancellationToken,
    /// Exit requested: leave once the studio has stopped.
    exiting: bool,
}

impl Daemon {
    pub fn new(session: Session, shutdown: CancellationToken) -> (Self, DaemonHandle) {
        let (tx, rx) = mpsc::channel(MAILBOX_DEPTH);
        let handle = DaemonHandle {
            tx,
            events: session.events.clone(),
        };
        let daemon = Self {
            session,
            queue: CommandQueue::new(),
            rx,
            shutdown,
            exiting: false,
        };
        (daemon, handle)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run until an `Exit` request has been carried out or `shutdown` fires.
    pub async fn run(
        mut self,
        mut jack_events: mpsc::UnboundedReceiver<JackEvent>,
        mut exits: mpsc::UnboundedReceiver<ChildExit>,
    ) {
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("daemon running");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("shutdown requested");
                    break;
                }
                msg = self.rx.recv() => match msg {
                    Some(DaemonMessage::Request { request, reply }) => {
                        let answer = self.handle_request(request);
                        let _ = reply.send(answer);
                    }
                    None => break,
                },
                Some(event) = jack_events.recv() => {
                    self.session.handle_jack_event(event);
                    self.run_queue();
                }
                Some(exit) = exits.recv() => {
                    self.session.child_exit(exit);
                    self.run_queue();
                }
                _ = tick.tick() => self.run_queue(),
            }

            if self.exiting && self.queue.is_empty() {
                info!("studio stopped, leaving");
                self.shutdown.cancel();
                break;
            }
        }
        info!("daemon stopped");
    }

    /// Advance waiting commands.
    pub fn run_queue(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        if let Err(e) = self.queue.run(&mut self.session) {
            let command = self.queue.last_failed().unwrap_or("command");
            self.command_failed(command, &e);
        }
    }

    fn command_failed(&self, command: &str, e: &CommandError) {
        self.session.emit(Event::CommandFailed {
            command: command.to_string(),
            message: e.to_string(),
        });
    }

    /// Cancel queued work. A waiting head is asked to finish early.
    pub fn cancel_commands(&mut self) -> Reply {
        match self.queue.cancel(&mut self.session) {
            Ok(()) => Reply::Ok,
            Err(e) => {
                let command = self.queue.last_failed().unwrap_or("cancel_commands");
                self.command_failed(command, &e);
                Reply::error(e.kind(), e.to_string())
            }
        }
    }

    fn submit(&mut self, request: &str, cmds: Vec<SessionCommand>) -> Reply {
        match self.queue.add_all(cmds, &mut self.session) {
            Ok(()) => Reply::Ok,
            Err(e) => {
                let command = self.queue.last_failed().unwrap_or(request);
                self.command_failed(command, &e);
                Reply::error(e.kind(), e.to_string())
            }
        }
    }

    pub fn handle_request(&mut self, request: Request) -> Reply {
        let name = request.name();
        debug!(request = name, "handling request");
        let reply = match request {
            // Control
            Request::Ping => Reply::Pong,
            Request::ListStudios => match self.session.store.list() {
                Ok(studios) => Reply::Studios { studios },
                Err(e) => CommandError::from(e).into_reply(),
            },
            Request::NewStudio { name: studio } => {
                self.submit(name, cmd::new_studio_sequence(&studio))
            }
            Request::LoadStudio { name: studio } => {
                self.submit(name, cmd::load_studio_sequence(&studio))
            }
            Request::DeleteStudio { name: studio } => {
                self.submit(name, vec![Box::new(cmd::DeleteStudio::new(studio))])
            }
            Request::GetRecentStudios { max } => Reply::RecentStudios {
                names: self.session.recent.get(max),
            },
            Request::IsStudioLoaded => Reply::Bool {
                value: self.session.studio.is_some(),
            },
            Request::Exit => {
                info!("exit requested");
                self.exiting = true;
                self.submit(name, vec![Box::new(cmd::StopStudio::new())])
            }
            Request::CancelCommands => self.cancel_commands(),

            // Studio
            Request::GetStudioName => match self.session.studio() {
                Ok(studio) => Reply::StudioName {
                    name: studio.name.clone(),
                },
                Err(e) => e.into_reply(),
            },
            Request::RenameStudio { name: studio } => {
                self.submit(name, vec![Box::new(cmd::RenameStudio::new(studio))])
            }
            Request::SaveStudio => self.submit(name, vec![Box::new(cmd::SaveStudio)]),
            Request::StartStudio => self.submit(name, vec![Box::new(cmd::StartStudio::new())]),
            Request::StopStudio => self.submit(name, vec![Box::new(cmd::StopStudio::new())]),
            Request::UnloadStudio => self.submit(name, cmd::unload_sequence()),
            Request::IsStudioStarted => Reply::Bool {
                value: self.session.studio.as_ref().is_some_and(|s| s.started),
            },
            Request::IsStudioModified => match self.session.studio() {
                Ok(studio) => Reply::Bool {
                    value: studio.is_modified(),
                },
                Err(e) => e.into_reply(),
            },

            // Rooms
            Request::ListRoomTemplates => match self.session.store.room_templates().list() {
                Ok(templates) => Reply::RoomTemplates { templates },
                Err(e) => CommandError::from(e).into_reply(),
            },
            Request::NewRoomTemplate { name: template, ports } => self
                .session
                .store
                .room_templates()
                .create(&RoomTemplateInfo {
                    name: template,
                    ports,
                })
                .map(|()| Reply::Ok)
                .unwrap_or_else(|e| CommandError::from(e).into_reply()),
            Request::DeleteRoomTemplate { name: template } => self
                .session
                .store
                .room_templates()
                .delete(&template)
                .map(|()| Reply::Ok)
                .unwrap_or_else(|e| CommandError::from(e).into_reply()),
            Request::ListRooms => match self.session.studio() {
                Ok(studio) => Reply::Rooms {
                    rooms: studio
                        .rooms
                        .iter()
                        .map(|r| r.info(&studio.studio_graph))
                        .collect(),
                },
                Err(e) => e.into_reply(),
            },
            Request::NewRoom {
                name: room,
                template,
            } => self.submit(name, vec![Box::new(cmd::NewRoom::new(room, template))]),
            Request::DeleteRoom { name: room } => {
                self.submit(name, vec![Box::new(cmd::DeleteRoom::new(room))])
            }

            // Apps
            Request::GetApps => match self.session.studio() {
                Ok(studio) => {
                    let (version, apps) = studio.supervisor.list();
                    Reply::Apps { version, apps }
                }
                Err(e) => e.into_reply(),
            },
            Request::RunCustom {
                terminal,
                commandline,
                name: app,
                level,
            } => self.submit(
                name,
                vec![Box::new(cmd::NewApp::new(commandline, app, terminal, level))],
            ),
            Request::StartApp { id } => self.change_app(name, id, cmd::TargetState::Started),
            Request::StopApp { id } => self.change_app(name, id, cmd::TargetState::Stopped),
            Request::KillApp { id } => self.change_app(name, id, cmd::TargetState::Kill),
            Request::RemoveApp { id } => self.submit(name, cmd::remove_app_sequence(id)),
            Request::GetAppProperties { id } => self
                .session
                .studio()
                .and_then(|s| s.supervisor.get_app_properties(id).map_err(Into::into))
                .map(|properties| Reply::AppProperties { properties })
                .unwrap_or_else(CommandError::into_reply),
            Request::SetAppProperties {
                id,
                name: app,
                commandline,
                terminal,
                level,
            } => self
                .session
                .studio_mut()
                .and_then(|s| {
                    s.supervisor
                        .set_app_properties(id, &app, &commandline, terminal, level)
                        .map_err(Into::into)
                })
                .map(|()| Reply::Ok)
                .unwrap_or_else(CommandError::into_reply),

            Request::Subscribe => Reply::error(
                ErrorKind::InvalidArgs,
                "subscribe is handled by the connection",
            ),

            patchbay => self.patchbay(patchbay).unwrap_or_else(CommandError::into_reply),
        };

        if let Reply::Error { kind, message } = &reply {
            warn!(request = name, %kind, "{}", message);
        }
        reply
    }

    fn change_app(&mut self, request: &str, id: u64, target: cmd::TargetState) -> Reply {
        self.submit(request, vec![Box::new(cmd::ChangeAppState::new(id, target))])
    }

    // ========================================================================
    // Patchbay
    // ========================================================================

    fn patchbay(&mut self, request: Request) -> Result<Reply, CommandError> {
        match request {
            Request::GetGraph {
                graph,
                known_version,
            } => {
                let snapshot = self.session.studio()?.graph(graph).snapshot(known_version)?;
                Ok(Reply::Graph { snapshot })
            }
            Request::ConnectPortsById {
                graph,
                port1_id,
                port2_id,
            } => {
                let ports = self.ports_by_id(graph, port1_id, port2_id)?;
                self.set_connected(graph, ports, true)
            }
            Request::ConnectPortsByName {
                graph,
                client1,
                port1,
                client2,
                port2,
            } => {
                let ports = self.ports_by_name(graph, (&client1, &port1), (&client2, &port2))?;
                self.set_connected(graph, ports, true)
            }
            Request::DisconnectPortsById {
                graph,
                port1_id,
                port2_id,
            } => {
                let ports = self.ports_by_id(graph, port1_id, port2_id)?;
                self.set_connected(graph, ports, false)
            }
            Request::DisconnectPortsByName {
                graph,
                client1,
                port1,
                client2,
                port2,
            } => {
                let ports = self.ports_by_name(graph, (&client1, &port1), (&client2, &port2))?;
                self.set_connected(graph, ports, false)
            }
            Request::DisconnectPortsByConnectionId {
                graph,
                connection_id,
            } => {
                let ports = self
                    .session
                    .studio()?
                    .graph(graph)
                    .connection_ports(connection_id)
                    .ok_or_else(|| CommandError::NotFound(format!("connection {}", connection_id)))?;
                self.set_connected(graph, ports, false)
            }
            Request::GetClientPid { graph, client_id } => {
                let studio = self.session.studio()?;
                let client = studio
                    .graph(graph)
                    .client_by_id(client_id)
                    .ok_or_else(|| CommandError::NotFound(format!("client {}", client_id)))?;
                // Studio clients borrow the pid of the JACK client they mirror
                let pid = client.pid.or_else(|| {
                    client
                        .jack_id
                        .and_then(|id| studio.jack_graph.client_by_jack_id(id))
                        .and_then(|c| c.pid)
                });
                match pid {
                    Some(pid) => Ok(Reply::ClientPid { pid }),
                    None => Err(CommandError::NotFound(format!(
                        "pid of client '{}'",
                        client.name
                    ))),
                }
            }
            Request::DictSet {
                graph,
                target,
                key,
                value,
            } => {
                dict_target_mut(self.session.studio_mut()?.graph_mut(graph), target)?
                    .set(key, value);
                Ok(Reply::Ok)
            }
            Request::DictGet { graph, target, key } => {
                let g = self.session.studio()?.graph(graph);
                let dict = g
                    .dict_for(target)
                    .ok_or_else(|| CommandError::NotFound(format!("{:?}", target)))?;
                dict.get(&key)
                    .map(|value| Reply::DictValue {
                        value: value.to_string(),
                    })
                    .ok_or_else(|| CommandError::NotFound(format!("key '{}'", key)))
            }
            Request::DictDrop { graph, target, key } => {
                let dict = dict_target_mut(self.session.studio_mut()?.graph_mut(graph), target)?;
                if dict.drop_key(&key) {
                    Ok(Reply::Ok)
                } else {
                    Err(CommandError::NotFound(format!("key '{}'", key)))
                }
            }
            other => Err(CommandError::InvalidState(format!(
                "{} is not a patchbay request",
                other.name()
            ))),
        }
    }

    /// Connect or disconnect two ports. JACK ports go through the server and
    /// come back as events; room link ports are changed in the graph itself.
    fn set_connected(
        &mut self,
        graph: GraphKind,
        (p1, p2): (Uuid, Uuid),
        connected: bool,
    ) -> Result<Reply, CommandError> {
        let session = &mut self.session;
        let g = session
            .studio
            .as_mut()
            .ok_or(CommandError::NoStudio)?
            .graph_mut(graph);

        if room::is_link_port(g, p1) || room::is_link_port(g, p2) {
            if connected {
                g.add_connection(p1, p2, false)?;
            } else {
                let id = g
                    .find_connection(p1, p2)
                    .map(|c| c.id)
                    .ok_or_else(|| CommandError::NotFound(format!("connection {} -> {}", p1, p2)))?;
                g.remove_connection(id)?;
            }
            return Ok(Reply::Ok);
        }

        let (a, b) = (port_jack_id(g, p1)?, port_jack_id(g, p2)?);
        if connected {
            session.backend.connect_ports(a, b)?;
        } else {
            session.backend.disconnect_ports(a, b)?;
        }
        Ok(Reply::Ok)
    }

    fn ports_by_id(
        &self,
        graph: GraphKind,
        port1: u64,
        port2: u64,
    ) -> Result<(Uuid, Uuid), CommandError> {
        let g = self.session.studio()?.graph(graph);
        let uuid = |id: u64| {
            g.port_by_id(id)
                .map(|p| p.uuid)
                .ok_or_else(|| CommandError::NotFound(format!("port {}", id)))
        };
        Ok((uuid(port1)?, uuid(port2)?))
    }

    fn ports_by_name(
        &self,
        graph: GraphKind,
        first: (&str, &str),
        second: (&str, &str),
    ) -> Result<(Uuid, Uuid), CommandError> {
        let g = self.session.studio()?.graph(graph);
        let uuid = |(client, port): (&str, &str)| {
            g.client_by_name(client)
                .and_then(|c| g.port_by_name(c.uuid, port))
                .map(|p| p.uuid)
                .ok_or_else(|| CommandError::NotFound(format!("port '{}:{}'", client, port)))
        };
        Ok((uuid(first)?, uuid(second)?))
    }
}

/// JACK id of a visible port. Hidden ports have nothing to connect to.
fn port_jack_id(graph: &Graph, port: Uuid) -> Result<u64, CommandError> {
    let port = graph
        .port(port)
        .ok_or_else(|| CommandError::NotFound(format!("port {}", port)))?;
    match port.jack_id {
        Some(id) if !port.hidden => Ok(id),
        _ => Err(JackError::UnknownPort(port.id).into()),
    }
}

fn dict_target_mut(
    graph: &mut Graph,
    target: DictTarget,
) -> Result<&mut crate::dict::Dict, CommandError> {
    graph
        .dict_for_mut(target)
        .ok_or_else(|| CommandError::NotFound(format!("{:?}", target)))
}
