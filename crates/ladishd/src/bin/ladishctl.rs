//! ladishctl - command line front-end for ladishd.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use ladishconf::LadishConfig;
use ladishproto::{
    AppLevel, DictTarget, GraphKind, GraphSnapshot, LadishClient, PortFlags, PortType, Reply,
    Request, RoomPort,
};

#[derive(Parser)]
#[command(name = "ladishctl")]
#[command(about = "Control the ladish session daemon")]
#[command(version)]
struct Cli {
    /// Daemon socket, overriding the config
    #[arg(short, long, global = true)]
    socket: Option<PathBuf>,

    /// Config file to read the socket path from
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum GraphArg {
    Jack,
    Studio,
}

impl From<GraphArg> for GraphKind {
    fn from(arg: GraphArg) -> Self {
        match arg {
            GraphArg::Jack => GraphKind::Jack,
            GraphArg::Studio => GraphKind::Studio,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the daemon answers
    Ping,
    /// List stored studios
    List,
    /// Create a new studio, replacing the loaded one
    New {
        /// Studio name; empty picks one
        #[arg(default_value = "")]
        name: String,
    },
    /// Load and start a stored studio
    Load { name: String },
    /// Delete a stored studio
    Delete { name: String },
    /// Recently used studios
    Recent {
        #[arg(short, long, default_value = "10")]
        max: usize,
    },
    /// Studio status
    Status,
    /// Rename the loaded studio
    Rename { name: String },
    /// Save the loaded studio
    Save,
    /// Start the loaded studio
    Start,
    /// Stop the loaded studio
    Stop,
    /// Stop and unload the loaded studio
    Unload,
    /// Stop the studio and shut the daemon down
    Exit,
    /// Cancel queued commands; a waiting studio stop kills its apps
    Cancel,

    /// List room templates
    RoomTemplates,
    /// Create a room template
    NewRoomTemplate {
        name: String,
        /// Link ports as seen from inside the room: NAME:in|out[:midi]
        #[arg(value_parser = parse_room_port)]
        ports: Vec<RoomPort>,
    },
    /// Delete a room template
    DeleteRoomTemplate { name: String },
    /// List rooms of the loaded studio
    Rooms,
    /// Create a room from a template
    NewRoom {
        template: String,
        /// Room name; empty uses the template name
        #[arg(default_value = "")]
        name: String,
    },
    /// Delete a room
    DeleteRoom { name: String },

    /// Print a graph
    Graph {
        #[arg(value_enum, default_value = "studio")]
        graph: GraphArg,
    },
    /// Connect two ports by client and port name
    Connect {
        client1: String,
        port1: String,
        client2: String,
        port2: String,
        #[arg(short, long, value_enum, default_value = "studio")]
        graph: GraphArg,
    },
    /// Disconnect two ports by client and port name
    Disconnect {
        client1: String,
        port1: String,
        client2: String,
        port2: String,
        #[arg(short, long, value_enum, default_value = "studio")]
        graph: GraphArg,
    },
    /// Pid of a graph client
    Pid {
        client_id: u64,
        #[arg(short, long, value_enum, default_value = "studio")]
        graph: GraphArg,
    },
    /// Read and write graph dictionaries
    Dict {
        #[command(subcommand)]
        action: DictAction,
    },

    /// List apps
    Apps,
    /// Add an app and start it if the studio runs
    Run {
        /// Run inside the configured terminal
        #[arg(short, long)]
        terminal: bool,
        #[arg(short, long, default_value = "")]
        name: String,
        /// 0, 1, lash or jacksession
        #[arg(short, long, default_value = "0")]
        level: AppLevel,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        commandline: Vec<String>,
    },
    /// Start an app
    StartApp { id: u64 },
    /// Stop an app
    StopApp { id: u64 },
    /// Kill an app
    KillApp { id: u64 },
    /// Stop and remove an app
    RemoveApp { id: u64 },
    /// Show or change app properties
    App {
        id: u64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        commandline: Option<String>,
        #[arg(long)]
        terminal: Option<bool>,
        #[arg(long)]
        level: Option<AppLevel>,
    },

    /// Print daemon events as they happen
    Monitor,
}

#[derive(Subcommand)]
enum DictAction {
    Set {
        key: String,
        value: String,
        #[command(flatten)]
        target: DictArgs,
    },
    Get {
        key: String,
        #[command(flatten)]
        target: DictArgs,
    },
    Drop {
        key: String,
        #[command(flatten)]
        target: DictArgs,
    },
}

#[derive(clap::Args)]
struct DictArgs {
    #[arg(short, long, value_enum, default_value = "studio")]
    graph: GraphArg,
    #[arg(long, conflicts_with_all = ["port", "connection"])]
    client: Option<u64>,
    #[arg(long, conflicts_with = "connection")]
    port: Option<u64>,
    #[arg(long)]
    connection: Option<u64>,
}

impl DictArgs {
    fn target(&self) -> (GraphKind, DictTarget) {
        let target = match (self.client, self.port, self.connection) {
            (Some(id), _, _) => DictTarget::Client { id },
            (_, Some(id), _) => DictTarget::Port { id },
            (_, _, Some(id)) => DictTarget::Connection { id },
            _ => DictTarget::Graph,
        };
        (self.graph.into(), target)
    }
}

fn parse_room_port(arg: &str) -> Result<RoomPort, String> {
    let mut parts = arg.split(':');
    let name = parts.next().filter(|n| !n.is_empty()).ok_or("missing port name")?;
    let flags = match parts.next() {
        Some("in") => PortFlags::INPUT,
        Some("out") => PortFlags::OUTPUT,
        _ => return Err(format!("'{}': direction must be in or out", arg)),
    };
    let port_type = match parts.next() {
        None | Some("audio") => PortType::Audio,
        Some("midi") => PortType::Midi,
        Some(other) => return Err(format!("unknown port type '{}'", other)),
    };
    Ok(RoomPort {
        name: name.to_string(),
        port_type,
        flags,
    })
}

/// Send one request and fail on an error reply.
async fn call(client: &mut LadishClient, request: Request) -> Result<Reply> {
    match client.request(request).await? {
        Reply::Error { kind, message } => bail!("{}: {}", kind, message),
        reply => Ok(reply),
    }
}

fn print_graph(snapshot: &GraphSnapshot) {
    println!("version {}", snapshot.version);
    for client in &snapshot.clients {
        println!("[{}] {}", client.id, client.name);
        for port in &client.ports {
            println!(
                "    [{}] {} ({:?}, {})",
                port.id, port.name, port.port_type, port.flags
            );
        }
    }
    for conn in &snapshot.connections {
        println!(
            "[{}] {}:{} -> {}:{}",
            conn.id, conn.client1_name, conn.port1_name, conn.client2_name, conn.port2_name
        );
    }
}

fn print_reply(reply: &Reply) -> Result<()> {
    match reply {
        Reply::Ok => {}
        Reply::Pong => println!("pong"),
        Reply::Studios { studios } => {
            for studio in studios {
                println!("{}\t{}", studio.modified.format("%Y-%m-%d %H:%M:%S"), studio.name);
            }
        }
        Reply::RecentStudios { names } => {
            for name in names {
                println!("{}", name);
            }
        }
        Reply::StudioName { name } => println!("{}", name),
        Reply::Bool { value } => println!("{}", value),
        Reply::Graph { snapshot } => print_graph(snapshot),
        Reply::ClientPid { pid } => println!("{}", pid),
        Reply::DictValue { value } => println!("{}", value),
        Reply::RoomTemplates { templates } => {
            for template in templates {
                let ports: Vec<String> = template
                    .ports
                    .iter()
                    .map(|p| format!("{} ({:?}, {})", p.name, p.port_type, p.flags))
                    .collect();
                println!("{}\t{}", template.name, ports.join(", "));
            }
        }
        Reply::Rooms { rooms } => {
            for room in rooms {
                println!("[{}] {}\t{}", room.client_id, room.name, room.template);
            }
        }
        Reply::Apps { apps, .. } => {
            for app in apps {
                println!(
                    "[{}] {}\t{:?}\tlevel {}{}",
                    app.id,
                    app.name,
                    app.state,
                    app.level,
                    if app.terminal { "\tterminal" } else { "" }
                );
            }
        }
        other => println!("{}", serde_json::to_string_pretty(other)?),
    }
    Ok(())
}

async fn status(client: &mut LadishClient) -> Result<()> {
    let Reply::Bool { value: loaded } = call(client, Request::IsStudioLoaded).await? else {
        bail!("unexpected reply");
    };
    if !loaded {
        println!("no studio loaded");
        return Ok(());
    }
    let Reply::StudioName { name } = call(client, Request::GetStudioName).await? else {
        bail!("unexpected reply");
    };
    let Reply::Bool { value: started } = call(client, Request::IsStudioStarted).await? else {
        bail!("unexpected reply");
    };
    let Reply::Bool { value: modified } = call(client, Request::IsStudioModified).await? else {
        bail!("unexpected reply");
    };
    println!(
        "{} ({}{})",
        name,
        if started { "started" } else { "stopped" },
        if modified { ", modified" } else { "" }
    );
    Ok(())
}

async fn app_properties(
    client: &mut LadishClient,
    id: u64,
    name: Option<String>,
    commandline: Option<String>,
    terminal: Option<bool>,
    level: Option<AppLevel>,
) -> Result<()> {
    let Reply::AppProperties { properties } =
        call(client, Request::GetAppProperties { id }).await?
    else {
        bail!("unexpected reply");
    };
    if name.is_none() && commandline.is_none() && terminal.is_none() && level.is_none() {
        println!("name:        {}", properties.name);
        println!("commandline: {}", properties.commandline);
        println!("terminal:    {}", properties.terminal);
        println!("level:       {}", properties.level);
        return Ok(());
    }
    call(
        client,
        Request::SetAppProperties {
            id,
            name: name.unwrap_or(properties.name),
            commandline: commandline.unwrap_or(properties.commandline),
            terminal: terminal.unwrap_or(properties.terminal),
            level: level.unwrap_or(properties.level),
        },
    )
    .await?;
    Ok(())
}

async fn monitor(client: LadishClient) -> Result<()> {
    let mut events = client.subscribe().await?;
    while let Some(event) = events.next().await? {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let socket = match cli.socket {
        Some(path) => path,
        None => {
            LadishConfig::load_from(cli.config.as_deref())
                .context("Failed to load configuration")?
                .infra
                .paths
                .socket_path
        }
    };
    let mut client = LadishClient::connect(&socket)
        .await
        .with_context(|| format!("Is ladishd running? (socket {})", socket.display()))?;

    let request = match cli.command {
        Commands::Monitor => return monitor(client).await,
        Commands::Status => return status(&mut client).await,
        Commands::App {
            id,
            name,
            commandline,
            terminal,
            level,
        } => return app_properties(&mut client, id, name, commandline, terminal, level).await,

        Commands::Ping => Request::Ping,
        Commands::List => Request::ListStudios,
        Commands::New { name } => Request::NewStudio { name },
        Commands::Load { name } => Request::LoadStudio { name },
        Commands::Delete { name } => Request::DeleteStudio { name },
        Commands::Recent { max } => Request::GetRecentStudios { max },
        Commands::Rename { name } => Request::RenameStudio { name },
        Commands::Save => Request::SaveStudio,
        Commands::Start => Request::StartStudio,
        Commands::Stop => Request::StopStudio,
        Commands::Unload => Request::UnloadStudio,
        Commands::Exit => Request::Exit,
        Commands::Cancel => Request::CancelCommands,
        Commands::RoomTemplates => Request::ListRoomTemplates,
        Commands::NewRoomTemplate { name, ports } => Request::NewRoomTemplate { name, ports },
        Commands::DeleteRoomTemplate { name } => Request::DeleteRoomTemplate { name },
        Commands::Rooms => Request::ListRooms,
        Commands::NewRoom { template, name } => Request::NewRoom { name, template },
        Commands::DeleteRoom { name } => Request::DeleteRoom { name },
        Commands::Graph { graph } => Request::GetGraph {
            graph: graph.into(),
            known_version: 0,
        },
        Commands::Connect {
            client1,
            port1,
            client2,
            port2,
            graph,
        } => Request::ConnectPortsByName {
            graph: graph.into(),
            client1,
            port1,
            client2,
            port2,
        },
        Commands::Disconnect {
            client1,
            port1,
            client2,
            port2,
            graph,
        } => Request::DisconnectPortsByName {
            graph: graph.into(),
            client1,
            port1,
            client2,
            port2,
        },
        Commands::Pid { client_id, graph } => Request::GetClientPid {
            graph: graph.into(),
            client_id,
        },
        Commands::Dict { action } => match action {
            DictAction::Set { key, value, target } => {
                let (graph, target) = target.target();
                Request::DictSet {
                    graph,
                    target,
                    key,
                    value,
                }
            }
            DictAction::Get { key, target } => {
                let (graph, target) = target.target();
                Request::DictGet { graph, target, key }
            }
            DictAction::Drop { key, target } => {
                let (graph, target) = target.target();
                Request::DictDrop { graph, target, key }
            }
        },
        Commands::Apps => Request::GetApps,
        Commands::Run {
            terminal,
            name,
            level,
            commandline,
        } => Request::RunCustom {
            terminal,
            commandline: commandline.join(" "),
            name,
            level,
        },
        Commands::StartApp { id } => Request::StartApp { id },
        Commands::StopApp { id } => Request::StopApp { id },
        Commands::KillApp { id } => Request::KillApp { id },
        Commands::RemoveApp { id } => Request::RemoveApp { id },
    };

    let reply = call(&mut client, request).await?;
    print_reply(&reply)
}
