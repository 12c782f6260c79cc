//! ladishd - the session daemon.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ladishconf::LadishConfig;
use ladishd::jack::{JackBackend, JackEvent, LoopbackBackend};
use ladishd::recent::RecentStore;
use ladishd::{telemetry, Daemon, DaemonHandle, Loader, Server, Session, SessionConfig, StudioStore};
use ladishproto::{Reply, Request};

/// Session manager daemon for JACK
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file to use instead of ./ladish.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Socket path, overriding the config
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    show_config: bool,
}

fn make_backend(
    config: &LadishConfig,
    events: mpsc::UnboundedSender<JackEvent>,
) -> Result<Box<dyn JackBackend>> {
    match config.bootstrap.jack.backend.as_str() {
        "loopback" => Ok(Box::new(LoopbackBackend::new(events))),
        #[cfg(feature = "jack")]
        "jack" => Ok(Box::new(ladishd::jack_client::JackClientBackend::new(
            config.bootstrap.jack.client_name.clone(),
            events,
        ))),
        #[cfg(not(feature = "jack"))]
        "jack" => bail!("this build has no JACK support; rebuild with --features jack"),
        other => bail!("unknown JACK backend '{}'", other),
    }
}

/// First signal stops the studio and exits cleanly. A second one cancels
/// the wait for apps (they get killed), a third exits now.
async fn watch_signals(daemon: DaemonHandle, shutdown: CancellationToken) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let mut received = 0;
    loop {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
            _ = shutdown.cancelled() => return Ok(()),
        }
        received += 1;
        let request = match received {
            1 => Request::Exit,
            2 => {
                warn!("second signal, no longer waiting for apps to stop");
                Request::CancelCommands
            }
            _ => {
                warn!("third signal, exiting without waiting for the studio");
                shutdown.cancel();
                return Ok(());
            }
        };
        if let Reply::Error { message, .. } = daemon.request(request).await {
            warn!("clean exit failed: {}", message);
            shutdown.cancel();
            return Ok(());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = LadishConfig::load_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(socket) = cli.socket {
        config.infra.paths.socket_path = socket;
    }
    if cli.show_config {
        print!("{}", config.to_toml());
        return Ok(());
    }

    telemetry::init(&config.infra.telemetry.log_level);

    let paths = &config.infra.paths;
    std::fs::create_dir_all(&paths.state_dir)
        .with_context(|| format!("Failed to create state directory {}", paths.state_dir.display()))?;
    info!("Using state directory: {}", paths.state_dir.display());

    let (jack_tx, jack_rx) = mpsc::unbounded_channel();
    let (exit_tx, exit_rx) = mpsc::unbounded_channel();
    let backend = make_backend(&config, jack_tx)?;
    info!(backend = %config.bootstrap.jack.backend, "JACK backend ready");

    let loader = Arc::new(Loader::new(config.bootstrap.supervisor.terminal.clone(), exit_tx));
    let session_config = SessionConfig {
        stop_timeout: Duration::from_millis(config.bootstrap.supervisor.stop_timeout_ms),
        jack_params: config.bootstrap.jack.params.clone(),
        ..SessionConfig::default()
    };
    let (events, _) = broadcast::channel(1024);
    let session = Session::new(
        session_config,
        events,
        backend,
        loader,
        StudioStore::new(paths.studios_dir()),
        RecentStore::open(paths.recent_studios_file(), config.bootstrap.recent.max_items),
    );

    let shutdown = CancellationToken::new();
    let (daemon, handle) = Daemon::new(session, shutdown.clone());
    let server = Server::bind(&paths.socket_path, handle.clone())?;
    let server_task = tokio::spawn(server.run(shutdown.clone()));
    let signal_task = tokio::spawn(watch_signals(handle, shutdown.clone()));

    daemon.run(jack_rx, exit_rx).await;
    shutdown.cancel();

    match server_task.await {
        Ok(result) => result?,
        Err(e) => warn!("server task failed: {}", e),
    }
    if let Ok(Err(e)) = signal_task.await {
        warn!("signal handling failed: {}", e);
    }
    info!("ladishd stopped");
    Ok(())
}
