//! The daemon behind its socket, driven through `LadishClient`.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use ladishd::jack::LoopbackBackend;
use ladishd::recent::RecentStore;
use ladishd::{Daemon, Loader, Server, Session, SessionConfig, StudioStore};
use ladishproto::{AppLevel, AppState, ErrorKind, Event, GraphKind, LadishClient, Reply, Request};

async fn wait_until<F>(client: &mut LadishClient, request: Request, mut done: F)
where
    F: FnMut(&Reply) -> bool,
{
    for _ in 0..100 {
        let reply = client.request(request.clone()).await.unwrap();
        if done(&reply) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition never met for {:?}", request);
}

#[tokio::test]
async fn test_studio_lifecycle_over_socket() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("run/ladish.sock");

    let (jack_tx, jack_rx) = mpsc::unbounded_channel();
    let (exit_tx, exit_rx) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(1024);
    let session = Session::new(
        SessionConfig {
            stop_timeout: Duration::from_secs(5),
            working_dir: dir.path().to_path_buf(),
            ..SessionConfig::default()
        },
        events,
        Box::new(LoopbackBackend::new(jack_tx)),
        Arc::new(Loader::new("xterm", exit_tx)),
        StudioStore::new(dir.path().join("studios")),
        RecentStore::open(dir.path().join("recent_studios"), 10),
    );

    let shutdown = CancellationToken::new();
    let (daemon, handle) = Daemon::new(session, shutdown.clone());
    let server = Server::bind(&socket, handle).unwrap();
    let server_task = tokio::spawn(server.run(shutdown.clone()));
    let daemon_task = tokio::spawn(daemon.run(jack_rx, exit_rx));

    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&socket).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    let mut events = LadishClient::connect(&socket)
        .await
        .unwrap()
        .subscribe()
        .await
        .unwrap();
    let mut client = LadishClient::connect(&socket).await.unwrap();
    assert_eq!(client.request(Request::Ping).await.unwrap(), Reply::Pong);

    let reply = client
        .request(Request::GetGraph {
            graph: GraphKind::Studio,
            known_version: 0,
        })
        .await
        .unwrap();
    assert!(matches!(reply, Reply::Error { kind: ErrorKind::NoStudio, .. }));

    let reply = client
        .request(Request::NewStudio {
            name: "socket studio".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(reply, Reply::Ok);
    assert_eq!(client.request(Request::StartStudio).await.unwrap(), Reply::Ok);
    wait_until(&mut client, Request::IsStudioStarted, |r| {
        *r == Reply::Bool { value: true }
    })
    .await;

    let reply = client
        .request(Request::RunCustom {
            terminal: false,
            commandline: "sleep 30".to_string(),
            name: "sleeper".to_string(),
            level: AppLevel::Classic,
        })
        .await
        .unwrap();
    assert_eq!(reply, Reply::Ok);
    wait_until(&mut client, Request::GetApps, |r| {
        matches!(r, Reply::Apps { apps, .. } if apps.len() == 1 && apps[0].state == AppState::Started)
    })
    .await;

    assert_eq!(client.request(Request::SaveStudio).await.unwrap(), Reply::Ok);
    match client.request(Request::ListStudios).await.unwrap() {
        Reply::Studios { studios } => {
            let names: Vec<&str> = studios.iter().map(|s| s.name.as_str()).collect();
            assert_eq!(names, vec!["socket studio"]);
        }
        other => panic!("unexpected reply {:?}", other),
    }
    assert_eq!(
        client
            .request(Request::GetRecentStudios { max: 5 })
            .await
            .unwrap(),
        Reply::RecentStudios {
            names: vec!["socket studio".to_string()]
        }
    );

    // Exit stops the app and the studio, then the daemon leaves
    assert_eq!(client.request(Request::Exit).await.unwrap(), Reply::Ok);
    tokio::time::timeout(Duration::from_secs(10), daemon_task)
        .await
        .expect("daemon did not exit")
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
    assert!(!socket.exists());

    let mut seen = Vec::new();
    while let Ok(Ok(Some(event))) =
        tokio::time::timeout(Duration::from_millis(200), events.next()).await
    {
        if event.graph().is_none() {
            seen.push(event);
        }
    }
    assert!(seen.contains(&Event::StudioAppeared {
        name: "socket studio".to_string()
    }));
    assert!(seen.contains(&Event::StudioStarted));
    assert!(seen.contains(&Event::StudioStopped));
}
