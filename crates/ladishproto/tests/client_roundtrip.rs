//! LadishClient against a scripted in-test server.

use ladishproto::{Event, Frame, LadishClient, Reply, Request};
use pretty_assertions::assert_eq;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

async fn write_frame(stream: &mut tokio::net::unix::OwnedWriteHalf, frame: Frame) {
    stream.write_all(&frame.encode().unwrap()).await.unwrap();
}

#[tokio::test]
async fn test_request_skips_interleaved_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ladish.sock");
    let listener = UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        let line = lines.next_line().await.unwrap().unwrap();
        let Frame::Request { id, request } = Frame::decode(&line).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(request, Request::Ping);

        write_frame(&mut write, Frame::Event { event: Event::StudioStarted }).await;
        write_frame(&mut write, Frame::Reply { id, reply: Reply::Pong }).await;
    });

    let mut client = LadishClient::connect(&path).await.unwrap();
    let reply = client.request(Request::Ping).await.unwrap();
    assert_eq!(reply, Reply::Pong);

    server.await.unwrap();
}

#[tokio::test]
async fn test_subscribe_yields_events_until_close() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ladish.sock");
    let listener = UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        let line = lines.next_line().await.unwrap().unwrap();
        let Frame::Request { id, request } = Frame::decode(&line).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(request, Request::Subscribe);
        write_frame(&mut write, Frame::Reply { id, reply: Reply::Subscribed }).await;
        write_frame(
            &mut write,
            Frame::Event {
                event: Event::StudioAppeared {
                    name: "evening".to_string(),
                },
            },
        )
        .await;
        write_frame(&mut write, Frame::Event { event: Event::StudioStopped }).await;
    });

    let client = LadishClient::connect(&path).await.unwrap();
    let mut events = client.subscribe().await.unwrap();

    assert_eq!(
        events.next().await.unwrap(),
        Some(Event::StudioAppeared {
            name: "evening".to_string()
        })
    );
    assert_eq!(events.next().await.unwrap(), Some(Event::StudioStopped));

    server.await.unwrap();
    assert_eq!(events.next().await.unwrap(), None);
}

#[tokio::test]
async fn test_connect_to_missing_socket_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = LadishClient::connect(dir.path().join("absent.sock"))
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("absent.sock"));
}
