//! A studio saved with live connections gets them back when JACK reports
//! the same clients again.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tokio::sync::{broadcast, mpsc};

use ladishd::graph::{HARDWARE_CAPTURE_NAME, HARDWARE_PLAYBACK_NAME};
use ladishd::jack::{JackBackend, JackEvent, LoopbackBackend};
use ladishd::{Loader, Studio, StudioStore};

fn drain(studio: &mut Studio, rx: &mut mpsc::UnboundedReceiver<JackEvent>, backend: &mut LoopbackBackend) {
    // Restored connections are requested from inside the handler, so keep
    // going until the backend is quiet
    while let Ok(event) = rx.try_recv() {
        studio.handle_jack_event(&event, backend);
    }
}

#[test]
fn test_saved_connections_return_with_their_ports() {
    let dir = tempfile::tempdir().unwrap();
    let store = StudioStore::new(dir.path().join("studios"));
    let (exits, _) = mpsc::unbounded_channel();
    let processes = Arc::new(Loader::new("xterm", exits));
    let (events, _) = broadcast::channel(1024);

    // First run: a synth wired to the second playback port
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut backend = LoopbackBackend::new(tx).with_system_ports(2, 2);
    let jack = backend.handle();
    let mut studio = Studio::new("restore me", processes.clone(), events.clone());
    backend.start_server().unwrap();
    let synth = jack.add_client("synth", None).unwrap();
    let out = jack.add_port(synth, "out_l", false, false, false).unwrap();
    let playback = jack.port_by_name("system", "playback_2").unwrap();
    jack.connect(out, playback).unwrap();
    drain(&mut studio, &mut rx, &mut backend);

    let before = studio.studio_graph.snapshot(0).unwrap();
    assert_eq!(before.connections.len(), 1);
    studio
        .studio_graph
        .client_dict_mut(studio.studio_graph.client_by_name("synth").unwrap().uuid)
        .unwrap()
        .set("canvas/x", "120");

    let path = store.save(&studio.to_document(), None).unwrap();
    assert_eq!(path, store.path_for("restore me"));
    backend.stop_server().unwrap();
    drain(&mut studio, &mut rx, &mut backend);

    // Second run: fresh server, fresh JACK ids
    let doc = store.load("restore me").unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut backend = LoopbackBackend::new(tx).with_system_ports(2, 2);
    let jack = backend.handle();
    let mut restored = Studio::from_document(doc, path, processes, events).unwrap();
    assert!(restored.studio_graph.snapshot(0).unwrap().clients.is_empty());

    backend.start_server().unwrap();
    let synth = jack.add_client("synth", None).unwrap();
    jack.add_port(synth, "out_l", false, false, false).unwrap();
    drain(&mut restored, &mut rx, &mut backend);

    let after = restored.studio_graph.snapshot(0).unwrap();
    let names: Vec<&str> = after.clients.iter().map(|c| c.name.as_str()).collect();
    assert!(names.contains(&HARDWARE_CAPTURE_NAME));
    assert!(names.contains(&HARDWARE_PLAYBACK_NAME));
    assert!(names.contains(&"synth"));
    assert_eq!(after.connections.len(), 1);
    assert_eq!(after.connections[0].port1_name, "out_l");
    assert_eq!(after.connections[0].port2_name, "playback_2");

    // Same identities as before the restart
    let synth_before = before.clients.iter().find(|c| c.name == "synth").unwrap();
    let synth_after = after.clients.iter().find(|c| c.name == "synth").unwrap();
    assert_eq!(synth_before.id, synth_after.id);
    let client = restored.studio_graph.client_by_name("synth").unwrap();
    assert_eq!(client.dict.get("canvas/x"), Some("120"));
    restored.studio_graph.check_integrity().unwrap();
    restored.jack_graph.check_integrity().unwrap();
}
