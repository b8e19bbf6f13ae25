//! End-to-end pipeline over loopback: sampled poses are broadcast by the
//! server, recorded to CSV by a client, and read back.

use posecast::dispatch::{DispatchQueue, EventBus, EventKind, NetEvent};
use posecast::handler::{ProtocolHandler, SceneHost};
use posecast::sampler::PoseSampler;
use posecast::{Config, Message, Pose, Posecast, Recording, ServerAddress, Vector3};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Host {
    scenes: Vec<i32>,
    y_frames: Vec<bool>,
    poses_applied: usize,
}

impl SceneHost for Host {
    fn change_scene(&mut self, scene_index: i32) -> anyhow::Result<()> {
        self.scenes.push(scene_index);
        Ok(())
    }

    fn show_y_frame(&mut self, visible: bool) -> anyhow::Result<()> {
        self.y_frames.push(visible);
        Ok(())
    }

    fn apply_poses(&mut self, _poses: &[Pose]) -> anyhow::Result<()> {
        self.poses_applied += 1;
        Ok(())
    }
}

fn loopback_config(data_dir: &std::path::Path) -> Config {
    Config {
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        retry_backoff_ms: 100,
        data_dir: data_dir.to_path_buf(),
        ..Config::default()
    }
}

fn tracked_poses() -> Vec<Pose> {
    vec![
        Pose::new(Vector3::new(0.0, 1.7, 0.0), Vector3::new(0.0, 90.0, 0.0)),
        Pose::new(Vector3::new(-0.3, 1.2, 0.2), Vector3::new(10.0, 0.0, 0.0)),
        Pose::new(Vector3::new(0.3, 1.2, 0.2), Vector3::new(0.0, 0.0, 10.0)),
    ]
}

/// Tick `handler` until `done` holds or the timeout elapses
async fn tick_until<F>(handler: &mut ProtocolHandler, inbox: &DispatchQueue, bus: &mut EventBus, host: &mut Host, mut done: F) -> bool
where
    F: FnMut(&Host) -> bool,
{
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        handler.tick(inbox, bus, host);
        if done(host) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn streamed_poses_are_recorded_and_scene_changes_are_relayed() {
    let _ = tracing_subscriber::fmt::try_init();
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(loopback_config(dir.path()));

    // Server side
    let server_inbox = DispatchQueue::new();
    let server = Posecast::serve(config.clone(), server_inbox.clone()).await.unwrap();
    let server_writer = Arc::new(Posecast::recorder(&config));
    let mut server_handler = ProtocolHandler::new(server_writer).with_relay(server.handle());
    let mut server_host = Host::default();
    let mut server_bus = EventBus::new();

    // Client side
    let client_inbox = DispatchQueue::new();
    let client = Posecast::client(config.clone(), client_inbox.clone()).unwrap();
    let writer = Arc::new(Posecast::recorder(&config));
    let mut handler = ProtocolHandler::new(writer.clone());
    let mut host = Host::default();
    let mut bus = EventBus::new();

    let connects = Arc::new(Mutex::new(Vec::new()));
    let seen = connects.clone();
    bus.subscribe(EventKind::ConnectResult, move |event| {
        if let NetEvent::ConnectResult { success } = event {
            seen.lock().unwrap().push(*success);
        }
    });

    client.connect(ServerAddress::from(server.local_addr()));
    assert!(tick_until(&mut handler, &client_inbox, &mut bus, &mut host, |host| !host.y_frames.is_empty()).await);
    assert_eq!(host.scenes, vec![0]);
    assert_eq!(host.y_frames, vec![false]);
    assert_eq!(*connects.lock().unwrap(), vec![true]);

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !client.is_validated() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(client.is_validated());

    let path = writer.start_recording_for("S01", "T01").unwrap();

    let mut sampler = PoseSampler::from_config(&config);
    for _ in 0..250 {
        let row = sampler.sample(&tracked_poses);
        assert_eq!(server.handle().broadcast(&Message::TelemetryEntry(row)), 1);
    }
    assert!(tick_until(&mut handler, &client_inbox, &mut bus, &mut host, |host| host.poses_applied == 250).await);

    let stats = writer.stats().unwrap();
    assert_eq!(stats.flushes, 2);
    assert_eq!(stats.pending_rows, 50);

    // A client scene request is applied on the server and relayed back
    client.send(&Message::ChangeScene(4)).unwrap();
    assert!(
        tick_until(&mut server_handler, &server_inbox, &mut server_bus, &mut server_host, |host| host.scenes == vec![4])
            .await
    );
    assert_eq!(server.handle().scene_state().scene_index, 4);
    assert!(tick_until(&mut handler, &client_inbox, &mut bus, &mut host, |host| host.scenes == vec![0, 4]).await);

    assert_eq!(writer.stop_recording().unwrap(), Some(path.clone()));
    assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 251);

    let recording = Recording::open(&path).unwrap();
    assert_eq!(recording.object_names, config.object_names);
    assert_eq!(recording.rows.len(), 250);
    assert_eq!(recording.rows[0].timestamp, 0.0);
    assert_eq!(recording.rows[1].timestamp, 0.02);
    assert_eq!(recording.rows[0].poses, tracked_poses());
    assert!((recording.duration() - 249.0 * 0.02).abs() < 1e-4);

    client.disconnect();
    server.shutdown();
}

#[tokio::test]
async fn server_config_file_drives_the_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("posecast.yaml");
    std::fs::write(
        &config_path,
        "bind_address: 127.0.0.1\nport: 0\nobject_names: [Head]\nflush_threshold: 10\nprotocol_version: '2.0.0'\n",
    )
    .unwrap();

    let config = Arc::new(Config::load(&config_path).unwrap());
    let server = Posecast::serve(config.clone(), DispatchQueue::new()).await.unwrap();
    assert_ne!(server.local_addr().port(), 0);

    // A client built with the default version sees the mismatch
    let inbox = DispatchQueue::new();
    let client = Posecast::client(Arc::new(loopback_config(dir.path())), inbox.clone()).unwrap();
    client.connect(ServerAddress::from(server.local_addr()));

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    let mut events = Vec::new();
    while tokio::time::Instant::now() < deadline
        && !events.iter().any(|e| matches!(e, NetEvent::VersionMismatch { .. }))
    {
        events.extend(inbox.drain_all());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(events.contains(&NetEvent::VersionMismatch { expected: "1.0.0".into(), found: "2.0.0".into() }));
    assert!(!client.is_validated());
}
