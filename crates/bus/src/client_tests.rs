// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client tests: offline queueing, reconnect, register-on-open, and the
//! peer-heartbeat watchdog.

use super::*;
use dredge_core::SystemClock;
use dredge_wire::Heartbeat;
use tokio::net::UnixListener;

fn test_config(socket_path: PathBuf) -> BusClientConfig {
    let identity =
        Register { id: "crawler-t".to_string(), pid: 42, role: "crawler".to_string() };
    let mut config = BusClientConfig::new(socket_path, identity);
    config.reconnect_base = Duration::from_millis(20);
    config.reconnect_max = Duration::from_millis(100);
    config.heartbeat_timeout = Duration::from_secs(30);
    config
}

async fn read_envelopes(stream: &mut tokio::net::UnixStream, count: usize) -> Vec<Envelope> {
    let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_LEN);
    let mut buf = [0u8; 4096];
    let mut out = Vec::new();
    while out.len() < count {
        if let Some(frame) = decoder.next_frame() {
            out.push(Envelope::from_value(frame.unwrap()).unwrap());
            continue;
        }
        let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .expect("timed out reading from client")
            .unwrap();
        assert!(n > 0, "client closed early");
        decoder.push(&buf[..n]);
    }
    out
}

#[tokio::test]
async fn connects_registers_and_drains_offline_queue() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("api.sock");
    let cancel = CancellationToken::new();

    // Client starts before the socket exists.
    let (client, mut events) =
        BusClient::spawn(test_config(socket.clone()), SystemClock, cancel.clone());
    client.send(
        Destination::backend(),
        Payload::Heartbeat(Heartbeat { timestamp: 1, active_jobs: None, system_status: None }),
    );
    client.send(Destination::backend(), Payload::GetStatus);
    assert_eq!(client.queued_len(), 2);
    assert!(!client.is_connected());

    // Bring the server up; the client's retry loop should find it.
    let listener = UnixListener::bind(&socket).unwrap();
    let (mut server_side, _) = tokio::time::timeout(Duration::from_secs(2), listener.accept())
        .await
        .expect("client never connected")
        .unwrap();

    let envelopes = read_envelopes(&mut server_side, 3).await;
    // register first, then the queued envelopes in order.
    assert!(matches!(envelopes[0].payload, Payload::Register(_)));
    assert!(matches!(envelopes[1].payload, Payload::Heartbeat(_)));
    assert_eq!(envelopes[2].payload, Payload::GetStatus);

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv()).await.unwrap();
    assert!(matches!(event, Some(ClientEvent::Connected)));
    assert!(client.is_connected());

    cancel.cancel();
}

#[tokio::test]
async fn reconnects_after_server_drops_the_connection() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("api.sock");
    let cancel = CancellationToken::new();
    let listener = UnixListener::bind(&socket).unwrap();

    let (_client, mut events) =
        BusClient::spawn(test_config(socket.clone()), SystemClock, cancel.clone());

    let (mut first, _) = listener.accept().await.unwrap();
    let _ = read_envelopes(&mut first, 1).await; // register
    assert!(matches!(events.recv().await, Some(ClientEvent::Connected)));

    drop(first);
    assert!(matches!(
        tokio::time::timeout(Duration::from_secs(2), events.recv()).await.unwrap(),
        Some(ClientEvent::Disconnected)
    ));

    // Second accept proves the reconnect loop came back.
    let (mut second, _) = tokio::time::timeout(Duration::from_secs(2), listener.accept())
        .await
        .expect("client never reconnected")
        .unwrap();
    let envelopes = read_envelopes(&mut second, 1).await;
    assert!(matches!(envelopes[0].payload, Payload::Register(_)));
    assert!(matches!(
        tokio::time::timeout(Duration::from_secs(2), events.recv()).await.unwrap(),
        Some(ClientEvent::Connected)
    ));

    cancel.cancel();
}

#[tokio::test]
async fn silent_peer_triggers_heartbeat_timeout_and_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("api.sock");
    let cancel = CancellationToken::new();
    let listener = UnixListener::bind(&socket).unwrap();

    let mut config = test_config(socket.clone());
    config.heartbeat_timeout = Duration::from_millis(120);
    let (_client, mut events) = BusClient::spawn(config, SystemClock, cancel.clone());

    let (mut first, _) = listener.accept().await.unwrap();
    let _ = read_envelopes(&mut first, 1).await;
    assert!(matches!(events.recv().await, Some(ClientEvent::Connected)));

    // Say nothing: the watchdog should fire and the client reconnect.
    assert!(matches!(
        tokio::time::timeout(Duration::from_secs(2), events.recv()).await.unwrap(),
        Some(ClientEvent::HeartbeatTimeout)
    ));
    let (_second, _) = tokio::time::timeout(Duration::from_secs(2), listener.accept())
        .await
        .expect("client never reconnected after heartbeat timeout")
        .unwrap();

    cancel.cancel();
}

#[tokio::test]
async fn peer_heartbeats_reset_the_watchdog_and_messages_surface() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("api.sock");
    let cancel = CancellationToken::new();
    let listener = UnixListener::bind(&socket).unwrap();

    let mut config = test_config(socket.clone());
    config.heartbeat_timeout = Duration::from_millis(250);
    let (_client, mut events) = BusClient::spawn(config, SystemClock, cancel.clone());

    let (mut server_side, _) = listener.accept().await.unwrap();
    let _ = read_envelopes(&mut server_side, 1).await;
    assert!(matches!(events.recv().await, Some(ClientEvent::Connected)));

    // Three heartbeats, each inside the window.
    for n in 0..3u64 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let heartbeat = Envelope::new(
            "backend",
            Destination::broadcast(),
            Payload::Heartbeat(Heartbeat {
                timestamp: n,
                active_jobs: None,
                system_status: None,
            }),
            n,
        );
        write_frame(&mut server_side, &heartbeat).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv()).await.unwrap();
        let Some(ClientEvent::Message(envelope)) = event else {
            panic!("expected heartbeat message, got {event:?}");
        };
        assert!(matches!(envelope.payload, Payload::Heartbeat(_)));
    }

    cancel.cancel();
}

#[tokio::test]
async fn envelopes_for_other_peers_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("api.sock");
    let cancel = CancellationToken::new();
    let listener = UnixListener::bind(&socket).unwrap();

    let (_client, mut events) =
        BusClient::spawn(test_config(socket.clone()), SystemClock, cancel.clone());
    let (mut server_side, _) = listener.accept().await.unwrap();
    let _ = read_envelopes(&mut server_side, 1).await;
    assert!(matches!(events.recv().await, Some(ClientEvent::Connected)));

    let foreign = Envelope::new("backend", Destination::new("crawler-other"), Payload::GetStatus, 1);
    write_frame(&mut server_side, &foreign).await.unwrap();
    let mine = Envelope::new("backend", Destination::new("crawler-t"), Payload::GetStatus, 2);
    write_frame(&mut server_side, &mine).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv()).await.unwrap();
    let Some(ClientEvent::Message(envelope)) = event else {
        panic!("expected message, got {event:?}");
    };
    assert_eq!(envelope.timestamp, 2);

    cancel.cancel();
}
