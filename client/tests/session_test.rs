//! End-to-end `Session` scenarios driven against a real signaling server
//! bound on an ephemeral port, mirroring `server`'s own
//! `tests/signaling_test.rs` but exercised from the client side.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use voicesync_client::{NullAudioAdapter, Session, SessionEvent};
use voicesync_server::{create_router, ServerState};

async fn spawn_server() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let app = create_router(ServerState::new());

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server task failed");
    });

    (addr, handle)
}

fn ws_url(addr: SocketAddr) -> String {
    format!("ws://{addr}/ws")
}

#[tokio::test]
async fn connect_and_create_room_round_trips() {
    let (addr, _server) = spawn_server().await;
    let (session, _events) = Session::new(ws_url(addr), "alice", Arc::new(NullAudioAdapter::new()));

    session.connect().await.expect("connect should succeed");
    let room_key = session.create_room().await.expect("create-room should succeed");

    assert!(voicesync_protocol::room_key::is_valid(room_key.as_str()));
}

#[tokio::test]
async fn duplicate_username_surfaces_as_session_error() {
    let (addr, _server) = spawn_server().await;

    let (first, _events) = Session::new(ws_url(addr), "alice", Arc::new(NullAudioAdapter::new()));
    first.connect().await.expect("first login should succeed");

    let (second, _events) = Session::new(ws_url(addr), "ALICE", Arc::new(NullAudioAdapter::new()));
    let error = second.connect().await.expect_err("duplicate name must be rejected");
    assert!(error.to_string().to_lowercase().contains("alice"));
}

#[tokio::test]
async fn mute_toggle_flips_self_participant_and_emits_exactly_once() {
    let (addr, _server) = spawn_server().await;
    let (session, mut events) = Session::new(ws_url(addr), "alice", Arc::new(NullAudioAdapter::new()));

    session.connect().await.expect("connect should succeed");
    session.create_room().await.expect("create-room should succeed");

    // Drain the participant-update emitted by room creation before exercising mute.
    loop {
        match tokio::time::timeout(Duration::from_secs(1), events.recv()).await {
            Ok(Ok(SessionEvent::ParticipantUpdate(_))) => break,
            Ok(Ok(_)) => continue,
            _ => panic!("expected a participant-update after create-room"),
        }
    }

    session.set_muted(true).await;

    let update = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("mute should emit a participant-update")
        .expect("event channel should not close");
    match update {
        SessionEvent::ParticipantUpdate(participants) => {
            let me = participants.iter().find(|p| p.is_self).expect("self participant present");
            assert!(me.is_muted);
        }
        other => panic!("expected participant-update, got {other:?}"),
    }

    // No second update should follow from the same mute call.
    let second = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
    assert!(second.is_err(), "mute must emit participant-update exactly once");
}

#[tokio::test]
async fn request_without_a_reply_times_out_after_ten_seconds() {
    // A bare TCP echo-less listener that upgrades the socket but never speaks
    // the signaling protocol: the login frame is accepted and silently
    // swallowed, so `connect()`'s internal `login`/`login-error` race never
    // resolves on its own.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            tokio::spawn(async move {
                if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                    use futures_util::StreamExt;
                    // Read and discard every frame; never reply.
                    while ws.next().await.is_some() {}
                }
            });
        }
    });

    let (session, _events) = Session::new(format!("ws://{addr}"), "alice", Arc::new(NullAudioAdapter::new()));

    let started = tokio::time::Instant::now();
    let error = session.connect().await.expect_err("a server that never replies must time out");
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(error.to_string().contains("login-ok") || error.to_string().contains("timed out"));
}
