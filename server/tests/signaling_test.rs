//! End-to-end signaling scenarios driven over a real bound TCP listener:
//! login, room creation and joining, signal relay, invites, and the
//! peer-left fan-out on an ungraceful disconnect.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use voicesync_protocol::ServerMessage;
use voicesync_server::{create_router, ServerState};

type Client = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn spawn_server() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let app = create_router(ServerState::new());

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server task failed");
    });

    (addr, handle)
}

async fn connect(addr: SocketAddr) -> Client {
    let url = format!("ws://{addr}/ws");
    let (stream, _response) = connect_async(url).await.expect("connect to signaling server");
    stream
}

async fn send_json(client: &mut Client, value: serde_json::Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .expect("send frame");
}

async fn recv(client: &mut Client) -> ServerMessage {
    let deadline = tokio::time::sleep(Duration::from_secs(5));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            frame = client.next() => {
                match frame.expect("stream closed").expect("read error") {
                    Message::Text(text) => return serde_json::from_str(&text).expect("valid ServerMessage"),
                    _ => continue,
                }
            }
            () = &mut deadline => panic!("timed out waiting for a server message"),
        }
    }
}

async fn login(client: &mut Client, username: &str) -> ServerMessage {
    send_json(client, serde_json::json!({"type": "login", "username": username})).await;
    recv(client).await
}

#[tokio::test]
async fn s1_host_and_guest_join_a_room() {
    let (addr, _server) = spawn_server().await;

    let mut alice = connect(addr).await;
    let _connected = recv(&mut alice).await;
    let login_ok = login(&mut alice, "alice").await;
    assert!(matches!(login_ok, ServerMessage::LoginOk { .. }));

    send_json(&mut alice, serde_json::json!({"type": "create-room"})).await;
    let created = recv(&mut alice).await;
    let room_key = match created {
        ServerMessage::RoomCreated { room_key } => room_key,
        other => panic!("expected room-created, got {other:?}"),
    };
    assert!(voicesync_protocol::room_key::is_valid(room_key.as_str()));

    let mut bob = connect(addr).await;
    let _connected = recv(&mut bob).await;
    login(&mut bob, "bob").await;

    send_json(&mut bob, serde_json::json!({"type": "join-room", "roomKey": room_key.as_str()})).await;
    let joined = recv(&mut bob).await;
    match joined {
        ServerMessage::RoomJoined { room_key: key, peers } => {
            assert_eq!(key, room_key);
            assert_eq!(peers.len(), 1);
            assert_eq!(peers[0].username, "alice");
        }
        other => panic!("expected room-joined, got {other:?}"),
    }

    let peer_joined = recv(&mut alice).await;
    match peer_joined {
        ServerMessage::PeerJoined { username, .. } => assert_eq!(username, "bob"),
        other => panic!("expected peer-joined, got {other:?}"),
    }
}

#[tokio::test]
async fn s2_signal_is_forwarded_verbatim() {
    let (addr, _server) = spawn_server().await;

    let mut alice = connect(addr).await;
    recv(&mut alice).await;
    login(&mut alice, "alice").await;
    send_json(&mut alice, serde_json::json!({"type": "create-room"})).await;
    let room_key = match recv(&mut alice).await {
        ServerMessage::RoomCreated { room_key } => room_key,
        other => panic!("unexpected: {other:?}"),
    };

    let mut bob = connect(addr).await;
    recv(&mut bob).await;
    let login_ok = login(&mut bob, "bob").await;
    let bob_peer_id = match login_ok {
        ServerMessage::LoginOk { peer_id } => peer_id,
        other => panic!("unexpected: {other:?}"),
    };
    send_json(&mut bob, serde_json::json!({"type": "join-room", "roomKey": room_key.as_str()})).await;
    recv(&mut bob).await; // room-joined
    recv(&mut alice).await; // peer-joined

    send_json(&mut alice, serde_json::json!({
        "type": "signal",
        "toPeerId": bob_peer_id.to_string(),
        "data": {"kind": "offer", "sdp": "X"},
    }))
    .await;

    match recv(&mut bob).await {
        ServerMessage::Signal { data, .. } => {
            assert_eq!(data["kind"], "offer");
            assert_eq!(data["sdp"], "X");
        }
        other => panic!("expected signal, got {other:?}"),
    }
}

#[tokio::test]
async fn s3_duplicate_name_is_rejected_case_insensitively() {
    let (addr, _server) = spawn_server().await;

    let mut alice = connect(addr).await;
    recv(&mut alice).await;
    assert!(matches!(login(&mut alice, "alice").await, ServerMessage::LoginOk { .. }));

    let mut carol = connect(addr).await;
    recv(&mut carol).await;
    assert!(matches!(login(&mut carol, "ALICE").await, ServerMessage::LoginError { .. }));
}

#[tokio::test]
async fn s4_join_nonexistent_room_errors() {
    let (addr, _server) = spawn_server().await;

    let mut client = connect(addr).await;
    recv(&mut client).await;
    login(&mut client, "solo").await;

    send_json(&mut client, serde_json::json!({"type": "join-room", "roomKey": "ZZZ-ZZZ-ZZZ"})).await;
    assert!(matches!(recv(&mut client).await, ServerMessage::JoinError { .. }));
}

#[tokio::test]
async fn s5_invite_happy_path() {
    let (addr, _server) = spawn_server().await;

    let mut alice = connect(addr).await;
    recv(&mut alice).await;
    login(&mut alice, "alice").await;
    send_json(&mut alice, serde_json::json!({"type": "create-room"})).await;
    recv(&mut alice).await;

    let mut bob = connect(addr).await;
    recv(&mut bob).await;
    login(&mut bob, "bob").await;

    send_json(&mut alice, serde_json::json!({"type": "invite", "toUsername": "bob"})).await;

    match recv(&mut bob).await {
        ServerMessage::Invite { from_username, .. } => assert_eq!(from_username, "alice"),
        other => panic!("expected invite, got {other:?}"),
    }
    match recv(&mut alice).await {
        ServerMessage::InviteSent { to_username } => assert_eq!(to_username, "bob"),
        other => panic!("expected invite-sent, got {other:?}"),
    }
}

#[tokio::test]
async fn s6_self_invite_errors() {
    let (addr, _server) = spawn_server().await;

    let mut alice = connect(addr).await;
    recv(&mut alice).await;
    login(&mut alice, "alice").await;
    send_json(&mut alice, serde_json::json!({"type": "create-room"})).await;
    recv(&mut alice).await;

    send_json(&mut alice, serde_json::json!({"type": "invite", "toUsername": "alice"})).await;
    assert!(matches!(recv(&mut alice).await, ServerMessage::InviteError { .. }));
}

#[tokio::test]
async fn disconnect_mid_call_fans_out_peer_left_to_remaining_members() {
    let (addr, _server) = spawn_server().await;

    let mut alice = connect(addr).await;
    recv(&mut alice).await;
    login(&mut alice, "alice").await;
    send_json(&mut alice, serde_json::json!({"type": "create-room"})).await;
    let room_key = match recv(&mut alice).await {
        ServerMessage::RoomCreated { room_key } => room_key,
        other => panic!("unexpected: {other:?}"),
    };

    let mut bob = connect(addr).await;
    recv(&mut bob).await;
    login(&mut bob, "bob").await;
    send_json(&mut bob, serde_json::json!({"type": "join-room", "roomKey": room_key.as_str()})).await;
    recv(&mut bob).await;
    recv(&mut alice).await; // peer-joined for bob

    let mut carol = connect(addr).await;
    recv(&mut carol).await;
    login(&mut carol, "carol").await;
    send_json(&mut carol, serde_json::json!({"type": "join-room", "roomKey": room_key.as_str()})).await;
    recv(&mut carol).await;
    recv(&mut alice).await; // peer-joined for carol
    recv(&mut bob).await; // peer-joined for carol

    // Bob drops without an explicit leave-room.
    bob.close(None).await.ok();
    drop(bob);

    match recv(&mut alice).await {
        ServerMessage::PeerLeft { username, .. } => assert_eq!(username, "bob"),
        other => panic!("expected peer-left, got {other:?}"),
    }
    match recv(&mut carol).await {
        ServerMessage::PeerLeft { username, .. } => assert_eq!(username, "bob"),
        other => panic!("expected peer-left, got {other:?}"),
    }
}
