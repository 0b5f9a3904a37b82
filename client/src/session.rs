//! `Session`: the top-level client coordinator.
//!
//! Owns one [`SignalingTransport`], one [`PeerEngine`], one
//! [`AudioAdapter`], and the room's [`Participant`] map; translates the
//! wire protocol into the observable [`SessionEvent`] stream the way the
//! source project's voice commands module translates WebSocket/WebRTC
//! callbacks into Tauri events — except here everything is a typed channel
//! rather than a dynamic emitter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::{info, warn};

use voicesync_protocol::{PeerId, RoomKey, RoomPeer, ServerMessage};

use crate::audio::AudioAdapter;
use crate::error::{RoomError, SessionError, SignalingError};
use crate::peer::{PeerEngine, PeerEvent, PeerSignal};
use crate::transport::{SignalingTransport, TransportEvent};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const LEAVE_GRACE_PERIOD: Duration = Duration::from_millis(250);
const SPEAKING_RMS_THRESHOLD: f32 = 0.01;

/// The client-side view of a room member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub peer_id: PeerId,
    pub display_name: String,
    pub is_speaking: bool,
    pub is_muted: bool,
    pub is_self: bool,
}

/// Events observers of a [`Session`] can subscribe to.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ParticipantUpdate(Vec<Participant>),
    AudioSamples,
    Invite { from_username: String, room_key: RoomKey },
    InviteSent { to_username: String },
    InviteError { message: String },
    Error(SessionErrorEvent),
    Ended,
}

/// A non-fatal or fatal error surfaced to observers outside the request/response path.
#[derive(Debug, Clone)]
pub struct SessionErrorEvent {
    pub code: &'static str,
    pub message: String,
}

type Pending = Arc<StdMutex<Option<oneshot::Sender<Result<ServerMessage, ServerMessage>>>>>;

struct Inner {
    transport: SignalingTransport,
    peer_engine: PeerEngine,
    audio: Arc<dyn AudioAdapter>,
    username: String,
    self_peer_id: StdMutex<Option<PeerId>>,
    current_room: StdMutex<Option<RoomKey>>,
    participants: Mutex<HashMap<PeerId, Participant>>,
    pending: StdMutex<HashMap<&'static str, Pending>>,
    events_tx: broadcast::Sender<SessionEvent>,
    self_speaking: AtomicBool,
}

/// The session coordinator. Cheap to clone: clones share the same
/// underlying state and background tasks.
#[derive(Clone)]
pub struct Session(Arc<Inner>);

impl Session {
    /// Build a session for `url`/`username` with the given audio adapter.
    /// Does not dial; call [`Session::connect`] to do that.
    #[must_use]
    pub fn new(url: impl Into<String>, username: impl Into<String>, audio: Arc<dyn AudioAdapter>) -> (Self, broadcast::Receiver<SessionEvent>) {
        let (transport, transport_events) = SignalingTransport::new(url);
        let (peer_engine, peer_events) = PeerEngine::new().expect("media engine with a single statically registered codec cannot fail");
        let (events_tx, events_rx) = broadcast::channel(64);

        let inner = Arc::new(Inner {
            transport,
            peer_engine,
            audio,
            username: username.into(),
            self_peer_id: StdMutex::new(None),
            current_room: StdMutex::new(None),
            participants: Mutex::new(HashMap::new()),
            pending: StdMutex::new(HashMap::new()),
            events_tx,
            self_speaking: AtomicBool::new(false),
        });

        let session = Self(inner);
        session.spawn_event_loop(transport_events, peer_events);
        session.spawn_speaking_detector();
        (session, events_rx)
    }

    fn spawn_event_loop(&self, mut transport_events: mpsc::Receiver<TransportEvent>, mut peer_events: mpsc::Receiver<PeerEvent>) {
        let session = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = transport_events.recv() => {
                        match event {
                            Some(event) => session.handle_transport_event(event).await,
                            None => return,
                        }
                    }
                    event = peer_events.recv() => {
                        match event {
                            Some(event) => session.handle_peer_event(event).await,
                            None => return,
                        }
                    }
                }
            }
        });
    }

    fn spawn_speaking_detector(&self) {
        let session = self.clone();
        let mut samples = self.0.audio.subscribe_samples();
        tokio::spawn(async move {
            loop {
                match samples.recv().await {
                    Ok(batch) => session.on_sample_batch(&batch.samples).await,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });
    }

    async fn on_sample_batch(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        let rms = (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt();
        let speaking = rms > SPEAKING_RMS_THRESHOLD;
        let flipped = self.0.self_speaking.swap(speaking, Ordering::SeqCst) != speaking;
        if !flipped {
            return;
        }
        let Some(self_id) = *self.0.self_peer_id.lock().expect("self_peer_id mutex poisoned") else {
            return;
        };
        let mut participants = self.0.participants.lock().await;
        if let Some(participant) = participants.get_mut(&self_id) {
            participant.is_speaking = speaking;
        }
        self.emit_participant_update(&participants);
        let _ = self.0.events_tx.send(SessionEvent::AudioSamples);
    }

    fn emit_participant_update(&self, participants: &HashMap<PeerId, Participant>) {
        let snapshot: Vec<Participant> = participants.values().cloned().collect();
        let _ = self.0.events_tx.send(SessionEvent::ParticipantUpdate(snapshot));
    }

    fn emit_error(&self, code: &'static str, message: impl Into<String>) {
        let _ = self.0.events_tx.send(SessionEvent::Error(SessionErrorEvent {
            code,
            message: message.into(),
        }));
    }

    // -- request/response correlator -----------------------------------

    /// Register one-shot listeners for `success`/`error` event-pair names,
    /// invoke `action`, and wait up to 10 s for either to resolve. Always
    /// removes both listeners, regardless of outcome.
    async fn request(&self, success: &'static str, error: &'static str, action: impl FnOnce()) -> Result<ServerMessage, SignalingError> {
        let (tx, rx) = oneshot::channel();
        let slot: Pending = Arc::new(StdMutex::new(Some(tx)));

        {
            let mut pending = self.0.pending.lock().expect("pending mutex poisoned");
            pending.insert(success, slot.clone());
            pending.insert(error, slot);
        }

        action();

        let outcome = tokio::time::timeout(REQUEST_TIMEOUT, rx).await;

        {
            let mut pending = self.0.pending.lock().expect("pending mutex poisoned");
            pending.remove(success);
            pending.remove(error);
        }

        match outcome {
            Ok(Ok(Ok(message))) => Ok(message),
            Ok(Ok(Err(message))) => Err(SignalingError::WsError(error_message(&message))),
            Ok(Err(_)) => Err(SignalingError::WsError("response channel dropped".into())),
            Err(_) => Err(SignalingError::Timeout(success)),
        }
    }

    /// Resolve whichever pending request is keyed under `type_name`, if any.
    /// Returns true if a request was resolved.
    fn resolve_pending(&self, type_name: &str, message: ServerMessage, is_error: bool) -> bool {
        let slot = {
            let pending = self.0.pending.lock().expect("pending mutex poisoned");
            pending.get(type_name).cloned()
        };
        let Some(slot) = slot else { return false };
        if let Some(tx) = slot.lock().expect("pending slot mutex poisoned").take() {
            let _ = tx.send(if is_error { Err(message) } else { Ok(message) });
        }
        true
    }

    // -- public API -------------------------------------------------------

    /// Open the signaling connection, log in, and start audio capture.
    pub async fn connect(&self) -> Result<(), SessionError> {
        self.0.transport.connect().await?;
        let username = self.0.username.clone();
        let reply = self
            .request("login-ok", "login-error", || self.0.transport.login(username))
            .await?;
        match reply {
            ServerMessage::LoginOk { peer_id } => {
                *self.0.self_peer_id.lock().expect("self_peer_id mutex poisoned") = Some(peer_id);
                Ok(())
            }
            other => Err(SessionError::Signaling(SignalingError::WsError(format!(
                "unexpected reply to login: {other:?}"
            )))),
        }
    }

    /// Create a room and return its key.
    pub async fn create_room(&self) -> Result<RoomKey, SessionError> {
        if self.0.current_room.lock().expect("current_room mutex poisoned").is_some() {
            return Err(SessionError::Room(RoomError::AlreadyInRoom));
        }
        let reply = self
            .request("room-created", "create-error", || self.0.transport.create_room())
            .await?;
        match reply {
            ServerMessage::RoomCreated { room_key } => {
                *self.0.current_room.lock().expect("current_room mutex poisoned") = Some(room_key.clone());
                self.seed_self_participant();
                Ok(room_key)
            }
            other => Err(SessionError::Signaling(SignalingError::WsError(format!(
                "unexpected reply to create-room: {other:?}"
            )))),
        }
    }

    /// Join an existing room. On success, initiates negotiation toward every
    /// peer already present (tie-break: existing members respond, the
    /// newcomer initiates toward them since it has the up-to-date peer list
    /// first — see `peer-joined` handling below for the mirrored case).
    pub async fn join_room(&self, room_key: &RoomKey) -> Result<(), SessionError> {
        if self.0.current_room.lock().expect("current_room mutex poisoned").is_some() {
            return Err(SessionError::Room(RoomError::AlreadyInRoom));
        }
        let key = room_key.clone();
        let reply = self
            .request("room-joined", "join-error", || self.0.transport.join_room(&key))
            .await?;
        match reply {
            ServerMessage::RoomJoined { room_key, peers } => {
                *self.0.current_room.lock().expect("current_room mutex poisoned") = Some(room_key);
                self.seed_self_participant();
                self.adopt_existing_peers(peers).await;
                Ok(())
            }
            other => Err(SessionError::Signaling(SignalingError::WsError(format!(
                "unexpected reply to join-room: {other:?}"
            )))),
        }
    }

    async fn adopt_existing_peers(&self, peers: Vec<RoomPeer>) {
        let local_track = self.0.audio.get_local_track();
        let mut participants = self.0.participants.lock().await;
        for peer in peers {
            participants.insert(
                peer.peer_id,
                Participant {
                    peer_id: peer.peer_id,
                    display_name: peer.username,
                    is_speaking: false,
                    is_muted: false,
                    is_self: false,
                },
            );
            self.0.peer_engine.create(peer.peer_id, true, local_track.clone()).await;
        }
        self.emit_participant_update(&participants);
    }

    fn seed_self_participant(&self) {
        let Some(self_id) = *self.0.self_peer_id.lock().expect("self_peer_id mutex poisoned") else {
            return;
        };
        let participant = Participant {
            peer_id: self_id,
            display_name: self.0.username.clone(),
            is_speaking: false,
            is_muted: self.0.audio.is_muted(),
            is_self: true,
        };
        let session = self.clone();
        tokio::spawn(async move {
            let mut participants = session.0.participants.lock().await;
            participants.insert(participant.peer_id, participant);
            session.emit_participant_update(&participants);
        });
    }

    /// Invite `username` into the caller's current room.
    pub async fn invite(&self, username: impl Into<String>) -> Result<(), SessionError> {
        let name = username.into();
        let for_action = name.clone();
        let reply = self
            .request("invite-sent", "invite-error", || self.0.transport.invite(for_action))
            .await?;
        match reply {
            ServerMessage::InviteSent { .. } => Ok(()),
            other => Err(SessionError::Signaling(SignalingError::WsError(format!(
                "unexpected reply to invite: {other:?}"
            )))),
        }
    }

    /// Toggle the local mute state and re-emit a participant update.
    pub async fn set_muted(&self, muted: bool) {
        self.0.audio.set_muted(muted);
        let Some(self_id) = *self.0.self_peer_id.lock().expect("self_peer_id mutex poisoned") else {
            return;
        };
        let mut participants = self.0.participants.lock().await;
        if let Some(participant) = participants.get_mut(&self_id) {
            participant.is_muted = muted;
        }
        self.emit_participant_update(&participants);
    }

    /// Leave the current room (if any) and disconnect. Always runs cleanup,
    /// even if the `leave-room` send or its delivery fails.
    pub async fn leave(&self) {
        let in_room = self.0.current_room.lock().expect("current_room mutex poisoned").is_some();
        if in_room {
            self.0.transport.leave_room();
            tokio::time::sleep(LEAVE_GRACE_PERIOD).await;
        }
        self.0.transport.disconnect();
        self.cleanup().await;
    }

    async fn cleanup(&self) {
        self.0.peer_engine.destroy_all().await;
        self.0.audio.set_muted(true);
        let mut participants = self.0.participants.lock().await;
        let remote_ids: Vec<PeerId> = participants.keys().copied().collect();
        for peer_id in remote_ids {
            self.0.audio.remove_remote(peer_id);
        }
        participants.clear();
        *self.0.current_room.lock().expect("current_room mutex poisoned") = None;
    }

    // -- reactive wiring --------------------------------------------------

    async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Message(message) => self.handle_server_message(message).await,
            TransportEvent::Closed => {
                let was_in_room = self.0.current_room.lock().expect("current_room mutex poisoned").is_some();
                if was_in_room {
                    self.emit_error("CONN_LOST", "signaling connection closed while in a room");
                    self.cleanup().await;
                }
                let _ = self.0.events_tx.send(SessionEvent::Ended);
            }
            TransportEvent::Error(error) => {
                self.emit_error(error.code(), error.to_string());
            }
        }
    }

    async fn handle_server_message(&self, message: ServerMessage) {
        let type_name = message.type_name();
        let is_error = matches!(
            message,
            ServerMessage::LoginError { .. }
                | ServerMessage::CreateError { .. }
                | ServerMessage::JoinError { .. }
                | ServerMessage::InviteError { .. }
        );
        if self.resolve_pending(type_name, message.clone(), is_error) {
            // Still fall through for messages that also carry reactive
            // wiring semantics (none of the request-paired ones do).
            return;
        }

        match message {
            ServerMessage::Connected { peer_id } => {
                *self.0.self_peer_id.lock().expect("self_peer_id mutex poisoned") = Some(peer_id);
            }
            ServerMessage::PeerJoined { peer_id, username } => {
                let local_track = self.0.audio.get_local_track();
                {
                    let mut participants = self.0.participants.lock().await;
                    participants.insert(
                        peer_id,
                        Participant {
                            peer_id,
                            display_name: username,
                            is_speaking: false,
                            is_muted: false,
                            is_self: false,
                        },
                    );
                    self.emit_participant_update(&participants);
                }
                // The newcomer already initiated toward us in its `room-joined`
                // handling; we respond rather than racing it with our own offer.
                self.0.peer_engine.create(peer_id, false, local_track).await;
            }
            ServerMessage::PeerLeft { peer_id, .. } => {
                self.0.peer_engine.destroy(peer_id).await;
                self.0.audio.remove_remote(peer_id);
                let mut participants = self.0.participants.lock().await;
                participants.remove(&peer_id);
                self.emit_participant_update(&participants);
            }
            ServerMessage::Signal { from_peer_id, data } => match serde_json::from_value::<PeerSignal>(data) {
                Ok(fragment) => self.0.peer_engine.signal(from_peer_id, fragment).await,
                Err(error) => warn!(%error, "dropping malformed signal payload"),
            },
            ServerMessage::LeftRoom => {
                self.cleanup().await;
                let _ = self.0.events_tx.send(SessionEvent::Ended);
            }
            ServerMessage::Invite { from_username, room_key } => {
                let _ = self.0.events_tx.send(SessionEvent::Invite {
                    from_username,
                    room_key,
                });
            }
            ServerMessage::InviteSent { to_username } => {
                let _ = self.0.events_tx.send(SessionEvent::InviteSent { to_username });
            }
            ServerMessage::InviteError { message } => {
                let _ = self.0.events_tx.send(SessionEvent::InviteError { message });
            }
            ServerMessage::InviteDeclined { username } => {
                info!(%username, "invite declined");
            }
            ServerMessage::LoginOk { .. }
            | ServerMessage::LoginError { .. }
            | ServerMessage::RoomCreated { .. }
            | ServerMessage::CreateError { .. }
            | ServerMessage::RoomJoined { .. }
            | ServerMessage::JoinError { .. } => {
                // Resolved above via the correlator when a request is
                // outstanding; otherwise there is nothing reactive to do.
            }
        }
    }

    async fn handle_peer_event(&self, event: PeerEvent) {
        match event {
            PeerEvent::Signal(peer_id, fragment) => match serde_json::to_value(&fragment) {
                Ok(data) => self.0.transport.signal(peer_id, data),
                Err(error) => warn!(%error, "failed to serialize outbound signal fragment"),
            },
            PeerEvent::Track(peer_id, track) => {
                self.0.audio.add_remote(peer_id, track);
            }
            PeerEvent::Connected(peer_id) => {
                info!(%peer_id, "peer connected");
            }
            PeerEvent::Disconnected(peer_id) => {
                info!(%peer_id, "peer disconnected");
                self.0.peer_engine.destroy(peer_id).await;
            }
            PeerEvent::Error(peer_id, error) => {
                warn!(%peer_id, %error, "peer engine error");
                self.emit_error(error.code(), error.to_string());
            }
        }
    }
}

fn error_message(message: &ServerMessage) -> String {
    match message {
        ServerMessage::LoginError { message }
        | ServerMessage::CreateError { message }
        | ServerMessage::JoinError { message }
        | ServerMessage::InviteError { message } => message.clone(),
        other => format!("{other:?}"),
    }
}
