//! `SignalingTransport`: the client side of the signaling connection.
//!
//! Owns the WebSocket, frames outbound messages as JSON, re-emits inbound
//! frames as typed events, and drives keep-alive and reconnection the same
//! way the source project's own connection manager does — a single task
//! multiplexing inbound frames, outbound sends, a keep-alive tick and a
//! shutdown signal over `tokio::select!` — generalised from a fixed
//! exponential backoff to the fixed 3s/5-attempt schedule this protocol
//! specifies.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};
use voicesync_protocol::{ClientMessage, PeerId, RoomKey, ServerMessage};

use crate::error::SignalingError;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(3);
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Events the transport emits to its owner (normally [`crate::session::Session`]).
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A frame was received and parsed into a [`ServerMessage`].
    Message(ServerMessage),
    /// The connection closed or failed and will not be retried further.
    Closed,
    /// A non-fatal transport condition worth surfacing (e.g. a reconnect
    /// attempt failed but attempts remain).
    Error(SignalingError),
}

/// The client side of the signaling connection.
///
/// Construction does not dial; call [`SignalingTransport::connect`] to open
/// the socket. After the first successful open, a background task owns the
/// socket and handles keep-alive and reconnection transparently.
pub struct SignalingTransport {
    url: String,
    outbound: mpsc::Sender<ClientMessage>,
    outbound_rx: Mutex<Option<mpsc::Receiver<ClientMessage>>>,
    events_tx: mpsc::Sender<TransportEvent>,
    shutdown: mpsc::Sender<()>,
    shutdown_rx: Mutex<Option<mpsc::Receiver<()>>>,
    is_open: Arc<AtomicBool>,
    intentional_close: Arc<AtomicBool>,
}

impl SignalingTransport {
    /// Build a transport for `url` (e.g. `ws://host:port/ws`). Returns the
    /// transport and the receiving half of its event channel.
    #[must_use]
    pub fn new(url: impl Into<String>) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (outbound, outbound_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::channel(64);
        let (shutdown, shutdown_rx) = mpsc::channel(1);

        let transport = Self {
            url: url.into(),
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            events_tx,
            shutdown,
            shutdown_rx: Mutex::new(Some(shutdown_rx)),
            is_open: Arc::new(AtomicBool::new(false)),
            intentional_close: Arc::new(AtomicBool::new(false)),
        };
        (transport, events_rx)
    }

    /// Open the connection. Resolves once the channel is open; the *first*
    /// handshake attempt is not retried — a failure here is reported
    /// directly as `CONNECT_FAILED`. Subsequent unexpected closes are
    /// retried internally by the background task.
    ///
    /// # Panics
    ///
    /// Panics if called more than once on the same transport.
    pub async fn connect(&self) -> Result<(), SignalingError> {
        let (stream, _response) = connect_async(&self.url)
            .await
            .map_err(|error| SignalingError::ConnectFailed(error.to_string()))?;

        self.is_open.store(true, Ordering::SeqCst);

        let outbound_rx = self
            .outbound_rx
            .lock()
            .expect("outbound_rx mutex poisoned")
            .take()
            .expect("connect called more than once");
        let shutdown_rx = self
            .shutdown_rx
            .lock()
            .expect("shutdown_rx mutex poisoned")
            .take()
            .expect("connect called more than once");
        let driver = Driver {
            url: self.url.clone(),
            events_tx: self.events_tx.clone(),
            is_open: self.is_open.clone(),
            intentional_close: self.intentional_close.clone(),
        };
        tokio::spawn(driver.run(stream, outbound_rx, shutdown_rx));

        Ok(())
    }

    /// Mark the next close as intentional (suppressing reconnection) and
    /// close the socket.
    pub fn disconnect(&self) {
        self.intentional_close.store(true, Ordering::SeqCst);
        self.is_open.store(false, Ordering::SeqCst);
        let _ = self.shutdown.try_send(());
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    /// Queue an outbound message. Dropped silently if the channel isn't open.
    pub fn send(&self, payload: ClientMessage) {
        if !self.is_open() {
            debug!("dropping outbound frame: transport not open");
            return;
        }
        if let Err(error) = self.outbound.try_send(payload) {
            warn!(%error, "failed to queue outbound frame");
        }
    }

    pub fn login(&self, username: impl Into<String>) {
        self.send(ClientMessage::Login { username: username.into() });
    }

    pub fn create_room(&self) {
        self.send(ClientMessage::CreateRoom);
    }

    pub fn join_room(&self, room_key: &RoomKey) {
        self.send(ClientMessage::JoinRoom { room_key: room_key.as_str().to_string() });
    }

    pub fn invite(&self, to_username: impl Into<String>) {
        self.send(ClientMessage::Invite { to_username: to_username.into() });
    }

    pub fn accept_invite(&self, room_key: &RoomKey) {
        self.send(ClientMessage::AcceptInvite { room_key: room_key.as_str().to_string() });
    }

    pub fn decline_invite(&self, room_key: &RoomKey) {
        self.send(ClientMessage::DeclineInvite { room_key: room_key.as_str().to_string() });
    }

    pub fn leave_room(&self) {
        self.send(ClientMessage::LeaveRoom);
    }

    pub fn signal(&self, to_peer_id: PeerId, data: serde_json::Value) {
        self.send(ClientMessage::Signal { to_peer_id, data });
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct Driver {
    url: String,
    events_tx: mpsc::Sender<TransportEvent>,
    is_open: Arc<AtomicBool>,
    intentional_close: Arc<AtomicBool>,
}

impl Driver {
    async fn run(
        self,
        first_stream: WsStream,
        mut outbound_rx: mpsc::Receiver<ClientMessage>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let attempts = AtomicU32::new(0);
        let mut stream = Some(first_stream);

        loop {
            let current = match stream.take() {
                Some(s) => s,
                None => {
                    if self.intentional_close.load(Ordering::SeqCst) {
                        let _ = self.events_tx.send(TransportEvent::Closed).await;
                        return;
                    }
                    match connect_async(&self.url).await {
                        Ok((s, _)) => {
                            attempts.store(0, Ordering::SeqCst);
                            self.is_open.store(true, Ordering::SeqCst);
                            s
                        }
                        Err(error) => {
                            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                            warn!(%error, attempt = n, "reconnect attempt failed");
                            if n >= MAX_RECONNECT_ATTEMPTS {
                                let _ = self
                                    .events_tx
                                    .send(TransportEvent::Error(SignalingError::ConnLost { attempts: n }))
                                    .await;
                                let _ = self.events_tx.send(TransportEvent::Closed).await;
                                return;
                            }
                            tokio::time::sleep(RECONNECT_BACKOFF).await;
                            continue;
                        }
                    }
                }
            };

            let closed_intentionally = self
                .drive_one_connection(current, &mut outbound_rx, &mut shutdown_rx)
                .await;
            self.is_open.store(false, Ordering::SeqCst);

            if closed_intentionally {
                let _ = self.events_tx.send(TransportEvent::Closed).await;
                return;
            }

            info!("connection lost, reconnecting in {RECONNECT_BACKOFF:?}");
            tokio::time::sleep(RECONNECT_BACKOFF).await;
        }
    }

    /// Drive one live connection until it closes. Returns `true` if the
    /// close was intentional (an explicit `disconnect()` or the outbound
    /// channel was dropped).
    async fn drive_one_connection(
        &self,
        stream: WsStream,
        outbound_rx: &mut mpsc::Receiver<ClientMessage>,
        shutdown_rx: &mut mpsc::Receiver<()>,
    ) -> bool {
        let (mut sink, mut source) = stream.split();
        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.tick().await; // first tick fires immediately; consume it

        loop {
            tokio::select! {
                frame = source.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            match serde_json::from_str::<ServerMessage>(&text) {
                                Ok(message) => {
                                    let _ = self.events_tx.send(TransportEvent::Message(message)).await;
                                }
                                Err(error) => {
                                    debug!(%error, "dropping non-JSON or unrecognised frame");
                                }
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => return self.intentional_close.load(Ordering::SeqCst),
                        Some(Ok(_)) => {}
                        Some(Err(error)) => {
                            warn!(%error, "websocket read error");
                            return self.intentional_close.load(Ordering::SeqCst);
                        }
                    }
                }
                outbound = outbound_rx.recv() => {
                    match outbound {
                        Some(message) => {
                            let json = match serde_json::to_string(&message) {
                                Ok(json) => json,
                                Err(error) => {
                                    warn!(%error, "failed to serialize outbound message");
                                    continue;
                                }
                            };
                            if let Err(error) = sink.send(WsMessage::Text(json.into())).await {
                                warn!(%error, "failed to send outbound frame");
                                return self.intentional_close.load(Ordering::SeqCst);
                            }
                        }
                        None => return true,
                    }
                }
                _ = keepalive.tick() => {
                    if let Err(error) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                        debug!(%error, "keep-alive probe failed to send");
                    }
                }
                _ = shutdown_rx.recv() => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return true;
                }
            }
        }
    }
}
