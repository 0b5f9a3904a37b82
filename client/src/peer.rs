//! `PeerEngine`: a thin facade over the `webrtc` crate generalised from a
//! single-connection client into a per-[`PeerId`] map, keyed the way
//! `Session` needs for a multi-peer room.
//!
//! Grounded on the source project's `WebRtcClient`: one `MediaEngine` built
//! once with a manually registered Opus codec, per-connection event
//! handlers wired through channels instead of boxed callbacks (this crate
//! has no cross-FFI boundary to bridge, so a `mpsc::Sender<PeerEvent>` takes
//! the place of the `Arc<RwLock<Option<Box<dyn Fn...>>>>` callback slots).
//! Video codec registration is dropped: this system negotiates audio only.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use voicesync_protocol::PeerId;

use crate::audio::{LocalAudioTrack, RemoteAudioTrack};
use crate::error::PeerError;

/// The two public STUN servers every peer connection is configured with.
const STUN_SERVERS: &[&str] = &["stun:stun.l.google.com:19302", "stun:stun1.l.google.com:19302"];

/// An opaque negotiation fragment, serialized into/out of the `data` field
/// of the wire's `signal` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PeerSignal {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate { candidate: String },
}

/// Events the engine emits to its owner (normally [`crate::session::Session`]).
#[derive(Debug, Clone)]
pub enum PeerEvent {
    Signal(PeerId, PeerSignal),
    Track(PeerId, RemoteAudioTrack),
    Connected(PeerId),
    Disconnected(PeerId),
    Error(PeerId, PeerError),
}

struct PeerHandle {
    connection: Arc<RTCPeerConnection>,
}

/// Facade over the WebRTC engine, keyed by [`PeerId`].
pub struct PeerEngine {
    api: API,
    peers: Mutex<HashMap<PeerId, PeerHandle>>,
    events_tx: mpsc::Sender<PeerEvent>,
}

impl PeerEngine {
    /// Build the engine and return it alongside the receiving half of its event channel.
    pub fn new() -> Result<(Self, mpsc::Receiver<PeerEvent>), PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: RTCRtpCodecCapability {
                        mime_type: "audio/opus".to_string(),
                        clock_rate: 48000,
                        channels: 2,
                        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                        rtcp_feedback: vec![],
                    },
                    payload_type: 111,
                    ..Default::default()
                },
                RTPCodecType::Audio,
            )
            .map_err(|error| PeerError::WebRtcError(error.to_string()))?;

        let mut registry = Registry::new();
        registry =
            register_default_interceptors(registry, &mut media_engine).map_err(|error| PeerError::WebRtcError(error.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let (events_tx, events_rx) = mpsc::channel(64);

        Ok((
            Self {
                api,
                peers: Mutex::new(HashMap::new()),
                events_tx,
            },
            events_rx,
        ))
    }

    fn rtc_config() -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: STUN_SERVERS.iter().map(|s| (*s).to_string()).collect(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    /// Tear down any prior connection for `peer_id`, build a fresh one, attach
    /// `local_track` if present, and — when `initiator` is true — produce and
    /// send the opening offer. The tie-break of who initiates is decided by
    /// the caller (`Session`): existing room members initiate toward a
    /// newcomer, the newcomer waits.
    pub async fn create(&self, peer_id: PeerId, initiator: bool, local_track: Option<LocalAudioTrack>) {
        self.destroy(peer_id).await;

        let connection = match self.api.new_peer_connection(Self::rtc_config()).await {
            Ok(connection) => Arc::new(connection),
            Err(error) => {
                let _ = self
                    .events_tx
                    .send(PeerEvent::Error(peer_id, PeerError::WebRtcError(error.to_string())))
                    .await;
                return;
            }
        };

        self.wire_event_handlers(peer_id, connection.clone());

        if let Some(LocalAudioTrack(track)) = local_track {
            if let Err(error) = connection
                .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                .await
            {
                let _ = self
                    .events_tx
                    .send(PeerEvent::Error(peer_id, PeerError::WebRtcError(error.to_string())))
                    .await;
            }
        }

        self.peers
            .lock()
            .await
            .insert(peer_id, PeerHandle { connection: connection.clone() });

        if initiator {
            if let Err(error) = self.make_offer(peer_id, &connection).await {
                let _ = self.events_tx.send(PeerEvent::Error(peer_id, error)).await;
            }
        }

        info!(%peer_id, initiator, "peer connection created");
    }

    async fn make_offer(&self, peer_id: PeerId, connection: &Arc<RTCPeerConnection>) -> Result<(), PeerError> {
        let offer = connection
            .create_offer(None)
            .await
            .map_err(|error| PeerError::WebRtcError(error.to_string()))?;
        connection
            .set_local_description(offer.clone())
            .await
            .map_err(|error| PeerError::WebRtcError(error.to_string()))?;
        let _ = self
            .events_tx
            .send(PeerEvent::Signal(peer_id, PeerSignal::Offer { sdp: offer.sdp }))
            .await;
        Ok(())
    }

    fn wire_event_handlers(&self, peer_id: PeerId, connection: Arc<RTCPeerConnection>) {
        let events_tx = self.events_tx.clone();
        connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events_tx = events_tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                let Ok(json) = candidate.to_json() else { return };
                let Ok(candidate) = serde_json::to_string(&json) else { return };
                let _ = events_tx
                    .send(PeerEvent::Signal(peer_id, PeerSignal::Candidate { candidate }))
                    .await;
            })
        }));

        let events_tx = self.events_tx.clone();
        connection.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let events_tx = events_tx.clone();
            Box::pin(async move {
                match state {
                    RTCPeerConnectionState::Connected => {
                        let _ = events_tx.send(PeerEvent::Connected(peer_id)).await;
                    }
                    RTCPeerConnectionState::Disconnected
                    | RTCPeerConnectionState::Closed
                    | RTCPeerConnectionState::Failed => {
                        let _ = events_tx.send(PeerEvent::Disconnected(peer_id)).await;
                    }
                    _ => {}
                }
            })
        }));

        let events_tx = self.events_tx.clone();
        connection.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let events_tx = events_tx.clone();
            Box::pin(async move {
                debug!(%peer_id, kind = %track.kind(), "remote track received");
                let _ = events_tx.send(PeerEvent::Track(peer_id, RemoteAudioTrack(track))).await;
            })
        }));
    }

    /// Hand an inbound negotiation fragment to the named connection. Unknown
    /// peers are logged and ignored.
    pub async fn signal(&self, peer_id: PeerId, fragment: PeerSignal) {
        let connection = {
            let peers = self.peers.lock().await;
            match peers.get(&peer_id) {
                Some(handle) => handle.connection.clone(),
                None => {
                    warn!(%peer_id, "signal for unknown peer, ignoring");
                    return;
                }
            }
        };

        let result = match fragment {
            PeerSignal::Offer { sdp } => self.handle_offer(peer_id, &connection, sdp).await,
            PeerSignal::Answer { sdp } => self.handle_answer(&connection, sdp).await,
            PeerSignal::Candidate { candidate } => self.handle_candidate(&connection, candidate).await,
        };

        if let Err(error) = result {
            let _ = self.events_tx.send(PeerEvent::Error(peer_id, error)).await;
        }
    }

    async fn handle_offer(&self, peer_id: PeerId, connection: &Arc<RTCPeerConnection>, sdp: String) -> Result<(), PeerError> {
        let offer = RTCSessionDescription::offer(sdp).map_err(|error| PeerError::WebRtcError(error.to_string()))?;
        connection
            .set_remote_description(offer)
            .await
            .map_err(|error| PeerError::WebRtcError(error.to_string()))?;

        let answer = connection
            .create_answer(None)
            .await
            .map_err(|error| PeerError::WebRtcError(error.to_string()))?;
        connection
            .set_local_description(answer.clone())
            .await
            .map_err(|error| PeerError::WebRtcError(error.to_string()))?;

        let _ = self
            .events_tx
            .send(PeerEvent::Signal(peer_id, PeerSignal::Answer { sdp: answer.sdp }))
            .await;
        Ok(())
    }

    async fn handle_answer(&self, connection: &Arc<RTCPeerConnection>, sdp: String) -> Result<(), PeerError> {
        let answer = RTCSessionDescription::answer(sdp).map_err(|error| PeerError::WebRtcError(error.to_string()))?;
        connection
            .set_remote_description(answer)
            .await
            .map_err(|error| PeerError::WebRtcError(error.to_string()))
    }

    async fn handle_candidate(&self, connection: &Arc<RTCPeerConnection>, candidate: String) -> Result<(), PeerError> {
        let init: RTCIceCandidateInit = serde_json::from_str(&candidate).map_err(|error| PeerError::PeerError(error.to_string()))?;
        connection
            .add_ice_candidate(init)
            .await
            .map_err(|error| PeerError::WebRtcError(error.to_string()))
    }

    /// Close and forget the connection for `peer_id`, if any.
    pub async fn destroy(&self, peer_id: PeerId) {
        let handle = self.peers.lock().await.remove(&peer_id);
        if let Some(handle) = handle {
            if let Err(error) = handle.connection.close().await {
                warn!(%peer_id, %error, "error closing peer connection");
            }
        }
    }

    /// Close every live connection, deterministically.
    pub async fn destroy_all(&self) {
        let handles: Vec<PeerHandle> = self.peers.lock().await.drain().map(|(_, handle)| handle).collect();
        for handle in handles {
            if let Err(error) = handle.connection.close().await {
                warn!(%error, "error closing peer connection during destroy_all");
            }
        }
    }
}
