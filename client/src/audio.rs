//! Audio capture/playback adapter.
//!
//! Out of scope per the system this is grounded on: PCM resampling to 10ms
//! frames, Opus encode/decode, and acoustic echo cancellation. What remains
//! is the boundary the [`crate::peer::PeerEngine`] and
//! [`crate::session::Session`] need: a local track to attach before
//! negotiation, a place to hand off remote tracks, mute state, and a stream
//! of mic sample batches for speaking detection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use voicesync_protocol::PeerId;

use crate::error::AudioError;

pub const SAMPLE_RATE: u32 = 48000;
pub const CHANNELS: u16 = 2;
pub const FRAME_SIZE_MS: usize = 20;
pub const FRAME_SIZE: usize = (SAMPLE_RATE as usize * FRAME_SIZE_MS) / 1000;

/// The local outbound audio track, handed to [`crate::peer::PeerEngine::create`].
#[derive(Clone)]
pub struct LocalAudioTrack(pub Arc<TrackLocalStaticSample>);

/// A remote peer's inbound audio track, as delivered by the peer engine's `track` event.
#[derive(Clone)]
pub struct RemoteAudioTrack(pub Arc<TrackRemote>);

/// A batch of raw mic samples, used only for RMS-based speaking detection.
#[derive(Debug, Clone)]
pub struct SampleBatch {
    pub samples: Vec<f32>,
}

/// Audio I/O boundary. `Session` talks to this trait only; `CpalAudioAdapter`
/// and `NullAudioAdapter` are the two implementations this crate ships.
pub trait AudioAdapter: Send + Sync {
    fn get_local_track(&self) -> Option<LocalAudioTrack>;
    fn add_remote(&self, peer: PeerId, track: RemoteAudioTrack);
    fn remove_remote(&self, peer: PeerId);
    fn set_muted(&self, muted: bool);
    fn is_muted(&self) -> bool;
    fn subscribe_samples(&self) -> broadcast::Receiver<SampleBatch>;
}

/// A no-device adapter: no capture, no playback, no local track. Used by
/// tests and by `cli --no-audio` so the signaling/negotiation path is
/// exercisable without a real microphone.
pub struct NullAudioAdapter {
    muted: AtomicBool,
    samples_tx: broadcast::Sender<SampleBatch>,
}

impl NullAudioAdapter {
    #[must_use]
    pub fn new() -> Self {
        let (samples_tx, _) = broadcast::channel(16);
        Self {
            muted: AtomicBool::new(false),
            samples_tx,
        }
    }
}

impl Default for NullAudioAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioAdapter for NullAudioAdapter {
    fn get_local_track(&self) -> Option<LocalAudioTrack> {
        None
    }

    fn add_remote(&self, _peer: PeerId, _track: RemoteAudioTrack) {}

    fn remove_remote(&self, _peer: PeerId) {}

    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    fn subscribe_samples(&self) -> broadcast::Receiver<SampleBatch> {
        self.samples_tx.subscribe()
    }
}

enum CaptureControl {
    Stop,
}

/// A real, minimal `cpal`-backed adapter: opens the default input device on
/// construction, runs capture on a blocking task (mirroring how the source
/// project hosts non-`Send` `cpal::Stream` values), and exposes RMS sample
/// batches for speaking detection. It does not encode, resample, or play
/// back remote audio — those stages would sit between here and the peer
/// engine's tracks and are out of scope for this component.
pub struct CpalAudioAdapter {
    local_track: Arc<TrackLocalStaticSample>,
    muted: Arc<AtomicBool>,
    samples_tx: broadcast::Sender<SampleBatch>,
    capture_control: mpsc::Sender<CaptureControl>,
    remotes: Mutex<HashMap<PeerId, RemoteDrain>>,
}

struct RemoteDrain {
    track: Arc<TrackRemote>,
    handle: JoinHandle<()>,
}

impl CpalAudioAdapter {
    /// Open the default input device and start capture. Fails only if no
    /// default input device is available or the stream cannot be built.
    pub fn new() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| AudioError::MicOpenFailed("no default input device".into()))?;

        let local_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: SAMPLE_RATE,
                channels: u16::from(CHANNELS),
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                rtcp_feedback: vec![],
            },
            "audio".to_string(),
            "voicesync".to_string(),
        ));

        let muted = Arc::new(AtomicBool::new(false));
        let (samples_tx, _) = broadcast::channel(64);
        let (capture_control, control_rx) = mpsc::channel(1);

        let muted_for_task = muted.clone();
        let samples_for_task = samples_tx.clone();
        tokio::task::spawn_blocking(move || run_capture(device, muted_for_task, samples_for_task, control_rx));

        info!("audio capture started on default input device");

        Ok(Self {
            local_track,
            muted,
            samples_tx,
            capture_control,
            remotes: Mutex::new(HashMap::new()),
        })
    }
}

impl Drop for CpalAudioAdapter {
    fn drop(&mut self) {
        let _ = self.capture_control.try_send(CaptureControl::Stop);
        if let Ok(mut remotes) = self.remotes.lock() {
            for (_, drain) in remotes.drain() {
                drain.handle.abort();
            }
        }
    }
}

impl AudioAdapter for CpalAudioAdapter {
    fn get_local_track(&self) -> Option<LocalAudioTrack> {
        Some(LocalAudioTrack(self.local_track.clone()))
    }

    fn add_remote(&self, peer: PeerId, track: RemoteAudioTrack) {
        // The jitter buffer upstream needs someone reading RTP packets or it
        // stalls; in the absence of a decode/playback pipeline this task
        // simply drains the stream.
        let remote = track.0;
        let for_task = remote.clone();
        let handle = tokio::spawn(async move {
            loop {
                match for_task.read_rtp().await {
                    Ok(_) => {}
                    Err(error) => {
                        debug!(%error, "remote track ended");
                        return;
                    }
                }
            }
        });
        let mut remotes = self.remotes.lock().expect("remotes mutex poisoned");
        if let Some(previous) = remotes.insert(peer, RemoteDrain { track: remote, handle }) {
            previous.handle.abort();
        }
    }

    fn remove_remote(&self, peer: PeerId) {
        let mut remotes = self.remotes.lock().expect("remotes mutex poisoned");
        if let Some(drain) = remotes.remove(&peer) {
            drain.handle.abort();
        }
    }

    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
        debug!(muted, "mic muted state changed");
    }

    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    fn subscribe_samples(&self) -> broadcast::Receiver<SampleBatch> {
        self.samples_tx.subscribe()
    }
}

fn run_capture(
    device: cpal::Device,
    muted: Arc<AtomicBool>,
    samples_tx: broadcast::Sender<SampleBatch>,
    mut control_rx: mpsc::Receiver<CaptureControl>,
) {
    let config = StreamConfig {
        channels: CHANNELS,
        sample_rate: SampleRate(SAMPLE_RATE),
        buffer_size: BufferSize::Default,
    };

    let stream = match device.build_input_stream(
        &config,
        move |data: &[f32], _| {
            if muted.load(Ordering::Relaxed) {
                return;
            }
            let _ = samples_tx.send(SampleBatch { samples: data.to_vec() });
        },
        |error| error!(%error, "audio capture stream error"),
        None,
    ) {
        Ok(stream) => stream,
        Err(error) => {
            error!(%error, "failed to build capture stream");
            return;
        }
    };

    if let Err(error) = stream.play() {
        error!(%error, "failed to start capture stream");
        return;
    }

    while let Some(message) = control_rx.blocking_recv() {
        match message {
            CaptureControl::Stop => break,
        }
    }

    drop(stream);
    debug!("capture task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_adapter_has_no_local_track() {
        let adapter = NullAudioAdapter::new();
        assert!(adapter.get_local_track().is_none());
    }

    #[test]
    fn null_adapter_mute_toggles() {
        let adapter = NullAudioAdapter::new();
        assert!(!adapter.is_muted());
        adapter.set_muted(true);
        assert!(adapter.is_muted());
    }

    #[test]
    fn rms_above_threshold_marks_speaking() {
        let loud: Vec<f32> = vec![0.5; 960];
        let rms = (loud.iter().map(|s| s * s).sum::<f32>() / loud.len() as f32).sqrt();
        assert!(rms > 0.01);

        let quiet: Vec<f32> = vec![0.0001; 960];
        let rms = (quiet.iter().map(|s| s * s).sum::<f32>() / quiet.len() as f32).sqrt();
        assert!(rms <= 0.01);
    }
}
