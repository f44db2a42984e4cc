use crate::error::CallError;
use crate::peer::types::RemoteStream;
use crate::utils::random_id;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

// ========== LOCAL CAPTURE ==========

struct TrackState {
    rtp: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

/// Captured microphone track. Clones share the same enabled/stopped flags.
#[derive(Clone)]
pub struct LocalAudioTrack {
    inner: Arc<TrackState>,
}

impl LocalAudioTrack {
    /// Opus, 48 kHz stereo, matching what browsers negotiate for voice.
    pub fn opus(track_id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        let rtp = TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48_000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                rtcp_feedback: vec![],
            },
            track_id.into(),
            stream_id.into(),
        );
        Self {
            inner: Arc::new(TrackState {
                rtp: Arc::new(rtp),
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        self.inner.rtp.id()
    }

    pub fn stream_id(&self) -> &str {
        self.inner.rtp.stream_id()
    }

    pub fn rtp_track(&self) -> Arc<TrackLocalStaticSample> {
        self.inner.rtp.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Pushes one encoded Opus frame. Returns `Ok(false)` when the frame was
    /// dropped because the track is muted or stopped.
    pub async fn write_frame(&self, data: Bytes, duration: Duration) -> Result<bool, CallError> {
        if self.is_stopped() || !self.is_enabled() {
            return Ok(false);
        }
        self.inner
            .rtp
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await
            .map_err(|e| CallError::NegotiationFailed(format!("failed to write audio frame: {e}")))?;
        Ok(true)
    }
}

impl std::fmt::Debug for LocalAudioTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAudioTrack")
            .field("id", &self.id())
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Source of microphone capture. Refusal maps to `MediaAccessDenied`.
#[async_trait]
pub trait Microphone: Send + Sync {
    async fn open(&self) -> Result<LocalAudioTrack, CallError>;
}

/// Microphone whose frames are supplied by the application through
/// [`LocalAudioTrack::write_frame`].
#[derive(Debug, Default)]
pub struct OpusMicrophone;

#[async_trait]
impl Microphone for OpusMicrophone {
    async fn open(&self) -> Result<LocalAudioTrack, CallError> {
        Ok(LocalAudioTrack::opus(
            format!("audio-{}", random_id()),
            format!("dropcall-{}", random_id()),
        ))
    }
}

/// Owns the local capture stream for the lifetime of one call.
pub struct MediaController {
    microphone: Arc<dyn Microphone>,
    stream: Option<LocalAudioTrack>,
}

impl MediaController {
    pub fn new(microphone: Arc<dyn Microphone>) -> Self {
        Self {
            microphone,
            stream: None,
        }
    }

    /// Requests microphone-only capture. A stream that is already held is
    /// returned as is, so each call holds at most one capture.
    pub async fn acquire(&mut self) -> Result<LocalAudioTrack, CallError> {
        if let Some(stream) = &self.stream {
            return Ok(stream.clone());
        }

        let track = self.microphone.open().await.map_err(|e| match e {
            CallError::MediaAccessDenied(_) => e,
            other => CallError::MediaAccessDenied(other.to_string()),
        })?;
        info!("Microphone acquired: track={}", track.id());
        self.stream = Some(track.clone());
        Ok(track)
    }

    /// Flips the captured track's enabled flag. `None` when nothing is held.
    pub fn toggle_mute(&mut self) -> Option<bool> {
        let stream = self.stream.as_ref()?;
        stream.set_enabled(!stream.is_enabled());
        let muted = !stream.is_enabled();
        debug!("Microphone muted={muted}");
        Some(muted)
    }

    pub fn is_muted(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| !s.is_enabled())
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    /// Stops the capture. Returns false when nothing was held.
    pub fn release(&mut self) -> bool {
        match self.stream.take() {
            Some(stream) => {
                stream.stop();
                info!("Microphone released: track={}", stream.id());
                true
            }
            None => false,
        }
    }
}

// ========== REMOTE PLAYBACK ==========

/// Plays the remote party's audio. Rejection maps to `PlaybackBlocked`.
pub trait AudioOutput: Send + Sync {
    fn play(&self, stream: &RemoteStream) -> Result<(), CallError>;
    fn stop(&self);
}

/// Output that consumes RTP from the remote track so the receive pipeline
/// keeps flowing; decoding to a device is left to the embedding application.
#[derive(Default)]
pub struct RtpDrainOutput {
    reader: Mutex<Option<(String, JoinHandle<()>)>>,
    packets: Arc<AtomicU64>,
}

impl RtpDrainOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packets_received(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }
}

impl AudioOutput for RtpDrainOutput {
    fn play(&self, stream: &RemoteStream) -> Result<(), CallError> {
        let Some(track) = stream.track.clone() else {
            return Err(CallError::PlaybackBlocked(format!(
                "stream {} carries no RTP track",
                stream.stream_id
            )));
        };

        let mut reader = self
            .reader
            .lock()
            .map_err(|_| CallError::PlaybackBlocked("audio output poisoned".into()))?;
        if let Some((id, handle)) = reader.as_ref() {
            if *id == stream.stream_id && !handle.is_finished() {
                return Ok(());
            }
        }
        if let Some((_, old)) = reader.take() {
            old.abort();
        }

        let packets = self.packets.clone();
        let stream_id = stream.stream_id.clone();
        let handle = tokio::spawn(async move {
            while track.read_rtp().await.is_ok() {
                packets.fetch_add(1, Ordering::Relaxed);
            }
            debug!("Remote track {stream_id} ended");
        });
        *reader = Some((stream.stream_id.clone(), handle));
        Ok(())
    }

    fn stop(&self) {
        match self.reader.lock() {
            Ok(mut reader) => {
                if let Some((_, handle)) = reader.take() {
                    handle.abort();
                }
            }
            Err(_) => warn!("Audio output lock poisoned on stop"),
        }
    }
}
