use crate::config::{
    WEBRTC_AUDIO_CHANNELS, WEBRTC_AUDIO_CLOCK_RATE, WEBRTC_TRACK_STREAM_ID,
    WEBRTC_VIDEO_CLOCK_RATE,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl Display for TrackKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}

impl TryFrom<RTPCodecType> for TrackKind {
    type Error = RTPCodecType;

    fn try_from(value: RTPCodecType) -> Result<Self, Self::Error> {
        match value {
            RTPCodecType::Audio => Ok(TrackKind::Audio),
            RTPCodecType::Video => Ok(TrackKind::Video),
            other => Err(other),
        }
    }
}

/// A local capture track as supplied by the media capture collaborator.
#[derive(Clone)]
pub struct LocalTrack {
    kind: TrackKind,
    track: Arc<dyn TrackLocal + Send + Sync>,
}

impl LocalTrack {
    pub fn new(kind: TrackKind, track: Arc<dyn TrackLocal + Send + Sync>) -> Self {
        Self { kind, track }
    }

    /// Creates a sample-fed track using the default codec for `kind`
    /// (Opus for audio, VP8 for video).
    pub fn sample(kind: TrackKind, id: impl Into<String>) -> (Self, Arc<TrackLocalStaticSample>) {
        let codec = match kind {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: WEBRTC_AUDIO_CLOCK_RATE,
                channels: WEBRTC_AUDIO_CHANNELS,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: WEBRTC_VIDEO_CLOCK_RATE,
                ..Default::default()
            },
        };
        let track = Arc::new(TrackLocalStaticSample::new(
            codec,
            id.into(),
            WEBRTC_TRACK_STREAM_ID.to_owned(),
        ));
        (
            Self::new(kind, Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>),
            track,
        )
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        self.track.id()
    }

    pub fn inner(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.track)
    }
}

impl Debug for LocalTrack {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("kind", &self.kind)
            .field("id", &self.id())
            .finish()
    }
}

/// The local track set shared by every session of a room.
///
/// Tracks of a disabled kind stay attached to all transports; the flag only tells the
/// capture collaborator whether to keep feeding them (camera/microphone toggles).
#[derive(Debug, Clone, Default)]
pub struct LocalMedia {
    tracks: Vec<LocalTrack>,
    enabled: Arc<RwLock<HashMap<TrackKind, bool>>>,
}

impl LocalMedia {
    pub fn new(tracks: Vec<LocalTrack>) -> Self {
        let enabled = tracks.iter().map(|track| (track.kind(), true)).collect();
        Self {
            tracks,
            enabled: Arc::new(RwLock::new(enabled)),
        }
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn is_enabled(&self, kind: TrackKind) -> bool {
        self.enabled.read().get(&kind).copied().unwrap_or(false)
    }

    /// Toggles a track kind. Returns `false` if no track of that kind exists.
    pub fn set_enabled(&self, kind: TrackKind, enabled: bool) -> bool {
        match self.enabled.write().get_mut(&kind) {
            Some(flag) => {
                tracing::debug!(%kind, enabled, "Toggling local track");
                *flag = enabled;
                true
            }
            None => false,
        }
    }
}

/// A track received from the remote participant.
pub trait RemoteTrack: Send + Sync + 'static {
    fn id(&self) -> String;
    fn stream_id(&self) -> String;
    fn kind(&self) -> Option<TrackKind>;
}

impl RemoteTrack for TrackRemote {
    fn id(&self) -> String {
        TrackRemote::id(self)
    }

    fn stream_id(&self) -> String {
        TrackRemote::stream_id(self)
    }

    fn kind(&self) -> Option<TrackKind> {
        TrackKind::try_from(TrackRemote::kind(self)).ok()
    }
}
