use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

pub const WEBRTC_AUDIO_CLOCK_RATE: u32 = 48000;
pub const WEBRTC_AUDIO_CHANNELS: u16 = 2;
pub const WEBRTC_VIDEO_CLOCK_RATE: u32 = 90000;
pub const WEBRTC_TRACK_STREAM_ID: &str = "local";

/// ICE servers handed to every peer connection. Only reflexive-candidate discovery
/// (STUN) is expected to be configured; relaying is not used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceConfig {
    pub ice_servers: Vec<IceServer>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer {
                urls: vec![
                    "stun:stun.l.google.com:19302".to_string(),
                    "stun:stun1.l.google.com:19302".to_string(),
                ],
                username: None,
                credential: None,
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

pub trait IntoRtc<T> {
    fn into_rtc(self) -> T;
}

impl IntoRtc<RTCIceServer> for IceServer {
    fn into_rtc(self) -> RTCIceServer {
        RTCIceServer {
            urls: self.urls,
            username: self.username.unwrap_or_default(),
            credential: self.credential.unwrap_or_default(),
            ..Default::default()
        }
    }
}

impl IntoRtc<RTCConfiguration> for IceConfig {
    fn into_rtc(self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self
                .ice_servers
                .into_iter()
                .map(IntoRtc::into_rtc)
                .collect(),
            ..Default::default()
        }
    }
}
