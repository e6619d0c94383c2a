use anyhow::Context;
use config::{Config, Environment, File};
use duet_protocol::ParticipantId;
use duet_webrtc::config::IceConfig;
use duet_webrtc::{LocalMedia, LocalTrack, TrackKind};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "duet-node.toml";
/// Upper bound (exclusive) for generated participant ids.
pub const RANDOM_PARTICIPANT_ID_BOUND: u32 = 10000;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NodeConfig {
    pub signaling: SignalingConfig,
    pub room: String,
    pub participant_id: ParticipantId,
    pub webrtc: IceConfig,
    pub media: MediaConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            signaling: SignalingConfig::default(),
            room: "lobby".to_string(),
            participant_id: random_participant_id(),
            webrtc: IceConfig::default(),
            media: MediaConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn parse() -> anyhow::Result<Self> {
        let config = Config::builder()
            .add_source(Config::try_from(&NodeConfig::default())?)
            .add_source(
                File::with_name(config_file_path(CONFIG_FILE_NAME)?.as_str()).required(false),
            )
            .add_source(File::with_name(CONFIG_FILE_NAME).required(false))
            .add_source(
                Environment::with_prefix("duet")
                    .separator("-")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build config")?
            .try_deserialize::<Self>()
            .context("Failed to deserialize config")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.room.trim().is_empty() {
            anyhow::bail!("Room name is empty");
        } else if self.participant_id.as_str().is_empty() {
            anyhow::bail!("Participant id is empty");
        } else if self.signaling.url.is_empty() {
            anyhow::bail!("Signaling url is empty");
        } else if !self.media.audio && !self.media.video {
            anyhow::bail!("Neither audio nor video is published");
        }
        Ok(())
    }
}

pub fn config_file_path(file_name: impl AsRef<Path>) -> anyhow::Result<String> {
    Ok(Path::new("/etc")
        .join(env!("CARGO_PKG_NAME").to_lowercase())
        .join(file_name)
        .to_str()
        .context("Failed to build config file path")?
        .to_string())
}

fn random_participant_id() -> ParticipantId {
    ParticipantId::new(
        rand::rng()
            .random_range(0..RANDOM_PARTICIPANT_ID_BOUND)
            .to_string(),
    )
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SignalingConfig {
    /// Base url of the room relay, e.g. `ws://127.0.0.1:3000`.
    pub url: String,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3000".to_string(),
        }
    }
}

/// Which local tracks to publish.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MediaConfig {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

impl MediaConfig {
    /// Sample tracks for the enabled kinds. Samples are written by the capture side.
    pub fn local_media(&self) -> LocalMedia {
        let mut tracks = Vec::new();
        if self.audio {
            tracks.push(LocalTrack::sample(TrackKind::Audio, "audio").0);
        }
        if self.video {
            tracks.push(LocalTrack::sample(TrackKind::Video, "video").0);
        }
        LocalMedia::new(tracks)
    }
}
