mod config;

use crate::config::NodeConfig;
use anyhow::Context;
use duet_room::{Room, RoomConfig, RoomEvent};
use duet_signaling::SignalChannel;
use duet_signaling::transport::SignalingTransport;
use duet_signaling::transport::tokio::TokioTransport;
use duet_webrtc::RtcTransportFactory;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "{}=debug,duet_room=debug,duet_signaling=info,duet_webrtc=info",
                    env!("CARGO_CRATE_NAME")
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = NodeConfig::parse()?;
    tracing::debug!(?config, "Parsed config");

    let transport = TokioTransport::new(
        &config.signaling.url,
        &config.room,
        &config.participant_id,
    )?;
    let (sender, receiver) = transport
        .connect()
        .await
        .context("Failed to connect to room relay")?;

    let factory = RtcTransportFactory::new(config.webrtc.clone())
        .context("Failed to create peer connection factory")?;
    let shutdown_token = CancellationToken::new();
    let room = Room::join(
        RoomConfig::new(config.participant_id.clone()),
        SignalChannel::new(sender),
        receiver,
        factory,
        config.media.local_media(),
        shutdown_token.clone(),
    )
    .context("Failed to join room")?;
    tracing::info!(room = %config.room, participant_id = %config.participant_id, "Waiting for participants");

    let mut events = room.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received ctrl-c, leaving room");
                break;
            }
            event = events.recv() => match event {
                Ok(RoomEvent::SignalingClosed { reason }) => {
                    tracing::warn!(?reason, "Signaling channel closed, leaving room");
                    break;
                }
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Room event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    room.shutdown().await;
    Ok(())
}

fn log_event(event: &RoomEvent) {
    match event {
        RoomEvent::SessionConnected { participant } => {
            tracing::info!(%participant, "Connected");
        }
        RoomEvent::SessionFailed {
            participant,
            reason,
        } => {
            tracing::warn!(%participant, ?reason, "Session failed");
        }
        RoomEvent::DeliveryFailed {
            participant,
            kind,
            reason,
        } => {
            tracing::warn!(%participant, %kind, %reason, "Signal not delivered");
        }
        RoomEvent::RemoteTrackAdded {
            participant,
            track_id,
            kind,
        } => {
            tracing::info!(%participant, %track_id, ?kind, "Receiving remote track");
        }
        event => tracing::debug!(?event, "Room event"),
    }
}
