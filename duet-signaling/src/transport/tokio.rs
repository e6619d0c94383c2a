use crate::error::SignalingError;
use crate::transport::{ChannelEvent, SignalingReceiver, SignalingSender, SignalingTransport};
use async_trait::async_trait;
use duet_protocol::ParticipantId;
use duet_protocol::relay::{ClientFrame, RelayFrame};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite};
use url::Url;

type WebsocketStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connection to a room relay.
///
/// The relay learns the room and the participant from the connect URL
/// (`<base>/rooms/<room>?id=<participant>`) and from then on forwards
/// [`ClientFrame`]s and [`RelayFrame`]s.
#[derive(Debug, Clone)]
pub struct TokioTransport {
    url: Url,
}

impl TokioTransport {
    pub fn new(
        base_url: &str,
        room: &str,
        participant_id: &ParticipantId,
    ) -> Result<Self, SignalingError> {
        let mut url = Url::parse(base_url)
            .map_err(|err| SignalingError::InvalidUrl(format!("{base_url}: {err}")))?;
        url.path_segments_mut()
            .map_err(|_| SignalingError::InvalidUrl(format!("{base_url}: cannot be a base")))?
            .pop_if_empty()
            .extend(["rooms", room]);
        url.query_pairs_mut().append_pair("id", participant_id.as_str());
        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl SignalingTransport for TokioTransport {
    type Sender = TokioSender;
    type Receiver = TokioReceiver;

    #[tracing::instrument(level = "info", err)]
    async fn connect(&self) -> Result<(Self::Sender, Self::Receiver), SignalingError> {
        tracing::info!("Connecting to room relay");
        let (websocket_stream, response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|err| {
                tracing::error!(?err, "Failed to connect to room relay");
                SignalingError::ConnectionError(Box::new(err))
            })?;
        tracing::debug!(?response, "WebSocket handshake response");

        let (websocket_tx, websocket_rx) = websocket_stream.split();

        tracing::info!("Successfully established connection to room relay");
        Ok((
            TokioSender {
                websocket_tx: Mutex::new(websocket_tx),
            },
            TokioReceiver { websocket_rx },
        ))
    }
}

pub struct TokioSender {
    websocket_tx: Mutex<SplitSink<WebsocketStream, tungstenite::Message>>,
}

pub struct TokioReceiver {
    websocket_rx: SplitStream<WebsocketStream>,
}

#[async_trait]
impl SignalingSender for TokioSender {
    #[tracing::instrument(level = "debug", skip(self, payload), err)]
    async fn send(
        &self,
        recipient: &ParticipantId,
        payload: String,
    ) -> Result<(), SignalingError> {
        let frame = ClientFrame::serialize(&ClientFrame::Send {
            to: recipient.clone(),
            payload,
        })
        .map_err(|err| SignalingError::SerializationError(Box::new(err)))?;

        tracing::trace!("Sending frame to relay");
        self.websocket_tx
            .lock()
            .await
            .send(tungstenite::Message::text(frame))
            .await
            .map_err(|err| {
                tracing::warn!(?err, "Failed to send frame");
                SignalingError::Delivery {
                    recipient: recipient.clone(),
                    reason: err.to_string(),
                }
            })
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn close(&self) -> Result<(), SignalingError> {
        let mut websocket_tx = self.websocket_tx.lock().await;
        let _ = websocket_tx
            .send(tungstenite::Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            })))
            .await
            .inspect_err(|err| {
                tracing::warn!(?err, "Failed to send Close frame");
            });

        websocket_tx.close().await.map_err(|err| {
            tracing::warn!(?err, "Failed to close WebSocket connection");
            SignalingError::ConnectionError(Box::new(err))
        })
    }
}

#[async_trait]
impl SignalingReceiver for TokioReceiver {
    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn recv(&mut self) -> Result<ChannelEvent, SignalingError> {
        while let Some(msg) = self.websocket_rx.next().await {
            match msg {
                Ok(tungstenite::Message::Text(text)) => match RelayFrame::deserialize(&text) {
                    Ok(frame) => return Ok(frame.into()),
                    Err(err) => {
                        tracing::warn!(?err, "Skipping malformed relay frame");
                    }
                },
                Ok(tungstenite::Message::Close(reason)) => {
                    tracing::warn!(?reason, "Received Close WebSocket frame");
                    return Err(SignalingError::Disconnected);
                }
                Ok(other) => {
                    tracing::trace!(?other, "Skipping non-text WebSocket frame");
                }
                Err(err) => {
                    tracing::warn!(?err, "Failed to receive message");
                    return Err(SignalingError::ConnectionError(Box::new(err)));
                }
            }
        }

        tracing::warn!("WebSocket stream ended");
        Err(SignalingError::Disconnected)
    }
}

impl From<RelayFrame> for ChannelEvent {
    fn from(frame: RelayFrame) -> Self {
        match frame {
            RelayFrame::Message { from, payload } => ChannelEvent::Message {
                sender: from,
                payload,
            },
            RelayFrame::MemberJoined { id } => ChannelEvent::MemberJoined(id),
            RelayFrame::MemberLeft { id } => ChannelEvent::MemberLeft(id),
        }
    }
}
