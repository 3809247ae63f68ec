//! WebSocket transport
//!
//! One task owns the socket: it forwards queued client messages in order and turns every
//! incoming frame into a [`TransportEvent`]. There is no reconnection; a dropped socket
//! surfaces as `Closed` or `Error` and the session decides what to do.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use super::protocol::{ClientMessage, SessionSetup, TransportEvent, parse_server_frame};
use super::{EventSink, Transport, TransportLink};
use crate::{Error, Result};

/// Realtime model reachable over `ws://` or `wss://`
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: Url,
}

impl WebSocketTransport {
    /// Create a transport for the given endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the URL is not a WebSocket URL
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self { url }),
            other => Err(Error::Config(format!(
                "unsupported transport scheme: {other}"
            ))),
        }
    }

    /// Endpoint URL
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, setup: &SessionSetup, events: EventSink) -> Result<TransportLink> {
        tracing::debug!(url = %self.url, "opening realtime channel");

        let (socket, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(map_connect_error)?;
        let (mut write, read) = socket.split();

        let setup_json = serde_json::to_string(&ClientMessage::from(setup))?;
        write
            .send(Message::Text(setup_json))
            .await
            .map_err(|e| Error::Channel(e.to_string()))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(pump(write, read, outbound_rx, shutdown_rx, events));

        tracing::info!(url = %self.url, voice = %setup.voice, "realtime channel open");
        Ok(TransportLink::new(outbound_tx, Some(shutdown_tx)))
    }
}

type Socket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Drive the socket until either side closes
async fn pump(
    mut write: futures::stream::SplitSink<Socket, Message>,
    mut read: futures::stream::SplitStream<Socket>,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    mut shutdown: oneshot::Receiver<()>,
    events: EventSink,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = write.send(Message::Close(None)).await;
                tracing::debug!("realtime channel shut down locally");
                break;
            }

            message = outbound.recv() => {
                let Some(message) = message else {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                };
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to serialize client message");
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(json)).await {
                    tracing::warn!(error = %e, "realtime channel send failed");
                    events(TransportEvent::Error(e.to_string()));
                    break;
                }
            }

            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => forward_frame(text.as_bytes(), &events),
                    Some(Ok(Message::Binary(data))) => forward_frame(&data, &events),
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(?frame, "server closed realtime channel");
                        events(TransportEvent::Closed);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "realtime channel error");
                        events(TransportEvent::Error(e.to_string()));
                        break;
                    }
                    None => {
                        events(TransportEvent::Closed);
                        break;
                    }
                }
            }
        }
    }
}

fn forward_frame(frame: &[u8], events: &EventSink) {
    match parse_server_frame(frame) {
        Ok(event) => events(event),
        Err(e) => {
            tracing::debug!(error = %e, len = frame.len(), "ignoring unrecognized frame");
        }
    }
}

/// Classify a handshake failure
fn map_connect_error(err: tungstenite::Error) -> Error {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            if status == 429 || status == 503 {
                Error::ChannelUnavailable(format!("server responded {status}"))
            } else {
                Error::Channel(format!("handshake rejected with {status}"))
            }
        }
        other => Error::Channel(other.to_string()),
    }
}
