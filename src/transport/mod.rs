//! Duplex channel to the remote speech model
//!
//! A [`Transport`] opens a [`TransportLink`]: an ordered, fire-and-forget outbound queue
//! plus a stream of typed [`TransportEvent`]s posted to the session's event sink.

pub mod protocol;
mod websocket;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

pub use protocol::{ClientMessage, ServerMessage, SessionSetup, TransportEvent};
pub use websocket::WebSocketTransport;

use crate::Result;

/// Receives events from the channel, on whatever task the transport runs
pub type EventSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// Opens channels to the model
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a channel, send `setup`, and start posting events to `events`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ChannelUnavailable`] for transient refusals and
    /// [`crate::Error::Channel`] for anything else
    async fn open(&self, setup: &SessionSetup, events: EventSink) -> Result<TransportLink>;
}

/// Sending half of an open channel
#[derive(Debug)]
pub struct TransportLink {
    outbound: Option<mpsc::UnboundedSender<ClientMessage>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TransportLink {
    /// Wrap an outbound queue and an optional shutdown signal for the channel task
    #[must_use]
    pub const fn new(
        outbound: mpsc::UnboundedSender<ClientMessage>,
        shutdown: Option<oneshot::Sender<()>>,
    ) -> Self {
        Self {
            outbound: Some(outbound),
            shutdown,
        }
    }

    /// Queue a message; returns `false` once the channel is closed
    pub fn send(&self, message: ClientMessage) -> bool {
        self.outbound
            .as_ref()
            .is_some_and(|tx| tx.send(message).is_ok())
    }

    /// Close the channel. Safe to call more than once
    pub fn close(&mut self) {
        let was_open = self.outbound.take().is_some();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if was_open {
            tracing::debug!("transport closed");
        }
    }

    /// Whether messages can still be queued
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        self.close();
    }
}
