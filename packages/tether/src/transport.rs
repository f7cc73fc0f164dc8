//! The channel to the host.
//!
//! The runtime needs exactly two things from a transport: a way to send an
//! envelope (with success/failure visible), and a single inbound stream.
//! Sending is the [`Transport`] trait; the inbound stream is whatever
//! `mpsc::UnboundedReceiver<Envelope>` is handed to
//! [`AppRuntime::serve`](crate::AppRuntime::serve).
//!
//! [`ChannelTransport`] is the in-process implementation: one tokio channel
//! per direction.
//!
//! ```ignore
//! let (transport, mut host) = ChannelTransport::pair();
//! let (to_app, inbound) = tokio::sync::mpsc::unbounded_channel();
//!
//! runtime.start(Arc::new(transport)).await;
//! tokio::spawn(runtime.clone().serve(inbound));
//!
//! to_app.send(Envelope::new("data", json!({ "city": "Oslo" })))?;
//! let outbound = host.recv().await;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::error;

use crate::envelope::Envelope;
use crate::error::TransportError;

/// Outbound half of the host channel.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Hand an envelope to the host.
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError>;
}

// =============================================================================
// Channel Transport
// =============================================================================

/// Transport backed by an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    sender: mpsc::UnboundedSender<Envelope>,
}

/// Host side of a [`ChannelTransport`]: receives what the app sends.
#[derive(Debug)]
pub struct HostEndpoint {
    receiver: mpsc::UnboundedReceiver<Envelope>,
}

impl ChannelTransport {
    /// Create a transport and the host endpoint that observes it.
    pub fn pair() -> (Self, HostEndpoint) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, HostEndpoint { receiver })
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.sender.send(envelope).map_err(|_| TransportError::Closed)
    }
}

impl HostEndpoint {
    /// Wait for the next envelope from the app. `None` once the app side is dropped.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }

    /// Take an envelope if one is already queued.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.receiver.try_recv().ok()
    }

    /// Drain everything currently queued.
    pub fn drain(&mut self) -> Vec<Envelope> {
        let mut drained = Vec::new();
        while let Ok(envelope) = self.receiver.try_recv() {
            drained.push(envelope);
        }
        drained
    }
}

// =============================================================================
// Transport Slot
// =============================================================================

/// The currently attached transport, shared by every component that sends.
///
/// Empty before `start` and after `purge`. Sending through an empty slot is
/// logged and reported as [`TransportError::NotAttached`]; callers degrade
/// it to a no-op.
#[derive(Default, Clone)]
pub struct TransportSlot {
    inner: Arc<RwLock<Option<Arc<dyn Transport>>>>,
}

impl TransportSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn attach(&self, transport: Arc<dyn Transport>) {
        *self.inner.write().await = Some(transport);
    }

    pub async fn detach(&self) {
        *self.inner.write().await = None;
    }

    pub async fn is_attached(&self) -> bool {
        self.inner.read().await.is_some()
    }

    /// Send through the attached transport.
    pub async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        // Clone the Arc so the lock is not held across the send.
        let transport = self.inner.read().await.clone();
        let Some(transport) = transport else {
            error!(kind = %envelope.kind, request = ?envelope.request, "no transport attached, dropping envelope");
            return Err(TransportError::NotAttached);
        };
        transport.send(envelope).await.inspect_err(|e| {
            error!(error = %e, "failed to send envelope to host");
        })
    }
}

impl std::fmt::Debug for TransportSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSlot").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_transport_delivers_to_host() {
        let (transport, mut host) = ChannelTransport::pair();
        transport
            .send(Envelope::new("send", json!({ "hello": "client" })))
            .await
            .unwrap();

        let received = host.recv().await.unwrap();
        assert_eq!(received.kind, "send");
        assert_eq!(received.payload, json!({ "hello": "client" }));
    }

    #[tokio::test]
    async fn test_channel_transport_reports_closed_host() {
        let (transport, host) = ChannelTransport::pair();
        drop(host);

        let result = transport.send(Envelope::new("send", json!(null))).await;
        assert_eq!(result, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_empty_slot_reports_not_attached() {
        let slot = TransportSlot::new();
        assert!(!slot.is_attached().await);

        let result = slot.send(Envelope::new("log", json!("hi"))).await;
        assert_eq!(result, Err(TransportError::NotAttached));
    }

    #[tokio::test]
    async fn test_slot_attach_and_detach() {
        let slot = TransportSlot::new();
        let (transport, mut host) = ChannelTransport::pair();

        slot.attach(Arc::new(transport)).await;
        slot.send(Envelope::new("open", json!("https://example.com")))
            .await
            .unwrap();
        assert_eq!(host.drain().len(), 1);

        slot.detach().await;
        assert!(slot.send(Envelope::new("open", json!(null))).await.is_err());
    }
}
