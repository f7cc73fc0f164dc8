//! Request/response correlation over the host channel.
//!
//! # Important Semantics
//!
//! A correlated read does NOT guarantee the host answers. The correlator
//! registers a waiter, sends the request, and races the waiter against a
//! timer. Whichever finishes first wins:
//!
//! - event first: the timer is dropped with the race
//! - timer first: the waiter is dropped, which deregisters its handler
//!
//! Either way the registry is back at its pre-call handler count, and the
//! caller gets `None` for "unavailable" rather than an error.
//!
//! # Example
//!
//! ```ignore
//! let settings = correlator
//!     .fetch(
//!         AppToHost::Get { request: "settings".into(), payload: Value::Null },
//!         Some(Expect::kind("settings")),
//!         None,
//!     )
//!     .await;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::envelope::{AppToHost, Envelope};
use crate::registry::EventRegistry;
use crate::transport::TransportSlot;

/// Default bound on every correlated read.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

/// The inbound envelope a request waits for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expect {
    pub kind: String,
    pub request: Option<String>,
}

impl Expect {
    /// Match any envelope of `kind`.
    pub fn kind(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            request: None,
        }
    }

    /// Additionally require the envelope's `request` to equal `request`.
    pub fn request(mut self, request: impl Into<String>) -> Self {
        self.request = Some(request.into());
        self
    }
}

/// How a [`first_of`] race ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    /// The awaited event arrived first.
    Event(T),
    /// The timer elapsed first.
    TimedOut,
    /// The cancellation token fired first.
    Cancelled,
    /// The waiter was dropped by its registry before anything arrived.
    Abandoned,
}

impl<T> Resolution<T> {
    pub fn into_event(self) -> Option<T> {
        match self {
            Resolution::Event(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Resolution::TimedOut)
    }
}

/// Race an event future against a timeout and an optional cancellation token.
///
/// The losing branches are dropped when this returns, so a waiter passed in
/// deregisters itself and no timer outlives the call.
pub async fn first_of<T, F>(
    event: F,
    timeout: Duration,
    cancel: Option<&CancellationToken>,
) -> Resolution<T>
where
    F: Future<Output = Option<T>>,
{
    let cancelled = async {
        match cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;
        outcome = event => match outcome {
            Some(value) => Resolution::Event(value),
            None => Resolution::Abandoned,
        },
        _ = cancelled => Resolution::Cancelled,
        _ = tokio::time::sleep(timeout) => Resolution::TimedOut,
    }
}

/// Issues outbound envelopes and correlates their inbound responses.
#[derive(Debug, Clone)]
pub struct RequestCorrelator {
    registry: Arc<EventRegistry>,
    transport: TransportSlot,
    default_timeout: Duration,
}

impl RequestCorrelator {
    pub fn new(registry: Arc<EventRegistry>, transport: TransportSlot) -> Self {
        Self {
            registry,
            transport,
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Send without waiting for a response. Returns whether the transport
    /// accepted the envelope; failures are already logged.
    pub async fn send(&self, outbound: impl Into<Envelope>) -> bool {
        self.transport.send(outbound.into()).await.is_ok()
    }

    /// Send `outbound` and, if `expect` is given, wait for the matching
    /// inbound payload.
    ///
    /// Resolves to `None` when `expect` is omitted, when the send fails, or
    /// when nothing matching arrives within `timeout` (default 5000ms).
    pub async fn fetch(
        &self,
        outbound: AppToHost,
        expect: Option<Expect>,
        timeout: Option<Duration>,
    ) -> Option<Value> {
        self.fetch_inner(outbound, expect, timeout, None).await
    }

    /// Like [`fetch`](Self::fetch), but also resolves to `None` as soon as
    /// `cancel` fires.
    pub async fn fetch_with_cancel(
        &self,
        outbound: AppToHost,
        expect: Option<Expect>,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Option<Value> {
        self.fetch_inner(outbound, expect, timeout, Some(cancel)).await
    }

    /// Wait for an inbound envelope without sending anything.
    pub async fn once(&self, expect: Expect, timeout: Option<Duration>) -> Option<Envelope> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let waiter = self.registry.once(expect.kind.clone(), expect.request.clone());
        match first_of(waiter, timeout, None).await {
            Resolution::Event(envelope) => Some(envelope),
            other => {
                log_unresolved(&expect, timeout, &other);
                None
            }
        }
    }

    async fn fetch_inner(
        &self,
        outbound: AppToHost,
        expect: Option<Expect>,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> Option<Value> {
        let envelope = outbound.into_envelope();

        let Some(expect) = expect else {
            let _ = self.transport.send(envelope).await;
            return None;
        };

        // Register before sending so a fast response cannot slip past.
        let waiter = self.registry.once(expect.kind.clone(), expect.request.clone());

        debug!(kind = %envelope.kind, request = ?envelope.request, awaiting = %expect.kind, "sending correlated request");
        if self.transport.send(envelope).await.is_err() {
            return None;
        }

        let timeout = timeout.unwrap_or(self.default_timeout);
        match first_of(waiter, timeout, cancel).await {
            Resolution::Event(response) => Some(response.payload),
            other => {
                log_unresolved(&expect, timeout, &other);
                None
            }
        }
    }
}

fn log_unresolved<T>(expect: &Expect, timeout: Duration, resolution: &Resolution<T>) {
    match resolution {
        Resolution::TimedOut => warn!(
            kind = %expect.kind,
            request = ?expect.request,
            timeout_ms = timeout.as_millis() as u64,
            "correlated request timed out"
        ),
        Resolution::Cancelled => debug!(kind = %expect.kind, "correlated request cancelled"),
        Resolution::Abandoned => debug!(kind = %expect.kind, "correlated request abandoned"),
        Resolution::Event(_) => {}
    }
}
