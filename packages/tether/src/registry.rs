//! Event registry: ordered handler lists keyed by event kind.
//!
//! # Guarantees
//!
//! - **Registration order**: handlers for one kind are invoked in the order
//!   they were registered, then awaited concurrently.
//! - **Isolation**: a handler that errors or panics is logged; siblings still
//!   run and the caller of [`EventRegistry::notify`] never sees the failure.
//! - **Identity**: every `on` returns a [`Subscription`] naming exactly that
//!   registration. Registering the same closure twice yields two handlers
//!   that both fire.
//! - **At-most-once**: a [`OnceWaiter`] deregisters itself synchronously on
//!   the first qualifying envelope, before any asynchronous continuation, so
//!   a duplicate delivery cannot resolve it twice.
//!
//! # Example
//!
//! ```ignore
//! let registry = Arc::new(EventRegistry::new());
//!
//! let sub = registry.on("weather", |envelope| async move {
//!     println!("forecast: {}", envelope.payload);
//!     Ok(())
//! });
//!
//! registry.notify(&Envelope::new("weather", json!({ "temp": 21 }))).await;
//! sub.unsubscribe();
//! ```

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use smallvec::SmallVec;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::envelope::Envelope;

/// Future returned by a handler.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

type HandlerFn = Arc<dyn Fn(Envelope) -> HandlerFuture + Send + Sync>;

/// Identity of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

struct HandlerEntry {
    id: HandlerId,
    handler: HandlerFn,
}

/// What happened during one [`EventRegistry::notify`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyReport {
    /// Handlers invoked.
    pub invoked: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

impl NotifyReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Mapping from event kind to its ordered handler list.
#[derive(Default)]
pub struct EventRegistry {
    handlers: DashMap<String, SmallVec<[HandlerEntry; 4]>>,
    next_id: AtomicU64,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn insert(&self, kind: &str, id: HandlerId, handler: HandlerFn) {
        self.handlers
            .entry(kind.to_owned())
            .or_default()
            .push(HandlerEntry { id, handler });
    }

    /// Append a handler to `kind`'s list.
    ///
    /// Never fails. The returned [`Subscription`] removes exactly this
    /// registration; dropping it leaves the handler in place.
    pub fn on<F, Fut>(self: &Arc<Self>, kind: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let kind = kind.into();
        let id = self.next_id();
        self.insert(&kind, id, Arc::new(move |envelope| handler(envelope).boxed()));
        debug!(kind = %kind, ?id, "handler registered");
        Subscription {
            kind,
            id,
            registry: Arc::downgrade(self),
        }
    }

    /// Remove a handler by identity. Returns false if it was not registered.
    pub fn off(&self, kind: &str, id: HandlerId) -> bool {
        let Some(mut list) = self.handlers.get_mut(kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|entry| entry.id != id);
        before != list.len()
    }

    /// Invoke every handler for the envelope's kind.
    ///
    /// Handlers are called synchronously in registration order before this
    /// function returns; the returned future drives them concurrently and
    /// resolves once all have finished. Failures are logged and counted,
    /// never propagated.
    pub fn notify(&self, envelope: &Envelope) -> BoxFuture<'static, NotifyReport> {
        // Snapshot so handlers may call `on`/`off` without contending the map.
        let handlers: SmallVec<[HandlerFn; 4]> = match self.handlers.get(&envelope.kind) {
            Some(list) => list.iter().map(|entry| entry.handler.clone()).collect(),
            None => SmallVec::new(),
        };

        let kind = envelope.kind.clone();
        let invoked = handlers.len();
        let mut failed = 0;
        let mut pending = Vec::with_capacity(invoked);

        for handler in handlers {
            let envelope = envelope.clone();
            match catch_unwind(AssertUnwindSafe(|| handler(envelope))) {
                Ok(future) => pending.push(AssertUnwindSafe(future).catch_unwind()),
                Err(panic_info) => {
                    error!(kind = %kind, panic = %extract_panic_message(&panic_info), "event handler panicked");
                    failed += 1;
                }
            }
        }

        async move {
            for outcome in join_all(pending).await {
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(kind = %kind, error = %e, "event handler failed");
                        failed += 1;
                    }
                    Err(panic_info) => {
                        error!(kind = %kind, panic = %extract_panic_message(&panic_info), "event handler panicked");
                        failed += 1;
                    }
                }
            }
            NotifyReport { invoked, failed }
        }
        .boxed()
    }

    /// Wait for the next envelope of `kind`, optionally filtered on its
    /// `request` field.
    ///
    /// The waiter has no timeout of its own; wrap it with
    /// [`crate::correlator::first_of`]. Dropping the
    /// waiter deregisters it.
    pub fn once(self: &Arc<Self>, kind: impl Into<String>, request: Option<String>) -> OnceWaiter {
        let kind = kind.into();
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let registry = Arc::downgrade(self);
        let handler_kind = kind.clone();

        let handler: HandlerFn = Arc::new(move |envelope: Envelope| {
            if envelope.matches_request(request.as_deref()) {
                let sender = slot
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .take();
                if let Some(sender) = sender {
                    // Deregister before resolving so a second delivery finds nothing.
                    if let Some(registry) = registry.upgrade() {
                        registry.off(&handler_kind, id);
                    }
                    let _ = sender.send(envelope);
                }
            }
            futures::future::ready(Ok(())).boxed()
        });

        self.insert(&kind, id, handler);
        OnceWaiter {
            receiver: rx,
            subscription: Subscription {
                kind,
                id,
                registry: Arc::downgrade(self),
            },
        }
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: &str) -> usize {
        self.handlers.get(kind).map(|list| list.len()).unwrap_or(0)
    }

    /// Number of handlers across all kinds.
    pub fn total_handlers(&self) -> usize {
        self.handlers.iter().map(|list| list.len()).sum()
    }

    /// Empty every handler list. Kinds stay known; their lists become empty.
    pub fn clear(&self) {
        for mut list in self.handlers.iter_mut() {
            list.clear();
        }
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("kinds", &self.handlers.len())
            .field("handlers", &self.total_handlers())
            .finish()
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// Handle to one registration, returned by [`EventRegistry::on`].
#[derive(Debug, Clone)]
pub struct Subscription {
    kind: String,
    id: HandlerId,
    registry: Weak<EventRegistry>,
}

impl Subscription {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Remove this handler. Idempotent; returns true only the first time.
    pub fn unsubscribe(&self) -> bool {
        self.registry
            .upgrade()
            .map(|registry| registry.off(&self.kind, self.id))
            .unwrap_or(false)
    }
}

// =============================================================================
// Once Waiter
// =============================================================================

/// Resolves with the first qualifying envelope, or `None` if the registry
/// dropped the waiter (for example on purge).
///
/// Dropping an unresolved waiter removes its handler, so an abandoned wait
/// never leaks a registration.
#[derive(Debug)]
pub struct OnceWaiter {
    receiver: oneshot::Receiver<Envelope>,
    subscription: Subscription,
}

impl OnceWaiter {
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }
}

impl Future for OnceWaiter {
    type Output = Option<Envelope>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(Result::ok)
    }
}

impl Drop for OnceWaiter {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

/// Extract a readable message from a panic payload.
pub(crate) fn extract_panic_message(panic_info: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
