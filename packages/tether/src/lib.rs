//! # Tether
//!
//! The plugin-side runtime for apps that talk to a host supervisor over a
//! single asynchronous message channel.
//!
//! ## Architecture
//!
//! ```text
//! host ──inbound──▶ AppRuntime::serve
//!                      │
//!                      ├─► DataCache (data / appData / settings)
//!                      │
//!                      └─► EventRegistry.notify ──► handlers
//!                                   │                  once-waiters
//!                                   ▼
//!                         RequestCorrelator ◀── fetch(outbound, expect)
//!                                   │
//! host ◀──outbound── TransportSlot ◀┘◀── DataCache / TaskManager / ActionManager
//! ```
//!
//! ## Key Invariants
//!
//! 1. **One resolution per wait** - a correlated read resolves by event,
//!    timeout, or cancellation, exactly once, and leaves no handler behind
//! 2. **Validate before send** - settings, tasks, steps, actions, and keys
//!    are checked before they are cached or cross the channel
//! 3. **Merge, never replace** - local saves merge into the cached app data
//! 4. **Only validation errors escape** - transport failures, timeouts, and
//!    handler errors are logged and degraded to `None`, `false`, or a no-op
//! 5. **Teardown is total** - stop cancels all background work; purge also
//!    clears every handler and cached value
//!
//! ## Example
//!
//! ```ignore
//! use tether::{AppRuntime, ChannelTransport, RuntimeConfig};
//!
//! let runtime = AppRuntime::new(RuntimeConfig::from_env()?);
//!
//! runtime.on("message", |envelope| async move {
//!     tracing::info!(payload = %envelope.payload, "client says hi");
//!     Ok(())
//! });
//!
//! let (transport, host) = ChannelTransport::pair();
//! let (to_app, inbound) = tokio::sync::mpsc::unbounded_channel();
//! tokio::spawn(runtime.clone().serve(inbound));
//! runtime.start(Arc::new(transport)).await;
//!
//! runtime.cache().add_settings(json!({
//!     "id": "units", "type": "select", "label": "Units", "value": "metric",
//!     "options": [{ "label": "Metric", "value": "metric" }, { "label": "Imperial", "value": "imperial" }]
//! }), true).await?;
//! ```

mod actions;
mod cache;
mod config;
mod correlator;
mod envelope;
mod error;
mod registry;
mod runtime;
mod scheduler;
mod tasks;
mod transport;

pub mod logging;
pub mod model;
pub mod validate;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// End-to-end scenarios (test-only)
#[cfg(test)]
mod scenario_tests;

pub use actions::{ActionManager, ActionTrigger};
pub use cache::{DataCache, SettingsBatch};
pub use config::RuntimeConfig;
pub use correlator::{first_of, Expect, RequestCorrelator, Resolution, DEFAULT_REQUEST_TIMEOUT};
pub use envelope::{kinds, AppToHost, Envelope, HostToApp, LogLevel};
pub use error::{EntityKind, TetherError, TransportError, ValidationError};
pub use registry::{EventRegistry, HandlerFuture, HandlerId, NotifyReport, OnceWaiter, Subscription};
pub use runtime::{AppRuntime, LifecycleState};
pub use scheduler::{BackgroundScheduler, TaskHandle};
pub use tasks::TaskManager;
pub use transport::{ChannelTransport, HostEndpoint, Transport, TransportSlot};
pub use validate::{Validated, ValidationWarning};

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
