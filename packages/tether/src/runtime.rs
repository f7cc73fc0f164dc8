//! The app runtime: one context object owning every collaborator.
//!
//! Construct one [`AppRuntime`] at process entry and hand clones of the
//! `Arc` to whatever needs it. The runtime wires the transport into the
//! registry and correlator, routes inbound envelopes, and drives the
//! lifecycle:
//!
//! ```text
//!   Created ──start──▶ Started ──stop──▶ Stopped ──start──▶ Started
//!      │                  │                 │
//!      └──────purge───────┴──────purge──────┴──▶ Purged ──start──▶ Started
//! ```
//!
//! `stop` persists the cached app data, notifies `stop` handlers, and
//! cancels every background unit. `purge` does the same, notifies `purge`
//! handlers, then clears the registry and cache and detaches the transport.
//! Handlers registered before a purge never fire after it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actions::ActionManager;
use crate::cache::DataCache;
use crate::config::RuntimeConfig;
use crate::correlator::{Expect, RequestCorrelator};
use crate::envelope::{kinds, AppToHost, Envelope, HostToApp, LogLevel};
use crate::registry::{EventRegistry, NotifyReport, Subscription};
use crate::scheduler::{BackgroundScheduler, TaskHandle};
use crate::tasks::TaskManager;
use crate::transport::{Transport, TransportSlot};

/// Where the runtime is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed; no transport attached yet.
    Created,
    Started,
    Stopped,
    /// Registry and cache cleared, transport detached.
    Purged,
}

/// Context object for one app.
#[derive(Debug)]
pub struct AppRuntime {
    config: RuntimeConfig,
    registry: Arc<EventRegistry>,
    transport: TransportSlot,
    correlator: RequestCorrelator,
    cache: Arc<DataCache>,
    tasks: TaskManager,
    actions: ActionManager,
    scheduler: BackgroundScheduler,
    state: Mutex<LifecycleState>,
    stop_requested: AtomicBool,
}

impl AppRuntime {
    pub fn new(config: RuntimeConfig) -> Arc<Self> {
        let registry = Arc::new(EventRegistry::new());
        let transport = TransportSlot::new();
        let correlator = RequestCorrelator::new(registry.clone(), transport.clone())
            .with_default_timeout(config.request_timeout);
        let cache = Arc::new(DataCache::new(
            config.app_version.clone(),
            registry.clone(),
            correlator.clone(),
            config.fetch_timeout,
        ));
        let tasks = TaskManager::new(cache.clone(), correlator.clone());
        let actions = ActionManager::new(config.app_id.clone(), cache.clone(), correlator.clone());

        Arc::new(Self {
            config,
            registry,
            transport,
            correlator,
            cache,
            tasks,
            actions,
            scheduler: BackgroundScheduler::new(),
            state: Mutex::new(LifecycleState::Created),
            stop_requested: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    pub fn correlator(&self) -> &RequestCorrelator {
        &self.correlator
    }

    pub fn cache(&self) -> &DataCache {
        &self.cache
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    pub fn actions(&self) -> &ActionManager {
        &self.actions
    }

    pub fn scheduler(&self) -> &BackgroundScheduler {
        &self.scheduler
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, next: LifecycleState) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        debug!(from = ?*state, to = ?next, "lifecycle transition");
        *state = next;
    }

    /// True between a stop (or purge) and the next start. Background loops
    /// can poll this to wind down.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Register a handler for an inbound or local event kind.
    pub fn on<F, Fut>(&self, kind: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.registry.on(kind, handler)
    }

    /// Wait for the next envelope of a kind, bounded by the request timeout.
    pub async fn once(&self, expect: Expect) -> Option<Envelope> {
        self.correlator.once(expect, None).await
    }

    /// See [`RequestCorrelator::fetch`].
    pub async fn fetch(&self, outbound: AppToHost, expect: Option<Expect>, timeout: Option<Duration>) -> Option<Value> {
        self.correlator.fetch(outbound, expect, timeout).await
    }

    /// See [`RequestCorrelator::fetch_with_cancel`].
    pub async fn fetch_with_cancel(
        &self,
        outbound: AppToHost,
        expect: Option<Expect>,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Option<Value> {
        self.correlator
            .fetch_with_cancel(outbound, expect, timeout, cancel)
            .await
    }

    // =========================================================================
    // Host helpers
    // =========================================================================

    /// Forward a payload to the connected client.
    pub async fn send_to_client(&self, payload: Value) -> bool {
        self.correlator.send(AppToHost::Send(payload)).await
    }

    /// Forward a payload to another app on the same host.
    pub async fn send_to_app(&self, app_id: impl Into<String>, payload: Value) -> bool {
        self.correlator
            .send(AppToHost::ToApp {
                app: app_id.into(),
                payload,
            })
            .await
    }

    pub async fn open_url(&self, url: impl Into<String>) -> bool {
        self.correlator.send(AppToHost::Open(url.into())).await
    }

    /// Forward a log line to the host's log.
    pub async fn send_log(&self, level: LogLevel, message: impl Into<String>) -> bool {
        self.correlator
            .send(AppToHost::Log {
                level,
                message: message.into(),
            })
            .await
    }

    /// Look up a host config value. `None` if the host does not answer in time.
    ///
    /// The host's `config` reply must carry `name` as its `request`, which
    /// keeps concurrent lookups of different names apart.
    pub async fn get_config(&self, name: &str) -> Option<Value> {
        self.correlator
            .fetch(
                AppToHost::Get {
                    request: kinds::CONFIG.into(),
                    payload: Value::String(name.to_string()),
                },
                Some(Expect::kind(kinds::CONFIG).request(name)),
                None,
            )
            .await
    }

    /// Ask the host to prompt the user with `scheme`. `None` if nobody
    /// answers in time.
    pub async fn get_user_input(&self, scheme: Value) -> Option<Value> {
        self.correlator
            .fetch(
                AppToHost::Get {
                    request: kinds::INPUT.into(),
                    payload: scheme,
                },
                Some(Expect::kind(kinds::INPUT)),
                None,
            )
            .await
    }

    // =========================================================================
    // Background work
    // =========================================================================

    /// See [`BackgroundScheduler::schedule`]. Cancelled by stop and purge.
    pub fn schedule<F, Fut>(&self, unit: F, interval: Option<Duration>) -> TaskHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        self.scheduler.schedule(unit, interval)
    }

    /// See [`BackgroundScheduler::schedule_once`]. Cancelled by stop and purge.
    pub fn schedule_once<F, Fut>(&self, f: F, delay: Duration) -> TaskHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.scheduler.schedule_once(f, delay)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Attach `transport` and run the start transition.
    ///
    /// Returns false if any `start` handler failed; the failure is reported
    /// to the host but the runtime still counts as started.
    pub async fn start(&self, transport: Arc<dyn Transport>) -> bool {
        self.transport.attach(transport).await;
        self.resume().await
    }

    async fn resume(&self) -> bool {
        self.stop_requested.store(false, Ordering::SeqCst);
        self.set_state(LifecycleState::Started);

        let report = self.notify_lifecycle(kinds::START).await;
        info!(app_id = %self.config.app_id, handlers = report.invoked, "app started");
        self.report(kinds::START, report).await
    }

    /// Persist, notify `stop` handlers, and cancel background work.
    pub async fn stop(&self) -> bool {
        let report = self.wind_down().await;
        self.set_state(LifecycleState::Stopped);
        info!(app_id = %self.config.app_id, "app stopped");
        self.report(kinds::STOP, report).await
    }

    /// Stop, notify `purge` handlers, then drop every handler, cached value,
    /// and the transport.
    pub async fn purge(&self) -> bool {
        let stop_report = self.wind_down().await;
        let purge_report = self.notify_lifecycle(kinds::PURGE).await;
        let report = NotifyReport {
            invoked: stop_report.invoked + purge_report.invoked,
            failed: stop_report.failed + purge_report.failed,
        };
        let success = self.report(kinds::PURGE, report).await;

        self.registry.clear();
        self.cache.clear();
        self.tasks.reset();
        self.transport.detach().await;
        self.set_state(LifecycleState::Purged);
        info!(app_id = %self.config.app_id, "app purged");
        success
    }

    async fn wind_down(&self) -> NotifyReport {
        if self.cache.persist().await {
            debug!("persisted app data before stopping");
        }
        let report = self.notify_lifecycle(kinds::STOP).await;
        self.stop_requested.store(true, Ordering::SeqCst);
        self.scheduler.cancel_all();
        report
    }

    async fn notify_lifecycle(&self, kind: &str) -> NotifyReport {
        self.registry.notify(&Envelope::new(kind, Value::Null)).await
    }

    async fn report(&self, transition: &str, report: NotifyReport) -> bool {
        let success = report.all_succeeded();
        let error = (!success).then(|| {
            format!(
                "{} of {} {transition} handlers failed",
                report.failed, report.invoked
            )
        });
        if let Some(error) = &error {
            warn!(transition, error = %error, "lifecycle handlers failed");
        }
        self.correlator
            .send(AppToHost::Lifecycle {
                request: transition.into(),
                success,
                error,
            })
            .await;
        success
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Route inbound envelopes until the channel closes.
    ///
    /// Cache updates are applied before the next envelope is read. Handlers
    /// and lifecycle transitions run on spawned tasks, so a handler may
    /// itself await a correlated response without stalling this loop.
    pub async fn serve(self: Arc<Self>, mut inbound: mpsc::UnboundedReceiver<Envelope>) {
        while let Some(envelope) = inbound.recv().await {
            self.dispatch(envelope);
        }
        debug!("inbound channel closed");
    }

    /// Route one inbound envelope.
    pub fn dispatch(self: &Arc<Self>, envelope: Envelope) {
        debug!(kind = %envelope.kind, request = ?envelope.request, "inbound envelope");

        match HostToApp::from(envelope.clone()) {
            HostToApp::Data(payload) => {
                self.cache.apply_host_data(payload);
                self.spawn_notify(&envelope);
            }
            HostToApp::AppData(payload) => {
                self.cache.apply_host_app_data(payload);
                self.spawn_notify(&envelope);
            }
            HostToApp::Settings(payload) => {
                self.cache.apply_host_settings(payload);
                self.spawn_notify(&envelope);
            }
            HostToApp::Message(_) | HostToApp::Config(_) | HostToApp::Input(_) | HostToApp::Custom(_) => {
                self.spawn_notify(&envelope);
            }
            HostToApp::Start => {
                let runtime = self.clone();
                tokio::spawn(async move {
                    runtime.resume().await;
                });
            }
            HostToApp::Stop => {
                let runtime = self.clone();
                tokio::spawn(async move {
                    runtime.stop().await;
                });
            }
            HostToApp::Purge => {
                let runtime = self.clone();
                tokio::spawn(async move {
                    runtime.purge().await;
                });
            }
        }
    }

    fn spawn_notify(&self, envelope: &Envelope) {
        // Handlers are invoked here, in arrival order; only their completion is deferred.
        tokio::spawn(self.registry.notify(envelope));
    }
}
