//! Test doubles for driving a runtime without a real host.
//!
//! Enabled for this crate's tests and, for downstream crates, behind the
//! `testing` feature.
//!
//! ```ignore
//! let mut harness = HostHarness::start(RuntimeConfig::new("weather")).await;
//! harness.push(Envelope::new("data", json!({ "city": "Oslo" })));
//! let sent = harness.expect_outbound("set").await;
//! ```

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::subscriber::DefaultGuard;

use crate::config::RuntimeConfig;
use crate::envelope::Envelope;
use crate::error::TransportError;
use crate::runtime::AppRuntime;
use crate::transport::{ChannelTransport, HostEndpoint, Transport};

/// Transport that records every envelope and can be switched to fail.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<Envelope>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later send fail with [`TransportError::Rejected`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Everything sent so far.
    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Everything sent so far with the given `type`.
    pub fn sent_of_kind(&self, kind: &str) -> Vec<Envelope> {
        self.sent()
            .into_iter()
            .filter(|envelope| envelope.kind == kind)
            .collect()
    }

    /// Take and clear the record.
    pub fn take(&self) -> Vec<Envelope> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(|p| p.into_inner()))
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("recording transport set to fail".into()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(envelope);
        Ok(())
    }
}

/// A started runtime wired to an in-process host.
///
/// `push` plays the host sending inbound traffic; `host` observes what the
/// app sends back.
pub struct HostHarness {
    pub runtime: Arc<AppRuntime>,
    pub host: HostEndpoint,
    inbound: mpsc::UnboundedSender<Envelope>,
    serve: JoinHandle<()>,
}

impl HostHarness {
    /// Build a runtime, start serving inbound traffic, and run `start`.
    pub async fn start(config: RuntimeConfig) -> Self {
        let runtime = AppRuntime::new(config);
        Self::start_with(runtime).await
    }

    /// Like [`start`](Self::start) for a runtime that already has handlers.
    pub async fn start_with(runtime: Arc<AppRuntime>) -> Self {
        let (transport, host) = ChannelTransport::pair();
        let (inbound, receiver) = mpsc::unbounded_channel();
        let serve = tokio::spawn(runtime.clone().serve(receiver));
        runtime.start(Arc::new(transport)).await;
        Self {
            runtime,
            host,
            inbound,
            serve,
        }
    }

    /// Deliver an envelope as if the host sent it. Returns false once the
    /// serve loop has ended.
    pub fn push(&self, envelope: Envelope) -> bool {
        self.inbound.send(envelope).is_ok()
    }

    /// Wait up to one second for the next outbound envelope of `kind`,
    /// discarding others.
    pub async fn expect_outbound(&mut self, kind: &str) -> Option<Envelope> {
        let host = &mut self.host;
        tokio::time::timeout(Duration::from_secs(1), async {
            while let Some(envelope) = host.recv().await {
                if envelope.kind == kind {
                    return Some(envelope);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
    }

    /// Let spawned handlers and the serve loop make progress.
    pub async fn settle(&self) {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }
}

impl Drop for HostHarness {
    fn drop(&mut self) {
        self.serve.abort();
    }
}

/// Formatted log output captured from the current thread.
///
/// Install at the top of a current-thread test; tasks spawned on that
/// runtime log into it too. Dropping it restores the previous subscriber.
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    _guard: DefaultGuard,
}

struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LogCapture {
    pub fn install() -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || CaptureWriter(writer.clone()))
            .finish();
        Self {
            buffer,
            _guard: tracing::subscriber::set_default(subscriber),
        }
    }

    /// Everything logged so far.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap_or_else(|p| p.into_inner())).into_owned()
    }

    /// How many times `message` appears in the captured output.
    pub fn count(&self, message: &str) -> usize {
        self.contents().matches(message).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_recording_transport_records_and_fails_on_demand() {
        let transport = RecordingTransport::new();
        transport.send(Envelope::new("send", json!(1))).await.unwrap();
        assert_eq!(transport.sent_of_kind("send").len(), 1);

        transport.set_failing(true);
        let result = transport.send(Envelope::new("send", json!(2))).await;
        assert!(matches!(result, Err(TransportError::Rejected(_))));
        assert_eq!(transport.take().len(), 1);
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_log_capture_sees_only_its_own_thread() {
        let logs = LogCapture::install();
        tracing::warn!(setting_id = "vol", "overwriting existing setting");
        std::thread::spawn(|| tracing::warn!("overwriting existing setting"))
            .join()
            .unwrap();

        assert_eq!(logs.count("overwriting existing setting"), 1);
        assert!(logs.contents().contains("vol"));
    }

    #[tokio::test]
    async fn test_harness_reports_start() {
        let mut harness = HostHarness::start(RuntimeConfig::new("weather")).await;
        let report = harness.expect_outbound("lifecycle").await.unwrap();
        assert_eq!(report.request.as_deref(), Some("start"));
    }
}
