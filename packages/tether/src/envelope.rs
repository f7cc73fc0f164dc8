//! Wire envelopes and the closed message unions for each direction.
//!
//! Every unit crossing the transport is an [`Envelope`]:
//!
//! ```text
//! { "type": "get", "request": "settings", "payload": ... }
//! ```
//!
//! `type` selects the handler set and `request` is an optional secondary
//! discriminator used to correlate a response with a sub-operation.
//!
//! Plugin code rarely builds envelopes by hand. Outbound traffic is expressed
//! as [`AppToHost`] and inbound traffic is decoded into [`HostToApp`], so the
//! runtime routes with an exhaustive `match` instead of probing payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound kinds the runtime treats specially.
pub mod kinds {
    pub const DATA: &str = "data";
    pub const APP_DATA: &str = "appData";
    pub const SETTINGS: &str = "settings";
    pub const MESSAGE: &str = "message";
    pub const CONFIG: &str = "config";
    pub const INPUT: &str = "input";
    pub const START: &str = "start";
    pub const STOP: &str = "stop";
    pub const PURGE: &str = "purge";
}

/// The unit crossing the transport boundary, in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Envelope {
    /// Create an envelope with no request discriminator.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            request: None,
            payload,
        }
    }

    /// Set the request discriminator.
    pub fn with_request(mut self, request: impl Into<String>) -> Self {
        self.request = Some(request.into());
        self
    }

    /// Returns true if this envelope satisfies an optional request filter.
    ///
    /// A `None` filter matches every envelope.
    pub fn matches_request(&self, filter: Option<&str>) -> bool {
        match filter {
            None => true,
            Some(expected) => self.request.as_deref() == Some(expected),
        }
    }
}

// =============================================================================
// Host -> App
// =============================================================================

/// Inbound traffic, decoded by `(type, request)`.
#[derive(Debug, Clone, PartialEq)]
pub enum HostToApp {
    /// The host pushed the app's `data` map.
    Data(Value),
    /// The host pushed the full persisted app data.
    AppData(Value),
    /// The host pushed settings (full map or changed entries).
    Settings(Value),
    /// A message from the connected client.
    Message(Envelope),
    /// Response to a config lookup.
    Config(Envelope),
    /// Response to a user input request.
    Input(Envelope),
    Start,
    Stop,
    Purge,
    /// Anything else, forwarded verbatim to the event registry.
    Custom(Envelope),
}

impl From<Envelope> for HostToApp {
    fn from(envelope: Envelope) -> Self {
        match envelope.kind.as_str() {
            kinds::DATA => HostToApp::Data(envelope.payload),
            kinds::APP_DATA => HostToApp::AppData(envelope.payload),
            kinds::SETTINGS => HostToApp::Settings(envelope.payload),
            kinds::MESSAGE => HostToApp::Message(envelope),
            kinds::CONFIG => HostToApp::Config(envelope),
            kinds::INPUT => HostToApp::Input(envelope),
            kinds::START => HostToApp::Start,
            kinds::STOP => HostToApp::Stop,
            kinds::PURGE => HostToApp::Purge,
            _ => HostToApp::Custom(envelope),
        }
    }
}

// =============================================================================
// App -> Host
// =============================================================================

/// Severity of a log line forwarded to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        }
    }
}

/// Outbound traffic. Encoded into an [`Envelope`] by [`AppToHost::into_envelope`].
#[derive(Debug, Clone, PartialEq)]
pub enum AppToHost {
    Get {
        request: String,
        payload: Value,
    },
    Set {
        request: String,
        payload: Value,
    },
    Delete {
        request: String,
        ids: Vec<String>,
    },
    /// Forward a payload to the connected client.
    Send(Value),
    /// Forward a payload to another app on the same host.
    ToApp {
        app: String,
        payload: Value,
    },
    Log {
        level: LogLevel,
        message: String,
    },
    Action {
        request: String,
        payload: Value,
    },
    Key {
        request: String,
        payload: Value,
    },
    Task {
        request: String,
        payload: Value,
    },
    Step {
        request: String,
        payload: Value,
    },
    /// Ask the host to open a URL.
    Open(String),
    /// Report the outcome of a start/stop/purge transition.
    Lifecycle {
        request: String,
        success: bool,
        error: Option<String>,
    },
}

impl AppToHost {
    pub fn into_envelope(self) -> Envelope {
        match self {
            AppToHost::Get { request, payload } => Envelope::new("get", payload).with_request(request),
            AppToHost::Set { request, payload } => Envelope::new("set", payload).with_request(request),
            AppToHost::Delete { request, ids } => {
                Envelope::new("delete", Value::from(ids)).with_request(request)
            }
            AppToHost::Send(payload) => Envelope::new("send", payload),
            AppToHost::ToApp { app, payload } => Envelope::new("toApp", payload).with_request(app),
            AppToHost::Log { level, message } => {
                Envelope::new("log", Value::String(message)).with_request(level.as_str())
            }
            AppToHost::Action { request, payload } => {
                Envelope::new("action", payload).with_request(request)
            }
            AppToHost::Key { request, payload } => Envelope::new("key", payload).with_request(request),
            AppToHost::Task { request, payload } => Envelope::new("task", payload).with_request(request),
            AppToHost::Step { request, payload } => Envelope::new("step", payload).with_request(request),
            AppToHost::Open(url) => Envelope::new("open", Value::String(url)),
            AppToHost::Lifecycle {
                request,
                success,
                error,
            } => Envelope::new(
                "lifecycle",
                serde_json::json!({ "success": success, "error": error }),
            )
            .with_request(request),
        }
    }
}

impl From<AppToHost> for Envelope {
    fn from(message: AppToHost) -> Self {
        message.into_envelope()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_wire_shape_uses_type_key() {
        let envelope = Envelope::new("get", Value::Null).with_request("settings");
        let wire = serde_json::to_value(&envelope).unwrap();
        assert_eq!(wire, json!({ "type": "get", "request": "settings" }));
    }

    #[test]
    fn test_envelope_decodes_without_request_or_payload() {
        let envelope: Envelope = serde_json::from_value(json!({ "type": "stop" })).unwrap();
        assert_eq!(envelope.kind, "stop");
        assert_eq!(envelope.request, None);
        assert!(envelope.payload.is_null());
    }

    #[test]
    fn test_matches_request_filter() {
        let envelope = Envelope::new("get", Value::Null).with_request("settings");
        assert!(envelope.matches_request(None));
        assert!(envelope.matches_request(Some("settings")));
        assert!(!envelope.matches_request(Some("data")));

        let bare = Envelope::new("get", Value::Null);
        assert!(!bare.matches_request(Some("settings")));
    }

    #[test]
    fn test_host_to_app_routes_known_kinds() {
        let decoded = HostToApp::from(Envelope::new("data", json!({ "a": 1 })));
        assert_eq!(decoded, HostToApp::Data(json!({ "a": 1 })));

        assert_eq!(HostToApp::from(Envelope::new("purge", Value::Null)), HostToApp::Purge);
    }

    #[test]
    fn test_host_to_app_forwards_unknown_kinds_verbatim() {
        let envelope = Envelope::new("weather", json!({ "temp": 21 })).with_request("update");
        match HostToApp::from(envelope.clone()) {
            HostToApp::Custom(forwarded) => assert_eq!(forwarded, envelope),
            other => panic!("Expected Custom, got {:?}", other),
        }
    }

    #[test]
    fn test_app_to_host_delete_carries_ids() {
        let envelope = AppToHost::Delete {
            request: "settings".into(),
            ids: vec!["vol".into(), "theme".into()],
        }
        .into_envelope();
        assert_eq!(envelope.kind, "delete");
        assert_eq!(envelope.request.as_deref(), Some("settings"));
        assert_eq!(envelope.payload, json!(["vol", "theme"]));
    }

    #[test]
    fn test_app_to_host_log_uses_level_as_request() {
        let envelope: Envelope = AppToHost::Log {
            level: LogLevel::Warn,
            message: "slow host".into(),
        }
        .into();
        assert_eq!(envelope.kind, "log");
        assert_eq!(envelope.request.as_deref(), Some("warn"));
        assert_eq!(envelope.payload, json!("slow host"));
    }

    #[test]
    fn test_lifecycle_report_payload() {
        let envelope = AppToHost::Lifecycle {
            request: "start".into(),
            success: false,
            error: Some("handler failed".into()),
        }
        .into_envelope();
        assert_eq!(envelope.kind, "lifecycle");
        assert_eq!(
            envelope.payload,
            json!({ "success": false, "error": "handler failed" })
        );
    }
}
