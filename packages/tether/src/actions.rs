//! Actions and key bindings the app exposes to the host.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::cache::DataCache;
use crate::correlator::RequestCorrelator;
use crate::envelope::AppToHost;
use crate::error::TetherError;
use crate::model::{Action, Key};
use crate::validate::{validate_action, validate_key};

/// A request to run an action, possibly one owned by another app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionTrigger {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ActionTrigger {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: None,
            value: None,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn from_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Registers, updates, and removes actions and keys for one app.
#[derive(Debug)]
pub struct ActionManager {
    app_id: String,
    cache: Arc<DataCache>,
    correlator: RequestCorrelator,
}

impl ActionManager {
    pub fn new(app_id: impl Into<String>, cache: Arc<DataCache>, correlator: RequestCorrelator) -> Self {
        Self {
            app_id: app_id.into(),
            cache,
            correlator,
        }
    }

    async fn send_action(&self, request: &str, payload: Value) {
        self.correlator
            .send(AppToHost::Action {
                request: request.into(),
                payload,
            })
            .await;
    }

    /// Validate and register an action. A missing `source` becomes this app's id.
    pub async fn register_action(&self, action: Value) -> Result<Action, TetherError> {
        let mut action = validate_action(&action)?;
        action.source.get_or_insert_with(|| self.app_id.clone());

        let replaced = self
            .cache
            .with_app_data(|app| app.actions_mut().insert(action.id.clone(), action.clone()));
        if replaced.is_some() {
            warn!(action_id = %action.id, "overwriting existing action");
        }

        self.send_action("add", json!(action)).await;
        Ok(action)
    }

    /// Change an action's icon. Returns false for an unknown id.
    pub async fn update_action_icon(&self, action_id: &str, icon: impl Into<String>) -> bool {
        let icon = icon.into();
        let updated = self
            .cache
            .with_existing_app_data(|app| {
                let action = app.actions.as_mut()?.get_mut(action_id)?;
                action.icon = Some(icon);
                Some(action.clone())
            })
            .flatten();

        match updated {
            Some(action) => {
                self.send_action("update", json!(action)).await;
                true
            }
            None => {
                warn!(action_id = %action_id, "cannot update icon of unknown action");
                false
            }
        }
    }

    pub async fn remove_action(&self, action_id: &str) -> bool {
        let removed = self
            .cache
            .with_existing_app_data(|app| app.actions.as_mut()?.remove(action_id))
            .flatten()
            .is_some();
        if !removed {
            warn!(action_id = %action_id, "removing action that was not registered");
        }
        // The host may know the action from a previous session.
        self.send_action("remove", json!({ "id": action_id, "source": self.app_id }))
            .await;
        removed
    }

    /// Ask the host to run an action. A missing `source` becomes this app's id.
    pub async fn trigger_action(&self, mut trigger: ActionTrigger) {
        trigger.source.get_or_insert_with(|| self.app_id.clone());
        self.send_action("run", json!(trigger)).await;
    }

    pub fn get_action(&self, action_id: &str) -> Option<Action> {
        self.cache
            .app_data()
            .and_then(|app| app.actions)
            .and_then(|mut actions| actions.remove(action_id))
    }

    /// Validate and register a key. A missing `enabled` is defaulted with a
    /// logged warning.
    pub async fn register_key(&self, key: Value) -> Result<Key, TetherError> {
        let mut key = validate_key(&key)?.log_warnings();
        key.source.get_or_insert_with(|| self.app_id.clone());

        let replaced = self
            .cache
            .with_app_data(|app| app.keys_mut().insert(key.id.clone(), key.clone()));
        if replaced.is_some() {
            warn!(key_id = %key.id, "overwriting existing key");
        }

        self.correlator
            .send(AppToHost::Key {
                request: "add".into(),
                payload: json!(key),
            })
            .await;
        Ok(key)
    }

    pub async fn remove_key(&self, key_id: &str) -> bool {
        let removed = self
            .cache
            .with_existing_app_data(|app| app.keys.as_mut()?.remove(key_id))
            .flatten()
            .is_some();
        if !removed {
            warn!(key_id = %key_id, "removing key that was not registered");
        }
        self.correlator
            .send(AppToHost::Key {
                request: "remove".into(),
                payload: json!({ "id": key_id, "source": self.app_id }),
            })
            .await;
        removed
    }

    pub fn get_key(&self, key_id: &str) -> Option<Key> {
        self.cache
            .app_data()
            .and_then(|app| app.keys)
            .and_then(|mut keys| keys.remove(key_id))
    }
}
