use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::action::{Action, Key};
use super::setting::Setting;
use super::task::Task;

/// Free-form key/value data the app persists through the host.
pub type DataMap = Map<String, Value>;

/// The cached, persisted application state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppData {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<BTreeMap<String, Setting>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<BTreeMap<String, Task>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<BTreeMap<String, Action>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<BTreeMap<String, Key>>,
}

/// A partial update for [`AppData`].
///
/// `settings` is carried as raw JSON because it is never merged directly:
/// the cache diverts it through the validated settings path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppDataPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<BTreeMap<String, Task>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<BTreeMap<String, Action>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<BTreeMap<String, Key>>,
}

impl AppData {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Default::default()
        }
    }

    /// Merge everything except `settings` from a patch.
    ///
    /// Top-level fields are replaced; `data` is merged key by key.
    pub(crate) fn merge_without_settings(&mut self, patch: AppDataPatch) {
        if let Some(version) = patch.version {
            self.version = version;
        }
        if let Some(data) = patch.data {
            self.merge_data(data);
        }
        if let Some(tasks) = patch.tasks {
            self.tasks = Some(tasks);
        }
        if let Some(actions) = patch.actions {
            self.actions = Some(actions);
        }
        if let Some(keys) = patch.keys {
            self.keys = Some(keys);
        }
    }

    /// Keys in `data` overwrite; other existing keys survive.
    pub(crate) fn merge_data(&mut self, data: DataMap) {
        let existing = self.data.get_or_insert_with(DataMap::new);
        for (key, value) in data {
            existing.insert(key, value);
        }
    }

    /// A cached setting, without creating the settings map.
    pub fn setting_mut(&mut self, id: &str) -> Option<&mut Setting> {
        self.settings.as_mut()?.get_mut(id)
    }

    /// A cached task, without creating the task map.
    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.as_mut()?.get_mut(id)
    }

    pub fn settings_mut(&mut self) -> &mut BTreeMap<String, Setting> {
        self.settings.get_or_insert_with(BTreeMap::new)
    }

    pub fn tasks_mut(&mut self) -> &mut BTreeMap<String, Task> {
        self.tasks.get_or_insert_with(BTreeMap::new)
    }

    pub fn actions_mut(&mut self) -> &mut BTreeMap<String, Action> {
        self.actions.get_or_insert_with(BTreeMap::new)
    }

    pub fn keys_mut(&mut self) -> &mut BTreeMap<String, Key> {
        self.keys.get_or_insert_with(BTreeMap::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> DataMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_merge_data_preserves_unrelated_keys() {
        let mut app = AppData::new("1.0.0");
        app.merge_data(map(json!({ "foo": 1 })));
        app.merge_data(map(json!({ "bar": 2, "foo": 3 })));

        let data = app.data.unwrap();
        assert_eq!(data.get("foo"), Some(&json!(3)));
        assert_eq!(data.get("bar"), Some(&json!(2)));
    }

    #[test]
    fn test_merge_without_settings_replaces_top_level_fields() {
        let mut app = AppData::new("1.0.0");
        app.merge_without_settings(AppDataPatch {
            version: Some("1.1.0".into()),
            settings: Some(json!({ "ignored": true })),
            ..Default::default()
        });

        assert_eq!(app.version, "1.1.0");
        assert!(app.settings.is_none());
    }

    #[test]
    fn test_app_data_wire_shape_omits_absent_sections() {
        let wire = serde_json::to_value(AppData::new("2.0.0")).unwrap();
        assert_eq!(wire, json!({ "version": "2.0.0" }));
    }
}
