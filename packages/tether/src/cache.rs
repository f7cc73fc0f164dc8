//! Local cache of the app's persisted state.
//!
//! The cache owns the resident [`AppData`]. Every mutation merges instead of
//! replacing, happens synchronously under a short lock that is never held
//! across an await, and is followed by a notification to local handlers
//! registered under the matching kind (`data`, `appData`, `settings`) and,
//! when syncing, a `set`/`delete` envelope to the host.
//!
//! Settings never enter through the generic merge path. They are validated
//! one by one: a bad entry is skipped with a warning, an overwritten id is
//! reported, and only input that cannot be classified as settings at all
//! rejects the whole batch.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::correlator::{Expect, RequestCorrelator};
use crate::envelope::{kinds, AppToHost, Envelope};
use crate::error::{EntityKind, TetherError, ValidationError};
use crate::model::{AppData, AppDataPatch, DataMap, Setting};
use crate::registry::EventRegistry;
use crate::validate::{sanitize_setting, validate_setting_value};

/// Outcome of a settings batch.
#[derive(Debug, Default)]
pub struct SettingsBatch {
    /// Ids stored for the first time.
    pub added: Vec<String>,
    /// Ids that replaced an existing cached setting.
    pub overwritten: Vec<String>,
    /// Ids already cached and left untouched (`init_settings` only).
    pub kept: Vec<String>,
    /// Entries rejected by validation, with the reason.
    pub skipped: Vec<ValidationError>,
}

impl SettingsBatch {
    pub fn accepted(&self) -> usize {
        self.added.len() + self.overwritten.len()
    }
}

/// How a settings batch treats ids that are already cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettingsMerge {
    /// Caller-supplied settings replace cached ones, with a warning.
    Overwrite,
    /// Cached ids are left untouched.
    KeepExisting,
    /// The host's copy is authoritative and replaces silently.
    HostSnapshot,
}

#[derive(Debug, Default)]
struct CacheState {
    app_data: Option<AppData>,
}

/// The resident application data, settings, tasks, actions, and keys.
#[derive(Debug)]
pub struct DataCache {
    state: Mutex<CacheState>,
    app_version: String,
    registry: Arc<EventRegistry>,
    correlator: RequestCorrelator,
    fetch_timeout: Duration,
}

impl DataCache {
    pub fn new(
        app_version: impl Into<String>,
        registry: Arc<EventRegistry>,
        correlator: RequestCorrelator,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            app_version: app_version.into(),
            registry,
            correlator,
            fetch_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` against the resident app data, creating it if absent.
    ///
    /// Only writes go through here. Lookups and removals use
    /// [`with_existing_app_data`](Self::with_existing_app_data) so a miss
    /// never leaves an empty `AppData` behind for `persist` to send.
    pub(crate) fn with_app_data<R>(&self, f: impl FnOnce(&mut AppData) -> R) -> R {
        let mut state = self.lock();
        let app_version = &self.app_version;
        f(state
            .app_data
            .get_or_insert_with(|| AppData::new(app_version.clone())))
    }

    /// Run `f` against the resident app data if there is any.
    pub(crate) fn with_existing_app_data<R>(&self, f: impl FnOnce(&mut AppData) -> R) -> Option<R> {
        self.lock().app_data.as_mut().map(f)
    }

    // =========================================================================
    // App data
    // =========================================================================

    /// Merge a partial update into the resident app data.
    ///
    /// Top-level fields are replaced and `data` is merged key by key.
    /// A patch carrying `settings` is a misuse: it is reported and the
    /// settings are routed through [`add_settings`](Self::add_settings)
    /// instead, which may reject them.
    pub async fn save_app_data(&self, mut patch: AppDataPatch, sync: bool) -> Result<(), TetherError> {
        if let Some(settings) = patch.settings.take() {
            warn!("save_app_data does not merge settings; routing them through add_settings");
            self.add_settings(settings, false).await?;
        }

        let merged = self.with_app_data(|app| {
            app.merge_without_settings(patch);
            app.clone()
        });
        let payload = to_payload(&merged);

        if sync {
            self.correlator
                .send(AppToHost::Set {
                    request: kinds::APP_DATA.into(),
                    payload: payload.clone(),
                })
                .await;
        }
        self.registry
            .notify(&Envelope::new(kinds::APP_DATA, payload))
            .await;
        Ok(())
    }

    /// Merge `data` into the cached data map. Existing keys not in `data`
    /// are preserved.
    pub async fn save_data(&self, data: DataMap, sync: bool) {
        let merged = self.with_app_data(|app| {
            app.merge_data(data);
            app.data.clone().unwrap_or_default()
        });
        let payload = Value::Object(merged);

        if sync {
            self.correlator
                .send(AppToHost::Set {
                    request: kinds::DATA.into(),
                    payload: payload.clone(),
                })
                .await;
        }
        self.registry.notify(&Envelope::new(kinds::DATA, payload)).await;
    }

    /// The cached data map, fetched from the host on a miss.
    pub async fn get_data(&self) -> Option<DataMap> {
        if let Some(data) = self.cached_data() {
            return Some(data);
        }

        let response = self.fetch(kinds::DATA).await?;
        // The serve loop normally applied the reply already.
        if let Some(data) = self.cached_data() {
            return Some(data);
        }
        self.apply_host_data(response);
        self.cached_data()
    }

    fn cached_data(&self) -> Option<DataMap> {
        self.lock().app_data.as_ref().and_then(|app| app.data.clone())
    }

    /// The cached app data, fetched from the host on a miss.
    pub async fn get_app_data(&self) -> Option<AppData> {
        if let Some(app) = self.app_data() {
            return Some(app);
        }

        let response = self.fetch(kinds::APP_DATA).await?;
        if let Some(app) = self.app_data() {
            return Some(app);
        }
        self.apply_host_app_data(response);
        self.app_data()
    }

    /// Snapshot of the resident app data without contacting the host.
    pub fn app_data(&self) -> Option<AppData> {
        self.lock().app_data.clone()
    }

    /// Send the resident app data to the host. Returns false if there is
    /// nothing cached or the send failed.
    pub async fn persist(&self) -> bool {
        let Some(app) = self.app_data() else {
            return false;
        };
        self.correlator
            .send(AppToHost::Set {
                request: kinds::APP_DATA.into(),
                payload: to_payload(&app),
            })
            .await
    }

    /// Remove keys from the data map.
    pub async fn delete_data(&self, ids: &[String]) {
        let remaining = self
            .with_existing_app_data(|app| {
                let data = app.data.as_mut()?;
                for id in ids {
                    data.remove(id);
                }
                Some(data.clone())
            })
            .flatten()
            .unwrap_or_default();

        self.registry
            .notify(&Envelope::new(kinds::DATA, Value::Object(remaining)))
            .await;
        self.correlator
            .send(AppToHost::Delete {
                request: kinds::DATA.into(),
                ids: ids.to_vec(),
            })
            .await;
    }

    // =========================================================================
    // Settings
    // =========================================================================

    /// Validate and store settings, overwriting ids already cached.
    ///
    /// `settings` may be a single setting, an array of settings, or a map of
    /// id to setting. Entries that fail validation are skipped; an
    /// overwritten id is logged. Fails only if the input is not
    /// recognizably settings at all.
    pub async fn add_settings(&self, settings: Value, notify_server: bool) -> Result<SettingsBatch, TetherError> {
        let entries = classify_settings(&settings)?;
        let batch = self.store_settings(entries, SettingsMerge::Overwrite);
        self.settings_changed(notify_server).await;
        Ok(batch)
    }

    /// Like [`add_settings`](Self::add_settings), but ids already cached are
    /// kept as they are. Always syncs.
    pub async fn init_settings(&self, settings: Value) -> Result<SettingsBatch, TetherError> {
        let entries = classify_settings(&settings)?;
        let batch = self.store_settings(entries, SettingsMerge::KeepExisting);
        self.settings_changed(true).await;
        Ok(batch)
    }

    /// Replace the value of a cached setting, checked against its variant.
    ///
    /// Returns `Ok(false)` if no setting has that id.
    pub async fn update_setting(&self, id: &str, value: Value) -> Result<bool, TetherError> {
        let updated = self
            .with_existing_app_data(|app| -> Result<bool, ValidationError> {
                let Some(setting) = app.setting_mut(id) else {
                    return Ok(false);
                };
                setting.kind = validate_setting_value(setting, &value)?;
                Ok(true)
            })
            .transpose()?
            .unwrap_or(false);

        if !updated {
            warn!(setting_id = %id, "cannot update unknown setting");
            return Ok(false);
        }
        self.settings_changed(true).await;
        Ok(true)
    }

    /// A cached setting by id.
    pub fn get_setting(&self, id: &str) -> Option<Setting> {
        self.lock()
            .app_data
            .as_ref()
            .and_then(|app| app.settings.as_ref())
            .and_then(|settings| settings.get(id).cloned())
    }

    /// The cached settings, fetched from the host on a miss.
    pub async fn get_settings(&self) -> Option<BTreeMap<String, Setting>> {
        if let Some(settings) = self.cached_settings() {
            return Some(settings);
        }

        let response = self.fetch(kinds::SETTINGS).await?;
        if let Some(settings) = self.cached_settings() {
            return Some(settings);
        }
        self.apply_host_settings(response);
        self.cached_settings()
    }

    fn cached_settings(&self) -> Option<BTreeMap<String, Setting>> {
        self.lock().app_data.as_ref().and_then(|app| app.settings.clone())
    }

    /// Remove settings by id.
    pub async fn delete_settings(&self, ids: &[String]) {
        self.with_existing_app_data(|app| {
            if let Some(settings) = app.settings.as_mut() {
                for id in ids {
                    settings.remove(id);
                }
            }
        });

        self.settings_changed(false).await;
        self.correlator
            .send(AppToHost::Delete {
                request: kinds::SETTINGS.into(),
                ids: ids.to_vec(),
            })
            .await;
    }

    fn store_settings(&self, entries: Vec<Value>, mode: SettingsMerge) -> SettingsBatch {
        let mut batch = SettingsBatch::default();
        let mut state = self.lock();
        let app_version = &self.app_version;
        let settings = state
            .app_data
            .get_or_insert_with(|| AppData::new(app_version.clone()))
            .settings_mut();

        for entry in entries {
            let setting = match sanitize_setting(&entry) {
                Ok(setting) => setting,
                Err(e) => {
                    warn!(setting_id = ?e.id(), error = %e, "skipping invalid setting");
                    batch.skipped.push(e);
                    continue;
                }
            };

            let id = setting.id.clone();
            if settings.contains_key(&id) {
                match mode {
                    SettingsMerge::KeepExisting => {
                        batch.kept.push(id);
                        continue;
                    }
                    SettingsMerge::Overwrite => warn!(setting_id = %id, "overwriting existing setting"),
                    SettingsMerge::HostSnapshot => {}
                }
                batch.overwritten.push(id.clone());
            } else {
                batch.added.push(id.clone());
            }
            settings.insert(id, setting);
        }

        debug!(
            added = batch.added.len(),
            overwritten = batch.overwritten.len(),
            skipped = batch.skipped.len(),
            "settings batch stored"
        );
        batch
    }

    async fn settings_changed(&self, notify_server: bool) {
        let payload = {
            let state = self.lock();
            let settings = state.app_data.as_ref().and_then(|app| app.settings.as_ref());
            settings.map(to_payload).unwrap_or_else(|| Value::Object(Map::new()))
        };

        self.registry
            .notify(&Envelope::new(kinds::SETTINGS, payload.clone()))
            .await;
        if notify_server {
            self.correlator
                .send(AppToHost::Set {
                    request: kinds::SETTINGS.into(),
                    payload,
                })
                .await;
        }
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Replace the data map with what the host pushed.
    pub fn apply_host_data(&self, payload: Value) {
        match payload {
            Value::Object(data) => self.with_app_data(|app| app.data = Some(data)),
            other => warn!(payload = %other, "ignoring non-object data from host"),
        }
    }

    /// Replace the resident app data with what the host pushed. Settings in
    /// it are validated; invalid entries are dropped.
    pub fn apply_host_app_data(&self, payload: Value) {
        let mut patch: AppDataPatch = match serde_json::from_value(payload) {
            Ok(patch) => patch,
            Err(e) => {
                warn!(error = %e, "ignoring malformed app data from host");
                return;
            }
        };
        let settings = patch.settings.take();

        {
            let mut state = self.lock();
            let mut app = AppData::new(self.app_version.clone());
            app.merge_without_settings(patch);
            state.app_data = Some(app);
        }

        if let Some(settings) = settings {
            self.apply_host_settings(settings);
        }
    }

    /// Replace cached settings for every valid id the host pushed. Ids
    /// already cached are refreshed without an overwrite warning.
    pub fn apply_host_settings(&self, payload: Value) {
        match classify_settings(&payload) {
            Ok(entries) => {
                self.store_settings(entries, SettingsMerge::HostSnapshot);
            }
            Err(e) => warn!(error = %e, "ignoring unrecognizable settings from host"),
        }
    }

    /// Drop everything cached.
    pub fn clear(&self) {
        self.lock().app_data = None;
    }

    async fn fetch(&self, request: &str) -> Option<Value> {
        self.correlator
            .fetch(
                AppToHost::Get {
                    request: request.into(),
                    payload: Value::Null,
                },
                Some(Expect::kind(request)),
                Some(self.fetch_timeout),
            )
            .await
    }
}

/// Split settings input into individual entries.
///
/// Accepts a single setting (an object with a string `type`), an array of
/// settings, or an id-keyed map of settings (ids default to their key).
/// Anything else cannot be classified.
fn classify_settings(input: &Value) -> Result<Vec<Value>, ValidationError> {
    let unclassifiable = |reason: &str| ValidationError::Unclassifiable {
        kind: EntityKind::Setting,
        reason: reason.to_string(),
    };

    match input {
        Value::Array(items) => Ok(items.clone()),
        Value::Object(map) if map.get("type").is_some_and(Value::is_string) => Ok(vec![input.clone()]),
        Value::Object(map) => {
            if !map.values().all(Value::is_object) {
                return Err(unclassifiable(
                    "expected a setting, an array of settings, or a map of settings",
                ));
            }
            Ok(map
                .iter()
                .map(|(key, entry)| {
                    let mut entry = entry.clone();
                    if let Some(obj) = entry.as_object_mut() {
                        obj.entry("id").or_insert_with(|| Value::String(key.clone()));
                    }
                    entry
                })
                .collect())
        }
        _ => Err(unclassifiable("expected an object or array")),
    }
}

fn to_payload<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        error!(error = %e, "failed to serialize cache payload");
        Value::Null
    })
}
