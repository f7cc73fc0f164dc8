//! Guided tasks and their steps.
//!
//! Tasks live in the cache's `tasks` map. Every task or step handed in by
//! plugin code is validated before it is cached or sent, and every change is
//! mirrored to the host as a `task` or `step` envelope whose `request` names
//! the operation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::cache::DataCache;
use crate::correlator::RequestCorrelator;
use crate::envelope::AppToHost;
use crate::error::{EntityKind, TetherError, ValidationError};
use crate::model::{Step, Task, TaskPatch};
use crate::validate::{validate_step, validate_task};

/// Task and step operations for one app.
#[derive(Debug)]
pub struct TaskManager {
    cache: Arc<DataCache>,
    correlator: RequestCorrelator,
    current: Mutex<Option<String>>,
}

impl TaskManager {
    pub fn new(cache: Arc<DataCache>, correlator: RequestCorrelator) -> Self {
        Self {
            cache,
            correlator,
            current: Mutex::new(None),
        }
    }

    fn set_current(&self, task_id: Option<String>) {
        *self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = task_id;
    }

    /// The task most recently started and not yet ended or completed.
    pub fn current(&self) -> Option<String> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn send_task(&self, request: &str, payload: Value) {
        self.correlator
            .send(AppToHost::Task {
                request: request.into(),
                payload,
            })
            .await;
    }

    async fn send_step(&self, request: &str, payload: Value) {
        self.correlator
            .send(AppToHost::Step {
                request: request.into(),
                payload,
            })
            .await;
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    /// Validate and register a task, replacing any cached task with its id.
    pub async fn add(&self, task: Value) -> Result<Task, TetherError> {
        let task = validate_task(&task)?;

        let replaced = self
            .cache
            .with_app_data(|app| app.tasks_mut().insert(task.id.clone(), task.clone()));
        if replaced.is_some() {
            warn!(task_id = %task.id, "overwriting existing task");
        }

        self.send_task("add", json!({ "task": task })).await;
        Ok(task)
    }

    /// Validate and register many tasks, keeping any id already cached.
    ///
    /// `tasks` is an array of tasks or an id-keyed map. Every entry must be
    /// valid; the first invalid one fails the call before anything is cached.
    pub async fn init_tasks(&self, tasks: Value) -> Result<Vec<Task>, TetherError> {
        let entries: Vec<&Value> = match &tasks {
            Value::Array(items) => items.iter().collect(),
            Value::Object(map) => map.values().collect(),
            _ => {
                return Err(ValidationError::Unclassifiable {
                    kind: EntityKind::Task,
                    reason: "expected an array or map of tasks".into(),
                }
                .into())
            }
        };
        let validated = entries
            .into_iter()
            .map(validate_task)
            .collect::<Result<Vec<_>, _>>()?;

        let all = self.cache.with_app_data(|app| {
            let cached = app.tasks_mut();
            for task in &validated {
                cached.entry(task.id.clone()).or_insert_with(|| task.clone());
            }
            cached.clone()
        });

        self.send_task("init", json!({ "tasks": all })).await;
        Ok(validated)
    }

    /// Apply a patch to a cached task. Returns `Ok(None)` for an unknown id.
    pub async fn update(&self, task_id: &str, patch: TaskPatch) -> Result<Option<Task>, TetherError> {
        let updated = self
            .cache
            .with_existing_app_data(|app| -> Result<Option<Task>, ValidationError> {
                let Some(task) = app.task_mut(task_id) else {
                    return Ok(None);
                };
                if let Some(step_id) = &patch.current_step {
                    if !task.steps.contains_key(step_id) {
                        return Err(ValidationError::InvalidField {
                            kind: EntityKind::Task,
                            id: Some(task_id.to_string()),
                            field: "currentStep",
                            reason: format!("{step_id:?} is not one of the task's steps"),
                        });
                    }
                }
                task.apply(patch);
                Ok(Some(task.clone()))
            })
            .transpose()?
            .flatten();

        match &updated {
            Some(task) => self.send_task("update", json!({ "taskId": task_id, "task": task })).await,
            None => warn!(task_id = %task_id, "cannot update unknown task"),
        }
        Ok(updated)
    }

    /// Remove a task. Returns false if it was not cached.
    pub async fn delete(&self, task_id: &str) -> bool {
        let removed = self
            .cache
            .with_existing_app_data(|app| app.tasks.as_mut()?.remove(task_id))
            .flatten()
            .is_some();
        if !removed {
            warn!(task_id = %task_id, "cannot delete unknown task");
            return false;
        }
        if self.current().as_deref() == Some(task_id) {
            self.set_current(None);
        }
        self.send_task("delete", json!({ "taskId": task_id })).await;
        true
    }

    /// Mark a task started and make it the current task.
    pub async fn start(&self, task_id: &str) -> bool {
        let started = self.modify(task_id, |task| {
            task.started = true;
            if task.current_step.is_none() {
                task.current_step = first_open_step(&task.steps);
            }
        });
        if started {
            self.set_current(Some(task_id.to_string()));
            self.send_task("start", json!({ "taskId": task_id })).await;
        }
        started
    }

    /// Mark a task completed.
    pub async fn complete(&self, task_id: &str) -> bool {
        let completed = self.modify(task_id, |task| {
            task.completed = true;
            task.current_step = None;
        });
        if completed {
            if self.current().as_deref() == Some(task_id) {
                self.set_current(None);
            }
            self.send_task("complete", json!({ "taskId": task_id })).await;
        }
        completed
    }

    /// Reset a task and every step to not completed, and start it again.
    pub async fn restart(&self, task_id: &str) -> bool {
        let restarted = self.modify(task_id, |task| {
            task.started = true;
            task.completed = false;
            for step in task.steps.values_mut() {
                step.completed = false;
            }
            task.current_step = first_open_step(&task.steps);
        });
        if restarted {
            self.set_current(Some(task_id.to_string()));
            self.send_task("restart", json!({ "taskId": task_id })).await;
        }
        restarted
    }

    /// Stop showing the current task.
    pub async fn end(&self) {
        let ended = self.current();
        self.set_current(None);
        debug!(task_id = ?ended, "ending current task");
        self.send_task("end", json!({ "taskId": ended })).await;
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.cache
            .app_data()
            .and_then(|app| app.tasks)
            .and_then(|mut tasks| tasks.remove(task_id))
    }

    fn modify(&self, task_id: &str, f: impl FnOnce(&mut Task)) -> bool {
        let found = self
            .cache
            .with_existing_app_data(|app| app.task_mut(task_id).map(f))
            .flatten()
            .is_some();
        if !found {
            warn!(task_id = %task_id, "unknown task");
        }
        found
    }

    // =========================================================================
    // Steps
    // =========================================================================

    /// Validate a step and add it to a task. Returns `Ok(None)` for an
    /// unknown task.
    pub async fn add_step(&self, task_id: &str, step: Value) -> Result<Option<Step>, TetherError> {
        let step = validate_step(&step)?;
        let added = self
            .cache
            .with_existing_app_data(|app| {
                let task = app.task_mut(task_id)?;
                if task.steps.insert(step.id.clone(), step.clone()).is_some() {
                    warn!(task_id = %task_id, step_id = %step.id, "overwriting existing step");
                }
                Some(())
            })
            .flatten()
            .is_some();

        if !added {
            warn!(task_id = %task_id, "cannot add step to unknown task");
            return Ok(None);
        }
        self.send_step("add", json!({ "taskId": task_id, "step": step })).await;
        Ok(Some(step))
    }

    /// Validate a step and replace the existing step with its id.
    pub async fn update_step(&self, task_id: &str, step: Value) -> Result<Option<Step>, TetherError> {
        let step = validate_step(&step)?;
        let replaced = self
            .cache
            .with_existing_app_data(|app| {
                app.task_mut(task_id)
                    .and_then(|task| task.steps.get_mut(&step.id))
                    .map(|existing| *existing = step.clone())
            })
            .flatten()
            .is_some();

        if !replaced {
            warn!(task_id = %task_id, step_id = %step.id, "cannot update unknown step");
            return Ok(None);
        }
        self.send_step("update", json!({ "taskId": task_id, "step": step })).await;
        Ok(Some(step))
    }

    /// Mark a step completed and advance the task. Completing the last open
    /// step completes the task.
    pub async fn complete_step(&self, task_id: &str, step_id: &str) -> bool {
        let outcome = self
            .cache
            .with_existing_app_data(|app| {
                let task = app.task_mut(task_id)?;
                task.steps.get_mut(step_id)?.completed = true;
                if task.current_step.as_deref() == Some(step_id) || task.current_step.is_none() {
                    task.current_step = first_open_step(&task.steps);
                }
                if task.steps.values().all(|step| step.completed) {
                    task.completed = true;
                }
                Some(task.completed)
            })
            .flatten();

        let Some(task_completed) = outcome else {
            warn!(task_id = %task_id, step_id = %step_id, "cannot complete unknown step");
            return false;
        };
        self.send_step("complete", json!({ "taskId": task_id, "stepId": step_id }))
            .await;
        if task_completed {
            debug!(task_id = %task_id, "all steps completed");
            if self.current().as_deref() == Some(task_id) {
                self.set_current(None);
            }
        }
        true
    }

    /// Remove a step. A task's only step cannot be removed.
    pub async fn delete_step(&self, task_id: &str, step_id: &str) -> Result<bool, TetherError> {
        let removed = self
            .cache
            .with_existing_app_data(|app| -> Result<bool, ValidationError> {
                let Some(task) = app.task_mut(task_id) else {
                    return Ok(false);
                };
                if !task.steps.contains_key(step_id) {
                    return Ok(false);
                }
                if task.steps.len() == 1 {
                    return Err(ValidationError::EmptyCollection {
                        kind: EntityKind::Task,
                        id: Some(task_id.to_string()),
                        field: "steps",
                    });
                }
                task.steps.remove(step_id);
                if task.current_step.as_deref() == Some(step_id) {
                    task.current_step = first_open_step(&task.steps);
                }
                Ok(true)
            })
            .transpose()?
            .unwrap_or(false);

        if !removed {
            warn!(task_id = %task_id, step_id = %step_id, "cannot delete unknown step");
            return Ok(false);
        }
        self.send_step("delete", json!({ "taskId": task_id, "stepId": step_id }))
            .await;
        Ok(true)
    }

    pub(crate) fn reset(&self) {
        self.set_current(None);
    }
}

fn first_open_step(steps: &BTreeMap<String, Step>) -> Option<String> {
    steps
        .values()
        .find(|step| !step.completed)
        .map(|step| step.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::EventRegistry;
    use crate::transport::{ChannelTransport, HostEndpoint, TransportSlot};
    use std::time::Duration;

    async fn manager() -> (TaskManager, HostEndpoint) {
        let registry = Arc::new(EventRegistry::new());
        let slot = TransportSlot::new();
        let (transport, host) = ChannelTransport::pair();
        slot.attach(Arc::new(transport)).await;
        let correlator = RequestCorrelator::new(registry.clone(), slot);
        let cache = Arc::new(DataCache::new(
            "1.0.0",
            registry,
            correlator.clone(),
            Duration::from_millis(100),
        ));
        (TaskManager::new(cache, correlator), host)
    }

    fn onboarding() -> Value {
        json!({
            "id": "onboarding",
            "source": "weather",
            "version": "1.0.0",
            "label": "Set up weather",
            "steps": {
                "a-units": { "id": "a-units", "type": "setting", "setting": { "id": "units" } },
                "b-done": { "id": "b-done", "type": "step", "label": "All set" }
            }
        })
    }

    #[tokio::test]
    async fn test_add_validates_before_sending() {
        let (tasks, mut host) = manager().await;

        let err = tasks
            .add(json!({ "id": "broken", "source": "weather", "version": "1", "steps": {} }))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TetherError::Validation(ValidationError::EmptyCollection { .. })
        ));
        assert!(host.drain().is_empty());

        let task = tasks.add(onboarding()).await.unwrap();
        assert_eq!(task.steps.len(), 2);

        let sent = host.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, "task");
        assert_eq!(sent[0].request.as_deref(), Some("add"));
        assert_eq!(sent[0].payload["task"]["id"], "onboarding");
    }

    #[tokio::test]
    async fn test_init_tasks_keeps_cached_ids() {
        let (tasks, _host) = manager().await;
        tasks.add(onboarding()).await.unwrap();

        let mut relabelled = onboarding();
        relabelled["label"] = json!("Different");
        tasks.init_tasks(json!([relabelled])).await.unwrap();

        assert_eq!(tasks.get("onboarding").unwrap().label.as_deref(), Some("Set up weather"));
    }

    #[tokio::test]
    async fn test_start_complete_and_end_track_current_task() {
        let (tasks, mut host) = manager().await;
        tasks.add(onboarding()).await.unwrap();

        assert!(tasks.start("onboarding").await);
        assert_eq!(tasks.current().as_deref(), Some("onboarding"));
        assert_eq!(
            tasks.get("onboarding").unwrap().current_step.as_deref(),
            Some("a-units")
        );

        assert!(tasks.complete("onboarding").await);
        assert!(tasks.get("onboarding").unwrap().completed);
        assert_eq!(tasks.current(), None);

        assert!(!tasks.start("nope").await);

        tasks.end().await;
        let requests: Vec<_> = host
            .drain()
            .into_iter()
            .filter_map(|e| e.request)
            .collect();
        assert_eq!(requests, vec!["add", "start", "complete", "end"]);
    }

    #[tokio::test]
    async fn test_completing_every_step_completes_task() {
        let (tasks, _host) = manager().await;
        tasks.add(onboarding()).await.unwrap();
        tasks.start("onboarding").await;

        assert!(tasks.complete_step("onboarding", "a-units").await);
        let task = tasks.get("onboarding").unwrap();
        assert_eq!(task.current_step.as_deref(), Some("b-done"));
        assert!(!task.completed);

        assert!(tasks.complete_step("onboarding", "b-done").await);
        assert!(tasks.get("onboarding").unwrap().completed);
        assert_eq!(tasks.current(), None);

        assert!(!tasks.complete_step("onboarding", "missing").await);
    }

    #[tokio::test]
    async fn test_restart_resets_steps() {
        let (tasks, _host) = manager().await;
        tasks.add(onboarding()).await.unwrap();
        tasks.complete_step("onboarding", "a-units").await;
        tasks.complete("onboarding").await;

        assert!(tasks.restart("onboarding").await);
        let task = tasks.get("onboarding").unwrap();
        assert!(task.started);
        assert!(!task.completed);
        assert!(task.steps.values().all(|step| !step.completed));
        assert_eq!(task.current_step.as_deref(), Some("a-units"));
    }

    #[tokio::test]
    async fn test_update_rejects_unknown_current_step() {
        let (tasks, _host) = manager().await;
        tasks.add(onboarding()).await.unwrap();

        let err = tasks
            .update(
                "onboarding",
                TaskPatch {
                    current_step: Some("nowhere".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TetherError::Validation(ValidationError::InvalidField { field: "currentStep", .. })
        ));

        let updated = tasks
            .update(
                "onboarding",
                TaskPatch {
                    label: Some("Weather setup".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.label.as_deref(), Some("Weather setup"));

        assert!(tasks.update("ghost", TaskPatch::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_step_operations_validate_and_sync() {
        let (tasks, mut host) = manager().await;
        tasks.add(onboarding()).await.unwrap();
        host.drain();

        let err = tasks
            .add_step("onboarding", json!({ "id": "go", "type": "shortcut" }))
            .await
            .unwrap_err();
        assert!(matches!(err, TetherError::Validation(_)));

        let added = tasks
            .add_step(
                "onboarding",
                json!({ "id": "go", "type": "shortcut", "destination": "/settings" }),
            )
            .await
            .unwrap();
        assert!(added.is_some());

        let updated = tasks
            .update_step(
                "onboarding",
                json!({ "id": "go", "type": "external", "url": "https://example.com" }),
            )
            .await
            .unwrap();
        assert!(updated.is_some());

        assert!(tasks.delete_step("onboarding", "go").await.unwrap());
        assert!(!tasks.delete_step("onboarding", "go").await.unwrap());

        let sent = host.drain();
        assert!(sent.iter().all(|e| e.kind == "step"));
        let requests: Vec<_> = sent.iter().filter_map(|e| e.request.clone()).collect();
        assert_eq!(requests, vec!["add", "update", "delete"]);
    }

    #[tokio::test]
    async fn test_last_step_cannot_be_deleted() {
        let (tasks, _host) = manager().await;
        tasks.add(onboarding()).await.unwrap();

        assert!(tasks.delete_step("onboarding", "a-units").await.unwrap());
        let err = tasks.delete_step("onboarding", "b-done").await.unwrap_err();
        assert!(matches!(
            err,
            TetherError::Validation(ValidationError::EmptyCollection { field: "steps", .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_task() {
        let (tasks, _host) = manager().await;
        tasks.add(onboarding()).await.unwrap();
        tasks.start("onboarding").await;

        assert!(tasks.delete("onboarding").await);
        assert!(tasks.get("onboarding").is_none());
        assert_eq!(tasks.current(), None);
        assert!(!tasks.delete("onboarding").await);
    }
}
