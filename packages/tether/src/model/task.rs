use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::action::Action;
use super::setting::Setting;

/// The closed set of step discriminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepType {
    Action,
    Shortcut,
    Setting,
    Task,
    External,
    Step,
}

impl StepType {
    pub const ALL: [StepType; 6] = [
        StepType::Action,
        StepType::Shortcut,
        StepType::Setting,
        StepType::Task,
        StepType::External,
        StepType::Step,
    ];

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == tag)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Action => "action",
            StepType::Shortcut => "shortcut",
            StepType::Setting => "setting",
            StepType::Task => "task",
            StepType::External => "external",
            StepType::Step => "step",
        }
    }
}

/// An action named by id or given inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionRef {
    Id(String),
    Inline(Action),
}

/// A setting named by id or given inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingRef {
    Inline(Setting),
    Reference {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
}

/// Variant-specific fields of a step, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepKind {
    Action {
        action: ActionRef,
    },
    Shortcut {
        destination: String,
    },
    Setting {
        setting: SettingRef,
    },
    Task {
        #[serde(rename = "taskId")]
        task_id: String,
    },
    External {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    Step,
}

impl StepKind {
    pub fn step_type(&self) -> StepType {
        match self {
            StepKind::Action { .. } => StepType::Action,
            StepKind::Shortcut { .. } => StepType::Shortcut,
            StepKind::Setting { .. } => StepType::Setting,
            StepKind::Task { .. } => StepType::Task,
            StepKind::External { .. } => StepType::External,
            StepKind::Step => StepType::Step,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub strict: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(flatten)]
    pub kind: StepKind,
}

/// A guided multi-step task shown to the user by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub source: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub started: bool,
    #[serde(default)]
    pub completed: bool,
    #[serde(default = "default_available")]
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    pub steps: BTreeMap<String, Step>,
}

fn default_available() -> bool {
    true
}

/// Fields that `TaskManager::update` may change on an existing task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
}

impl Task {
    /// Apply a patch in place. Absent fields are left untouched.
    pub fn apply(&mut self, patch: TaskPatch) {
        if let Some(label) = patch.label {
            self.label = Some(label);
        }
        if let Some(description) = patch.description {
            self.description = Some(description);
        }
        if let Some(started) = patch.started {
            self.started = started;
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        if let Some(available) = patch.available {
            self.available = available;
        }
        if let Some(current_step) = patch.current_step {
            self.current_step = Some(current_step);
        }
    }
}
