use std::collections::BTreeMap;

use serde_json::Value;

use super::action::validate_action;
use super::reader::{type_name, ObjectReader};
use super::setting::sanitize_setting;
use crate::error::{EntityKind, ValidationError};
use crate::model::{ActionRef, SettingRef, Step, StepKind, StepType, Task};

/// Fields a setting reference may carry without becoming an inline setting.
const SETTING_REFERENCE_FIELDS: [&str; 2] = ["id", "source"];

/// Validate a task and every one of its steps.
///
/// Requires `id`, `source`, `version`, and a non-empty `steps` map. Steps
/// are re-keyed by their own `id`; two steps sharing an id are rejected.
/// `currentStep` is carried as given.
pub fn validate_task(value: &Value) -> Result<Task, ValidationError> {
    let r = ObjectReader::new(EntityKind::Task, value)?;

    let id = r.required_id()?;
    let source = r.required_str("source")?;
    let version = r.required_str("version")?;

    let raw_steps = r.get("steps").ok_or_else(|| r.missing("steps"))?;
    let step_map = raw_steps
        .as_object()
        .ok_or_else(|| r.invalid("steps", format!("expected object, got {}", type_name(raw_steps))))?;
    if step_map.is_empty() {
        return Err(r.empty("steps"));
    }

    let mut steps = BTreeMap::new();
    for raw_step in step_map.values() {
        let step = validate_step(raw_step)?;
        if steps.contains_key(&step.id) {
            return Err(r.invalid("steps", format!("more than one step has id {:?}", step.id)));
        }
        steps.insert(step.id.clone(), step);
    }

    let current_step = r.optional_str("currentStep")?;

    Ok(Task {
        id,
        source,
        version,
        label: r.optional_str("label")?,
        description: r.optional_str("description")?,
        started: r.optional_bool("started")?.unwrap_or(false),
        completed: r.optional_bool("completed")?.unwrap_or(false),
        available: r.optional_bool("available")?.unwrap_or(true),
        current_step,
        steps,
    })
}

/// Validate a single step against its tagged shape.
///
/// | type       | requires                                     |
/// |------------|----------------------------------------------|
/// | `action`   | `action`: id string or inline action object  |
/// | `shortcut` | `destination` string                         |
/// | `setting`  | `setting`: `{id}` reference or inline setting with `label` |
/// | `task`     | `taskId` string                              |
/// | `external` | nothing extra                                |
/// | `step`     | nothing extra                                |
pub fn validate_step(value: &Value) -> Result<Step, ValidationError> {
    let r = ObjectReader::new(EntityKind::Step, value)?;

    let id = r.required_id()?;
    let tag = r.required_str("type")?;
    let step_type = StepType::from_tag(&tag).ok_or_else(|| r.unknown_variant(&tag))?;

    let kind = match step_type {
        StepType::Action => StepKind::Action {
            action: parse_action_ref(&r)?,
        },
        StepType::Shortcut => StepKind::Shortcut {
            destination: r.required_str("destination")?,
        },
        StepType::Setting => StepKind::Setting {
            setting: parse_setting_ref(&r)?,
        },
        StepType::Task => StepKind::Task {
            task_id: r.required_str("taskId")?,
        },
        StepType::External => StepKind::External {
            url: r.optional_str("url")?,
        },
        StepType::Step => StepKind::Step,
    };

    Ok(Step {
        id,
        label: r.optional_str("label")?,
        instructions: r.optional_str("instructions")?,
        completed: r.optional_bool("completed")?.unwrap_or(false),
        debug: r.optional_bool("debug")?.unwrap_or(false),
        strict: r.optional_bool("strict")?.unwrap_or(false),
        parent_id: r.optional_str("parentId")?,
        kind,
    })
}

fn parse_action_ref(r: &ObjectReader<'_>) -> Result<ActionRef, ValidationError> {
    match r.get("action") {
        None => Err(r.missing("action")),
        Some(Value::String(id)) if !id.trim().is_empty() => Ok(ActionRef::Id(id.clone())),
        Some(Value::String(_)) => Err(r.invalid("action", "action id must not be empty")),
        Some(obj @ Value::Object(_)) => Ok(ActionRef::Inline(validate_action(obj)?)),
        Some(other) => Err(r.invalid(
            "action",
            format!("expected action id or object, got {}", type_name(other)),
        )),
    }
}

fn parse_setting_ref(r: &ObjectReader<'_>) -> Result<SettingRef, ValidationError> {
    let raw = r.get("setting").ok_or_else(|| r.missing("setting"))?;

    if let Value::String(id) = raw {
        return Ok(SettingRef::Reference {
            id: id.clone(),
            source: None,
        });
    }

    let obj = raw.as_object().ok_or_else(|| {
        r.invalid(
            "setting",
            format!("expected setting id or object, got {}", type_name(raw)),
        )
    })?;

    let setting = ObjectReader::new(EntityKind::Setting, raw)?;
    let is_reference = obj
        .keys()
        .all(|key| SETTING_REFERENCE_FIELDS.contains(&key.as_str()));

    if is_reference {
        return Ok(SettingRef::Reference {
            id: setting.required_id()?,
            source: setting.optional_str("source")?,
        });
    }

    // Anything beyond id/source makes this an inline setting, which must be complete.
    if !setting.has("label") {
        return Err(setting.missing("label"));
    }
    Ok(SettingRef::Inline(sanitize_setting(raw)?))
}
