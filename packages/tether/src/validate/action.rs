use serde_json::Value;

use super::reader::{type_name, ObjectReader};
use super::{Validated, ValidationWarning};
use crate::error::{EntityKind, ValidationError};
use crate::model::{Action, Key, KeyMode};

/// Validate an action. Only `id` is required.
pub fn validate_action(value: &Value) -> Result<Action, ValidationError> {
    let r = ObjectReader::new(EntityKind::Action, value)?;

    Ok(Action {
        id: r.required_id()?,
        name: r.optional_str("name")?,
        description: r.optional_str("description")?,
        source: r.optional_str("source")?,
        version: r.optional_str("version")?,
        enabled: r.optional_bool("enabled")?.unwrap_or(true),
        icon: r.optional_str("icon")?,
        tag: r.optional_str("tag")?,
        value: r.get("value").cloned(),
        value_options: r.string_array("valueOptions")?,
        value_instructions: r.optional_str("valueInstructions")?,
    })
}

/// Validate a key binding.
///
/// Requires `id` and a non-empty `modes` array of recognized mode tags.
/// A missing `enabled` is not an error: it defaults to `true` and the
/// result carries a warning.
pub fn validate_key(value: &Value) -> Result<Validated<Key>, ValidationError> {
    let r = ObjectReader::new(EntityKind::Key, value)?;

    let id = r.required_id()?;
    let modes = parse_modes(&r)?;

    let mut warnings = Vec::new();
    let enabled = match r.optional_bool("enabled")? {
        Some(enabled) => enabled,
        None => {
            warnings.push(ValidationWarning {
                id: id.clone(),
                field: "enabled",
                message: "key has no `enabled` flag, defaulting to true".into(),
            });
            true
        }
    };

    Ok(Validated {
        value: Key {
            id,
            source: r.optional_str("source")?,
            description: r.optional_str("description")?,
            version: r.optional_str("version")?,
            enabled,
            modes,
        },
        warnings,
    })
}

fn parse_modes(r: &ObjectReader<'_>) -> Result<Vec<KeyMode>, ValidationError> {
    let raw = r.get("modes").ok_or_else(|| r.missing("modes"))?;
    let items = raw
        .as_array()
        .ok_or_else(|| r.invalid("modes", format!("expected array, got {}", type_name(raw))))?;
    if items.is_empty() {
        return Err(r.empty("modes"));
    }

    items
        .iter()
        .map(|item| {
            let tag = item
                .as_str()
                .ok_or_else(|| r.invalid("modes", format!("expected mode tag, got {}", type_name(item))))?;
            KeyMode::from_tag(&tag.to_ascii_lowercase())
                .ok_or_else(|| r.invalid("modes", format!("unrecognized mode {tag:?}")))
        })
        .collect()
}
