use serde_json::Value;

use super::reader::{type_name, ObjectReader};
use crate::error::{EntityKind, ValidationError};
use crate::model::{FileType, Setting, SettingKind, SettingOption, SettingType, DEFAULT_DESCRIPTION};

/// Check a raw setting against its tagged shape.
///
/// Verifies the discriminator is one of the ten known kinds, the common
/// fields (`id`, `label`), the variant-specific fields, and that `value` has
/// the runtime type its tag implies.
pub fn validate_setting(value: &Value) -> Result<(), ValidationError> {
    parse_setting(value).map(|_| ())
}

/// Validate, then rebuild a canonical setting.
///
/// Unknown fields are dropped. Optional fields get their defaults:
/// `description` becomes [`DEFAULT_DESCRIPTION`], `step` becomes `1`,
/// `disabled` becomes `false`.
pub fn sanitize_setting(value: &Value) -> Result<Setting, ValidationError> {
    parse_setting(value)
}

/// Check a replacement `value` against an existing setting's variant and
/// return the updated variant.
pub fn validate_setting_value(setting: &Setting, value: &Value) -> Result<SettingKind, ValidationError> {
    let err = |reason: String| ValidationError::InvalidField {
        kind: EntityKind::Setting,
        id: Some(setting.id.clone()),
        field: "value",
        reason,
    };
    let mut kind = setting.kind.clone();
    match &mut kind {
        SettingKind::Boolean { value: slot } => *slot = expect_bool(value).map_err(err)?,
        SettingKind::Number { value: slot, .. } | SettingKind::Range { value: slot, .. } => {
            *slot = expect_number(value).map_err(err)?
        }
        SettingKind::String { value: slot, .. }
        | SettingKind::Select { value: slot, .. }
        | SettingKind::Color { value: slot }
        | SettingKind::File { value: slot, .. } => *slot = expect_string(value).map_err(err)?,
        SettingKind::Multiselect { value: slot, .. }
        | SettingKind::Ranked { value: slot, .. }
        | SettingKind::List { value: slot, .. } => *slot = expect_string_array(value).map_err(err)?,
    }
    Ok(kind)
}

fn parse_setting(value: &Value) -> Result<Setting, ValidationError> {
    let r = ObjectReader::new(EntityKind::Setting, value)?;

    let tag = r.required_str("type")?;
    let setting_type = SettingType::from_tag(&tag).ok_or_else(|| r.unknown_variant(&tag))?;

    let id = r.required_id()?;
    let label = r.required_str("label")?;
    let description = r
        .optional_str("description")?
        .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string());
    let disabled = r.optional_bool("disabled")?.unwrap_or(false);
    let source = r.optional_str("source")?;

    let kind = parse_kind(setting_type, &r)?;

    Ok(Setting {
        id,
        label,
        description,
        disabled,
        source,
        kind,
    })
}

fn parse_kind(setting_type: SettingType, r: &ObjectReader<'_>) -> Result<SettingKind, ValidationError> {
    let raw = r.get("value").ok_or_else(|| r.missing("value"))?;
    let value_err = |reason: String| r.invalid("value", reason);

    let kind = match setting_type {
        SettingType::Boolean => SettingKind::Boolean {
            value: expect_bool(raw).map_err(value_err)?,
        },
        SettingType::Number | SettingType::Range => {
            let value = expect_number(raw).map_err(value_err)?;
            let min = r.required_f64("min")?;
            let max = r.required_f64("max")?;
            let step = r.optional_f64("step")?.unwrap_or(1.0);
            if setting_type == SettingType::Number {
                SettingKind::Number { value, min, max, step }
            } else {
                SettingKind::Range { value, min, max, step }
            }
        }
        SettingType::String => SettingKind::String {
            value: expect_string(raw).map_err(value_err)?,
            max_length: r.optional_u64("maxLength")?,
        },
        SettingType::Select => SettingKind::Select {
            value: expect_string(raw).map_err(value_err)?,
            options: parse_options(r)?,
            placeholder: r.optional_str("placeholder")?,
        },
        SettingType::Multiselect => SettingKind::Multiselect {
            value: expect_string_array(raw).map_err(value_err)?,
            options: parse_options(r)?,
            placeholder: r.optional_str("placeholder")?,
        },
        SettingType::Ranked => SettingKind::Ranked {
            value: expect_string_array(raw).map_err(value_err)?,
            options: parse_options(r)?,
        },
        SettingType::List => SettingKind::List {
            value: expect_string_array(raw).map_err(value_err)?,
            options: parse_options(r)?,
            placeholder: r.optional_str("placeholder")?,
            max_values: r.optional_u64("maxValues")?,
            orderable: r.optional_bool("orderable")?.unwrap_or(false),
            unique: r.optional_bool("unique")?.unwrap_or(false),
        },
        SettingType::Color => SettingKind::Color {
            value: expect_string(raw).map_err(value_err)?,
        },
        SettingType::File => SettingKind::File {
            value: expect_string(raw).map_err(value_err)?,
            file_types: parse_file_types(r)?,
            placeholder: r.optional_str("placeholder")?,
        },
    };
    Ok(kind)
}

fn parse_options(r: &ObjectReader<'_>) -> Result<Vec<SettingOption>, ValidationError> {
    let raw = r.get("options").ok_or_else(|| r.missing("options"))?;
    let items = raw
        .as_array()
        .ok_or_else(|| r.invalid("options", format!("expected array, got {}", type_name(raw))))?;
    if items.is_empty() {
        return Err(r.empty("options"));
    }

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let option_err = |field: &'static str, reason: String| ValidationError::InvalidField {
                kind: EntityKind::SettingOption,
                id: r.id().map(str::to_owned),
                field,
                reason: format!("option {index}: {reason}"),
            };
            let obj = item
                .as_object()
                .ok_or_else(|| option_err("options", "must be an object".into()))?;
            let label = obj
                .get("label")
                .and_then(Value::as_str)
                .ok_or_else(|| option_err("label", "must be a string".into()))?;
            let value = obj
                .get("value")
                .and_then(Value::as_str)
                .ok_or_else(|| option_err("value", "must be a string".into()))?;
            Ok(SettingOption {
                label: label.to_owned(),
                value: value.to_owned(),
            })
        })
        .collect()
}

fn parse_file_types(r: &ObjectReader<'_>) -> Result<Vec<FileType>, ValidationError> {
    let Some(raw) = r.get("fileTypes") else {
        return Ok(Vec::new());
    };
    let items = raw
        .as_array()
        .ok_or_else(|| r.invalid("fileTypes", format!("expected array, got {}", type_name(raw))))?;
    items
        .iter()
        .map(|item| {
            serde_json::from_value::<FileType>(item.clone())
                .map_err(|e| r.invalid("fileTypes", e.to_string()))
        })
        .collect()
}

fn expect_bool(value: &Value) -> Result<bool, String> {
    value
        .as_bool()
        .ok_or_else(|| format!("expected boolean, got {}", type_name(value)))
}

fn expect_number(value: &Value) -> Result<f64, String> {
    value
        .as_f64()
        .ok_or_else(|| format!("expected number, got {}", type_name(value)))
}

fn expect_string(value: &Value) -> Result<String, String> {
    value
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| format!("expected string, got {}", type_name(value)))
}

fn expect_string_array(value: &Value) -> Result<Vec<String>, String> {
    let items = value
        .as_array()
        .ok_or_else(|| format!("expected array of strings, got {}", type_name(value)))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_owned)
                .ok_or_else(|| "every entry must be a string".to_string())
        })
        .collect()
}
