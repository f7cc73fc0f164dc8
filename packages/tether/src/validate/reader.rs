//! Field access over a JSON object with errors pre-filled for one entity.

use serde_json::{Map, Value};

use crate::error::{EntityKind, ValidationError};

pub(crate) struct ObjectReader<'a> {
    kind: EntityKind,
    id: Option<String>,
    map: &'a Map<String, Value>,
}

impl<'a> ObjectReader<'a> {
    /// Wrap `value`, failing if it is not an object. The `id` field is read
    /// eagerly (if it is a string) so every later error can name it.
    pub fn new(kind: EntityKind, value: &'a Value) -> Result<Self, ValidationError> {
        let map = value
            .as_object()
            .ok_or(ValidationError::NotAnObject { kind })?;
        let id = map.get("id").and_then(Value::as_str).map(str::to_owned);
        Ok(Self { kind, id, map })
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn has(&self, field: &str) -> bool {
        self.map.get(field).is_some_and(|v| !v.is_null())
    }

    pub fn get(&self, field: &str) -> Option<&'a Value> {
        self.map.get(field).filter(|v| !v.is_null())
    }

    pub fn missing(&self, field: &'static str) -> ValidationError {
        ValidationError::MissingField {
            kind: self.kind,
            id: self.id.clone(),
            field,
        }
    }

    pub fn invalid(&self, field: &'static str, reason: impl Into<String>) -> ValidationError {
        ValidationError::InvalidField {
            kind: self.kind,
            id: self.id.clone(),
            field,
            reason: reason.into(),
        }
    }

    pub fn empty(&self, field: &'static str) -> ValidationError {
        ValidationError::EmptyCollection {
            kind: self.kind,
            id: self.id.clone(),
            field,
        }
    }

    pub fn unknown_variant(&self, tag: &str) -> ValidationError {
        ValidationError::UnknownVariant {
            kind: self.kind,
            id: self.id.clone(),
            tag: tag.to_owned(),
        }
    }

    /// The `id` field, which must be a non-empty string.
    pub fn required_id(&self) -> Result<String, ValidationError> {
        let id = self.required_str("id")?;
        if id.trim().is_empty() {
            return Err(self.invalid("id", "must not be empty"));
        }
        Ok(id)
    }

    pub fn required_str(&self, field: &'static str) -> Result<String, ValidationError> {
        match self.get(field) {
            None => Err(self.missing(field)),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(self.invalid(field, format!("expected string, got {}", type_name(other)))),
        }
    }

    pub fn optional_str(&self, field: &'static str) -> Result<Option<String>, ValidationError> {
        match self.get(field) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(self.invalid(field, format!("expected string, got {}", type_name(other)))),
        }
    }

    pub fn required_f64(&self, field: &'static str) -> Result<f64, ValidationError> {
        match self.get(field) {
            None => Err(self.missing(field)),
            Some(value) => value
                .as_f64()
                .ok_or_else(|| self.invalid(field, format!("expected number, got {}", type_name(value)))),
        }
    }

    pub fn optional_f64(&self, field: &'static str) -> Result<Option<f64>, ValidationError> {
        match self.get(field) {
            None => Ok(None),
            Some(value) => value
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.invalid(field, format!("expected number, got {}", type_name(value)))),
        }
    }

    pub fn optional_u64(&self, field: &'static str) -> Result<Option<u64>, ValidationError> {
        match self.get(field) {
            None => Ok(None),
            Some(value) => value.as_u64().map(Some).ok_or_else(|| {
                self.invalid(field, format!("expected non-negative integer, got {}", type_name(value)))
            }),
        }
    }

    pub fn optional_bool(&self, field: &'static str) -> Result<Option<bool>, ValidationError> {
        match self.get(field) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(self.invalid(field, format!("expected boolean, got {}", type_name(other)))),
        }
    }

    pub fn string_array(&self, field: &'static str) -> Result<Option<Vec<String>>, ValidationError> {
        let Some(value) = self.get(field) else {
            return Ok(None);
        };
        let items = value
            .as_array()
            .ok_or_else(|| self.invalid(field, format!("expected array, got {}", type_name(value))))?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| self.invalid(field, "every entry must be a string"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}

/// JSON type name used in error messages.
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
