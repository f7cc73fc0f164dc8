use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Placeholder used when a setting has no description.
pub const DEFAULT_DESCRIPTION: &str = "No description provided";

/// The closed set of setting discriminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingType {
    Boolean,
    Number,
    Range,
    String,
    Select,
    Multiselect,
    Ranked,
    List,
    Color,
    File,
}

impl SettingType {
    pub const ALL: [SettingType; 10] = [
        SettingType::Boolean,
        SettingType::Number,
        SettingType::Range,
        SettingType::String,
        SettingType::Select,
        SettingType::Multiselect,
        SettingType::Ranked,
        SettingType::List,
        SettingType::Color,
        SettingType::File,
    ];

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == tag)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingType::Boolean => "boolean",
            SettingType::Number => "number",
            SettingType::Range => "range",
            SettingType::String => "string",
            SettingType::Select => "select",
            SettingType::Multiselect => "multiselect",
            SettingType::Ranked => "ranked",
            SettingType::List => "list",
            SettingType::Color => "color",
            SettingType::File => "file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingOption {
    pub label: String,
    pub value: String,
}

/// Accepted file category for `file` settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileType {
    pub name: String,
    pub extensions: Vec<String>,
}

/// Variant-specific fields of a setting, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SettingKind {
    Boolean {
        value: bool,
    },
    Number {
        value: f64,
        min: f64,
        max: f64,
        step: f64,
    },
    Range {
        value: f64,
        min: f64,
        max: f64,
        step: f64,
    },
    String {
        value: String,
        #[serde(rename = "maxLength", default, skip_serializing_if = "Option::is_none")]
        max_length: Option<u64>,
    },
    Select {
        value: String,
        options: Vec<SettingOption>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        placeholder: Option<String>,
    },
    Multiselect {
        value: Vec<String>,
        options: Vec<SettingOption>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        placeholder: Option<String>,
    },
    Ranked {
        value: Vec<String>,
        options: Vec<SettingOption>,
    },
    List {
        value: Vec<String>,
        options: Vec<SettingOption>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        placeholder: Option<String>,
        #[serde(rename = "maxValues", default, skip_serializing_if = "Option::is_none")]
        max_values: Option<u64>,
        #[serde(default)]
        orderable: bool,
        #[serde(default)]
        unique: bool,
    },
    Color {
        value: String,
    },
    File {
        value: String,
        #[serde(rename = "fileTypes", default, skip_serializing_if = "Vec::is_empty")]
        file_types: Vec<FileType>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        placeholder: Option<String>,
    },
}

impl SettingKind {
    pub fn setting_type(&self) -> SettingType {
        match self {
            SettingKind::Boolean { .. } => SettingType::Boolean,
            SettingKind::Number { .. } => SettingType::Number,
            SettingKind::Range { .. } => SettingType::Range,
            SettingKind::String { .. } => SettingType::String,
            SettingKind::Select { .. } => SettingType::Select,
            SettingKind::Multiselect { .. } => SettingType::Multiselect,
            SettingKind::Ranked { .. } => SettingType::Ranked,
            SettingKind::List { .. } => SettingType::List,
            SettingKind::Color { .. } => SettingType::Color,
            SettingKind::File { .. } => SettingType::File,
        }
    }

    /// The current value as JSON.
    pub fn value(&self) -> Value {
        match self {
            SettingKind::Boolean { value } => Value::Bool(*value),
            SettingKind::Number { value, .. } | SettingKind::Range { value, .. } => {
                serde_json::Number::from_f64(*value)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
            SettingKind::String { value, .. }
            | SettingKind::Select { value, .. }
            | SettingKind::Color { value }
            | SettingKind::File { value, .. } => Value::String(value.clone()),
            SettingKind::Multiselect { value, .. }
            | SettingKind::Ranked { value, .. }
            | SettingKind::List { value, .. } => Value::from(value.clone()),
        }
    }
}

/// A validated, normalized setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub id: String,
    pub label: String,
    #[serde(default = "default_description")]
    pub description: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(flatten)]
    pub kind: SettingKind,
}

fn default_description() -> String {
    DEFAULT_DESCRIPTION.to_string()
}

impl Setting {
    pub fn setting_type(&self) -> SettingType {
        self.kind.setting_type()
    }

    pub fn value(&self) -> Value {
        self.kind.value()
    }
}
