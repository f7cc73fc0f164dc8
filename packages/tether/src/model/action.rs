use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An action the host can trigger on behalf of the app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_instructions: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// Physical input modes a key can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMode {
    KeyUp,
    KeyDown,
    ScrollUp,
    ScrollDown,
    ScrollLeft,
    ScrollRight,
    SwipeUp,
    SwipeDown,
    SwipeLeft,
    SwipeRight,
    PressShort,
    PressLong,
}

impl KeyMode {
    pub const ALL: [KeyMode; 12] = [
        KeyMode::KeyUp,
        KeyMode::KeyDown,
        KeyMode::ScrollUp,
        KeyMode::ScrollDown,
        KeyMode::ScrollLeft,
        KeyMode::ScrollRight,
        KeyMode::SwipeUp,
        KeyMode::SwipeDown,
        KeyMode::SwipeLeft,
        KeyMode::SwipeRight,
        KeyMode::PressShort,
        KeyMode::PressLong,
    ];

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == tag)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyMode::KeyUp => "keyup",
            KeyMode::KeyDown => "keydown",
            KeyMode::ScrollUp => "scrollup",
            KeyMode::ScrollDown => "scrolldown",
            KeyMode::ScrollLeft => "scrollleft",
            KeyMode::ScrollRight => "scrollright",
            KeyMode::SwipeUp => "swipeup",
            KeyMode::SwipeDown => "swipedown",
            KeyMode::SwipeLeft => "swipeleft",
            KeyMode::SwipeRight => "swiperight",
            KeyMode::PressShort => "pressshort",
            KeyMode::PressLong => "presslong",
        }
    }
}

/// A physical key binding the app listens for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub enabled: bool,
    pub modes: Vec<KeyMode>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_mode_tags_roundtrip_through_serde() {
        for mode in KeyMode::ALL {
            let wire = serde_json::to_value(mode).unwrap();
            assert_eq!(wire, Value::String(mode.as_str().to_string()));
            assert_eq!(KeyMode::from_tag(mode.as_str()), Some(mode));
        }
    }

    #[test]
    fn test_action_enabled_defaults_true_when_deserialized() {
        let action: Action = serde_json::from_value(serde_json::json!({ "id": "skip" })).unwrap();
        assert!(action.enabled);
    }
}
