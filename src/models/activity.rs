use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    #[serde(rename = "READ")]
    Read,
    #[serde(rename = "BROWSE")]
    Browse,
    #[serde(rename = "SETTINGS-CHANGE")]
    SettingsChange,
    #[serde(rename = "EMAIL-SENSITIVE-SEND")]
    EmailSensitiveSend,
}

impl ActionType {
    pub const ALL: [ActionType; 4] = [
        ActionType::Read,
        ActionType::Browse,
        ActionType::SettingsChange,
        ActionType::EmailSensitiveSend,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Read => "READ",
            ActionType::Browse => "BROWSE",
            ActionType::SettingsChange => "SETTINGS-CHANGE",
            ActionType::EmailSensitiveSend => "EMAIL-SENSITIVE-SEND",
        }
    }

    pub fn is_sensitive(&self) -> bool {
        matches!(self, ActionType::SettingsChange | ActionType::EmailSensitiveSend)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace('_', "-");
        ActionType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| format!("unknown action type '{}'", s))
    }
}

/// Unrecognised labels are read back as absent rather than failing the
/// whole record.
fn lenient_action_type<'de, D>(deserializer: D) -> Result<Option<ActionType>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.parse().ok()))
}

/// One classified capture cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    /// Epoch milliseconds.
    pub timestamp: i64,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub action_name: String,
    #[serde(default)]
    pub misc_notes: String,
    #[serde(default, deserialize_with = "lenient_action_type", skip_serializing_if = "Option::is_none")]
    pub action_type: Option<ActionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
}

impl ActivityRecord {
    pub fn from_classification(timestamp: i64, url: String, action: ClassifiedAction) -> Self {
        Self {
            timestamp,
            url,
            app_name: action.app_name,
            action_name: action.action_name,
            misc_notes: action.misc_notes,
            action_type: action.action_type,
            risk_score: action.risk_score,
        }
    }

    pub fn hostname(&self) -> Option<String> {
        hostname_of(&self.url)
    }
}

/// Hostname of a URL, `None` when the URL is empty or unparsable. URLs
/// without a host (e.g. `about:blank`) yield an empty hostname.
pub fn hostname_of(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    let parsed = url::Url::parse(raw).ok()?;
    Some(parsed.host_str().unwrap_or_default().to_string())
}

/// Structured output of the capture classifier.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedAction {
    pub app_name: String,
    pub action_name: String,
    #[serde(deserialize_with = "nullable_string")]
    pub misc_notes: String,
    #[serde(deserialize_with = "lenient_action_type")]
    pub action_type: Option<ActionType>,
    #[serde(default)]
    pub risk_score: Option<f64>,
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
