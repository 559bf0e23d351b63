use serde::{Deserialize, Serialize};

pub const DEFAULT_API_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_SCREENSHOT_INTERVAL_SECS: u64 = 60;

pub const DEFAULT_CAPTURE_PROMPT: &str = "You are a browser security monitor. Look at the screenshot of the \
user's current browser tab and the page markup, and describe what the user is doing right now.\n\
Respond with strict JSON only, using exactly these keys:\n\
{\"appName\": string, \"actionName\": string, \"miscNotes\": string, \"actionType\": string, \"riskScore\": number}\n\
actionType must be one of: \"READ\", \"BROWSE\", \"SETTINGS-CHANGE\", \"EMAIL-SENSITIVE-SEND\".\n\
riskScore is a number from 0 (harmless) to 10 (high risk of data loss or account compromise).";

pub const DEFAULT_ANALYSIS_PROMPT: &str = "You are a security analyst reviewing a user's recorded browser \
activity on a single website. Point out the actions that deserve attention and explain why.\n\
Respond with strict JSON only, of the form {\"analysis\": [{\"action\": string, \"reason\": string}]}.";

/// Persisted extension configuration. Every field falls back to its default
/// when missing from the stored object, so stored values always win over
/// defaults on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub api_token: String,
    pub dom_tracking: bool,
    pub screen_capture: bool,
    pub interaction_monitoring: bool,
    /// Intended activity lifetime in days. Stored, never enforced.
    pub retention: u32,
    /// Seconds between interval captures; 0 disables them.
    pub screenshot_interval: u64,
    pub debug: bool,
    pub api_endpoint: String,
    pub model: String,
    pub capture_prompt: String,
    pub analysis_prompt: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            dom_tracking: true,
            screen_capture: true,
            interaction_monitoring: true,
            retention: DEFAULT_RETENTION_DAYS,
            screenshot_interval: DEFAULT_SCREENSHOT_INTERVAL_SECS,
            debug: false,
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            capture_prompt: DEFAULT_CAPTURE_PROMPT.to_string(),
            analysis_prompt: DEFAULT_ANALYSIS_PROMPT.to_string(),
        }
    }
}

impl Settings {
    pub fn has_api_token(&self) -> bool {
        !self.api_token.trim().is_empty()
    }

    /// Whether a trigger may start a capture cycle.
    pub fn capture_allowed(&self) -> bool {
        self.screen_capture && self.has_api_token()
    }

    /// The interval capture period, if interval capture should be armed.
    pub fn capture_period_secs(&self) -> Option<u64> {
        if self.capture_allowed() && self.screenshot_interval > 0 {
            Some(self.screenshot_interval)
        } else {
            None
        }
    }

    pub fn apply(&mut self, patch: SettingsPatch) {
        if let Some(v) = patch.api_token {
            self.api_token = v;
        }
        if let Some(v) = patch.dom_tracking {
            self.dom_tracking = v;
        }
        if let Some(v) = patch.screen_capture {
            self.screen_capture = v;
        }
        if let Some(v) = patch.interaction_monitoring {
            self.interaction_monitoring = v;
        }
        if let Some(v) = patch.retention {
            self.retention = v;
        }
        if let Some(v) = patch.screenshot_interval {
            self.screenshot_interval = v;
        }
        if let Some(v) = patch.debug {
            self.debug = v;
        }
        if let Some(v) = patch.api_endpoint {
            self.api_endpoint = v;
        }
        if let Some(v) = patch.model {
            self.model = v;
        }
        if let Some(v) = patch.capture_prompt {
            self.capture_prompt = v;
        }
        if let Some(v) = patch.analysis_prompt {
            self.analysis_prompt = v;
        }
    }
}

/// Partial update sent by the options surface. Absent fields are left alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SettingsPatch {
    pub api_token: Option<String>,
    pub dom_tracking: Option<bool>,
    pub screen_capture: Option<bool>,
    pub interaction_monitoring: Option<bool>,
    pub retention: Option<u32>,
    pub screenshot_interval: Option<u64>,
    pub debug: Option<bool>,
    pub api_endpoint: Option<String>,
    pub model: Option<String>,
    pub capture_prompt: Option<String>,
    pub analysis_prompt: Option<String>,
}

impl SettingsPatch {
    /// Build a single-field patch from the CLI's `key value` form. Keys use
    /// the stored camelCase names.
    pub fn from_key_value(key: &str, value: &str) -> Result<Self, String> {
        let mut patch = SettingsPatch::default();
        match key {
            "apiToken" => patch.api_token = Some(value.trim().to_string()),
            "domTracking" => patch.dom_tracking = Some(parse_bool(key, value)?),
            "screenCapture" => patch.screen_capture = Some(parse_bool(key, value)?),
            "interactionMonitoring" => {
                patch.interaction_monitoring = Some(parse_bool(key, value)?)
            }
            // The options form stores 30 for anything that is not a number.
            "retention" => {
                patch.retention = Some(value.trim().parse().unwrap_or(DEFAULT_RETENTION_DAYS))
            }
            "screenshotInterval" => {
                patch.screenshot_interval = Some(
                    value
                        .trim()
                        .parse()
                        .map_err(|_| format!("{} expects a number of seconds, got '{}'", key, value))?,
                )
            }
            "debug" => patch.debug = Some(parse_bool(key, value)?),
            "apiEndpoint" => patch.api_endpoint = Some(value.trim().to_string()),
            "model" => patch.model = Some(value.trim().to_string()),
            "capturePrompt" => patch.capture_prompt = Some(value.to_string()),
            "analysisPrompt" => patch.analysis_prompt = Some(value.to_string()),
            other => return Err(format!("unknown setting '{}'", other)),
        }
        Ok(patch)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(format!("{} expects true or false, got '{}'", key, value)),
    }
}
