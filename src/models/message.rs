use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::SettingsPatch;

/// Messages the extension writes to the host's stdin.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum InboundMessage {
    UserClick,
    UserTyping,
    TabActivated {
        tab_id: i64,
    },
    TabUpdated {
        tab_id: i64,
        #[serde(default)]
        status: Option<String>,
    },
    NavigationCompleted {
        tab_id: i64,
        frame_id: i64,
    },
    HistoryStateUpdated {
        tab_id: i64,
        frame_id: i64,
    },
    BrowserResponse {
        id: String,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
    GetSettings {
        request_id: String,
    },
    UpdateSettings {
        request_id: String,
        settings: SettingsPatch,
    },
    GetDashboard {
        request_id: String,
    },
    AnalyzeSite {
        request_id: String,
        site: String,
    },
}

/// Messages the host writes to stdout.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum OutboundMessage {
    BrowserRequest {
        id: String,
        method: BrowserMethod,
        params: Value,
    },
    Reply {
        request_id: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl OutboundMessage {
    pub fn reply(request_id: String, result: Result<Value, String>) -> Self {
        match result {
            Ok(payload) => OutboundMessage::Reply {
                request_id,
                ok: true,
                payload: Some(payload),
                error: None,
            },
            Err(error) => OutboundMessage::Reply {
                request_id,
                ok: false,
                payload: None,
                error: Some(error),
            },
        }
    }
}

/// Browser capabilities the host asks the extension to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BrowserMethod {
    ActiveTab,
    CaptureVisibleTab,
    PageMarkup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: i64,
    pub window_id: i64,
    #[serde(default)]
    pub url: String,
}
