use async_trait::async_trait;

use crate::error::CaptureError;
use crate::models::TabInfo;

/// Browser capabilities the capture pipeline needs. In production these are
/// answered by the extension over the native-messaging channel.
#[async_trait]
pub trait BrowserHost: Send + Sync {
    /// The active tab of the focused window, if there is one.
    async fn active_tab(&self) -> Result<Option<TabInfo>, CaptureError>;

    /// Screenshot of the visible area of `window_id` as a data URL.
    async fn capture_visible_tab(&self, window_id: i64) -> Result<String, CaptureError>;

    /// Rendered markup of the tab's top-level document.
    async fn page_markup(&self, tab_id: i64) -> Result<String, CaptureError>;
}
