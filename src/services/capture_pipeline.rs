use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::CaptureError;
use crate::models::{ActivityRecord, Settings};
use crate::utils::truncate_at_char_boundary;

use super::activity_store::ActivityStore;
use super::browser::BrowserHost;
use super::classifier::Classifier;
use super::screenshot;
use super::trigger_engine::{CaptureSink, Trigger};

const MAX_MARKUP_CHARS: usize = 20_000;

/// One trigger in, zero or one activity record out.
pub struct CapturePipeline {
    browser: Arc<dyn BrowserHost>,
    classifier: Arc<dyn Classifier>,
    store: ActivityStore,
    settings: watch::Receiver<Settings>,
}

impl CapturePipeline {
    pub fn new(
        browser: Arc<dyn BrowserHost>,
        classifier: Arc<dyn Classifier>,
        store: ActivityStore,
        settings: watch::Receiver<Settings>,
    ) -> Self {
        Self {
            browser,
            classifier,
            store,
            settings,
        }
    }

    /// Run one capture cycle. `Ok(None)` means the cycle was skipped without
    /// anything going wrong (no active tab, or the trigger's tab is no longer
    /// in front).
    pub async fn run(&self, trigger: Trigger) -> Result<Option<ActivityRecord>, CaptureError> {
        let settings = self.settings.borrow().clone();

        let Some(tab) = self.browser.active_tab().await? else {
            log::debug!("{:?}: no active tab", trigger);
            return Ok(None);
        };
        if let Some(tab_id) = trigger.tab_id() {
            if tab_id != tab.id {
                log::debug!("{:?}: tab {} is not the active tab {}", trigger, tab_id, tab.id);
                return Ok(None);
            }
        }

        let raw_screenshot = self.browser.capture_visible_tab(tab.window_id).await?;
        let screenshot = screenshot::prepare_for_upload(&raw_screenshot).unwrap_or_else(|e| {
            log::debug!("uploading screenshot as captured: {}", e);
            raw_screenshot
        });

        let markup = if settings.dom_tracking {
            match self.browser.page_markup(tab.id).await {
                Ok(markup) => truncate_at_char_boundary(&markup, MAX_MARKUP_CHARS),
                Err(e) => {
                    log::debug!("markup unavailable for tab {}: {}", tab.id, e);
                    String::new()
                }
            }
        } else {
            String::new()
        };

        let action = self.classifier.classify(&settings, &markup, &screenshot).await?;

        let record = ActivityRecord::from_classification(
            chrono::Utc::now().timestamp_millis(),
            tab.url,
            action,
        );
        self.store.append(record.clone()).await?;
        log::debug!(
            "recorded {} on {} ({})",
            record.action_name,
            record.url,
            record.action_type.map(|t| t.as_str()).unwrap_or("UNKNOWN")
        );

        Ok(Some(record))
    }
}

#[async_trait]
impl CaptureSink for CapturePipeline {
    async fn capture(&self, trigger: Trigger) {
        match self.run(trigger).await {
            Ok(_) => {}
            Err(CaptureError::Storage(e)) => log::error!("{:?}: failed to store activity: {:#}", trigger, e),
            Err(e) => log::debug!("{:?}: capture abandoned: {}", trigger, e),
        }
    }
}
