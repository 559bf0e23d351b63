//! In-memory stand-ins for the browser and the classifier.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::CaptureError;
use crate::models::{ActivityRecord, AnalysisRow, ClassifiedAction, Settings, TabInfo};

use super::browser::BrowserHost;
use super::classifier::Classifier;

#[derive(Default)]
pub struct FakeBrowser {
    tab: Option<TabInfo>,
    markup: Option<String>,
    no_screenshot: bool,
    screenshots: AtomicUsize,
    markup_requests: AtomicUsize,
}

impl FakeBrowser {
    pub const SCREENSHOT: &'static str = "data:image/png;base64,AAAA";

    pub fn with_tab(tab: TabInfo) -> Self {
        Self {
            tab: Some(tab),
            ..Self::default()
        }
    }

    pub fn markup(mut self, markup: &str) -> Self {
        self.markup = Some(markup.to_string());
        self
    }

    pub fn without_screenshot(mut self) -> Self {
        self.no_screenshot = true;
        self
    }

    pub fn screenshots_taken(&self) -> usize {
        self.screenshots.load(Ordering::SeqCst)
    }

    pub fn markup_requests(&self) -> usize {
        self.markup_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserHost for FakeBrowser {
    async fn active_tab(&self) -> Result<Option<TabInfo>, CaptureError> {
        Ok(self.tab.clone())
    }

    async fn capture_visible_tab(&self, _window_id: i64) -> Result<String, CaptureError> {
        self.screenshots.fetch_add(1, Ordering::SeqCst);
        if self.no_screenshot {
            return Err(CaptureError::Unavailable("capture permission denied".to_string()));
        }
        Ok(Self::SCREENSHOT.to_string())
    }

    async fn page_markup(&self, _tab_id: i64) -> Result<String, CaptureError> {
        self.markup_requests.fetch_add(1, Ordering::SeqCst);
        self.markup
            .clone()
            .ok_or_else(|| CaptureError::Unavailable("cannot script this page".to_string()))
    }
}

/// Answers every classification with the same raw content string and every
/// analysis with the same rows.
#[derive(Default)]
pub struct FakeClassifier {
    reply: String,
    analysis: Vec<AnalysisRow>,
    calls: AtomicUsize,
    analysis_calls: AtomicUsize,
    last_markup: Mutex<Option<String>>,
    last_screenshot: Mutex<Option<String>>,
    last_records: Mutex<Vec<ActivityRecord>>,
}

impl FakeClassifier {
    pub fn replying(content: &str) -> Self {
        Self {
            reply: content.to_string(),
            ..Self::default()
        }
    }

    pub fn analysing(rows: Vec<AnalysisRow>) -> Self {
        Self {
            analysis: rows,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn analysis_calls(&self) -> usize {
        self.analysis_calls.load(Ordering::SeqCst)
    }

    pub fn last_markup(&self) -> Option<String> {
        self.last_markup.lock().unwrap().clone()
    }

    pub fn last_screenshot(&self) -> Option<String> {
        self.last_screenshot.lock().unwrap().clone()
    }

    pub fn last_records(&self) -> Vec<ActivityRecord> {
        self.last_records.lock().unwrap().clone()
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify(
        &self,
        _settings: &Settings,
        markup: &str,
        screenshot: &str,
    ) -> Result<ClassifiedAction, CaptureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_markup.lock().unwrap() = Some(markup.to_string());
        *self.last_screenshot.lock().unwrap() = Some(screenshot.to_string());
        serde_json::from_str(&self.reply).map_err(|e| CaptureError::Parse(e.to_string()))
    }

    async fn analyze(
        &self,
        _settings: &Settings,
        _site: &str,
        records: &[ActivityRecord],
    ) -> Result<Vec<AnalysisRow>, CaptureError> {
        self.analysis_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_records.lock().unwrap() = records.to_vec();
        Ok(self.analysis.clone())
    }
}
