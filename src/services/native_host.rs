//! Native-messaging host: length-prefixed JSON over stdin/stdout, plus the
//! bridge that lets the capture pipeline call back into the browser.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::CaptureError;
use crate::models::{BrowserMethod, InboundMessage, OutboundMessage, TabInfo};
use crate::utils::logging;

use super::activity_store::ActivityStore;
use super::browser::BrowserHost;
use super::capture_pipeline::CapturePipeline;
use super::classifier::Classifier;
use super::dashboard_engine;
use super::settings_store::SettingsStore;
use super::signals::SignalForwarder;
use super::trigger_engine::TriggerEngine;

/// Chrome refuses host-to-browser messages above 1 MiB.
pub const MAX_OUTBOUND_FRAME: usize = 1024 * 1024;
pub const MAX_INBOUND_FRAME: usize = 64 * 1024 * 1024;

pub const BROWSER_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const SETTINGS_POLL: Duration = Duration::from_secs(2);

const OUTBOUND_QUEUE: usize = 64;
const SIGNAL_QUEUE: usize = 256;

/// Read one frame. `Ok(None)` on a clean EOF before the length prefix.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("failed to read frame length"),
    }

    let len = u32::from_ne_bytes(len_buf) as usize;
    if len > MAX_INBOUND_FRAME {
        bail!("inbound frame of {} bytes exceeds {} byte limit", len, MAX_INBOUND_FRAME);
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .context("stream ended inside a frame")?;
    Ok(Some(body))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> Result<()> {
    if body.len() > MAX_OUTBOUND_FRAME {
        bail!("outbound frame of {} bytes exceeds {} byte limit", body.len(), MAX_OUTBOUND_FRAME);
    }
    writer.write_all(&(body.len() as u32).to_ne_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

type PendingReply = oneshot::Sender<Result<Value, String>>;

/// [`BrowserHost`] backed by the extension: each call becomes a
/// `browser-request` frame and waits for the matching `browser-response`.
pub struct NativeBridge {
    outbound: mpsc::Sender<OutboundMessage>,
    pending: Mutex<HashMap<String, PendingReply>>,
    closed: AtomicBool,
    timeout: Duration,
}

impl NativeBridge {
    pub fn new(outbound: mpsc::Sender<OutboundMessage>) -> Self {
        Self::with_timeout(outbound, BROWSER_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(outbound: mpsc::Sender<OutboundMessage>, timeout: Duration) -> Self {
        Self {
            outbound,
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            timeout,
        }
    }

    /// Hand a `browser-response` to whoever is waiting on it.
    pub fn resolve(&self, id: &str, result: Option<Value>, error: Option<String>) {
        let waiter = self.pending.lock().ok().and_then(|mut p| p.remove(id));
        let Some(waiter) = waiter else {
            log::debug!("response for unknown or expired browser request {}", id);
            return;
        };
        let outcome = match error {
            Some(error) => Err(error),
            None => Ok(result.unwrap_or(Value::Null)),
        };
        let _ = waiter.send(outcome);
    }

    /// Fail every outstanding request and refuse new ones.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }

    fn forget(&self, id: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(id);
        }
    }

    async fn request(&self, method: BrowserMethod, params: Value) -> Result<Value, CaptureError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CaptureError::Messaging("host is shutting down".to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| CaptureError::Messaging("pending request table poisoned".to_string()))?
            .insert(id.clone(), tx);

        let message = OutboundMessage::BrowserRequest {
            id: id.clone(),
            method,
            params,
        };
        if self.outbound.send(message).await.is_err() {
            self.forget(&id);
            return Err(CaptureError::Messaging("browser connection closed".to_string()));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(error))) => Err(CaptureError::Unavailable(format!("{:?}: {}", method, error))),
            Ok(Err(_)) => Err(CaptureError::Messaging("browser connection closed".to_string())),
            Err(_) => {
                self.forget(&id);
                Err(CaptureError::Messaging(format!(
                    "{:?} timed out after {}s",
                    method,
                    self.timeout.as_secs()
                )))
            }
        }
    }
}

#[async_trait]
impl BrowserHost for NativeBridge {
    async fn active_tab(&self) -> Result<Option<TabInfo>, CaptureError> {
        let value = self.request(BrowserMethod::ActiveTab, json!({})).await?;
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| CaptureError::Parse(format!("active tab: {}", e)))
    }

    async fn capture_visible_tab(&self, window_id: i64) -> Result<String, CaptureError> {
        let value = self
            .request(BrowserMethod::CaptureVisibleTab, json!({ "windowId": window_id }))
            .await?;
        string_result(value, "screenshot")
    }

    async fn page_markup(&self, tab_id: i64) -> Result<String, CaptureError> {
        let value = self.request(BrowserMethod::PageMarkup, json!({ "tabId": tab_id })).await?;
        string_result(value, "page markup")
    }
}

fn string_result(value: Value, what: &str) -> Result<String, CaptureError> {
    match value {
        Value::String(s) => Ok(s),
        Value::Null => Err(CaptureError::Unavailable(format!("no {} returned", what))),
        other => Err(CaptureError::Parse(format!("{} is not a string: {}", what, other))),
    }
}

/// Everything a request handler needs.
#[derive(Clone)]
pub struct HostContext {
    pub settings: SettingsStore,
    pub store: ActivityStore,
    pub classifier: Arc<dyn Classifier>,
}

/// Run the host until the browser closes stdin.
pub async fn run_host<R, W>(mut reader: R, writer: W, ctx: HostContext) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let cancel = CancellationToken::new();
    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let writer_task = tokio::spawn(write_outbound(writer, out_rx));

    let log_task = tokio::spawn(follow_debug_flag(ctx.settings.clone(), cancel.clone()));
    let reload_task = tokio::spawn(ctx.settings.clone().follow_file(SETTINGS_POLL, cancel.clone()));

    let bridge = Arc::new(NativeBridge::new(out_tx.clone()));
    let pipeline = Arc::new(CapturePipeline::new(
        bridge.clone(),
        ctx.classifier.clone(),
        ctx.store.clone(),
        ctx.settings.subscribe(),
    ));

    let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_QUEUE);
    let engine = TriggerEngine::new(signal_rx, ctx.settings.subscribe(), pipeline, cancel.clone());
    let engine_task = tokio::spawn(engine.run());
    let forwarder = SignalForwarder::new(signal_tx, ctx.settings.subscribe());

    log::info!("native host started");

    let result = loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::info!("browser closed the connection");
                break Ok(());
            }
            Err(e) => break Err(e),
        };

        let message: InboundMessage = match serde_json::from_slice(&frame) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("skipping malformed message: {}", e);
                continue;
            }
        };

        if forwarder.forward_message(&message) {
            continue;
        }
        if let InboundMessage::BrowserResponse { id, result, error } = message {
            bridge.resolve(&id, result, error);
            continue;
        }

        // Handled off the read loop so browser responses keep flowing while
        // an analysis request is waiting on the network.
        let ctx = ctx.clone();
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            if let Some(reply) = handle_request(&ctx, message).await {
                let _ = out_tx.send(reply).await;
            }
        });
    };

    cancel.cancel();
    bridge.close();
    drop(forwarder);
    drop(out_tx);
    drop(bridge);
    let _ = engine_task.await;
    let _ = log_task.await;
    let _ = reload_task.await;
    // In-flight captures still hold a sender; do not wait on them forever.
    let _ = tokio::time::timeout(Duration::from_secs(2), writer_task).await;

    log::info!("native host stopped");
    result
}

async fn write_outbound<W: AsyncWrite + Unpin>(mut writer: W, mut rx: mpsc::Receiver<OutboundMessage>) {
    while let Some(message) = rx.recv().await {
        let body = match encode_outbound(&message) {
            Ok(body) => body,
            Err(e) => {
                log::error!("failed to encode outbound message: {:#}", e);
                continue;
            }
        };
        if let Err(e) = write_frame(&mut writer, &body).await {
            log::error!("failed to write to browser: {:#}", e);
            break;
        }
    }
}

/// Serialize a message; a reply too large for one frame becomes an error
/// reply so the caller is not left waiting.
fn encode_outbound(message: &OutboundMessage) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(message)?;
    if body.len() <= MAX_OUTBOUND_FRAME {
        return Ok(body);
    }
    match message {
        OutboundMessage::Reply { request_id, .. } => {
            let fallback = OutboundMessage::reply(
                request_id.clone(),
                Err(format!("reply of {} bytes is too large to send", body.len())),
            );
            Ok(serde_json::to_vec(&fallback)?)
        }
        OutboundMessage::BrowserRequest { .. } => {
            bail!("browser request of {} bytes is too large to send", body.len())
        }
    }
}

async fn follow_debug_flag(settings: SettingsStore, cancel: CancellationToken) {
    let mut rx = settings.subscribe();
    logging::apply_debug_flag(rx.borrow_and_update().debug);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                logging::apply_debug_flag(rx.borrow_and_update().debug);
            }
        }
    }
}

/// Answer a request from the extension's own pages. Signals and browser
/// responses never reach here.
pub async fn handle_request(ctx: &HostContext, message: InboundMessage) -> Option<OutboundMessage> {
    let (request_id, result) = match message {
        InboundMessage::GetSettings { request_id } => (request_id, to_payload(&ctx.settings.stored())),
        InboundMessage::UpdateSettings { request_id, settings } => {
            let result = ctx
                .settings
                .update(settings)
                .map_err(|e| format!("{:#}", e))
                .and_then(|s| to_payload(&s));
            (request_id, result)
        }
        InboundMessage::GetDashboard { request_id } => {
            let result = match ctx.store.snapshot().await {
                Ok(activities) => to_payload(&dashboard_engine::render(&activities)),
                Err(e) => Err(format!("{:#}", e)),
            };
            (request_id, result)
        }
        InboundMessage::AnalyzeSite { request_id, site } => {
            let result = analyze(ctx, &site).await;
            (request_id, result)
        }
        other => {
            log::debug!("no handler for {:?}", other);
            return None;
        }
    };
    Some(OutboundMessage::reply(request_id, result))
}

async fn analyze(ctx: &HostContext, site: &str) -> Result<Value, String> {
    let activities = ctx.store.snapshot().await.map_err(|e| format!("{:#}", e))?;
    let settings = ctx.settings.current();
    let rows = dashboard_engine::analyze_site(ctx.classifier.as_ref(), &settings, &activities, site)
        .await
        .map_err(|e| e.to_string())?;
    to_payload(&rows)
}

fn to_payload<T: serde::Serialize>(value: &T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionType, ActivityRecord, AnalysisRow};
    use crate::services::test_support::FakeClassifier;
    use tokio::io::{duplex, DuplexStream};

    #[tokio::test]
    async fn frames_round_trip_through_a_pipe() {
        let (mut a, mut b) = duplex(1024);
        write_frame(&mut a, br#"{"type":"user-click"}"#).await.unwrap();
        drop(a);

        let frame = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(frame, br#"{"type":"user-click"}"#);
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_outbound_frame_is_rejected() {
        let (mut a, _b) = duplex(64);
        let body = vec![b'x'; MAX_OUTBOUND_FRAME + 1];
        assert!(write_frame(&mut a, &body).await.is_err());
    }

    #[tokio::test]
    async fn oversized_inbound_length_is_rejected() {
        let (mut a, mut b) = duplex(64);
        a.write_all(&((MAX_INBOUND_FRAME as u32) + 1).to_ne_bytes()).await.unwrap();
        assert!(read_frame(&mut b).await.is_err());
    }

    #[test]
    fn oversized_reply_becomes_error_reply() {
        let reply = OutboundMessage::reply("r1".to_string(), Ok(Value::String("x".repeat(MAX_OUTBOUND_FRAME))));
        let body = encode_outbound(&reply).unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["requestId"], "r1");
        assert_eq!(value["ok"], false);
    }

    #[tokio::test]
    async fn bridge_resolves_requests_by_id() {
        let (tx, mut rx) = mpsc::channel(4);
        let bridge = Arc::new(NativeBridge::new(tx));

        let call = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.capture_visible_tab(7).await })
        };

        let Some(OutboundMessage::BrowserRequest { id, method, params }) = rx.recv().await else {
            panic!("expected a browser request");
        };
        assert_eq!(method, BrowserMethod::CaptureVisibleTab);
        assert_eq!(params["windowId"], 7);

        bridge.resolve("someone-else", Some(json!("nope")), None);
        bridge.resolve(&id, Some(json!("data:image/png;base64,AAAA")), None);
        assert_eq!(call.await.unwrap().unwrap(), "data:image/png;base64,AAAA");
    }

    #[tokio::test]
    async fn bridge_maps_null_tab_and_browser_errors() {
        let (tx, mut rx) = mpsc::channel(4);
        let bridge = Arc::new(NativeBridge::new(tx));

        let b = bridge.clone();
        let tab = tokio::spawn(async move { b.active_tab().await });
        let Some(OutboundMessage::BrowserRequest { id, .. }) = rx.recv().await else {
            panic!("expected a browser request");
        };
        bridge.resolve(&id, Some(Value::Null), None);
        assert_eq!(tab.await.unwrap().unwrap(), None);

        let b = bridge.clone();
        let markup = tokio::spawn(async move { b.page_markup(3).await });
        let Some(OutboundMessage::BrowserRequest { id, .. }) = rx.recv().await else {
            panic!("expected a browser request");
        };
        bridge.resolve(&id, None, Some("Cannot access chrome:// URL".to_string()));
        assert!(matches!(markup.await.unwrap(), Err(CaptureError::Unavailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn bridge_requests_time_out() {
        let (tx, _rx) = mpsc::channel(4);
        let bridge = NativeBridge::with_timeout(tx, Duration::from_secs(5));
        let result = bridge.active_tab().await;
        assert!(matches!(result, Err(CaptureError::Messaging(_))));
        assert!(bridge.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn closed_bridge_refuses_requests() {
        let (tx, _rx) = mpsc::channel(4);
        let bridge = NativeBridge::new(tx);
        bridge.close();
        assert!(matches!(bridge.active_tab().await, Err(CaptureError::Messaging(_))));
    }

    struct Harness {
        _dir: tempfile::TempDir,
        ctx: HostContext,
    }

    fn harness(classifier: FakeClassifier) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsStore::open(dir.path().join("settings.json")).unwrap();
        let store = ActivityStore::open(dir.path().join("activities.db")).unwrap();
        Harness {
            ctx: HostContext {
                settings,
                store,
                classifier: Arc::new(classifier),
            },
            _dir: dir,
        }
    }

    async fn send(stream: &mut DuplexStream, value: Value) {
        write_frame(stream, &serde_json::to_vec(&value).unwrap()).await.unwrap();
    }

    async fn recv(stream: &mut DuplexStream) -> Value {
        let frame = read_frame(stream).await.unwrap().unwrap();
        serde_json::from_slice(&frame).unwrap()
    }

    #[tokio::test]
    async fn host_answers_requests_and_stops_on_eof() {
        let h = harness(FakeClassifier::default());
        let (mut browser_in, host_in) = duplex(64 * 1024);
        let (host_out, mut browser_out) = duplex(64 * 1024);
        let host = tokio::spawn(run_host(host_in, host_out, h.ctx.clone()));

        send(&mut browser_in, json!({ "type": "not-a-message" })).await;
        send(
            &mut browser_in,
            json!({ "type": "update-settings", "requestId": "u1", "settings": { "screenshotInterval": 0 } }),
        )
        .await;
        let reply = recv(&mut browser_out).await;
        assert_eq!(reply["type"], "reply");
        assert_eq!(reply["requestId"], "u1");
        assert_eq!(reply["payload"]["screenshotInterval"], 0);
        assert_eq!(h.ctx.settings.current().screenshot_interval, 0);

        send(&mut browser_in, json!({ "type": "get-settings", "requestId": "g1" })).await;
        let reply = recv(&mut browser_out).await;
        assert_eq!(reply["requestId"], "g1");
        assert_eq!(reply["payload"], serde_json::to_value(h.ctx.settings.stored()).unwrap());

        send(&mut browser_in, json!({ "type": "get-dashboard", "requestId": "d1" })).await;
        let reply = recv(&mut browser_out).await;
        assert_eq!(reply["ok"], true);
        assert_eq!(reply["payload"]["sites"], json!([]));

        drop(browser_in);
        host.await.unwrap().unwrap();
    }

    async fn expect_browser_request(stream: &mut DuplexStream, method: &str) -> String {
        let request = recv(stream).await;
        assert_eq!(request["type"], "browser-request");
        assert_eq!(request["method"], method);
        request["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn click_drives_a_full_capture_through_the_browser() {
        let h = harness(FakeClassifier::replying(
            r#"{"appName":"Mail","actionName":"Compose","miscNotes":"","actionType":"BROWSE"}"#,
        ));
        h.ctx.settings.set_field("apiToken", "sk-test").unwrap();
        h.ctx.settings.set_field("screenshotInterval", "0").unwrap();

        let (mut browser_in, host_in) = duplex(64 * 1024);
        let (host_out, mut browser_out) = duplex(64 * 1024);
        let host = tokio::spawn(run_host(host_in, host_out, h.ctx.clone()));

        send(&mut browser_in, json!({ "type": "user-click" })).await;

        let id = expect_browser_request(&mut browser_out, "active-tab").await;
        send(
            &mut browser_in,
            json!({
                "type": "browser-response",
                "id": id,
                "result": { "id": 5, "windowId": 1, "url": "https://mail.example.com/compose" }
            }),
        )
        .await;

        let id = expect_browser_request(&mut browser_out, "capture-visible-tab").await;
        send(
            &mut browser_in,
            json!({ "type": "browser-response", "id": id, "result": "data:image/png;base64,AAAA" }),
        )
        .await;

        let id = expect_browser_request(&mut browser_out, "page-markup").await;
        send(
            &mut browser_in,
            json!({ "type": "browser-response", "id": id, "result": "<form>compose</form>" }),
        )
        .await;

        let mut stored = Vec::new();
        for _ in 0..200 {
            stored = h.ctx.store.snapshot().await.unwrap();
            if !stored.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].url, "https://mail.example.com/compose");
        assert_eq!(stored[0].action_name, "Compose");
        assert_eq!(stored[0].action_type, Some(ActionType::Browse));

        drop(browser_in);
        host.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn analyze_request_goes_through_the_classifier() {
        let rows = vec![AnalysisRow {
            action: "Changed password".to_string(),
            reason: "account settings".to_string(),
        }];
        let h = harness(FakeClassifier::analysing(rows));
        h.ctx.settings.set_field("apiToken", "sk-test").unwrap();
        h.ctx
            .store
            .append(ActivityRecord {
                timestamp: 1,
                url: "https://bank.example.com/settings".to_string(),
                app_name: "Bank".to_string(),
                action_name: "Changed password".to_string(),
                misc_notes: String::new(),
                action_type: Some(ActionType::SettingsChange),
                risk_score: Some(7.0),
            })
            .await
            .unwrap();

        let message = InboundMessage::AnalyzeSite {
            request_id: "a1".to_string(),
            site: "bank.example.com".to_string(),
        };
        let reply = handle_request(&h.ctx, message).await.unwrap();
        let value = serde_json::to_value(reply).unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(value["payload"][0]["action"], "Changed password");
    }
}
