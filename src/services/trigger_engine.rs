use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Duration, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::models::Settings;

pub const TYPING_DEBOUNCE: Duration = Duration::from_secs(3);

/// Raw signals delivered to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    UserClick,
    UserTyping,
    TabActivated { tab_id: i64 },
    TabUpdated { tab_id: i64, status: Option<String> },
    NavigationCompleted { tab_id: i64, frame_id: i64 },
    HistoryStateUpdated { tab_id: i64, frame_id: i64 },
}

/// Why a capture cycle started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Click,
    TypingSettled,
    /// Tab or navigation event; only honoured while that tab is active.
    Tab { tab_id: i64 },
    Interval,
}

impl Trigger {
    pub fn tab_id(&self) -> Option<i64> {
        match self {
            Trigger::Tab { tab_id } => Some(*tab_id),
            _ => None,
        }
    }
}

/// Receives gated triggers. Implementations must swallow their own errors.
#[async_trait]
pub trait CaptureSink: Send + Sync {
    async fn capture(&self, trigger: Trigger);
}

/// Turn a signal into a trigger. Typing is handled by the debounce, not here.
fn immediate_trigger(signal: &Signal) -> Option<Trigger> {
    match signal {
        Signal::UserClick => Some(Trigger::Click),
        Signal::UserTyping => None,
        Signal::TabActivated { tab_id } => Some(Trigger::Tab { tab_id: *tab_id }),
        Signal::TabUpdated { tab_id, status } => {
            (status.as_deref() == Some("complete")).then_some(Trigger::Tab { tab_id: *tab_id })
        }
        Signal::NavigationCompleted { tab_id, frame_id }
        | Signal::HistoryStateUpdated { tab_id, frame_id } => {
            (*frame_id == 0).then_some(Trigger::Tab { tab_id: *tab_id })
        }
    }
}

/// Settings that decide how the interval timer is armed.
#[derive(Debug, Clone, PartialEq, Eq)]
struct IntervalKey {
    screenshot_interval: u64,
    api_token: String,
    screen_capture: bool,
}

impl IntervalKey {
    fn of(settings: &Settings) -> Self {
        Self {
            screenshot_interval: settings.screenshot_interval,
            api_token: settings.api_token.clone(),
            screen_capture: settings.screen_capture,
        }
    }
}

pub struct TriggerEngine {
    signals: mpsc::Receiver<Signal>,
    settings: watch::Receiver<Settings>,
    sink: Arc<dyn CaptureSink>,
    cancel: CancellationToken,
    typing_deadline: Option<Instant>,
    interval: Option<Interval>,
}

impl TriggerEngine {
    pub fn new(
        signals: mpsc::Receiver<Signal>,
        settings: watch::Receiver<Settings>,
        sink: Arc<dyn CaptureSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            signals,
            settings,
            sink,
            cancel,
            typing_deadline: None,
            interval: None,
        }
    }

    pub async fn run(mut self) {
        let mut interval_key = IntervalKey::of(&self.settings.borrow_and_update());
        self.rearm_interval();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    log::debug!("trigger engine cancelled");
                    break;
                }
                signal = self.signals.recv() => {
                    match signal {
                        Some(signal) => self.on_signal(signal),
                        None => {
                            log::debug!("signal channel closed, trigger engine stopping");
                            break;
                        }
                    }
                }
                _ = wait_until(self.typing_deadline) => {
                    self.typing_deadline = None;
                    self.fire(Trigger::TypingSettled);
                }
                _ = next_tick(&mut self.interval) => {
                    self.fire(Trigger::Interval);
                }
                changed = self.settings.changed() => {
                    if changed.is_err() {
                        log::debug!("settings publisher dropped, trigger engine stopping");
                        break;
                    }
                    let key = IntervalKey::of(&self.settings.borrow_and_update());
                    if key != interval_key {
                        interval_key = key;
                        self.rearm_interval();
                    }
                }
            }
        }
    }

    fn on_signal(&mut self, signal: Signal) {
        if signal == Signal::UserTyping {
            // Each keystroke pushes the deadline out again.
            self.typing_deadline = Some(Instant::now() + TYPING_DEBOUNCE);
            return;
        }
        match immediate_trigger(&signal) {
            Some(trigger) => self.fire(trigger),
            None => log::debug!("ignoring {:?}", signal),
        }
    }

    /// Drop the current interval timer and arm a new one from the current
    /// settings. There is never more than one.
    fn rearm_interval(&mut self) {
        self.interval = None;
        let period = self.settings.borrow().capture_period_secs();
        if let Some(secs) = period {
            let period = Duration::from_secs(secs);
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.interval = Some(interval);
            log::info!("interval capture armed every {}s", secs);
        } else {
            log::info!("interval capture disarmed");
        }
    }

    fn fire(&self, trigger: Trigger) {
        if !self.settings.borrow().capture_allowed() {
            log::debug!("{:?} skipped: screen capture off or no API token", trigger);
            return;
        }
        log::debug!("{:?} fired", trigger);
        let sink = self.sink.clone();
        tokio::spawn(async move { sink.capture(trigger).await });
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
