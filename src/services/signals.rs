use tokio::sync::{mpsc, watch};
use tokio::sync::mpsc::error::TrySendError;

use crate::models::{InboundMessage, Settings};

use super::trigger_engine::Signal;

/// Page and tab events from the extension, on their way to the trigger
/// engine. Page interaction is dropped here while interaction monitoring is
/// off; tab and navigation events always pass.
#[derive(Clone)]
pub struct SignalForwarder {
    tx: mpsc::Sender<Signal>,
    settings: watch::Receiver<Settings>,
}

impl SignalForwarder {
    pub fn new(tx: mpsc::Sender<Signal>, settings: watch::Receiver<Settings>) -> Self {
        Self { tx, settings }
    }

    /// Returns true if the message was a signal, whether or not it was
    /// forwarded.
    pub fn forward_message(&self, message: &InboundMessage) -> bool {
        match signal_of(message) {
            Some(signal) => {
                self.forward(signal);
                true
            }
            None => false,
        }
    }

    pub fn forward(&self, signal: Signal) {
        let is_page_signal = matches!(signal, Signal::UserClick | Signal::UserTyping);
        if is_page_signal && !self.settings.borrow().interaction_monitoring {
            return;
        }

        match self.tx.try_send(signal) {
            Ok(()) => {}
            Err(TrySendError::Full(signal)) => log::debug!("signal queue full, dropping {:?}", signal),
            Err(TrySendError::Closed(signal)) => log::debug!("trigger engine gone, dropping {:?}", signal),
        }
    }
}

fn signal_of(message: &InboundMessage) -> Option<Signal> {
    let signal = match message {
        InboundMessage::UserClick => Signal::UserClick,
        InboundMessage::UserTyping => Signal::UserTyping,
        InboundMessage::TabActivated { tab_id } => Signal::TabActivated { tab_id: *tab_id },
        InboundMessage::TabUpdated { tab_id, status } => Signal::TabUpdated {
            tab_id: *tab_id,
            status: status.clone(),
        },
        InboundMessage::NavigationCompleted { tab_id, frame_id } => Signal::NavigationCompleted {
            tab_id: *tab_id,
            frame_id: *frame_id,
        },
        InboundMessage::HistoryStateUpdated { tab_id, frame_id } => Signal::HistoryStateUpdated {
            tab_id: *tab_id,
            frame_id: *frame_id,
        },
        _ => return None,
    };
    Some(signal)
}
