use serde::{Deserialize, Serialize};

/// CallEvent represents the lifecycle events raised by an outgoing call handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallEvent {
    /// The remote party answered
    #[serde(rename = "accept")]
    Accept,

    /// An answered call ended, on either side
    #[serde(rename = "disconnect")]
    Disconnect,

    /// The call ended before it was answered
    #[serde(rename = "cancel")]
    Cancel,
}

impl CallEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CallEvent::Accept => "accept",
            CallEvent::Disconnect => "disconnect",
            CallEvent::Cancel => "cancel",
        }
    }

    /// Disconnect and cancel both end the call
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CallEvent::Accept)
    }
}

/// Type alias for the event sender
pub type CallEventSender = tokio::sync::mpsc::UnboundedSender<CallEvent>;

/// Type alias for the event receiver
pub type CallEventReceiver = tokio::sync::mpsc::UnboundedReceiver<CallEvent>;

pub fn call_event_channel() -> (CallEventSender, CallEventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}
