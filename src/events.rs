use std::fmt;

use crate::error::MidiError;
use crate::message::MidiEvent;

/// Reports sent by an input poller on its side channel.
#[derive(Debug, Clone)]
pub enum PollerEvent {
    /// The callback returned an error or panicked. Polling continues.
    CallbackFailed { event: MidiEvent, error: String },

    /// The poller has left its loop. `error` is set when a transport failure
    /// stopped it, `None` after a requested shutdown.
    Stopped { error: Option<MidiError> },
}

impl fmt::Display for PollerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollerEvent::CallbackFailed { event, error } => {
                write!(f, "callback failed on {}: {}", event, error)
            }
            PollerEvent::Stopped { error: None } => write!(f, "poller stopped"),
            PollerEvent::Stopped { error: Some(err) } => write!(f, "poller stopped: {}", err),
        }
    }
}
