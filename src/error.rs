use thiserror::Error;

use crate::device::DeviceId;

/// Errors raised by the device catalog, output sink, input poller and session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MidiError {
    /// The id is unknown, points at a port of the wrong direction, or the
    /// port is already held by another sink or poller.
    #[error("MIDI device {id} unavailable: {reason}")]
    DeviceUnavailable { id: DeviceId, reason: String },

    /// A channel, pitch, velocity, program or config value is out of range.
    #[error("invalid {name}: {value} (expected 0..={max})")]
    InvalidParameter {
        name: &'static str,
        value: usize,
        max: usize,
    },

    /// The platform MIDI service failed to send or receive.
    #[error("MIDI transport error: {0}")]
    Transport(String),

    /// A note or program change was requested on a session without output.
    #[error("no MIDI output configured")]
    NoOutputConfigured,
}

impl MidiError {
    pub(crate) fn unavailable(id: DeviceId, reason: impl Into<String>) -> Self {
        MidiError::DeviceUnavailable {
            id,
            reason: reason.into(),
        }
    }

    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        MidiError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MidiError>;

/// Rejects `value` unless it lies in `0..=max`. Never clamps.
pub(crate) fn check_range(name: &'static str, value: u8, max: u8) -> Result<u8> {
    if value > max {
        return Err(MidiError::InvalidParameter {
            name,
            value: value as usize,
            max: max as usize,
        });
    }
    Ok(value)
}
