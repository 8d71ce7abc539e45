//! Backends: the seam between the session layer and a MIDI service.
//!
//! A backend lists its ports in a fixed order and opens them by catalog
//! index. Inputs are polled, outputs are written one message at a time.

pub mod loopback;
pub mod midir_backend;

pub use loopback::LoopbackBackend;
pub use midir_backend::MidirBackend;

use crate::device::PortInfo;
use crate::error::Result;
use crate::message::RawMessage;

/// A MIDI service able to enumerate and open ports.
pub trait MidiBackend: Send + Sync {
    /// Lists every port, inputs and outputs, in catalog order.
    fn ports(&self) -> Result<Vec<PortInfo>>;

    /// Opens the input port at catalog `index`. `port` is the catalog entry
    /// the caller resolved, so a backend can detect ports that moved.
    fn open_input(&self, index: usize, port: &PortInfo) -> Result<Box<dyn InputEndpoint>>;

    /// Opens the output port at catalog `index`.
    fn open_output(&self, index: usize, port: &PortInfo) -> Result<Box<dyn OutputEndpoint>>;
}

/// An open input port. Owned by exactly one poller thread.
pub trait InputEndpoint: Send {
    /// Appends up to `max` pending messages to `out` in arrival order and
    /// returns how many were appended. Never blocks.
    fn poll(&mut self, max: usize, out: &mut Vec<RawMessage>) -> Result<usize>;
}

/// An open output port.
pub trait OutputEndpoint: Send {
    /// Writes one complete message.
    fn send(&mut self, bytes: &[u8]) -> Result<()>;
}
