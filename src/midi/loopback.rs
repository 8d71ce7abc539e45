use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use super::{InputEndpoint, MidiBackend, OutputEndpoint};
use crate::device::{DeviceId, Direction, PortInfo};
use crate::error::{MidiError, Result};
use crate::message::RawMessage;

pub const LOOPBACK_INTERFACE: &str = "Loopback";

enum VirtualPort {
    Input {
        tx: Sender<RawMessage>,
        rx: Receiver<RawMessage>,
    },
    Output {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
    },
}

struct Shared {
    ports: Vec<(PortInfo, VirtualPort)>,
    fail_polls: AtomicBool,
    fail_sends: AtomicBool,
}

/// In-memory MIDI service with virtual ports.
///
/// Messages injected into a virtual input are returned by the next poll of
/// that port; bytes written to a virtual output are recorded. Clones share
/// the same ports, so a test can keep one clone while a
/// [`MidiContext`](crate::MidiContext) owns another.
#[derive(Clone)]
pub struct LoopbackBackend {
    shared: Arc<Shared>,
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl LoopbackBackend {
    pub fn builder() -> LoopbackBuilder {
        LoopbackBuilder { ports: Vec::new() }
    }

    /// Queues messages on a virtual input, in order.
    pub fn inject(&self, id: DeviceId, messages: &[RawMessage]) -> Result<()> {
        match self.port(id)? {
            VirtualPort::Input { tx, .. } => {
                for message in messages {
                    tx.send(*message).map_err(MidiError::transport)?;
                }
                Ok(())
            }
            VirtualPort::Output { .. } => Err(MidiError::unavailable(id, "not an input port")),
        }
    }

    /// Every message written to a virtual output so far.
    pub fn sent(&self, id: DeviceId) -> Vec<Vec<u8>> {
        match self.port(id) {
            Ok(VirtualPort::Output { sent }) => sent.lock().clone(),
            _ => Vec::new(),
        }
    }

    /// Messages injected but not yet polled.
    pub fn pending(&self, id: DeviceId) -> usize {
        match self.port(id) {
            Ok(VirtualPort::Input { rx, .. }) => rx.len(),
            _ => 0,
        }
    }

    /// Makes every subsequent poll fail with a transport error.
    pub fn set_fail_polls(&self, fail: bool) {
        self.shared.fail_polls.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent send fail with a transport error.
    pub fn set_fail_sends(&self, fail: bool) {
        self.shared.fail_sends.store(fail, Ordering::SeqCst);
    }

    fn port(&self, id: DeviceId) -> Result<&VirtualPort> {
        self.shared
            .ports
            .get(id.0)
            .map(|(_, port)| port)
            .ok_or_else(|| MidiError::unavailable(id, "no such port"))
    }
}

/// Declares virtual ports; catalog ids follow declaration order.
pub struct LoopbackBuilder {
    ports: Vec<(PortInfo, VirtualPort)>,
}

impl LoopbackBuilder {
    pub fn input(mut self, name: &str) -> Self {
        let (tx, rx) = channel::unbounded();
        self.ports.push((
            PortInfo::new(LOOPBACK_INTERFACE, name, Direction::Input),
            VirtualPort::Input { tx, rx },
        ));
        self
    }

    pub fn output(mut self, name: &str) -> Self {
        self.ports.push((
            PortInfo::new(LOOPBACK_INTERFACE, name, Direction::Output),
            VirtualPort::Output {
                sent: Arc::default(),
            },
        ));
        self
    }

    pub fn build(self) -> LoopbackBackend {
        LoopbackBackend {
            shared: Arc::new(Shared {
                ports: self.ports,
                fail_polls: AtomicBool::new(false),
                fail_sends: AtomicBool::new(false),
            }),
        }
    }
}

impl MidiBackend for LoopbackBackend {
    fn ports(&self) -> Result<Vec<PortInfo>> {
        Ok(self
            .shared
            .ports
            .iter()
            .map(|(info, _)| info.clone())
            .collect())
    }

    fn open_input(&self, index: usize, _port: &PortInfo) -> Result<Box<dyn InputEndpoint>> {
        match self.port(DeviceId(index))? {
            VirtualPort::Input { rx, .. } => Ok(Box::new(LoopbackInput {
                rx: rx.clone(),
                shared: Arc::clone(&self.shared),
            })),
            VirtualPort::Output { .. } => {
                Err(MidiError::unavailable(DeviceId(index), "not an input port"))
            }
        }
    }

    fn open_output(&self, index: usize, _port: &PortInfo) -> Result<Box<dyn OutputEndpoint>> {
        match self.port(DeviceId(index))? {
            VirtualPort::Output { sent } => Ok(Box::new(LoopbackOutput {
                sent: Arc::clone(sent),
                shared: Arc::clone(&self.shared),
            })),
            VirtualPort::Input { .. } => {
                Err(MidiError::unavailable(DeviceId(index), "not an output port"))
            }
        }
    }
}

struct LoopbackInput {
    rx: Receiver<RawMessage>,
    shared: Arc<Shared>,
}

impl InputEndpoint for LoopbackInput {
    fn poll(&mut self, max: usize, out: &mut Vec<RawMessage>) -> Result<usize> {
        if self.shared.fail_polls.load(Ordering::SeqCst) {
            return Err(MidiError::Transport("loopback input failed".into()));
        }
        let before = out.len();
        out.extend(self.rx.try_iter().take(max));
        Ok(out.len() - before)
    }
}

struct LoopbackOutput {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    shared: Arc<Shared>,
}

impl OutputEndpoint for LoopbackOutput {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if self.shared.fail_sends.load(Ordering::SeqCst) {
            return Err(MidiError::Transport("loopback output failed".into()));
        }
        self.sent.lock().push(bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> LoopbackBackend {
        LoopbackBackend::builder()
            .input("Keys In")
            .output("Synth Out")
            .build()
    }

    #[test]
    fn test_ports_in_declaration_order() {
        let ports = backend().ports().unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].name, "Keys In");
        assert_eq!(ports[0].direction, Direction::Input);
        assert_eq!(ports[1].direction, Direction::Output);
    }

    #[test]
    fn test_inject_and_poll_in_batches() {
        let backend = backend();
        let ports = backend.ports().unwrap();
        let mut input = backend.open_input(0, &ports[0]).unwrap();

        let messages: Vec<_> = (0..5)
            .map(|pitch| RawMessage::new(0x90, pitch, 100, 0, pitch as u32))
            .collect();
        backend.inject(DeviceId(0), &messages).unwrap();

        let mut out = Vec::new();
        assert_eq!(input.poll(3, &mut out).unwrap(), 3);
        assert_eq!(backend.pending(DeviceId(0)), 2);
        assert_eq!(input.poll(3, &mut out).unwrap(), 2);
        assert_eq!(out, messages);
    }

    #[test]
    fn test_send_records_bytes() {
        let backend = backend();
        let ports = backend.ports().unwrap();
        let mut output = backend.open_output(1, &ports[1]).unwrap();
        output.send(&[0x90, 60, 100]).unwrap();

        backend.set_fail_sends(true);
        assert!(matches!(
            output.send(&[0x80, 60, 0]),
            Err(MidiError::Transport(_))
        ));
        assert_eq!(backend.sent(DeviceId(1)), vec![vec![0x90, 60, 100]]);
    }

    #[test]
    fn test_wrong_direction() {
        let backend = backend();
        let ports = backend.ports().unwrap();
        assert!(backend.open_output(0, &ports[0]).is_err());
        assert!(backend.open_input(1, &ports[1]).is_err());
        assert!(backend.inject(DeviceId(1), &[RawMessage::default()]).is_err());
    }
}
