use crossbeam::channel::{self, Receiver, Sender, TryRecvError, TrySendError};
use log::{debug, trace};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};

use super::{InputEndpoint, MidiBackend, OutputEndpoint};
use crate::device::{DeviceId, Direction, PortInfo};
use crate::error::{MidiError, Result};
use crate::message::{is_valid_midi_message, RawMessage};

const CLIENT_NAME: &str = "midi-session";

/// Messages buffered between midir's callback thread and the poller.
const INPUT_QUEUE_CAPACITY: usize = 4096;

/// Keep-alive sent by many keyboards every 300 ms.
const ACTIVE_SENSING: u8 = 0xFE;

#[cfg(target_os = "macos")]
const INTERFACE: &str = "CoreMIDI";
#[cfg(target_os = "windows")]
const INTERFACE: &str = "MMSystem";
#[cfg(all(unix, not(target_os = "macos")))]
const INTERFACE: &str = "ALSA";
#[cfg(not(any(unix, target_os = "windows")))]
const INTERFACE: &str = "midir";

/// The platform MIDI service, reached through `midir`.
///
/// The catalog lists every input port first, then every output port. A
/// fresh midir client is created for each query so the list reflects the
/// current system state.
#[derive(Debug, Default)]
pub struct MidirBackend;

impl MidirBackend {
    pub fn new() -> Self {
        Self
    }

    fn input_client() -> Result<MidiInput> {
        MidiInput::new(CLIENT_NAME).map_err(MidiError::transport)
    }

    fn output_client() -> Result<MidiOutput> {
        MidiOutput::new(CLIENT_NAME).map_err(MidiError::transport)
    }

    fn input_names(midi_in: &MidiInput) -> Vec<String> {
        midi_in
            .ports()
            .iter()
            .enumerate()
            .map(|(i, port)| {
                midi_in
                    .port_name(port)
                    .unwrap_or_else(|_| format!("Input {}", i))
            })
            .collect()
    }

    fn output_names(midi_out: &MidiOutput) -> Vec<String> {
        midi_out
            .ports()
            .iter()
            .enumerate()
            .map(|(i, port)| {
                midi_out
                    .port_name(port)
                    .unwrap_or_else(|_| format!("Output {}", i))
            })
            .collect()
    }
}

impl MidiBackend for MidirBackend {
    fn ports(&self) -> Result<Vec<PortInfo>> {
        let inputs = Self::input_names(&Self::input_client()?);
        let outputs = Self::output_names(&Self::output_client()?);

        let ports = inputs
            .into_iter()
            .map(|name| PortInfo::new(INTERFACE, name, Direction::Input))
            .chain(
                outputs
                    .into_iter()
                    .map(|name| PortInfo::new(INTERFACE, name, Direction::Output)),
            )
            .collect();
        Ok(ports)
    }

    fn open_input(&self, index: usize, port: &PortInfo) -> Result<Box<dyn InputEndpoint>> {
        let id = DeviceId(index);
        let mut midi_in = Self::input_client()?;
        midi_in.ignore(Ignore::ActiveSense);

        let ports = midi_in.ports();
        let Some(midi_port) = ports.get(index) else {
            return Err(MidiError::unavailable(id, "input port disappeared"));
        };
        let name = midi_in.port_name(midi_port).map_err(MidiError::transport)?;
        if name != port.name {
            return Err(MidiError::unavailable(
                id,
                format!("port list changed: expected \"{}\", found \"{}\"", port.name, name),
            ));
        }

        let (tx, rx) = channel::bounded(INPUT_QUEUE_CAPACITY);
        let connection = midi_in
            .connect(
                midi_port,
                "midi-session-in",
                move |stamp, message, _| forward_input(&tx, stamp, message),
                (),
            )
            .map_err(|e| MidiError::unavailable(id, e.to_string()))?;

        debug!("opened MIDI input {} \"{}\"", id, name);
        Ok(Box::new(MidirInput {
            _connection: connection,
            rx,
        }))
    }

    fn open_output(&self, index: usize, port: &PortInfo) -> Result<Box<dyn OutputEndpoint>> {
        let midi_out = Self::output_client()?;
        let Some(output_index) = index.checked_sub(Self::input_names(&Self::input_client()?).len())
        else {
            return Err(MidiError::unavailable(DeviceId(index), "not an output port"));
        };
        let id = DeviceId(index);

        let ports = midi_out.ports();
        let Some(midi_port) = ports.get(output_index) else {
            return Err(MidiError::unavailable(id, "output port disappeared"));
        };
        let name = midi_out.port_name(midi_port).map_err(MidiError::transport)?;
        if name != port.name {
            return Err(MidiError::unavailable(
                id,
                format!("port list changed: expected \"{}\", found \"{}\"", port.name, name),
            ));
        }

        let connection = midi_out
            .connect(midi_port, "midi-session-out")
            .map_err(|e| MidiError::unavailable(id, e.to_string()))?;

        debug!("opened MIDI output {} \"{}\"", id, name);
        Ok(Box::new(MidirOutput { connection }))
    }
}

/// Runs on midir's callback thread.
fn forward_input(tx: &Sender<RawMessage>, stamp_us: u64, message: &[u8]) {
    if message == [ACTIVE_SENSING] {
        return;
    }
    if !is_valid_midi_message(message) {
        trace!("dropping malformed MIDI message {:02X?}", message);
        return;
    }

    let timestamp = (stamp_us / 1000) as u32;
    for packet in RawMessage::packets(message, timestamp) {
        match tx.try_send(packet) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                trace!("input queue full, dropping {:02X?}", message);
                return;
            }
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
}

struct MidirInput {
    // Dropping the connection closes the port.
    _connection: MidiInputConnection<()>,
    rx: Receiver<RawMessage>,
}

impl InputEndpoint for MidirInput {
    fn poll(&mut self, max: usize, out: &mut Vec<RawMessage>) -> Result<usize> {
        let mut count = 0;
        while count < max {
            match self.rx.try_recv() {
                Ok(message) => {
                    out.push(message);
                    count += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return Err(MidiError::Transport("input connection closed".into()))
                }
            }
        }
        Ok(count)
    }
}

struct MidirOutput {
    connection: MidiOutputConnection,
}

impl OutputEndpoint for MidirOutput {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.connection.send(bytes).map_err(MidiError::transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_input_splits_and_converts_timestamp() {
        let (tx, rx) = channel::bounded(8);
        forward_input(&tx, 2_500_000, &[0x90, 60, 100]);
        forward_input(&tx, 3_000_999, &[0xF0, 1, 2, 3, 4, 0xF7]);

        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            received,
            vec![
                RawMessage::new(0x90, 60, 100, 0, 2500),
                RawMessage::new(0xF0, 1, 2, 3, 3000),
                RawMessage::new(4, 0xF7, 0, 0, 3000),
            ]
        );
    }

    #[test]
    fn test_forward_input_drops_malformed() {
        let (tx, rx) = channel::bounded(8);
        forward_input(&tx, 0, &[0x90, 60]);
        forward_input(&tx, 0, &[]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_forward_input_skips_active_sensing() {
        let (tx, rx) = channel::bounded(8);
        forward_input(&tx, 0, &[ACTIVE_SENSING]);
        forward_input(&tx, 0, &[0xF8]);
        assert_eq!(rx.try_recv().unwrap().status, 0xF8);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_forward_input_drops_when_full() {
        let (tx, rx) = channel::bounded(1);
        forward_input(&tx, 0, &[0x90, 60, 100]);
        forward_input(&tx, 0, &[0x80, 60, 0]);
        assert_eq!(rx.try_iter().count(), 1);
    }
}
