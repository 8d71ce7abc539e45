use std::fmt;

use crate::device::DeviceId;
use crate::error::{check_range, Result};

pub const NOTE_OFF: u8 = 0x80;
pub const NOTE_ON: u8 = 0x90;
pub const PROGRAM_CHANGE: u8 = 0xC0;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// One packet as delivered by an input endpoint: a status byte, up to three
/// data bytes and a millisecond timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawMessage {
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
    pub data3: u8,
    pub timestamp: u32,
}

impl RawMessage {
    pub fn new(status: u8, data1: u8, data2: u8, data3: u8, timestamp: u32) -> Self {
        Self {
            status,
            data1,
            data2,
            data3,
            timestamp,
        }
    }

    /// Splits a wire message into 4-byte packets sharing one timestamp.
    /// Channel and system common messages fit in one packet; SysEx spans several.
    pub fn packets(bytes: &[u8], timestamp: u32) -> Vec<RawMessage> {
        bytes
            .chunks(4)
            .map(|chunk| {
                let byte = |i: usize| chunk.get(i).copied().unwrap_or(0);
                RawMessage::new(byte(0), byte(1), byte(2), byte(3), timestamp)
            })
            .collect()
    }
}

/// A decoded input event handed to the session callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    status: u8,
    data1: u8,
    data2: u8,
    data3: u8,
    timestamp: u32,
    device: Option<DeviceId>,
}

impl MidiEvent {
    pub fn from_raw(raw: RawMessage, device: DeviceId) -> Self {
        Self {
            status: raw.status,
            data1: raw.data1,
            data2: raw.data2,
            data3: raw.data3,
            timestamp: raw.timestamp,
            device: Some(device),
        }
    }

    /// An event that did not come from hardware, e.g. a computer-keyboard key.
    pub fn synthetic(status: u8, data1: u8, data2: u8, data3: u8, timestamp: u32) -> Self {
        Self {
            status,
            data1,
            data2,
            data3,
            timestamp,
            device: None,
        }
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn data1(&self) -> u8 {
        self.data1
    }

    pub fn data2(&self) -> u8 {
        self.data2
    }

    pub fn data3(&self) -> u8 {
        self.data3
    }

    /// Milliseconds since an arbitrary epoch.
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Originating device, `None` for synthetic events.
    pub fn device(&self) -> Option<DeviceId> {
        self.device
    }

    /// Message type (high nibble of the status byte).
    pub fn kind(&self) -> u8 {
        self.status & 0xF0
    }

    pub fn channel(&self) -> u8 {
        self.status & 0x0F
    }

    pub fn is_note_on(&self) -> bool {
        self.kind() == NOTE_ON && self.data2 > 0
    }

    /// Note-off, or note-on with zero velocity.
    pub fn is_note_off(&self) -> bool {
        self.kind() == NOTE_OFF || (self.kind() == NOTE_ON && self.data2 == 0)
    }
}

impl fmt::Display for MidiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let device = match self.device {
            Some(id) => id.to_string(),
            None => "-".to_string(),
        };
        write!(
            f,
            "MidiEvent(status={:#04x}, data1={}, data2={}, data3={}, timestamp={}, device={})",
            self.status, self.data1, self.data2, self.data3, self.timestamp, device
        )
    }
}

/// Outbound channel voice messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMessage {
    NoteOn { channel: u8, pitch: u8, velocity: u8 },
    NoteOff { channel: u8, pitch: u8, velocity: u8 },
    ProgramChange { channel: u8, program: u8 },
}

impl ChannelMessage {
    /// Builds a note-on after range-checking every field.
    pub fn note_on(pitch: u8, velocity: u8, channel: u8) -> Result<Self> {
        Ok(ChannelMessage::NoteOn {
            channel: check_range("channel", channel, 15)?,
            pitch: check_range("pitch", pitch, 127)?,
            velocity: check_range("velocity", velocity, 127)?,
        })
    }

    pub fn note_off(pitch: u8, velocity: u8, channel: u8) -> Result<Self> {
        Ok(ChannelMessage::NoteOff {
            channel: check_range("channel", channel, 15)?,
            pitch: check_range("pitch", pitch, 127)?,
            velocity: check_range("velocity", velocity, 127)?,
        })
    }

    pub fn program_change(channel: u8, program: u8) -> Result<Self> {
        Ok(ChannelMessage::ProgramChange {
            channel: check_range("channel", channel, 15)?,
            program: check_range("program", program, 127)?,
        })
    }

    /// Wire bytes: three for notes, two for program change.
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            ChannelMessage::NoteOn {
                channel,
                pitch,
                velocity,
            } => vec![NOTE_ON | channel, pitch, velocity],
            ChannelMessage::NoteOff {
                channel,
                pitch,
                velocity,
            } => vec![NOTE_OFF | channel, pitch, velocity],
            ChannelMessage::ProgramChange { channel, program } => {
                vec![PROGRAM_CHANGE | channel, program]
            }
        }
    }
}

/// Wire length of a message given its status byte. `None` for SysEx, whose
/// length is only known from its terminating `0xF7`, and for data bytes.
pub fn expected_len(status: u8) -> Option<usize> {
    match status & 0xF0 {
        // Note Off, Note On, Poly Pressure, Control Change, Pitch Bend
        0x80 | 0x90 | 0xA0 | 0xB0 | 0xE0 => Some(3),

        // Program Change, Channel Pressure
        0xC0 | 0xD0 => Some(2),

        0xF0 => match status {
            0xF0 => None,
            // MIDI Time Code, Song Select
            0xF1 | 0xF3 => Some(2),
            // Song Position Pointer
            0xF2 => Some(3),
            // Tune Request, EOX, realtime
            0xF6 | 0xF7 | 0xF8..=0xFF => Some(1),
            _ => None,
        },

        _ => None,
    }
}

/// Validates the length of a complete wire message against its status byte.
pub fn is_valid_midi_message(msg: &[u8]) -> bool {
    let Some(&status) = msg.first() else {
        return false;
    };

    match expected_len(status) {
        Some(len) => msg.len() == len,
        None => status == 0xF0 && msg.len() >= 2 && msg.last() == Some(&0xF7),
    }
}

/// Pitch-class name with octave, `C4` being pitch 60.
pub fn note_name(pitch: u8) -> String {
    let octave = (pitch / 12) as i32 - 1;
    format!("{}{}", NOTE_NAMES[(pitch % 12) as usize], octave)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MidiError;

    #[test]
    fn test_note_on() {
        assert!(is_valid_midi_message(&[0x90, 0x3C, 0x64]));
        assert!(!is_valid_midi_message(&[0x90, 0x3C]));
        assert!(!is_valid_midi_message(&[0x90]));
    }

    #[test]
    fn test_program_change() {
        assert!(is_valid_midi_message(&[0xC0, 0x05]));
        assert!(!is_valid_midi_message(&[0xC0]));
        assert!(!is_valid_midi_message(&[0xC0, 0x05, 0x00]));
    }

    #[test]
    fn test_system_messages() {
        assert!(is_valid_midi_message(&[0xF1, 0x10]));
        assert!(is_valid_midi_message(&[0xF2, 0x00, 0x01]));
        assert!(is_valid_midi_message(&[0xF8]));
        assert!(is_valid_midi_message(&[0xF0, 0x7E, 0x7F, 0x09, 0x01, 0xF7]));
        assert!(!is_valid_midi_message(&[0xF0, 0x7E]));
        assert!(!is_valid_midi_message(&[0x3C, 0x64]));
        assert!(!is_valid_midi_message(&[]));
    }

    #[test]
    fn test_encode() {
        assert_eq!(
            ChannelMessage::note_on(60, 100, 2).unwrap().to_bytes(),
            vec![0x92, 60, 100]
        );
        assert_eq!(
            ChannelMessage::note_off(60, 0, 15).unwrap().to_bytes(),
            vec![0x8F, 60, 0]
        );
        assert_eq!(
            ChannelMessage::program_change(9, 42).unwrap().to_bytes(),
            vec![0xC9, 42]
        );
    }

    #[test]
    fn test_encode_rejects_out_of_range() {
        assert!(matches!(
            ChannelMessage::note_on(128, 0, 0),
            Err(MidiError::InvalidParameter { name: "pitch", .. })
        ));
        assert!(matches!(
            ChannelMessage::note_off(0, 200, 0),
            Err(MidiError::InvalidParameter {
                name: "velocity",
                ..
            })
        ));
        assert!(matches!(
            ChannelMessage::program_change(16, 0),
            Err(MidiError::InvalidParameter {
                name: "channel",
                ..
            })
        ));
    }

    #[test]
    fn test_packets() {
        let short = RawMessage::packets(&[0x90, 60, 100], 7);
        assert_eq!(short, vec![RawMessage::new(0x90, 60, 100, 0, 7)]);

        let sysex = RawMessage::packets(&[0xF0, 1, 2, 3, 4, 0xF7], 9);
        assert_eq!(
            sysex,
            vec![
                RawMessage::new(0xF0, 1, 2, 3, 9),
                RawMessage::new(4, 0xF7, 0, 0, 9),
            ]
        );
    }

    #[test]
    fn test_event_classification() {
        let on = MidiEvent::from_raw(RawMessage::new(0x93, 64, 90, 0, 1), DeviceId(4));
        assert!(on.is_note_on());
        assert!(!on.is_note_off());
        assert_eq!(on.channel(), 3);
        assert_eq!(on.device(), Some(DeviceId(4)));

        let released = MidiEvent::synthetic(0x90, 64, 0, 0, 2);
        assert!(released.is_note_off());
        assert_eq!(released.device(), None);
    }

    #[test]
    fn test_note_name() {
        assert_eq!(note_name(60), "C4");
        assert_eq!(note_name(61), "C#4");
        assert_eq!(note_name(0), "C-1");
        assert_eq!(note_name(127), "G9");
        assert_eq!(note_name(69), "A4");
    }
}
