use std::sync::Arc;

use log::{debug, trace};
use parking_lot::Mutex;

use crate::context::{DeviceClaim, MidiContext};
use crate::device::DeviceId;
use crate::error::Result;
use crate::message::ChannelMessage;
use crate::midi::OutputEndpoint;

/// One exclusively opened output port.
///
/// Every call writes its messages immediately, in call order, with no
/// buffering or retry. The endpoint sits behind a lock so calls from several
/// threads, including a poller callback, never interleave their bytes.
pub struct OutputSink {
    endpoint: Mutex<Box<dyn OutputEndpoint>>,
    claim: DeviceClaim,
}

impl OutputSink {
    /// Fails with `DeviceUnavailable` if `id` is unknown, not an output, or
    /// already open.
    pub fn open(context: &MidiContext, id: DeviceId) -> Result<Self> {
        let (endpoint, claim) = context.open_output(id)?;
        Ok(Self {
            endpoint: Mutex::new(endpoint),
            claim,
        })
    }

    pub fn device(&self) -> DeviceId {
        self.claim.id()
    }

    /// Sends a program change.
    pub fn set_instrument(&self, channel: u8, program: u8) -> Result<()> {
        self.send(ChannelMessage::program_change(channel, program)?)
    }

    pub fn note_on(&self, pitch: u8, velocity: u8, channel: u8) -> Result<()> {
        self.send(ChannelMessage::note_on(pitch, velocity, channel)?)
    }

    pub fn note_off(&self, pitch: u8, velocity: u8, channel: u8) -> Result<()> {
        self.send(ChannelMessage::note_off(pitch, velocity, channel)?)
    }

    pub fn send(&self, message: ChannelMessage) -> Result<()> {
        self.send_all(&[message])
    }

    /// Sends `messages` back to back under one lock. Stops at the first
    /// transport failure; later messages are not sent.
    pub fn send_all(&self, messages: &[ChannelMessage]) -> Result<()> {
        let mut endpoint = self.endpoint.lock();
        for message in messages {
            let bytes = message.to_bytes();
            trace!("MIDI out {}: {:02X?}", self.claim.id(), bytes);
            endpoint.send(&bytes)?;
        }
        Ok(())
    }

    /// Releases every pitch on `channel`.
    pub fn all_notes_off(&self, channel: u8) -> Result<()> {
        let messages = (0..=127u8)
            .map(|pitch| ChannelMessage::note_off(pitch, 0, channel))
            .collect::<Result<Vec<_>>>()?;
        self.send_all(&messages)
    }
}

impl Drop for OutputSink {
    fn drop(&mut self) {
        debug!("closing MIDI output {}", self.claim.id());
    }
}

/// Cloneable handle for playing notes on a session's output.
///
/// Safe to use from inside an input callback: the poller holds no lock
/// while the callback runs.
#[derive(Clone)]
pub struct NotePlayer {
    sink: Arc<OutputSink>,
}

impl NotePlayer {
    pub(crate) fn new(sink: Arc<OutputSink>) -> Self {
        Self { sink }
    }

    /// Plays or releases one note, switching the channel's program first
    /// when `instrument` is given. All values are checked before anything is
    /// sent; a failed program change aborts before the note message.
    pub fn play_note(
        &self,
        pitch: u8,
        velocity: u8,
        channel: u8,
        instrument: Option<u8>,
        off: bool,
    ) -> Result<()> {
        let mut messages = Vec::with_capacity(2);
        if let Some(program) = instrument {
            messages.push(ChannelMessage::program_change(channel, program)?);
        }
        messages.push(if off {
            ChannelMessage::note_off(pitch, velocity, channel)?
        } else {
            ChannelMessage::note_on(pitch, velocity, channel)?
        });
        self.sink.send_all(&messages)
    }

    pub fn sink(&self) -> &OutputSink {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MidiError;
    use crate::midi::LoopbackBackend;

    const OUT: DeviceId = DeviceId(0);

    fn setup() -> (LoopbackBackend, MidiContext) {
        let backend = LoopbackBackend::builder().output("Synth Out").build();
        let ctx = MidiContext::with_backend(backend.clone());
        (backend, ctx)
    }

    #[test]
    fn test_note_on_then_off() {
        let (backend, ctx) = setup();
        let sink = OutputSink::open(&ctx, OUT).unwrap();

        for channel in [0u8, 7, 15] {
            sink.note_on(60, 100, channel).unwrap();
            sink.note_off(60, 100, channel).unwrap();
        }

        assert_eq!(
            backend.sent(OUT),
            vec![
                vec![0x90, 60, 100],
                vec![0x80, 60, 100],
                vec![0x97, 60, 100],
                vec![0x87, 60, 100],
                vec![0x9F, 60, 100],
                vec![0x8F, 60, 100],
            ]
        );
    }

    #[test]
    fn test_out_of_range_sends_nothing() {
        let (backend, ctx) = setup();
        let sink = OutputSink::open(&ctx, OUT).unwrap();

        assert!(matches!(
            sink.note_on(128, 100, 0),
            Err(MidiError::InvalidParameter { .. })
        ));
        assert!(matches!(
            sink.note_off(60, 255, 0),
            Err(MidiError::InvalidParameter { .. })
        ));
        assert!(matches!(
            sink.note_on(60, 100, 16),
            Err(MidiError::InvalidParameter { .. })
        ));
        assert!(matches!(
            sink.set_instrument(0, 128),
            Err(MidiError::InvalidParameter { .. })
        ));
        assert!(backend.sent(OUT).is_empty());
    }

    #[test]
    fn test_transport_error_is_not_retried() {
        let (backend, ctx) = setup();
        let sink = OutputSink::open(&ctx, OUT).unwrap();
        backend.set_fail_sends(true);

        assert!(matches!(
            sink.note_on(60, 100, 0),
            Err(MidiError::Transport(_))
        ));
        backend.set_fail_sends(false);
        sink.note_on(61, 100, 0).unwrap();
        assert_eq!(backend.sent(OUT), vec![vec![0x90, 61, 100]]);
    }

    #[test]
    fn test_play_note_with_instrument() {
        let (backend, ctx) = setup();
        let player = NotePlayer::new(Arc::new(OutputSink::open(&ctx, OUT).unwrap()));

        player.play_note(64, 90, 2, Some(41), false).unwrap();
        player.play_note(64, 0, 2, None, true).unwrap();

        assert_eq!(
            backend.sent(OUT),
            vec![vec![0xC2, 41], vec![0x92, 64, 90], vec![0x82, 64, 0]]
        );
    }

    #[test]
    fn test_play_note_validates_before_sending() {
        let (backend, ctx) = setup();
        let player = NotePlayer::new(Arc::new(OutputSink::open(&ctx, OUT).unwrap()));

        assert!(player.play_note(200, 90, 0, Some(5), false).is_err());
        assert!(backend.sent(OUT).is_empty());
    }

    #[test]
    fn test_all_notes_off() {
        let (backend, ctx) = setup();
        let sink = OutputSink::open(&ctx, OUT).unwrap();
        sink.all_notes_off(3).unwrap();

        let sent = backend.sent(OUT);
        assert_eq!(sent.len(), 128);
        assert_eq!(sent[0], vec![0x83, 0, 0]);
        assert_eq!(sent[127], vec![0x83, 127, 0]);
    }
}
