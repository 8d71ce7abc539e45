use std::sync::Arc;

use crossbeam::channel::Receiver;
use log::debug;

use crate::context::MidiContext;
use crate::device::DeviceId;
use crate::error::{MidiError, Result};
use crate::events::PollerEvent;
use crate::output::{NotePlayer, OutputSink};
use crate::poller::{event_channel, CallbackSlot, EventCallback, InputPoller, PollerConfig, PollerState};

/// At most one output sink and one input poller sharing a callback slot.
///
/// Devices are opened when the session is created; a direction left out
/// stays unavailable for the life of the session. Dropping the session
/// stops and joins the poller before the endpoints are released.
pub struct Session {
    poller: Option<InputPoller>,
    output: Option<Arc<OutputSink>>,
    callback: CallbackSlot,
    events: Receiver<PollerEvent>,
    context: MidiContext,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// Opens a session with the default poller settings.
    pub fn open(
        context: &MidiContext,
        input: Option<DeviceId>,
        output: Option<DeviceId>,
        callback: Option<EventCallback>,
    ) -> Result<Self> {
        SessionBuilder {
            input,
            output,
            callback,
            config: PollerConfig::default(),
        }
        .open(context)
    }

    /// Plays or releases a note, after a program change when `instrument`
    /// is given.
    pub fn play_note(
        &self,
        pitch: u8,
        velocity: u8,
        channel: u8,
        instrument: Option<u8>,
        off: bool,
    ) -> Result<()> {
        self.player()
            .ok_or(MidiError::NoOutputConfigured)?
            .play_note(pitch, velocity, channel, instrument, off)
    }

    /// A handle to the output that callbacks can keep.
    pub fn player(&self) -> Option<NotePlayer> {
        self.output.as_ref().map(|sink| NotePlayer::new(Arc::clone(sink)))
    }

    pub fn output(&self) -> Result<&OutputSink> {
        self.output.as_deref().ok_or(MidiError::NoOutputConfigured)
    }

    pub fn callback(&self) -> Option<EventCallback> {
        self.callback.get()
    }

    /// Replaces the callback. Takes effect from the next polled message.
    pub fn set_callback(&self, callback: Option<EventCallback>) -> Option<EventCallback> {
        self.callback.set(callback)
    }

    /// The slot the poller reads; lets a callback replace itself.
    pub fn callback_slot(&self) -> CallbackSlot {
        self.callback.clone()
    }

    pub fn input_device(&self) -> Option<DeviceId> {
        self.poller.as_ref().map(InputPoller::device)
    }

    pub fn output_device(&self) -> Option<DeviceId> {
        self.output.as_ref().map(|sink| sink.device())
    }

    /// `None` when the session has no input.
    pub fn poller_state(&self) -> Option<PollerState> {
        self.poller.as_ref().map(InputPoller::state)
    }

    /// Why the poller stopped on its own. `None` while running, after a
    /// clean stop, or when the session has no input.
    pub fn poller_error(&self) -> Option<MidiError> {
        self.poller.as_ref().and_then(InputPoller::error)
    }

    /// Callback failures and poller shutdown reports. Reports beyond the
    /// queue capacity are dropped; see [`poller_error`](Self::poller_error).
    pub fn poller_events(&self) -> Receiver<PollerEvent> {
        self.events.clone()
    }

    pub fn context(&self) -> &MidiContext {
        &self.context
    }

    /// Stops the poller and releases both endpoints.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.as_mut() {
            poller.stop();
        }
        self.poller.take();
        self.output.take();
        debug!("MIDI session closed");
    }
}

#[derive(Default)]
pub struct SessionBuilder {
    input: Option<DeviceId>,
    output: Option<DeviceId>,
    callback: Option<EventCallback>,
    config: PollerConfig,
}

impl SessionBuilder {
    pub fn input(mut self, id: impl Into<DeviceId>) -> Self {
        self.input = Some(id.into());
        self
    }

    pub fn output(mut self, id: impl Into<DeviceId>) -> Self {
        self.output = Some(id.into());
        self
    }

    pub fn callback(mut self, callback: EventCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn config(mut self, config: PollerConfig) -> Self {
        self.config = config;
        self
    }

    /// Opens the output, then starts polling the input. Nothing stays open
    /// if either step fails.
    pub fn open(self, context: &MidiContext) -> Result<Session> {
        self.config.validate()?;

        let output = self
            .output
            .map(|id| OutputSink::open(context, id).map(Arc::new))
            .transpose()?;

        let callback = CallbackSlot::new(self.callback);
        let (events_tx, events) = event_channel();
        let poller = self
            .input
            .map(|id| {
                let (endpoint, claim) = context.open_input(id)?;
                InputPoller::spawn(endpoint, claim, callback.clone(), self.config, events_tx)
            })
            .transpose()?;

        debug!(
            "MIDI session opened (input: {:?}, output: {:?})",
            self.input, self.output
        );
        Ok(Session {
            poller,
            output,
            callback,
            events,
            context: context.clone(),
        })
    }
}
