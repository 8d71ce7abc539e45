use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, trace, warn};
use parking_lot::Mutex;

use crate::context::DeviceClaim;
use crate::device::DeviceId;
use crate::error::{MidiError, Result};
use crate::events::PollerEvent;
use crate::message::{MidiEvent, RawMessage};
use crate::midi::InputEndpoint;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Side channel capacity; reports beyond it are dropped.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Receives every decoded input event. May call back into a
/// [`NotePlayer`](crate::NotePlayer) or replace the session callback.
pub type EventCallback = Arc<dyn Fn(&MidiEvent) -> anyhow::Result<()> + Send + Sync>;

/// Wraps a closure as an [`EventCallback`].
pub fn callback<F>(f: F) -> EventCallback
where
    F: Fn(&MidiEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Shared, swappable callback. The poller reads it once per event.
#[derive(Clone, Default)]
pub struct CallbackSlot(Arc<Mutex<Option<EventCallback>>>);

impl CallbackSlot {
    pub fn new(callback: Option<EventCallback>) -> Self {
        Self(Arc::new(Mutex::new(callback)))
    }

    pub fn get(&self) -> Option<EventCallback> {
        self.0.lock().clone()
    }

    /// Installs `callback` and returns the previous one.
    pub fn set(&self, callback: Option<EventCallback>) -> Option<EventCallback> {
        std::mem::replace(&mut *self.0.lock(), callback)
    }
}

/// Loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Idle sleep between ticks. Must be non-zero.
    pub poll_interval: Duration,
    /// Most messages drained per tick. Must be non-zero.
    pub batch_size: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl PollerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(MidiError::InvalidParameter {
                name: "poll_interval",
                value: 0,
                max: usize::MAX,
            });
        }
        if self.batch_size == 0 {
            return Err(MidiError::InvalidParameter {
                name: "batch_size",
                value: 0,
                max: usize::MAX,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Running,
    Stopped,
}

impl PollerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PollerState::Idle,
            1 => PollerState::Running,
            _ => PollerState::Stopped,
        }
    }
}

/// Background loop reading one input port.
///
/// `Idle -> Running -> Stopped`, with no way back. The thread exits when
/// [`stop`](Self::stop) is called or when polling the port fails. The thread
/// owns both the endpoint and the device claim, so the device stays open
/// until the loop has actually returned.
pub struct InputPoller {
    device: DeviceId,
    state: Arc<AtomicU8>,
    failure: Arc<Mutex<Option<MidiError>>>,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl InputPoller {
    pub(crate) fn spawn(
        endpoint: Box<dyn InputEndpoint>,
        claim: DeviceClaim,
        slot: CallbackSlot,
        config: PollerConfig,
        events: Sender<PollerEvent>,
    ) -> Result<Self> {
        config.validate()?;

        let device = claim.id();
        let state = Arc::new(AtomicU8::new(PollerState::Idle as u8));
        let (stop_tx, stop_rx) = channel::bounded(1);

        let failure = Arc::new(Mutex::new(None));

        let thread_state = Arc::clone(&state);
        let thread_failure = Arc::clone(&failure);
        state.store(PollerState::Running as u8, Ordering::SeqCst);
        let thread = thread::Builder::new()
            .name(format!("midi-poller-{}", device))
            .spawn(move || {
                let claim = claim;
                let error = run(endpoint, device, slot, config, events, stop_rx);
                *thread_failure.lock() = error;
                thread_state.store(PollerState::Stopped as u8, Ordering::SeqCst);
                drop(claim);
            })
            .map_err(MidiError::transport)?;

        debug!("started MIDI poller for device {}", device);
        Ok(Self {
            device,
            state,
            failure,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn state(&self) -> PollerState {
        PollerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// The transport error that ended the loop, if any. Unlike the
    /// `Stopped` report this is never dropped.
    pub fn error(&self) -> Option<MidiError> {
        self.failure.lock().clone()
    }

    /// Signals the loop and waits for it to exit. Idempotent. Called from
    /// the poller's own thread (from a callback), it only signals.
    pub fn stop(&mut self) {
        // Disconnecting the channel wakes the idle sleep.
        self.stop_tx.take();

        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.thread().id() == thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            error!("MIDI poller for device {} panicked", self.device);
        }
        debug!("stopped MIDI poller for device {}", self.device);
    }
}

impl Drop for InputPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    mut endpoint: Box<dyn InputEndpoint>,
    device: DeviceId,
    slot: CallbackSlot,
    config: PollerConfig,
    events: Sender<PollerEvent>,
    stop_rx: Receiver<()>,
) -> Option<MidiError> {
    let mut batch = Vec::with_capacity(config.batch_size.min(DEFAULT_BATCH_SIZE));

    let failure = loop {
        if let Err(err) = poll_tick(
            endpoint.as_mut(),
            device,
            &slot,
            config.batch_size,
            &mut batch,
            &events,
        ) {
            break Some(err);
        }

        match stop_rx.recv_timeout(config.poll_interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break None,
        }
    };

    if let Some(err) = &failure {
        error!("MIDI poller for device {} stopped: {}", device, err);
    }
    let _ = events.try_send(PollerEvent::Stopped {
        error: failure.clone(),
    });
    failure
}

/// One tick: drains up to `batch_size` messages and dispatches each, in
/// arrival order, to whatever callback is installed at that moment. With no
/// callback the messages are dropped.
pub(crate) fn poll_tick(
    endpoint: &mut dyn InputEndpoint,
    device: DeviceId,
    slot: &CallbackSlot,
    batch_size: usize,
    batch: &mut Vec<RawMessage>,
    events: &Sender<PollerEvent>,
) -> Result<usize> {
    batch.clear();
    let count = endpoint.poll(batch_size, batch)?;

    for raw in batch.drain(..) {
        let event = MidiEvent::from_raw(raw, device);
        let Some(callback) = slot.get() else {
            continue;
        };
        trace!("MIDI in {}", event);
        if let Err(error) = dispatch(&callback, &event) {
            warn!("MIDI callback failed on {}: {}", event, error);
            let _ = events.try_send(PollerEvent::CallbackFailed { event, error });
        }
    }
    Ok(count)
}

/// Runs the callback, turning both errors and panics into a message.
fn dispatch(callback: &EventCallback, event: &MidiEvent) -> std::result::Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(format!("{:#}", err)),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {}", msg)
    } else {
        "panicked".to_string()
    }
}

pub(crate) fn event_channel() -> (Sender<PollerEvent>, Receiver<PollerEvent>) {
    channel::bounded(EVENT_QUEUE_CAPACITY)
}
