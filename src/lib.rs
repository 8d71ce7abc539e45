//! Send and receive MIDI events through a system MIDI service.
//!
//! A [`Session`] owns at most one output port and one input port. The input
//! is read by a background poller that hands every decoded [`MidiEvent`] to
//! a swappable callback; the output plays notes and program changes.
//!
//! ```no_run
//! use midi_session::{callback, DeviceFilter, DeviceId, MidiContext, Session};
//!
//! let context = MidiContext::acquire();
//! for device in context.list_devices(DeviceFilter::Any)? {
//!     println!("{}", device);
//! }
//!
//! let session = Session::builder()
//!     .input(DeviceId(1))
//!     .output(DeviceId(2))
//!     .callback(callback(|event| {
//!         println!("{}", event);
//!         Ok(())
//!     }))
//!     .open(&context)?;
//! session.play_note(60, 100, 0, None, false)?;
//! # Ok::<(), midi_session::MidiError>(())
//! ```

pub mod context;
pub mod device;
pub mod error;
pub mod events;
pub mod message;
pub mod midi;
pub mod output;
pub mod poller;
pub mod session;

pub use context::MidiContext;
pub use device::{DeviceDescriptor, DeviceFilter, DeviceId, Direction, PortInfo};
pub use error::{MidiError, Result};
pub use events::PollerEvent;
pub use message::{note_name, ChannelMessage, MidiEvent, RawMessage};
pub use midi::{InputEndpoint, LoopbackBackend, MidiBackend, MidirBackend, OutputEndpoint};
pub use output::{NotePlayer, OutputSink};
pub use poller::{callback, CallbackSlot, EventCallback, PollerConfig, PollerState};
pub use session::{Session, SessionBuilder};
