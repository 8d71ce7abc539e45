use std::collections::HashSet;
use std::sync::{Arc, Weak};

use log::debug;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::device::{DeviceDescriptor, DeviceFilter, DeviceId, Direction, PortInfo};
use crate::error::{MidiError, Result};
use crate::midi::{InputEndpoint, MidiBackend, MidirBackend, OutputEndpoint};

/// The process-wide platform service. Holds no strong reference, so the
/// service shuts down as soon as the last [`MidiContext`] is dropped.
static PLATFORM: Lazy<Mutex<Weak<ContextInner>>> = Lazy::new(|| Mutex::new(Weak::new()));

struct ContextInner {
    backend: Box<dyn MidiBackend>,
    open: Mutex<HashSet<DeviceId>>,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        debug!("MIDI service shut down");
    }
}

/// Reference-counted handle to a MIDI service.
///
/// Every clone is one reference. Sessions and open endpoints hold their own
/// reference, so the service outlives anything still using it.
#[derive(Clone)]
pub struct MidiContext {
    inner: Arc<ContextInner>,
}

impl MidiContext {
    /// Returns a handle to the platform service, starting it if no other
    /// handle is alive. Repeated calls share one service.
    pub fn acquire() -> Self {
        let mut platform = PLATFORM.lock();
        if let Some(inner) = platform.upgrade() {
            return Self { inner };
        }

        let inner = Arc::new(ContextInner::new(Box::new(MidirBackend::new())));
        *platform = Arc::downgrade(&inner);
        debug!("MIDI service started");
        Self { inner }
    }

    /// Creates an independent service on top of `backend`.
    pub fn with_backend(backend: impl MidiBackend + 'static) -> Self {
        Self {
            inner: Arc::new(ContextInner::new(Box::new(backend))),
        }
    }

    /// Drops this reference. The service stops once no references remain.
    pub fn release(self) {
        drop(self);
    }

    /// Outstanding references, including those held by sessions and open
    /// endpoints.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Lists the device catalog. Ids are assigned densely from 0 over the
    /// unfiltered list, so filtering keeps each device's id.
    pub fn list_devices(&self, filter: DeviceFilter) -> Result<Vec<DeviceDescriptor>> {
        let ports = self.inner.backend.ports()?;
        let open = self.inner.open.lock();

        Ok(ports
            .into_iter()
            .enumerate()
            .map(|(index, port)| {
                let id = DeviceId(index);
                DeviceDescriptor {
                    id,
                    interface: port.interface,
                    name: port.name,
                    supports_input: port.direction == Direction::Input,
                    supports_output: port.direction == Direction::Output,
                    is_open: open.contains(&id),
                }
            })
            .filter(|device| filter.matches(device))
            .collect())
    }

    /// Looks up one catalog entry.
    pub fn device(&self, id: DeviceId) -> Result<DeviceDescriptor> {
        self.list_devices(DeviceFilter::Any)?
            .into_iter()
            .nth(id.0)
            .ok_or_else(|| MidiError::unavailable(id, "no such device"))
    }

    pub(crate) fn open_input(&self, id: DeviceId) -> Result<(Box<dyn InputEndpoint>, DeviceClaim)> {
        let (claim, port) = self.claim(id, Direction::Input)?;
        let endpoint = self.inner.backend.open_input(id.0, &port)?;
        Ok((endpoint, claim))
    }

    pub(crate) fn open_output(
        &self,
        id: DeviceId,
    ) -> Result<(Box<dyn OutputEndpoint>, DeviceClaim)> {
        let (claim, port) = self.claim(id, Direction::Output)?;
        let endpoint = self.inner.backend.open_output(id.0, &port)?;
        Ok((endpoint, claim))
    }

    /// Reserves exclusive use of `id`. The reservation ends when the returned
    /// claim is dropped, including when opening the endpoint fails.
    fn claim(&self, id: DeviceId, direction: Direction) -> Result<(DeviceClaim, PortInfo)> {
        let ports = self.inner.backend.ports()?;
        let port = ports
            .into_iter()
            .nth(id.0)
            .ok_or_else(|| MidiError::unavailable(id, "no such device"))?;
        if port.direction != direction {
            return Err(MidiError::unavailable(
                id,
                format!("\"{}\" does not support {}", port.name, direction),
            ));
        }

        if !self.inner.open.lock().insert(id) {
            return Err(MidiError::unavailable(
                id,
                format!("\"{}\" is already open", port.name),
            ));
        }

        let claim = DeviceClaim {
            id,
            inner: Arc::clone(&self.inner),
        };
        Ok((claim, port))
    }
}

impl ContextInner {
    fn new(backend: Box<dyn MidiBackend>) -> Self {
        Self {
            backend,
            open: Mutex::new(HashSet::new()),
        }
    }
}

/// Exclusive hold on one device id. Keeps the service alive.
pub(crate) struct DeviceClaim {
    id: DeviceId,
    inner: Arc<ContextInner>,
}

impl DeviceClaim {
    pub(crate) fn id(&self) -> DeviceId {
        self.id
    }
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        self.inner.open.lock().remove(&self.id);
        debug!("released MIDI device {}", self.id);
    }
}
