use std::fmt;

/// Catalog index of a MIDI endpoint. Ids are dense, starting at 0, in the
/// order the backend lists its ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub usize);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for DeviceId {
    fn from(id: usize) -> Self {
        DeviceId(id)
    }
}

/// Direction a port can be opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// A port as reported by a backend, before the catalog assigns ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub interface: String,
    pub name: String,
    pub direction: Direction,
}

impl PortInfo {
    pub fn new(interface: impl Into<String>, name: impl Into<String>, direction: Direction) -> Self {
        Self {
            interface: interface.into(),
            name: name.into(),
            direction,
        }
    }
}

/// One catalog entry. Produced by [`MidiContext::list_devices`](crate::MidiContext::list_devices).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub interface: String,
    pub name: String,
    pub supports_input: bool,
    pub supports_output: bool,
    pub is_open: bool,
}

impl DeviceDescriptor {
    pub fn supports(&self, direction: Direction) -> bool {
        match direction {
            Direction::Input => self.supports_input,
            Direction::Output => self.supports_output,
        }
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] \"{}\" (interface: \"{}\")",
            self.id, self.name, self.interface
        )
    }
}

/// Catalog query filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceFilter {
    #[default]
    Any,
    InputOnly,
    OutputOnly,
}

impl DeviceFilter {
    pub fn matches(&self, device: &DeviceDescriptor) -> bool {
        match self {
            DeviceFilter::Any => true,
            DeviceFilter::InputOnly => device.supports_input,
            DeviceFilter::OutputOnly => device.supports_output,
        }
    }
}

impl From<Direction> for DeviceFilter {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Input => DeviceFilter::InputOnly,
            Direction::Output => DeviceFilter::OutputOnly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: usize, input: bool) -> DeviceDescriptor {
        DeviceDescriptor {
            id: DeviceId(id),
            interface: "ALSA".into(),
            name: format!("Port {}", id),
            supports_input: input,
            supports_output: !input,
            is_open: false,
        }
    }

    #[test]
    fn test_filter() {
        let input = descriptor(0, true);
        let output = descriptor(1, false);

        assert!(DeviceFilter::Any.matches(&input));
        assert!(DeviceFilter::Any.matches(&output));
        assert!(DeviceFilter::InputOnly.matches(&input));
        assert!(!DeviceFilter::InputOnly.matches(&output));
        assert!(DeviceFilter::OutputOnly.matches(&output));
        assert!(!DeviceFilter::OutputOnly.matches(&input));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            descriptor(2, true).to_string(),
            "[2] \"Port 2\" (interface: \"ALSA\")"
        );
    }
}
