use std::fmt;

use crate::bus::{IecBus, Source};
use crate::line::{Line, LineVector};

/// Handle issued by a bus when a device is attached.
///
/// A handle is only valid on the bus session that issued it. Handles from
/// another bus, or from before a teardown, address nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub(crate) session: u64,
    pub(crate) index: usize,
}

impl DeviceId {
    /// Position in the daisy chain, 0 for the first attached device.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{}", self.index, self.session)
    }
}

/// Anything that can sit on an IEC daisy chain.
///
/// Callbacks take `&self` because a device is routinely notified again while
/// it is still reacting to an earlier change: pulling DATA in response to ATN
/// notifies every participant of the DATA edge, including the one pulling.
/// Implementations keep their state in `Cell`/`RefCell`.
pub trait IecDevice {
    fn tag(&self) -> &str;

    /// Called after the effective state of `line` changed.
    ///
    /// Any line the device drives in response must be written through `port`
    /// before returning; there is no later point at which the bus settles.
    fn on_signal_changed(&self, port: &Port<'_>, line: Line, state: bool);

    fn on_attached(&self, _id: DeviceId) {}

    fn on_detached(&self) {}
}

/// A device's view of the bus for the duration of one notification.
pub struct Port<'a> {
    bus: &'a IecBus,
    id: DeviceId,
}

impl<'a> Port<'a> {
    pub(crate) fn new(bus: &'a IecBus, id: DeviceId) -> Self {
        Port { bus, id }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn bus(&self) -> &'a IecBus {
        self.bus
    }

    pub fn set_signal(&self, line: Line, state: bool) {
        self.bus.set_signal(Source::Device(self.id), line, state);
    }

    pub fn get_signal(&self, line: Line) -> bool {
        self.bus.get_signal(line)
    }

    pub fn lines(&self) -> LineVector {
        self.bus.lines()
    }

    /// What this device itself is driving.
    pub fn driven(&self) -> LineVector {
        self.bus.driven(self.id).unwrap_or_default()
    }
}
