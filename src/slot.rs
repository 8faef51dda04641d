use log::debug;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::bus::{IecBus, Source};
use crate::device::{DeviceId, IecDevice};
use crate::error::ConfigError;
use crate::line::Line;

/// Highest primary address a device may answer to on the serial bus.
pub const MAX_ADDRESS: u8 = 30;

/// A connector on the daisy chain that one device plugs into.
///
/// The slot is handed the bus explicitly when it starts; it never goes
/// looking for one. Afterwards it holds only weak references, so dropping
/// the bus or the device leaves the slot inert rather than keeping either
/// alive.
pub struct IecSlot {
    tag: String,
    address: u8,
    card: Option<String>,
    bus: RefCell<Weak<IecBus>>,
    id: Cell<Option<DeviceId>>,
}

impl IecSlot {
    pub fn new(tag: &str, address: u8) -> Self {
        IecSlot {
            tag: tag.to_string(),
            address,
            card: None,
            bus: RefCell::new(Weak::new()),
            id: Cell::new(None),
        }
    }

    pub fn with_card(mut self, card: &str) -> Self {
        self.card = Some(card.to_string());
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn card(&self) -> Option<&str> {
        self.card.as_deref()
    }

    /// Registers `device` on `bus`. A slot registers exactly once.
    pub fn start(&self, bus: &Rc<IecBus>, device: Rc<dyn IecDevice>) -> Result<DeviceId, ConfigError> {
        if self.device_id().is_some() {
            return Err(ConfigError::AlreadyAttached(self.tag.clone()));
        }
        if self.address > MAX_ADDRESS {
            return Err(ConfigError::InvalidAddress {
                slot: self.tag.clone(),
                address: self.address,
            });
        }

        let id = bus.attach(device.tag(), self.address, &device)?;
        *self.bus.borrow_mut() = Rc::downgrade(bus);
        self.id.set(Some(id));
        debug!("slot '{}': '{}' started on '{}'", self.tag, device.tag(), bus.tag());
        Ok(id)
    }

    /// Looks `bus_tag` up in an explicit table of buses and starts on it.
    pub fn start_on(
        &self,
        buses: &HashMap<String, Rc<IecBus>>,
        bus_tag: &str,
        device: Rc<dyn IecDevice>,
    ) -> Result<DeviceId, ConfigError> {
        let bus = buses.get(bus_tag).ok_or_else(|| ConfigError::MissingBus {
            slot: self.tag.clone(),
            bus: bus_tag.to_string(),
        })?;
        self.start(bus, device)
    }

    /// The handle issued at start, while the bus still knows it.
    pub fn device_id(&self) -> Option<DeviceId> {
        let id = self.id.get()?;
        let bus = self.bus()?;
        bus.driven(id).map(|_| id)
    }

    pub fn bus(&self) -> Option<Rc<IecBus>> {
        self.bus.borrow().upgrade()
    }

    /// Drives `line` on behalf of the plugged-in device, outside of any
    /// notification. Does nothing before start or after teardown.
    pub fn set_signal(&self, line: Line, state: bool) {
        if let (Some(bus), Some(id)) = (self.bus(), self.id.get()) {
            bus.set_signal(Source::Device(id), line, state);
        }
    }

    /// Effective state of `line`; an unconnected slot sees a released bus.
    pub fn get_signal(&self, line: Line) -> bool {
        self.bus().map_or(true, |bus| bus.get_signal(line))
    }
}
