//! # IEC Bus Controller
//!
//! Owns the line vectors and the daisy chain, folds every driver's view into
//! the effective bus state and fans changes out to the host and to each
//! attached device.
//!
//! ## Dispatch
//!
//! A write that moves the effective state of a line first calls the host
//! callback registered for that line, then `on_signal_changed` on every
//! device in attachment order. Devices react by writing through the `Port`
//! they are handed, which re-enters [`IecBus::set_signal`] and settles
//! depth-first before the outer fan-out continues. Nothing is queued.
//!
//! Devices must not react in cycles (A's reaction retriggers A forever).
//! `BusConfig::reentry_limit` turns such a cycle into a panic that names the
//! line rather than a stack overflow.

use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::chain::DaisyChain;
use crate::device::{DeviceId, IecDevice, Port};
use crate::error::ConfigError;
use crate::line::{Driver, Line, LineVector, SignalLines};

/// Who is writing a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The computer the bus belongs to.
    Host,
    Device(DeviceId),
}

/// Host-side listener for one line, called with the new effective state.
pub type HostCallback = Rc<dyn Fn(Line, bool)>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Log every stored-bit change at debug and a bus snapshot at trace.
    #[serde(default)]
    pub log_transitions: bool,
    /// Maximum nesting of effective changes in one settle, `None` for unbounded.
    #[serde(default = "default_reentry_limit")]
    pub reentry_limit: Option<usize>,
    /// Pulse RESET once the machine has attached its devices.
    #[serde(default = "default_reset_on_start")]
    pub reset_on_start: bool,
}

fn default_reentry_limit() -> Option<usize> {
    Some(64)
}

fn default_reset_on_start() -> bool {
    true
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            log_transitions: false,
            reentry_limit: default_reentry_limit(),
            reset_on_start: default_reset_on_start(),
        }
    }
}

/// Snapshot of one chain entry, for monitors.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantInfo {
    pub id: DeviceId,
    pub tag: String,
    pub address: u8,
    pub driven: LineVector,
    pub alive: bool,
}

pub struct IecBus {
    tag: String,
    config: BusConfig,
    lines: RefCell<SignalLines>,
    chain: RefCell<DaisyChain>,
    host_callbacks: RefCell<[Option<HostCallback>; Line::COUNT]>,
    depth: Cell<usize>,
}

struct DepthGuard<'a>(&'a Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

impl IecBus {
    pub fn new(tag: &str, config: BusConfig) -> Rc<Self> {
        Rc::new(IecBus {
            tag: tag.to_string(),
            config,
            lines: RefCell::new(SignalLines::new()),
            chain: RefCell::new(DaisyChain::new(tag)),
            host_callbacks: RefCell::new(Default::default()),
            depth: Cell::new(0),
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn set_host_callback(&self, line: Line, callback: HostCallback) {
        self.host_callbacks.borrow_mut()[line.index()] = Some(callback);
    }

    pub fn clear_host_callback(&self, line: Line) {
        self.host_callbacks.borrow_mut()[line.index()] = None;
    }

    /// Appends `device` to the daisy chain.
    pub fn attach(
        &self,
        tag: &str,
        address: u8,
        device: &Rc<dyn IecDevice>,
    ) -> Result<DeviceId, ConfigError> {
        let id = self
            .chain
            .borrow_mut()
            .attach(tag, address, Rc::downgrade(device))?;
        let driver = self.lines.borrow_mut().add_driver();
        debug_assert_eq!(driver, id.index);

        info!("{}: attached '{}' at address {} ({})", self.tag, tag, address, id);
        device.on_attached(id);
        Ok(id)
    }

    pub fn find(&self, tag: &str) -> Option<DeviceId> {
        self.chain.borrow().find(tag)
    }

    pub fn device_count(&self) -> usize {
        self.chain.borrow().len()
    }

    pub fn tags(&self) -> Vec<String> {
        self.chain.borrow().iter().map(|e| e.tag.clone()).collect()
    }

    pub fn participants(&self) -> Vec<ParticipantInfo> {
        let chain = self.chain.borrow();
        let lines = self.lines.borrow();
        chain
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                Some(ParticipantInfo {
                    id: chain.id_at(index)?,
                    tag: entry.tag.clone(),
                    address: entry.address,
                    driven: lines.driver(index)?,
                    alive: entry.device.strong_count() > 0,
                })
            })
            .collect()
    }

    /// Effective state of `line`.
    pub fn get_signal(&self, line: Line) -> bool {
        self.lines.borrow().read(line)
    }

    pub fn lines(&self) -> LineVector {
        self.lines.borrow().effective()
    }

    /// What the host side is driving.
    pub fn baseline(&self) -> LineVector {
        self.lines.borrow().baseline()
    }

    /// What one attached device is driving.
    pub fn driven(&self, id: DeviceId) -> Option<LineVector> {
        let index = self.chain.borrow().resolve(id)?;
        self.lines.borrow().driver(index)
    }

    /// Current nesting of `set_signal` dispatch.
    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    /// Records `source`'s view of `line` and notifies everyone if the
    /// effective state moved.
    ///
    /// Writes from devices that are not attached to this bus are ignored.
    pub fn set_signal(&self, source: Source, line: Line, state: bool) {
        let driver = match source {
            Source::Host => Driver::Host,
            Source::Device(id) => match self.chain.borrow().resolve(id) {
                Some(index) => Driver::Device(index),
                None => {
                    trace!("{}: ignoring {} from unattached device {}", self.tag, line, id);
                    return;
                }
            },
        };

        let changed = {
            let mut lines = self.lines.borrow_mut();
            if lines.bit(driver, line) == Some(state) {
                return;
            }
            if self.config.log_transitions {
                debug!("{}: '{}' {} {}", self.tag, self.driver_tag(driver), line, u8::from(state));
            }
            lines.write(driver, line, state)
        };

        if changed {
            let effective = self.get_signal(line);
            self.dispatch(line, effective);
        }
    }

    /// Tag-addressed write; an unknown tag is ignored like any other
    /// unattached source.
    pub fn set_signal_by_tag(&self, tag: &str, line: Line, state: bool) {
        match self.find(tag) {
            Some(id) => self.set_signal(Source::Device(id), line, state),
            None => trace!("{}: ignoring {} from unknown tag '{}'", self.tag, line, tag),
        }
    }

    /// The power-on pulse: host asserts and releases RESET.
    pub fn reset(&self) {
        debug!("{}: reset", self.tag);
        self.set_signal(Source::Host, Line::Reset, false);
        self.set_signal(Source::Host, Line::Reset, true);
    }

    /// Tears the chain down. Ids issued so far stop resolving.
    pub fn stop(&self) {
        let entries = self.chain.borrow_mut().clear();
        self.lines.borrow_mut().clear_drivers();
        info!("{}: stopped, detached {} device(s)", self.tag, entries.len());

        for entry in entries {
            if let Some(device) = entry.device.upgrade() {
                device.on_detached();
            }
        }
    }

    fn dispatch(&self, line: Line, state: bool) {
        let _guard = self.enter(line);

        let callback = self.host_callbacks.borrow()[line.index()].clone();
        if let Some(callback) = callback {
            callback(line, state);
        }

        let mut index = 0;
        while let Some((id, device)) = self.entry(index) {
            if let Some(device) = device.upgrade() {
                device.on_signal_changed(&Port::new(self, id), line, state);
            }
            index += 1;
        }

        if self.config.log_transitions {
            trace!("{}: {}", self.tag, self.lines());
        }
    }

    fn enter(&self, line: Line) -> DepthGuard<'_> {
        let depth = self.depth.get() + 1;
        if let Some(limit) = self.config.reentry_limit {
            if depth > limit {
                panic!(
                    "{}: {} change nested {} deep, devices are reacting in a cycle",
                    self.tag, line, depth
                );
            }
        }
        self.depth.set(depth);
        DepthGuard(&self.depth)
    }

    fn entry(&self, index: usize) -> Option<(DeviceId, Weak<dyn IecDevice>)> {
        let chain = self.chain.borrow();
        Some((chain.id_at(index)?, chain.entry_at(index)?.device.clone()))
    }

    fn driver_tag(&self, driver: Driver) -> String {
        match driver {
            Driver::Host => self.tag.clone(),
            Driver::Device(index) => self
                .chain
                .borrow()
                .entry_at(index)
                .map(|e| e.tag.clone())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Echo {
        tag: String,
        seen: RefCell<Vec<(Line, bool)>>,
    }

    impl Echo {
        fn new(tag: &str) -> Rc<Self> {
            Rc::new(Echo {
                tag: tag.to_string(),
                seen: RefCell::new(Vec::new()),
            })
        }
    }

    impl IecDevice for Echo {
        fn tag(&self) -> &str {
            &self.tag
        }

        fn on_signal_changed(&self, _port: &Port<'_>, line: Line, state: bool) {
            self.seen.borrow_mut().push((line, state));
        }
    }

    fn attach(bus: &IecBus, device: &Rc<Echo>, address: u8) -> DeviceId {
        let dyn_device: Rc<dyn IecDevice> = device.clone();
        bus.attach(&device.tag, address, &dyn_device).unwrap()
    }

    #[test]
    fn test_bus_starts_released() {
        let bus = IecBus::new("iec", BusConfig::default());
        assert!(bus.lines().is_released());
        assert_eq!(bus.device_count(), 0);
        assert_eq!(bus.depth(), 0);
    }

    #[test]
    fn test_host_write_notifies_devices() {
        let bus = IecBus::new("iec", BusConfig::default());
        let drive = Echo::new("drive");
        attach(&bus, &drive, 8);

        bus.set_signal(Source::Host, Line::Atn, false);
        assert!(!bus.get_signal(Line::Atn));
        assert!(!bus.baseline().get(Line::Atn));
        assert_eq!(*drive.seen.borrow(), vec![(Line::Atn, false)]);
    }

    #[test]
    fn test_host_callback_sees_device_writes() {
        let bus = IecBus::new("iec", BusConfig::default());
        let drive = Echo::new("drive");
        let id = attach(&bus, &drive, 8);

        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        bus.set_host_callback(Line::Data, Rc::new(move |line: Line, state: bool| sink.borrow_mut().push((line, state))));

        bus.set_signal(Source::Device(id), Line::Data, false);
        bus.set_signal(Source::Device(id), Line::Clk, false);
        assert_eq!(*log.borrow(), vec![(Line::Data, false)]);

        bus.clear_host_callback(Line::Data);
        bus.set_signal(Source::Device(id), Line::Data, true);
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_reset_pulses_line() {
        let bus = IecBus::new("iec", BusConfig::default());
        let drive = Echo::new("drive");
        attach(&bus, &drive, 8);

        bus.reset();
        assert_eq!(*drive.seen.borrow(), vec![(Line::Reset, false), (Line::Reset, true)]);
        assert!(bus.get_signal(Line::Reset));
    }

    #[test]
    fn test_stop_detaches_everything() {
        let bus = IecBus::new("iec", BusConfig::default());
        let drive = Echo::new("drive");
        let id = attach(&bus, &drive, 8);
        bus.set_signal(Source::Device(id), Line::Clk, false);
        assert!(!bus.get_signal(Line::Clk));

        bus.stop();
        assert_eq!(bus.device_count(), 0);
        assert!(bus.get_signal(Line::Clk));

        bus.set_signal(Source::Device(id), Line::Data, false);
        assert!(bus.get_signal(Line::Data));
        assert_eq!(bus.driven(id), None);
    }

    #[test]
    fn test_dropped_device_is_skipped() {
        let bus = IecBus::new("iec", BusConfig::default());
        let keep = Echo::new("keep");
        attach(&bus, &keep, 8);
        let gone_id = {
            let gone = Echo::new("gone");
            let id = attach(&bus, &gone, 9);
            bus.set_signal(Source::Device(id), Line::Clk, false);
            id
        };
        keep.seen.borrow_mut().clear();

        bus.set_signal(Source::Host, Line::Srq, false);
        assert_eq!(*keep.seen.borrow(), vec![(Line::Srq, false)]);

        let infos = bus.participants();
        assert_eq!(infos.len(), 2);
        assert!(infos[0].alive);
        assert!(!infos[1].alive);

        // Its last driven state still holds the line down.
        assert!(!bus.get_signal(Line::Clk));
        assert!(!bus.driven(gone_id).unwrap().get(Line::Clk));

        bus.stop();
        assert!(bus.get_signal(Line::Clk));
    }

    #[test]
    fn test_set_signal_by_tag() {
        let bus = IecBus::new("iec", BusConfig::default());
        let drive = Echo::new("drive");
        attach(&bus, &drive, 8);

        bus.set_signal_by_tag("drive", Line::Data, false);
        assert!(!bus.get_signal(Line::Data));

        bus.set_signal_by_tag("printer", Line::Clk, false);
        assert!(bus.get_signal(Line::Clk));
    }

    #[test]
    fn test_config_defaults_from_json() {
        let config: BusConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, BusConfig::default());

        let config: BusConfig = serde_json::from_str(r#"{"reentry_limit": null}"#).unwrap();
        assert_eq!(config.reentry_limit, None);
    }
}
