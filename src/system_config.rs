//! # JSON Machine Configuration
//!
//! Describes which buses a machine has and which cards sit in which slots,
//! then builds and wires the whole thing.
//!
//! ## Usage
//!
//! ```rust
//! use rusty_iec::system_config::MachineFactory;
//!
//! let factory = MachineFactory::new();
//! let machine = factory
//!     .create_from_str(r#"{
//!         "name": "C64",
//!         "buses": [{ "tag": "iec" }],
//!         "slots": [{ "tag": "iec8", "bus": "iec", "address": 8, "card": "atn_responder" }]
//!     }"#)
//!     .expect("Could not create machine!");
//! machine.start().expect("Could not start machine!");
//! assert_eq!(machine.bus("iec").unwrap().device_count(), 1);
//! ```
//!
//! ## Configuration File Format
//!
//! ```json
//! {
//!   "name": "C64",
//!   "description": "C64 with one drive",
//!   "buses": [
//!     { "tag": "iec", "log_transitions": true, "reentry_limit": 64, "reset_on_start": true }
//!   ],
//!   "slots": [
//!     { "tag": "iec8", "bus": "iec", "address": 8, "card": "atn_responder" },
//!     { "tag": "probe", "bus": "iec", "card": "analyzer", "properties": { "capacity": 256 } }
//!   ]
//! }
//! ```
//!
//! Slots are attached in file order, which is also the notification order.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::rc::Rc;

use crate::bus::{BusConfig, IecBus};
use crate::device::IecDevice;
use crate::devices::{AtnResponder, BusAnalyzer, SerialLoopback};
use crate::error::ConfigError;
use crate::slot::IecSlot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub buses: Vec<BusSection>,
    #[serde(default)]
    pub slots: Vec<SlotConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSection {
    pub tag: String,
    #[serde(flatten)]
    pub config: BusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotConfig {
    pub tag: String,
    pub bus: String,
    #[serde(default)]
    pub address: u8,
    pub card: String,
    /// Device tag; defaults to the slot tag.
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
}

impl SlotConfig {
    pub fn device_tag(&self) -> &str {
        self.device.as_deref().unwrap_or(&self.tag)
    }
}

pub type CardFactory =
    fn(tag: &str, properties: &HashMap<String, serde_json::Value>) -> Rc<dyn IecDevice>;

/// Builds machines from configuration, using a catalogue of card types.
pub struct MachineFactory {
    card_registry: HashMap<String, CardFactory>,
}

impl MachineFactory {
    pub fn new() -> Self {
        let mut factory = MachineFactory {
            card_registry: HashMap::new(),
        };
        factory.register_default_cards();
        factory
    }

    fn register_default_cards(&mut self) {
        self.register_card("atn_responder", |tag, _| Rc::new(AtnResponder::new(tag)));
        self.register_card("loopback", |tag, _| Rc::new(SerialLoopback::new(tag)));
        self.register_card("analyzer", |tag, properties| {
            let capacity = properties
                .get("capacity")
                .and_then(|v| v.as_u64())
                .map(|v| v as usize)
                .unwrap_or(BusAnalyzer::DEFAULT_CAPACITY);
            Rc::new(BusAnalyzer::with_capacity(tag, capacity))
        });
    }

    /// Makes another device model available to slot configurations.
    pub fn register_card(&mut self, card: &str, factory: CardFactory) {
        self.card_registry.insert(card.to_string(), factory);
    }

    pub fn cards(&self) -> Vec<&str> {
        let mut cards: Vec<_> = self.card_registry.keys().map(String::as_str).collect();
        cards.sort_unstable();
        cards
    }

    pub fn create_from_json(&self, json_path: &str) -> Result<Machine, ConfigError> {
        let content = std::fs::read_to_string(json_path).map_err(|source| ConfigError::Io {
            path: json_path.to_string(),
            source,
        })?;
        self.create_from_str(&content)
    }

    pub fn create_from_str(&self, json: &str) -> Result<Machine, ConfigError> {
        let config: MachineConfig = serde_json::from_str(json)?;
        self.create(config)
    }

    /// Creates buses and devices. Nothing is attached until [`Machine::start`].
    pub fn create(&self, config: MachineConfig) -> Result<Machine, ConfigError> {
        let mut buses = HashMap::new();
        for section in &config.buses {
            if buses.contains_key(&section.tag) {
                return Err(ConfigError::DuplicateBus(section.tag.clone()));
            }
            debug!("creating bus '{}'", section.tag);
            buses.insert(section.tag.clone(), IecBus::new(&section.tag, section.config.clone()));
        }

        let mut slots = Vec::with_capacity(config.slots.len());
        for slot_config in &config.slots {
            let factory = self
                .card_registry
                .get(&slot_config.card)
                .ok_or_else(|| ConfigError::UnknownCard(slot_config.card.clone()))?;
            let device = factory(slot_config.device_tag(), &slot_config.properties);
            let slot = IecSlot::new(&slot_config.tag, slot_config.address).with_card(&slot_config.card);
            slots.push(SlotBinding {
                slot,
                bus: slot_config.bus.clone(),
                device,
            });
        }

        Ok(Machine {
            config,
            buses,
            slots,
        })
    }
}

impl Default for MachineFactory {
    fn default() -> Self {
        Self::new()
    }
}

struct SlotBinding {
    slot: IecSlot,
    bus: String,
    device: Rc<dyn IecDevice>,
}

/// A configured machine: owns its buses and every device.
pub struct Machine {
    config: MachineConfig,
    buses: HashMap<String, Rc<IecBus>>,
    slots: Vec<SlotBinding>,
}

impl Machine {
    /// Attaches every slot in configuration order, then pulses RESET on the
    /// buses that ask for it.
    pub fn start(&self) -> Result<(), ConfigError> {
        info!("starting machine '{}'", self.config.name);

        for binding in &self.slots {
            binding
                .slot
                .start_on(&self.buses, &binding.bus, binding.device.clone())?;
        }

        for section in &self.config.buses {
            if section.config.reset_on_start {
                if let Some(bus) = self.buses.get(&section.tag) {
                    bus.reset();
                }
            }
        }
        Ok(())
    }

    pub fn stop(&self) {
        info!("stopping machine '{}'", self.config.name);
        for section in &self.config.buses {
            if let Some(bus) = self.buses.get(&section.tag) {
                bus.stop();
            }
        }
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn bus(&self, tag: &str) -> Option<Rc<IecBus>> {
        self.buses.get(tag).cloned()
    }

    /// Buses in configuration order.
    pub fn buses(&self) -> Vec<Rc<IecBus>> {
        self.config
            .buses
            .iter()
            .filter_map(|section| self.buses.get(&section.tag).cloned())
            .collect()
    }

    pub fn device(&self, tag: &str) -> Option<Rc<dyn IecDevice>> {
        self.slots
            .iter()
            .find(|binding| binding.device.tag() == tag)
            .map(|binding| binding.device.clone())
    }

    pub fn slot(&self, tag: &str) -> Option<&IecSlot> {
        self.slots
            .iter()
            .find(|binding| binding.slot.tag() == tag)
            .map(|binding| &binding.slot)
    }

    pub fn info(&self) -> MachineInfo {
        MachineInfo {
            name: self.config.name.clone(),
            description: self.config.description.clone(),
            bus_count: self.buses.len(),
            slot_count: self.slots.len(),
            attached_count: self.buses.values().map(|bus| bus.device_count()).sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MachineInfo {
    pub name: String,
    pub description: String,
    pub bus_count: usize,
    pub slot_count: usize,
    pub attached_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    const C64: &str = r#"{
        "name": "C64",
        "description": "C64 with a drive and an analyzer",
        "buses": [{ "tag": "iec", "log_transitions": true }],
        "slots": [
            { "tag": "iec8", "bus": "iec", "address": 8, "card": "atn_responder", "device": "c1541" },
            { "tag": "probe", "bus": "iec", "card": "analyzer", "properties": { "capacity": 16 } }
        ]
    }"#;

    #[test]
    fn test_create_and_start() {
        let machine = MachineFactory::new().create_from_str(C64).unwrap();
        assert_eq!(machine.info().attached_count, 0);

        machine.start().unwrap();
        let bus = machine.bus("iec").unwrap();
        assert_eq!(bus.tags(), vec!["c1541".to_string(), "probe".to_string()]);
        assert!(bus.config().log_transitions);
        assert_eq!(machine.slot("iec8").unwrap().address(), 8);
        assert!(machine.device("c1541").is_some());

        let info = machine.info();
        assert_eq!(info.name, "C64");
        assert_eq!((info.bus_count, info.slot_count, info.attached_count), (1, 2, 2));

        machine.stop();
        assert_eq!(machine.info().attached_count, 0);
    }

    #[test]
    fn test_missing_bus_is_fatal() {
        let json = r#"{
            "name": "broken",
            "buses": [{ "tag": "iec" }],
            "slots": [{ "tag": "iec8", "bus": "ieee488", "address": 8, "card": "loopback" }]
        }"#;
        let machine = MachineFactory::new().create_from_str(json).unwrap();
        let err = machine.start().unwrap_err();
        assert!(matches!(err, ConfigError::MissingBus { ref bus, .. } if bus == "ieee488"));
    }

    #[test]
    fn test_repeated_bus_tag_is_rejected() {
        let json = r#"{
            "name": "broken",
            "buses": [{ "tag": "iec" }, { "tag": "iec", "reset_on_start": false }],
            "slots": []
        }"#;
        let err = MachineFactory::new().create_from_str(json).err().unwrap();
        assert!(matches!(err, ConfigError::DuplicateBus(ref bus) if bus == "iec"));
    }

    #[test]
    fn test_unknown_card() {
        let json = r#"{
            "name": "broken",
            "buses": [{ "tag": "iec" }],
            "slots": [{ "tag": "iec8", "bus": "iec", "card": "c1581" }]
        }"#;
        let err = MachineFactory::new().create_from_str(json).err().unwrap();
        assert!(matches!(err, ConfigError::UnknownCard(ref card) if card == "c1581"));
    }

    #[test]
    fn test_bad_json() {
        let err = MachineFactory::new().create_from_str("{").err().unwrap();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = MachineFactory::new()
            .create_from_json("does/not/exist.json")
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_custom_card() {
        let mut factory = MachineFactory::new();
        factory.register_card("mute", |tag, _| Rc::new(BusAnalyzer::new(tag)));
        assert_eq!(factory.cards(), vec!["analyzer", "atn_responder", "loopback", "mute"]);
    }
}
