//! # Rusty IEC
//!
//! A Commodore IEC serial bus core for multi-machine emulators.
//!
//! This library provides:
//! - Open-collector, wired-AND signal lines (SRQ, ATN, CLK, DATA, RESET)
//! - A bus controller that folds every participant's view into the effective
//!   bus state and notifies the host and the daisy chain in attachment order
//! - Re-entrant, depth-first settling when devices react to each other
//! - Slots that attach devices to an explicitly given bus
//! - JSON-configurable machines and a terminal bus monitor

pub mod bus;
pub mod chain;
pub mod console;
pub mod device;
pub mod devices;
pub mod error;
pub mod line;
pub mod slot;
pub mod system_config;

pub use bus::{BusConfig, IecBus, Source};
pub use device::{DeviceId, IecDevice, Port};
pub use error::ConfigError;
pub use line::{Line, LineVector};
pub use slot::IecSlot;
