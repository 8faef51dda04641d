//! Bus-facing peripherals.
//!
//! These model only what a device does on the serial lines. Full drive and
//! printer emulations plug in through the same [`IecDevice`](crate::device::IecDevice)
//! trait.

pub mod analyzer;
pub mod atn_responder;
pub mod loopback;

pub use analyzer::{BusAnalyzer, Transition};
pub use atn_responder::AtnResponder;
pub use loopback::SerialLoopback;
