use log::trace;
use std::cell::Cell;

use crate::device::{DeviceId, IecDevice, Port};
use crate::line::Line;

/// The mandatory attention response.
///
/// Every device on the chain has to pull DATA low within 1 ms of the host
/// asserting ATN, otherwise the host reports "device not present". This
/// device does exactly that and nothing more: DATA follows ATN while ATN is
/// asserted. RESET releases DATA unless the host is still holding ATN.
pub struct AtnResponder {
    tag: String,
    id: Cell<Option<DeviceId>>,
    attentions: Cell<usize>,
}

impl AtnResponder {
    pub fn new(tag: &str) -> Self {
        AtnResponder {
            tag: tag.to_string(),
            id: Cell::new(None),
            attentions: Cell::new(0),
        }
    }

    /// Number of ATN assertions seen.
    pub fn attentions(&self) -> usize {
        self.attentions.get()
    }

    pub fn device_id(&self) -> Option<DeviceId> {
        self.id.get()
    }
}

impl IecDevice for AtnResponder {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn on_signal_changed(&self, port: &Port<'_>, line: Line, state: bool) {
        match line {
            Line::Atn => {
                if !state {
                    self.attentions.set(self.attentions.get() + 1);
                }
                trace!("{}: ATN {}, DATA follows", self.tag, u8::from(state));
                port.set_signal(Line::Data, state);
            }
            Line::Reset if !state => port.set_signal(Line::Data, port.get_signal(Line::Atn)),
            _ => {}
        }
    }

    fn on_attached(&self, id: DeviceId) {
        self.id.set(Some(id));
    }

    fn on_detached(&self) {
        self.id.set(None);
    }
}
