use crate::device::{IecDevice, Port};
use crate::line::Line;

/// Serial port loopback plug: DATA is wired to follow CLK.
pub struct SerialLoopback {
    tag: String,
}

impl SerialLoopback {
    pub fn new(tag: &str) -> Self {
        SerialLoopback {
            tag: tag.to_string(),
        }
    }
}

impl IecDevice for SerialLoopback {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn on_signal_changed(&self, port: &Port<'_>, line: Line, state: bool) {
        if line == Line::Clk {
            port.set_signal(Line::Data, state);
        }
    }
}
