//! Mock participants shared by the integration tests.

#![allow(dead_code)]

use rusty_iec::{DeviceId, IecBus, IecDevice, Line, Port};
use std::cell::RefCell;
use std::rc::Rc;

/// One notification, as seen by one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub tag: String,
    pub line: Line,
    pub state: bool,
    /// `get_signal(line)` read back from inside the callback.
    pub observed: bool,
}

pub type Journal = Rc<RefCell<Vec<Note>>>;

pub fn journal() -> Journal {
    Rc::new(RefCell::new(Vec::new()))
}

/// "When `on` goes to `state`, drive `drive` to `to`."
#[derive(Debug, Clone, Copy)]
pub struct Reaction {
    pub on: Line,
    pub state: bool,
    pub drive: Line,
    pub to: bool,
}

/// Records every notification into a shared journal and optionally reacts.
pub struct MockParticipant {
    tag: String,
    journal: Journal,
    reactions: Vec<Reaction>,
}

impl MockParticipant {
    pub fn new(tag: &str, journal: &Journal) -> Rc<Self> {
        Self::reacting(tag, journal, Vec::new())
    }

    pub fn reacting(tag: &str, journal: &Journal, reactions: Vec<Reaction>) -> Rc<Self> {
        Rc::new(MockParticipant {
            tag: tag.to_string(),
            journal: journal.clone(),
            reactions,
        })
    }
}

impl IecDevice for MockParticipant {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn on_signal_changed(&self, port: &Port<'_>, line: Line, state: bool) {
        self.journal.borrow_mut().push(Note {
            tag: self.tag.clone(),
            line,
            state,
            observed: port.get_signal(line),
        });

        for reaction in &self.reactions {
            if reaction.on == line && reaction.state == state {
                port.set_signal(reaction.drive, reaction.to);
            }
        }
    }
}

/// Pulls a line low whenever it goes high and releases it whenever it goes
/// low: a reaction cycle that never settles.
pub struct Oscillator {
    line: Line,
}

impl Oscillator {
    pub fn new(line: Line) -> Rc<Self> {
        Rc::new(Oscillator { line })
    }
}

impl IecDevice for Oscillator {
    fn tag(&self) -> &str {
        "oscillator"
    }

    fn on_signal_changed(&self, port: &Port<'_>, line: Line, state: bool) {
        if line == self.line {
            port.set_signal(line, !state);
        }
    }
}

pub fn attach<D: IecDevice + 'static>(bus: &IecBus, device: &Rc<D>, address: u8) -> DeviceId {
    let dyn_device: Rc<dyn IecDevice> = device.clone();
    bus.attach(device.tag(), address, &dyn_device)
        .expect("attach failed")
}

/// Journal entries rendered as `tag:LINE=state` for compact assertions.
pub fn render(journal: &Journal) -> Vec<String> {
    journal
        .borrow()
        .iter()
        .map(|n| format!("{}:{}={}", n.tag, n.line, u8::from(n.state)))
        .collect()
}
