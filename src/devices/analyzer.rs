use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use crate::device::{IecDevice, Port};
use crate::line::{Line, LineVector};

/// One notification as the analyzer saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub line: Line,
    pub state: bool,
    /// Dispatch nesting at the time of the call, 1 for a direct write.
    pub depth: usize,
    /// Effective bus state when the call arrived.
    pub lines: LineVector,
}

/// Passive logic analyzer. Never drives a line.
pub struct BusAnalyzer {
    tag: String,
    capacity: usize,
    transitions: RefCell<VecDeque<Transition>>,
    resets: Cell<usize>,
}

impl BusAnalyzer {
    pub const DEFAULT_CAPACITY: usize = 4096;

    pub fn new(tag: &str) -> Self {
        Self::with_capacity(tag, Self::DEFAULT_CAPACITY)
    }

    /// Keeps at most `capacity` transitions, dropping the oldest.
    pub fn with_capacity(tag: &str, capacity: usize) -> Self {
        BusAnalyzer {
            tag: tag.to_string(),
            capacity: capacity.max(1),
            transitions: RefCell::new(VecDeque::new()),
            resets: Cell::new(0),
        }
    }

    pub fn transitions(&self) -> Vec<Transition> {
        self.transitions.borrow().iter().copied().collect()
    }

    pub fn count(&self, line: Line) -> usize {
        self.transitions
            .borrow()
            .iter()
            .filter(|t| t.line == line)
            .count()
    }

    pub fn last(&self) -> Option<Transition> {
        self.transitions.borrow().back().copied()
    }

    /// RESET pulses seen (asserting edges).
    pub fn resets(&self) -> usize {
        self.resets.get()
    }

    pub fn clear(&self) {
        self.transitions.borrow_mut().clear();
        self.resets.set(0);
    }
}

impl IecDevice for BusAnalyzer {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn on_signal_changed(&self, port: &Port<'_>, line: Line, state: bool) {
        if line == Line::Reset && !state {
            self.resets.set(self.resets.get() + 1);
        }

        let mut transitions = self.transitions.borrow_mut();
        if transitions.len() == self.capacity {
            transitions.pop_front();
        }
        transitions.push_back(Transition {
            line,
            state,
            depth: port.bus().depth(),
            lines: port.lines(),
        });
    }
}
