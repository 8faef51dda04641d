//! Open-collector signal lines.
//!
//! Every IEC line is active low and wired-AND: any driver that pulls a line
//! to 0 forces the whole bus low, and the line only reads 1 when every
//! driver has released it. `true` is released (high), `false` is asserted
//! (low) throughout this crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Line {
    Srq = 0,
    Atn = 1,
    Clk = 2,
    Data = 3,
    Reset = 4,
}

impl Line {
    pub const COUNT: usize = 5;
    pub const ALL: [Line; Line::COUNT] = [Line::Srq, Line::Atn, Line::Clk, Line::Data, Line::Reset];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Line> {
        Line::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Line::Srq => "SRQ",
            Line::Atn => "ATN",
            Line::Clk => "CLK",
            Line::Data => "DATA",
            Line::Reset => "RESET",
        }
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Line {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Line::ALL
            .iter()
            .copied()
            .find(|line| line.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownLine(s.to_string()))
    }
}

/// Parses `atn=0`, `CLK=1` and the like into a line and a state.
pub fn parse_assignment(s: &str) -> Result<(Line, bool), ConfigError> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| ConfigError::InvalidAssignment(s.to_string()))?;
    let line = name.parse::<Line>()?;
    match value.trim() {
        "0" => Ok((line, false)),
        "1" => Ok((line, true)),
        _ => Err(ConfigError::InvalidAssignment(s.to_string())),
    }
}

/// One driver's view of all five lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineVector([bool; Line::COUNT]);

impl LineVector {
    /// All lines released.
    pub const fn released() -> Self {
        LineVector([true; Line::COUNT])
    }

    pub fn get(&self, line: Line) -> bool {
        self.0[line.index()]
    }

    /// Stores `state` and reports whether the stored bit changed.
    pub fn set(&mut self, line: Line, state: bool) -> bool {
        let slot = &mut self.0[line.index()];
        if *slot == state {
            return false;
        }
        *slot = state;
        true
    }

    pub fn wired_and(&self, other: &LineVector) -> LineVector {
        let mut out = *self;
        for line in Line::ALL {
            out.0[line.index()] &= other.get(line);
        }
        out
    }

    /// Lines this vector currently pulls low.
    pub fn asserted(&self) -> impl Iterator<Item = Line> + '_ {
        Line::ALL.into_iter().filter(move |line| !self.get(*line))
    }

    pub fn is_released(&self) -> bool {
        self.0.iter().all(|bit| *bit)
    }
}

impl Default for LineVector {
    fn default() -> Self {
        LineVector::released()
    }
}

impl fmt::Display for LineVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, line) in Line::ALL.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{} {}", line, u8::from(self.get(*line)))?;
        }
        Ok(())
    }
}

/// Whose bits a write lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    /// The bus's own host side (the computer the chain hangs off).
    Host,
    /// A participant, by attachment index.
    Device(usize),
}

/// Baseline plus per-participant vectors, combined wired-AND.
#[derive(Debug, Clone, Default)]
pub struct SignalLines {
    baseline: LineVector,
    drivers: Vec<LineVector>,
    effective: LineVector,
}

impl SignalLines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a released driver and returns its index.
    pub fn add_driver(&mut self) -> usize {
        self.drivers.push(LineVector::released());
        self.drivers.len() - 1
    }

    pub fn driver_count(&self) -> usize {
        self.drivers.len()
    }

    pub fn baseline(&self) -> LineVector {
        self.baseline
    }

    pub fn driver(&self, index: usize) -> Option<LineVector> {
        self.drivers.get(index).copied()
    }

    /// The bit `driver` currently stores for `line`.
    pub fn bit(&self, driver: Driver, line: Line) -> Option<bool> {
        match driver {
            Driver::Host => Some(self.baseline.get(line)),
            Driver::Device(index) => self.drivers.get(index).map(|v| v.get(line)),
        }
    }

    /// Aggregate state of `line`, recomputed from the stored bits.
    pub fn read(&self, line: Line) -> bool {
        self.baseline.get(line) && self.drivers.iter().all(|v| v.get(line))
    }

    pub fn effective(&self) -> LineVector {
        self.drivers
            .iter()
            .fold(self.baseline, |acc, v| acc.wired_and(v))
    }

    /// Updates one driver's bit.
    ///
    /// Returns true only when the aggregate state of `line` moved. Writes to
    /// an unknown driver index change nothing.
    pub fn write(&mut self, driver: Driver, line: Line, state: bool) -> bool {
        let vector = match driver {
            Driver::Host => &mut self.baseline,
            Driver::Device(index) => match self.drivers.get_mut(index) {
                Some(vector) => vector,
                None => return false,
            },
        };

        if !vector.set(line, state) {
            return false;
        }

        let aggregate = self.read(line);
        self.effective.set(line, aggregate)
    }

    /// Drops every participant, keeping the baseline.
    pub fn clear_drivers(&mut self) {
        self.drivers.clear();
        self.effective = self.baseline;
    }
}
