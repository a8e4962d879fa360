//! Transition kinds.
//!
//! Kinds are ordered integers. Even values open a nesting level ("begin"),
//! odd values close it ("end"): begin `K` is closed by `K + 1`, and the next
//! deeper level opens with `K + 2`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of a transition record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kind(u32);

impl Kind {
    pub const UNKNOWN: Kind = Kind(0);
    pub const MAP: Kind = Kind(2);
    pub const UNMAP: Kind = Kind(3);
    pub const CONFIGURE: Kind = Kind(4);
    pub const UNCONFIGURE: Kind = Kind(5);
    pub const BEGIN_RUN: Kind = Kind(6);
    pub const END_RUN: Kind = Kind(7);
    pub const BEGIN_CALIB_CYCLE: Kind = Kind(8);
    pub const END_CALIB_CYCLE: Kind = Kind(9);
    pub const ENABLE: Kind = Kind(10);
    pub const DISABLE: Kind = Kind(11);

    const NAMED: [(Kind, &'static str); 11] = [
        (Kind::UNKNOWN, "Unknown"),
        (Kind::MAP, "Map"),
        (Kind::UNMAP, "Unmap"),
        (Kind::CONFIGURE, "Configure"),
        (Kind::UNCONFIGURE, "Unconfigure"),
        (Kind::BEGIN_RUN, "BeginRun"),
        (Kind::END_RUN, "EndRun"),
        (Kind::BEGIN_CALIB_CYCLE, "BeginCalibCycle"),
        (Kind::END_CALIB_CYCLE, "EndCalibCycle"),
        (Kind::ENABLE, "Enable"),
        (Kind::DISABLE, "Disable"),
    ];

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn is_begin(self) -> bool {
        self.0 & 1 == 0
    }

    pub const fn is_end(self) -> bool {
        !self.is_begin()
    }

    /// The end kind closing this begin, or `None` for end kinds.
    pub fn matching_end(self) -> Option<Kind> {
        if self.is_begin() {
            self.0.checked_add(1).map(Kind)
        } else {
            None
        }
    }

    /// The begin kind one nesting level deeper, or `None` for end kinds.
    pub fn next_level(self) -> Option<Kind> {
        if self.is_begin() {
            self.0.checked_add(2).map(Kind)
        } else {
            None
        }
    }

    /// True when `self` opens the level directly inside `top`.
    pub fn nests_in(self, top: Kind) -> bool {
        u64::from(self.0) == u64::from(top.0) + 2
    }

    /// True when `self` is the end matching `top`.
    pub fn closes(self, top: Kind) -> bool {
        u64::from(self.0) == u64::from(top.0) + 1
    }

    /// True when `self` is an end at or above the level opened by `top`.
    pub fn closes_at_or_above(self, top: Kind) -> bool {
        u64::from(self.0) < u64::from(top.0) + 3
    }

    pub fn name(self) -> Option<&'static str> {
        Self::NAMED
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, name)| *name)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "Kind({})", self.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transition kind '{0}'")]
pub struct ParseKindError(String);

impl FromStr for Kind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(raw) = s.parse::<u32>() {
            return Ok(Kind(raw));
        }
        Self::NAMED
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
            .map(|(kind, _)| *kind)
            .ok_or_else(|| ParseKindError(s.to_string()))
    }
}
