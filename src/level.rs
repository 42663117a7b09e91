//! Routing levels. Level 1 routes inside an area, level 2 routes between areas.

use core::fmt;

use serde::{Deserialize, Serialize};

/// A single routing level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Level {
    #[serde(rename = "level-1")]
    L1,
    #[serde(rename = "level-2")]
    L2,
}

/// The set of levels a router or circuit takes part in. Encoded on the wire in the circuit type
/// field of hellos and the IS type bits of LSPs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LevelType {
    #[serde(rename = "level-1")]
    Level1,
    #[serde(rename = "level-2")]
    Level2,
    #[serde(rename = "level-1-2")]
    Level12,
}

impl Level {
    /// Both levels, in processing order.
    pub const ALL: [Level; 2] = [Level::L1, Level::L2];

    /// Index of this level, used for per level arrays.
    pub const fn index(self) -> usize {
        match self {
            Level::L1 => 0,
            Level::L2 => 1,
        }
    }
}

impl LevelType {
    /// Checks if the given level is part of this set.
    pub const fn contains(self, level: Level) -> bool {
        matches!(
            (self, level),
            (LevelType::Level1, Level::L1)
                | (LevelType::Level2, Level::L2)
                | (LevelType::Level12, _)
        )
    }

    /// The levels present in both sets, if any.
    pub fn intersection(self, other: LevelType) -> Option<LevelType> {
        let l1 = self.contains(Level::L1) && other.contains(Level::L1);
        let l2 = self.contains(Level::L2) && other.contains(Level::L2);
        Self::from_levels(l1, l2)
    }

    /// This set with the given level removed.
    pub fn without(self, level: Level) -> Option<LevelType> {
        let l1 = self.contains(Level::L1) && level != Level::L1;
        let l2 = self.contains(Level::L2) && level != Level::L2;
        Self::from_levels(l1, l2)
    }

    /// Iterate over the levels in this set.
    pub fn levels(self) -> impl Iterator<Item = Level> {
        Level::ALL.into_iter().filter(move |l| self.contains(*l))
    }

    /// Decode the 2 bit wire representation. 0 is reserved and yields `None`.
    pub const fn from_wire(value: u8) -> Option<LevelType> {
        match value & 0b11 {
            1 => Some(LevelType::Level1),
            2 => Some(LevelType::Level2),
            3 => Some(LevelType::Level12),
            _ => None,
        }
    }

    /// The 2 bit wire representation.
    pub const fn to_wire(self) -> u8 {
        match self {
            LevelType::Level1 => 1,
            LevelType::Level2 => 2,
            LevelType::Level12 => 3,
        }
    }

    const fn from_levels(l1: bool, l2: bool) -> Option<LevelType> {
        match (l1, l2) {
            (true, true) => Some(LevelType::Level12),
            (true, false) => Some(LevelType::Level1),
            (false, true) => Some(LevelType::Level2),
            (false, false) => None,
        }
    }
}

impl From<Level> for LevelType {
    fn from(value: Level) -> Self {
        match value {
            Level::L1 => LevelType::Level1,
            Level::L2 => LevelType::Level2,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::L1 => f.pad("L1"),
            Level::L2 => f.pad("L2"),
        }
    }
}
