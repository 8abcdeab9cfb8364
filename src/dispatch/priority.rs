//! Message priority classes.
//!
//! A priority is an integer in `0..=9` where `9` is the most urgent. The
//! newtype keeps the range invariant out of every call site: once a
//! `Priority` exists it is always a valid index into a ten-slot table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::utils::error::RuleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const MIN: Priority = Priority(0);
    pub const NORM: Priority = Priority(5);
    pub const MAX: Priority = Priority(9);

    /// Number of distinct priority classes.
    pub const COUNT: usize = 10;

    pub fn new(value: u8) -> Option<Self> {
        (value <= Self::MAX.0).then_some(Priority(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// All priorities, lowest first.
    pub fn all() -> impl Iterator<Item = Priority> {
        (Self::MIN.0..=Self::MAX.0).map(Priority)
    }

    /// Bit used for this priority in a `u16` priority mask.
    pub fn bit(self) -> u16 {
        1 << self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORM
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u8> for Priority {
    type Error = RuleError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Priority::new(value).ok_or_else(|| RuleError::PriorityOutOfRange(value.to_string()))
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> Self {
        p.0
    }
}

impl FromStr for Priority {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let value: u8 = trimmed
            .parse()
            .map_err(|_| RuleError::PriorityOutOfRange(trimmed.to_string()))?;
        Priority::try_from(value)
    }
}

/// Inclusive priority range as written in an `ifPriority` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityRange {
    pub low: Priority,
    pub high: Priority,
}

impl PriorityRange {
    pub fn iter(self) -> impl Iterator<Item = Priority> {
        (self.low.0..=self.high.0).map(Priority)
    }
}

impl FromStr for PriorityRange {
    type Err = RuleError;

    /// Accepts `"7"` or `"3-6"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(RuleError::MalformedPriorityRange(s.to_string()));
        }
        let (low, high) = match s.split_once('-') {
            Some((low, high)) => {
                if low.trim().is_empty() || high.trim().is_empty() {
                    return Err(RuleError::MalformedPriorityRange(s.to_string()));
                }
                (low.parse::<Priority>()?, high.parse::<Priority>()?)
            }
            None => {
                let p = s.parse::<Priority>()?;
                (p, p)
            }
        };
        if low > high {
            return Err(RuleError::MalformedPriorityRange(s.to_string()));
        }
        Ok(PriorityRange { low, high })
    }
}
