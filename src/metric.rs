//! Wide metrics as carried in extended reachability TLVs.

use core::fmt;
use std::ops::Add;

/// Highest value a link metric can have on the wire, it is encoded in 3 bytes.
pub const MAX_LINK_METRIC: u32 = 0x00FF_FFFF;

/// Cost used for router links which advertise an absent (zero) metric.
pub const DEFAULT_LINK_METRIC: u32 = 1;

/// A `Metric` is the cost of a link or path. A lower `Metric` is more favorable.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct Metric(u32);

impl Metric {
    /// A zero cost metric.
    pub const ZERO: Metric = Metric(0);

    /// Create a new `Metric` with the given value.
    pub const fn new(value: u32) -> Self {
        Metric(value)
    }

    /// The raw value of this `Metric`.
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Interprets this `Metric` as advertised on a link between two routers. Absent or zero link
    /// costs are treated as [`DEFAULT_LINK_METRIC`], values which don't fit the wire format are
    /// clamped.
    pub const fn as_link_cost(&self) -> Metric {
        if self.0 == 0 {
            Metric(DEFAULT_LINK_METRIC)
        } else if self.0 > MAX_LINK_METRIC {
            Metric(MAX_LINK_METRIC)
        } else {
            *self
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{}", self.0))
    }
}

impl From<u32> for Metric {
    fn from(value: u32) -> Self {
        Metric(value)
    }
}

impl From<Metric> for u32 {
    fn from(value: Metric) -> Self {
        value.0
    }
}

impl Add for Metric {
    type Output = Self;

    fn add(self, rhs: Metric) -> Self::Output {
        Metric(self.0.saturating_add(rhs.0))
    }
}
