//! Dedicated logic for LSP sequence numbers.
//!
//! Unlike many other protocols, LSP sequence numbers do not wrap around. Once an originator
//! exhausts the space it must purge its LSP and wait until the purge has aged out everywhere
//! before starting again at [`SeqNo::INITIAL`].

use core::fmt;

/// A sequence number of an LSP.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeqNo(u32);

impl SeqNo {
    /// The first sequence number used by an originator. 0 is reserved for "unknown" in sequence
    /// number PDUs.
    pub const INITIAL: SeqNo = SeqNo(1);

    /// The highest sequence number which can be used.
    pub const MAX: SeqNo = SeqNo(u32::MAX);

    /// Create a new `SeqNo` with the given value.
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// The next sequence number, or `None` if the sequence number space is exhausted and the
    /// originator must go through the reset procedure.
    pub fn next(self) -> Option<SeqNo> {
        self.0.checked_add(1).map(SeqNo)
    }

    /// Checks if this is the unknown sequence number 0, as used in partial sequence number
    /// requests for LSPs we don't have.
    pub const fn is_unknown(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:#010x}", self.0))
    }
}

impl From<u32> for SeqNo {
    fn from(value: u32) -> Self {
        SeqNo(value)
    }
}

impl From<SeqNo> for u32 {
    fn from(value: SeqNo) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::SeqNo;

    #[test]
    fn ordering_is_plain_numeric() {
        assert!(SeqNo::from(1) < SeqNo::from(2));
        assert!(SeqNo::from(0x8000_0001) > SeqNo::from(1));
        assert!(SeqNo::MAX > SeqNo::INITIAL);
    }

    #[test]
    fn next_stops_at_max() {
        assert_eq!(SeqNo::INITIAL.next(), Some(SeqNo::from(2)));
        assert_eq!(SeqNo::from(u32::MAX - 1).next(), Some(SeqNo::MAX));
        assert_eq!(SeqNo::MAX.next(), None);
    }

    #[test]
    fn display() {
        assert_eq!(SeqNo::from(0x2a).to_string(), "0x0000002a");
    }
}
