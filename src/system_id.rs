//! Identifiers for intermediate systems, LAN pseudonodes and link state PDUs.

use core::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// A `SystemId` uniquely identifies a router inside the routing domain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SystemId([u8; SystemId::BYTE_SIZE]);

/// Identifies a node in the link state graph: either a router (pseudonode 0) or the pseudonode
/// a designated router creates for a broadcast circuit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LanId {
    system_id: SystemId,
    pseudonode: u8,
}

/// Identifies a single LSP fragment.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LspId {
    lan_id: LanId,
    fragment: u8,
}

/// Error returned when parsing an identifier from its text form fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid identifier {0:?}")]
pub struct ParseIdError(String);

impl ParseIdError {
    pub(crate) fn new(input: &str) -> Self {
        Self(input.to_string())
    }
}

impl SystemId {
    /// Size in bytes of a `SystemId`.
    pub const BYTE_SIZE: usize = 6;

    /// Create a new `SystemId` from raw bytes.
    pub const fn new(bytes: [u8; Self::BYTE_SIZE]) -> Self {
        Self(bytes)
    }

    /// View this `SystemId` as a byte array.
    pub const fn as_bytes(&self) -> &[u8; Self::BYTE_SIZE] {
        &self.0
    }

    /// Read a `SystemId` from the buffer. The caller must make sure at least
    /// [`SystemId::BYTE_SIZE`] bytes are remaining.
    pub(crate) fn from_bytes(src: &mut impl Buf) -> Self {
        let mut bytes = [0; Self::BYTE_SIZE];
        src.copy_to_slice(&mut bytes);
        Self(bytes)
    }

    /// Write this `SystemId` to the buffer.
    pub(crate) fn write_bytes(&self, dst: &mut impl BufMut) {
        dst.put_slice(&self.0)
    }
}

impl LanId {
    /// Size in bytes of a `LanId`.
    pub const BYTE_SIZE: usize = SystemId::BYTE_SIZE + 1;

    /// Create a new `LanId`.
    pub const fn new(system_id: SystemId, pseudonode: u8) -> Self {
        Self {
            system_id,
            pseudonode,
        }
    }

    /// The `LanId` of a router node.
    pub const fn router(system_id: SystemId) -> Self {
        Self::new(system_id, 0)
    }

    /// The system which owns this node.
    pub const fn system_id(&self) -> SystemId {
        self.system_id
    }

    /// The pseudonode byte, 0 for routers.
    pub const fn pseudonode(&self) -> u8 {
        self.pseudonode
    }

    /// Checks if this identifies a pseudonode rather than a router.
    pub const fn is_pseudonode(&self) -> bool {
        self.pseudonode != 0
    }

    pub(crate) fn from_bytes(src: &mut impl Buf) -> Self {
        let system_id = SystemId::from_bytes(src);
        Self::new(system_id, src.get_u8())
    }

    pub(crate) fn write_bytes(&self, dst: &mut impl BufMut) {
        self.system_id.write_bytes(dst);
        dst.put_u8(self.pseudonode);
    }
}

impl LspId {
    /// Size in bytes of a `LspId`.
    pub const BYTE_SIZE: usize = LanId::BYTE_SIZE + 1;

    /// The lowest possible `LspId`, used as start of a complete sequence number range.
    pub const MIN: LspId = LspId::new(LanId::new(SystemId([0; 6]), 0), 0);
    /// The highest possible `LspId`, used as end of a complete sequence number range.
    pub const MAX: LspId = LspId::new(LanId::new(SystemId([0xFF; 6]), 0xFF), 0xFF);

    /// Create a new `LspId`.
    pub const fn new(lan_id: LanId, fragment: u8) -> Self {
        Self { lan_id, fragment }
    }

    /// The node which originated this LSP.
    pub const fn lan_id(&self) -> LanId {
        self.lan_id
    }

    /// The system which originated this LSP.
    pub const fn system_id(&self) -> SystemId {
        self.lan_id.system_id
    }

    /// The fragment number.
    pub const fn fragment(&self) -> u8 {
        self.fragment
    }

    /// The next `LspId` in order, `None` for [`LspId::MAX`].
    pub fn successor(&self) -> Option<LspId> {
        let mut bytes = [0; 8];
        bytes[..6].copy_from_slice(self.system_id().as_bytes());
        bytes[6] = self.lan_id.pseudonode;
        bytes[7] = self.fragment;
        let next = u64::from_be_bytes(bytes).checked_add(1)?.to_be_bytes();
        let mut system_id = [0; SystemId::BYTE_SIZE];
        system_id.copy_from_slice(&next[..6]);
        Some(LspId::new(LanId::new(SystemId(system_id), next[6]), next[7]))
    }

    pub(crate) fn from_bytes(src: &mut impl Buf) -> Self {
        let lan_id = LanId::from_bytes(src);
        Self::new(lan_id, src.get_u8())
    }

    pub(crate) fn write_bytes(&self, dst: &mut impl BufMut) {
        self.lan_id.write_bytes(dst);
        dst.put_u8(self.fragment);
    }
}

impl From<[u8; SystemId::BYTE_SIZE]> for SystemId {
    fn from(bytes: [u8; SystemId::BYTE_SIZE]) -> SystemId {
        SystemId(bytes)
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!(
            "{}.{}.{}",
            faster_hex::hex_string(&self.0[..2]),
            faster_hex::hex_string(&self.0[2..4]),
            faster_hex::hex_string(&self.0[4..]),
        ))
    }
}

impl fmt::Display for LanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{}.{:02x}", self.system_id, self.pseudonode))
    }
}

impl fmt::Display for LspId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{}-{:02x}", self.lan_id, self.fragment))
    }
}

impl FromStr for SystemId {
    type Err = ParseIdError;

    /// Parses the dotted form `0000.0000.0001`. The dots are optional.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.replace('.', "");
        if digits.len() != Self::BYTE_SIZE * 2 {
            return Err(ParseIdError::new(s));
        }
        let mut bytes = [0; Self::BYTE_SIZE];
        faster_hex::hex_decode(digits.as_bytes(), &mut bytes)
            .map_err(|_| ParseIdError::new(s))?;
        Ok(Self(bytes))
    }
}

impl Serialize for SystemId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SystemId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::{LanId, LspId, SystemId};

    #[test]
    fn display_ids() {
        let id = SystemId::new([0x19, 0x21, 0x68, 0x00, 0x10, 0x01]);
        assert_eq!(id.to_string(), "1921.6800.1001");

        let lan = LanId::new(id, 3);
        assert_eq!(lan.to_string(), "1921.6800.1001.03");

        let lsp = LspId::new(lan, 0x1a);
        assert_eq!(lsp.to_string(), "1921.6800.1001.03-1a");
    }

    #[test]
    fn successor_carries() {
        let id = LspId::new(LanId::new(SystemId::new([0, 0, 0, 0, 0, 1]), 0xff), 0xff);
        assert_eq!(
            id.successor(),
            Some(LspId::new(LanId::new(SystemId::new([0, 0, 0, 0, 0, 2]), 0), 0))
        );
        assert!(LspId::MIN < LspId::MIN.successor().expect("MIN has a successor; qed"));
        assert_eq!(LspId::MAX.successor(), None);
    }

    #[test]
    fn parse_system_id() {
        let id: SystemId = "0000.0000.00ab".parse().expect("Valid system id; qed");
        assert_eq!(id, SystemId::new([0, 0, 0, 0, 0, 0xab]));

        let id: SystemId = "0000000000ab".parse().expect("Dots are optional; qed");
        assert_eq!(id, SystemId::new([0, 0, 0, 0, 0, 0xab]));

        assert!("0000.0000.00".parse::<SystemId>().is_err());
        assert!("0000.0000.00zz".parse::<SystemId>().is_err());
    }

    #[test]
    fn lsp_id_ordering_follows_wire_order() {
        let a = SystemId::new([0, 0, 0, 0, 0, 1]);
        let b = SystemId::new([0, 0, 0, 0, 0, 2]);

        assert!(LspId::new(LanId::router(a), 5) < LspId::new(LanId::new(a, 1), 0));
        assert!(LspId::new(LanId::new(a, 0xff), 0xff) < LspId::new(LanId::router(b), 0));
        assert!(LspId::MIN < LspId::new(LanId::router(a), 0));
        assert!(LspId::new(LanId::new(b, 0xff), 0xff) < LspId::MAX);
    }
}
