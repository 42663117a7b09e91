//! Link state PDUs.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{checksum, read_pdu_length, tlv, DecodeError, Tlv};
use crate::{
    level::{Level, LevelType},
    sequence_number::SeqNo,
    system_id::LspId,
};

/// Size of the fixed header of an LSP, including the common header.
pub(super) const LSP_HEADER_SIZE: usize = 27;

/// Offset of the remaining lifetime field in an encoded LSP.
pub const LSP_LIFETIME_OFFSET: usize = 10;
/// Offset of the LSP id in an encoded LSP, the checksum covers everything from here on.
const LSP_CHECKSUM_START: usize = 12;
/// Offset of the checksum field in an encoded LSP.
const LSP_CHECKSUM_OFFSET: usize = 24;

const FLAG_PARTITION_REPAIR: u8 = 0x80;
/// The attached bits, one per metric type. Only the default metric bit is set by us.
const FLAG_ATTACHED_MASK: u8 = 0x78;
const FLAG_ATTACHED_DEFAULT: u8 = 0x08;
const FLAG_OVERLOAD: u8 = 0x04;
const FLAG_IS_TYPE_MASK: u8 = 0x03;

/// The flags byte of an LSP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LspFlags(u8);

/// A link state PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lsp {
    pub level: Level,
    /// Remaining lifetime in seconds. 0 indicates a purge.
    pub remaining_lifetime: u16,
    pub lsp_id: LspId,
    pub seqno: SeqNo,
    pub checksum: u16,
    pub flags: LspFlags,
    pub tlvs: Vec<Tlv>,
}

impl LspFlags {
    /// Flags for an originator of the given type, with everything else cleared.
    pub const fn new(is_type: LevelType) -> Self {
        Self(is_type.to_wire())
    }

    /// Create `LspFlags` from the raw byte.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// The raw byte.
    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn partition_repair(&self) -> bool {
        self.0 & FLAG_PARTITION_REPAIR != 0
    }

    /// Checks if any of the attached bits is set.
    pub const fn attached(&self) -> bool {
        self.0 & FLAG_ATTACHED_MASK != 0
    }

    pub const fn overload(&self) -> bool {
        self.0 & FLAG_OVERLOAD != 0
    }

    /// The type of the originating router, `None` for the reserved value.
    pub const fn is_type(&self) -> Option<LevelType> {
        LevelType::from_wire(self.0 & FLAG_IS_TYPE_MASK)
    }

    pub const fn with_overload(self, overload: bool) -> Self {
        if overload {
            Self(self.0 | FLAG_OVERLOAD)
        } else {
            Self(self.0 & !FLAG_OVERLOAD)
        }
    }

    pub const fn with_attached(self, attached: bool) -> Self {
        if attached {
            Self(self.0 | FLAG_ATTACHED_DEFAULT)
        } else {
            Self(self.0 & !FLAG_ATTACHED_MASK)
        }
    }
}

impl Lsp {
    /// Create a new `Lsp`, computing its checksum.
    pub fn new(
        level: Level,
        lsp_id: LspId,
        seqno: SeqNo,
        remaining_lifetime: u16,
        flags: LspFlags,
        tlvs: Vec<Tlv>,
    ) -> Self {
        let mut lsp = Self {
            level,
            remaining_lifetime,
            lsp_id,
            seqno,
            checksum: 0,
            flags,
            tlvs,
        };
        if remaining_lifetime != 0 {
            let encoded = super::Pdu::Lsp(lsp.clone()).encode();
            lsp.checksum = u16::from_be_bytes([
                encoded[LSP_CHECKSUM_OFFSET],
                encoded[LSP_CHECKSUM_OFFSET + 1],
            ]);
        }
        lsp
    }

    /// Checks if this LSP is a purge.
    pub fn is_purge(&self) -> bool {
        self.remaining_lifetime == 0
    }

    /// A purge of this LSP: same identifier and sequence number, no lifetime and only the given
    /// TLVs (typically just authentication).
    pub fn to_purge(&self, tlvs: Vec<Tlv>) -> Lsp {
        Lsp {
            level: self.level,
            remaining_lifetime: 0,
            lsp_id: self.lsp_id,
            seqno: self.seqno,
            checksum: 0,
            flags: self.flags,
            tlvs,
        }
    }

    /// Checks if two LSPs announce the same topology, ignoring sequence number and lifetime.
    pub fn same_content(&self, other: &Lsp) -> bool {
        self.is_purge() == other.is_purge() && self.flags == other.flags && self.tlvs == other.tlvs
    }

    /// The summary of this LSP as carried in sequence number PDUs.
    pub fn entry(&self) -> tlv::LspEntry {
        tlv::LspEntry {
            remaining_lifetime: self.remaining_lifetime,
            lsp_id: self.lsp_id,
            seqno: self.seqno,
            checksum: self.checksum,
        }
    }

    /// Decode the part following the common header. `src` contains the full buffer minus the
    /// common header, at least the fixed header is present. `whole` is the full buffer, used to
    /// verify the checksum.
    pub(super) fn from_bytes(
        level: Level,
        src: &mut Bytes,
        whole: &[u8],
    ) -> Result<Self, DecodeError> {
        let total = whole.len();
        let pdu_length = read_pdu_length(src, total, LSP_HEADER_SIZE)?;
        let remaining_lifetime = src.get_u16();
        let lsp_id = LspId::from_bytes(src);
        let seqno = SeqNo::new(src.get_u32());
        let checksum = src.get_u16();
        let flags = LspFlags(src.get_u8());

        // Purges don't carry a valid checksum.
        if remaining_lifetime != 0 {
            let covered = &whole[LSP_CHECKSUM_START..pdu_length];
            if !checksum::verify(covered) {
                return Err(DecodeError::ChecksumInvalid);
            }
        }

        let tlvs = tlv::decode_tlvs(src.split_off(0))?;

        Ok(Self {
            level,
            remaining_lifetime,
            lsp_id,
            seqno,
            checksum,
            flags,
            tlvs,
        })
    }

    /// Write the part following the common header. The PDU length and checksum are filled in by
    /// [`finish`](Lsp::finish).
    pub(super) fn write_bytes(&self, dst: &mut BytesMut) {
        dst.put_u16(0);
        dst.put_u16(self.remaining_lifetime);
        self.lsp_id.write_bytes(dst);
        dst.put_u32(self.seqno.into());
        dst.put_u16(self.checksum);
        dst.put_u8(self.flags.0);
        tlv::encode_tlvs(&self.tlvs, dst);
    }

    /// Compute the checksum of a fully encoded LSP, unless it is a purge, in which case the
    /// stored checksum is kept.
    pub(super) fn finish(&self, encoded: &mut [u8]) {
        if self.remaining_lifetime != 0 {
            checksum::compute(
                &mut encoded[LSP_CHECKSUM_START..],
                LSP_CHECKSUM_OFFSET - LSP_CHECKSUM_START,
            );
        }
    }
}

/// Overwrite the remaining lifetime of an encoded LSP. The checksum does not cover the lifetime
/// so it stays valid.
pub fn set_remaining_lifetime(encoded: &mut [u8], remaining_lifetime: u16) {
    encoded[LSP_LIFETIME_OFFSET..LSP_LIFETIME_OFFSET + 2]
        .copy_from_slice(&remaining_lifetime.to_be_bytes());
}
