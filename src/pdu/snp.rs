//! Sequence number PDUs, used to synchronize link state databases.

use bytes::{BufMut, Bytes, BytesMut};

use super::{read_pdu_length, tlv, DecodeError, Tlv};
use crate::{
    level::Level,
    system_id::{LanId, LspId},
};

/// Size of the fixed header of a CSNP, including the common header.
pub(super) const CSNP_HEADER_SIZE: usize = 33;
/// Size of the fixed header of a PSNP, including the common header.
pub(super) const PSNP_HEADER_SIZE: usize = 17;

/// Complete sequence number PDU: summarizes every LSP in `[start, end]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Csnp {
    pub level: Level,
    /// Sender system id and circuit id.
    pub source: LanId,
    pub start: LspId,
    pub end: LspId,
    pub tlvs: Vec<Tlv>,
}

/// Partial sequence number PDU: acknowledges or requests individual LSPs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Psnp {
    pub level: Level,
    /// Sender system id and circuit id.
    pub source: LanId,
    pub tlvs: Vec<Tlv>,
}

impl Csnp {
    pub(super) fn from_bytes(
        level: Level,
        src: &mut Bytes,
        total: usize,
    ) -> Result<Self, DecodeError> {
        read_pdu_length(src, total, CSNP_HEADER_SIZE)?;
        let source = LanId::from_bytes(src);
        let start = LspId::from_bytes(src);
        let end = LspId::from_bytes(src);
        let tlvs = tlv::decode_tlvs(src.split_off(0))?;

        Ok(Self {
            level,
            source,
            start,
            end,
            tlvs,
        })
    }

    pub(super) fn write_bytes(&self, dst: &mut BytesMut) {
        dst.put_u16(0);
        self.source.write_bytes(dst);
        self.start.write_bytes(dst);
        self.end.write_bytes(dst);
        tlv::encode_tlvs(&self.tlvs, dst);
    }

    /// Checks if the given LSP falls in the range described by this CSNP.
    pub fn covers(&self, lsp_id: &LspId) -> bool {
        &self.start <= lsp_id && lsp_id <= &self.end
    }
}

impl Psnp {
    pub(super) fn from_bytes(
        level: Level,
        src: &mut Bytes,
        total: usize,
    ) -> Result<Self, DecodeError> {
        read_pdu_length(src, total, PSNP_HEADER_SIZE)?;
        let source = LanId::from_bytes(src);
        let tlvs = tlv::decode_tlvs(src.split_off(0))?;

        Ok(Self {
            level,
            source,
            tlvs,
        })
    }

    pub(super) fn write_bytes(&self, dst: &mut BytesMut) {
        dst.put_u16(0);
        self.source.write_bytes(dst);
        tlv::encode_tlvs(&self.tlvs, dst);
    }
}
