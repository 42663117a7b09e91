//! Hello PDUs, used to discover neighbors and maintain adjacencies.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{read_pdu_length, tlv, DecodeError, Tlv};
use crate::{
    level::{Level, LevelType},
    system_id::{LanId, SystemId},
};

/// Size of the fixed header of a LAN hello, including the common header.
pub(super) const LAN_HELLO_HEADER_SIZE: usize = 27;
/// Size of the fixed header of a point-to-point hello, including the common header.
pub(super) const P2P_HELLO_HEADER_SIZE: usize = 20;

/// Only the lower 7 bits of the priority byte are used.
const PRIORITY_MASK: u8 = 0x7F;

/// Hello sent on broadcast circuits, one per level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanHello {
    pub level: Level,
    pub circuit_type: LevelType,
    pub source: SystemId,
    /// Hold time in seconds. A hold time of 0 tears down the adjacency immediately.
    pub hold_time: u16,
    pub priority: u8,
    /// The sender's view of the designated router on the circuit.
    pub lan_id: LanId,
    /// Maximum number of area addresses the sender supports, 0 meaning 3.
    pub max_area_addresses: u8,
    pub tlvs: Vec<Tlv>,
}

/// Hello sent on point-to-point circuits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct P2pHello {
    pub circuit_type: LevelType,
    pub source: SystemId,
    /// Hold time in seconds. A hold time of 0 tears down the adjacency immediately.
    pub hold_time: u16,
    pub local_circuit_id: u8,
    /// Maximum number of area addresses the sender supports, 0 meaning 3.
    pub max_area_addresses: u8,
    pub tlvs: Vec<Tlv>,
}

impl LanHello {
    /// Decode the part following the common header. `src` contains the full buffer minus the
    /// common header, at least the fixed header is present.
    pub(super) fn from_bytes(
        level: Level,
        max_area_addresses: u8,
        src: &mut Bytes,
        total: usize,
    ) -> Result<Self, DecodeError> {
        let circuit_type = LevelType::from_wire(src.get_u8())
            .ok_or(DecodeError::MalformedPdu("reserved circuit type"))?;
        let source = SystemId::from_bytes(src);
        let hold_time = src.get_u16();
        read_pdu_length(src, total, LAN_HELLO_HEADER_SIZE)?;
        let priority = src.get_u8() & PRIORITY_MASK;
        let lan_id = LanId::from_bytes(src);
        let tlvs = tlv::decode_tlvs(src.split_off(0))?;

        Ok(Self {
            level,
            circuit_type,
            source,
            hold_time,
            priority,
            lan_id,
            max_area_addresses,
            tlvs,
        })
    }

    /// Write the part following the common header. The PDU length is filled in by the caller.
    pub(super) fn write_bytes(&self, dst: &mut BytesMut) {
        dst.put_u8(self.circuit_type.to_wire());
        self.source.write_bytes(dst);
        dst.put_u16(self.hold_time);
        dst.put_u16(0);
        dst.put_u8(self.priority & PRIORITY_MASK);
        self.lan_id.write_bytes(dst);
        tlv::encode_tlvs(&self.tlvs, dst);
    }
}

impl P2pHello {
    /// Decode the part following the common header. `src` contains the full buffer minus the
    /// common header, at least the fixed header is present.
    pub(super) fn from_bytes(
        max_area_addresses: u8,
        src: &mut Bytes,
        total: usize,
    ) -> Result<Self, DecodeError> {
        let circuit_type = LevelType::from_wire(src.get_u8())
            .ok_or(DecodeError::MalformedPdu("reserved circuit type"))?;
        let source = SystemId::from_bytes(src);
        let hold_time = src.get_u16();
        read_pdu_length(src, total, P2P_HELLO_HEADER_SIZE)?;
        let local_circuit_id = src.get_u8();
        let tlvs = tlv::decode_tlvs(src.split_off(0))?;

        Ok(Self {
            circuit_type,
            source,
            hold_time,
            local_circuit_id,
            max_area_addresses,
            tlvs,
        })
    }

    /// Write the part following the common header. The PDU length is filled in by the caller.
    pub(super) fn write_bytes(&self, dst: &mut BytesMut) {
        dst.put_u8(self.circuit_type.to_wire());
        self.source.write_bytes(dst);
        dst.put_u16(self.hold_time);
        dst.put_u16(0);
        dst.put_u8(self.local_circuit_id);
        tlv::encode_tlvs(&self.tlvs, dst);
    }
}
