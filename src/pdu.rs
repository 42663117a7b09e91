//! Encoding and decoding of protocol data units.
//!
//! Every PDU starts with a fixed 8 byte common header, followed by a fixed header specific to
//! the PDU type, followed by a sequence of TLVs filling the rest of the PDU.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::level::Level;

pub use self::{
    hello::{LanHello, P2pHello},
    lsp::{set_remaining_lifetime, Lsp, LspFlags},
    snp::{Csnp, Psnp},
    tlv::Tlv,
};

pub mod checksum;
mod hello;
mod lsp;
mod snp;
pub mod tlv;

/// Intradomain routing protocol discriminator.
const DISCRIMINATOR: u8 = 0x83;
/// Version of the protocol, also used for the protocol id extension.
const VERSION: u8 = 1;
/// Length of system ids. On the wire 0 means the default of 6, which is what we use.
const ID_LENGTH: u8 = 0;

/// Size of the common header on the wire.
const HEADER_WIRE_SIZE: usize = 8;

/// Only the lower 5 bits of the PDU type byte are used.
const PDU_TYPE_MASK: u8 = 0x1F;

/// PDU type for a level 1 LAN hello.
const PDU_TYPE_L1_LAN_HELLO: u8 = 15;
/// PDU type for a level 2 LAN hello.
const PDU_TYPE_L2_LAN_HELLO: u8 = 16;
/// PDU type for a point-to-point hello.
const PDU_TYPE_P2P_HELLO: u8 = 17;
/// PDU type for a level 1 LSP.
const PDU_TYPE_L1_LSP: u8 = 18;
/// PDU type for a level 2 LSP.
const PDU_TYPE_L2_LSP: u8 = 20;
/// PDU type for a level 1 CSNP.
const PDU_TYPE_L1_CSNP: u8 = 24;
/// PDU type for a level 2 CSNP.
const PDU_TYPE_L2_CSNP: u8 = 25;
/// PDU type for a level 1 PSNP.
const PDU_TYPE_L1_PSNP: u8 = 26;
/// PDU type for a level 2 PSNP.
const PDU_TYPE_L2_PSNP: u8 = 27;

/// Size of the buffer used to originate LSPs and sequence number PDUs. PDUs we originate never
/// exceed this size.
pub const ORIGINATING_BUFFER_SIZE: usize = 1492;

/// Error returned when decoding a PDU fails.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The PDU does not follow the wire format.
    #[error("malformed PDU: {0}")]
    MalformedPdu(&'static str),
    /// The checksum of an LSP does not match its content.
    #[error("LSP checksum mismatch")]
    ChecksumInvalid,
    /// The underlying stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// The type of a PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PduType {
    LanHello(Level),
    P2pHello,
    Lsp(Level),
    Csnp(Level),
    Psnp(Level),
}

/// A decoded PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    LanHello(LanHello),
    P2pHello(P2pHello),
    Lsp(Lsp),
    Csnp(Csnp),
    Psnp(Psnp),
}

/// The common header of every PDU.
#[derive(Debug, Clone)]
struct Header {
    length_indicator: u8,
    pdu_type: PduType,
    max_area_addresses: u8,
}

impl PduType {
    fn from_wire(value: u8) -> Option<Self> {
        match value & PDU_TYPE_MASK {
            PDU_TYPE_L1_LAN_HELLO => Some(PduType::LanHello(Level::L1)),
            PDU_TYPE_L2_LAN_HELLO => Some(PduType::LanHello(Level::L2)),
            PDU_TYPE_P2P_HELLO => Some(PduType::P2pHello),
            PDU_TYPE_L1_LSP => Some(PduType::Lsp(Level::L1)),
            PDU_TYPE_L2_LSP => Some(PduType::Lsp(Level::L2)),
            PDU_TYPE_L1_CSNP => Some(PduType::Csnp(Level::L1)),
            PDU_TYPE_L2_CSNP => Some(PduType::Csnp(Level::L2)),
            PDU_TYPE_L1_PSNP => Some(PduType::Psnp(Level::L1)),
            PDU_TYPE_L2_PSNP => Some(PduType::Psnp(Level::L2)),
            _ => None,
        }
    }

    fn to_wire(self) -> u8 {
        match self {
            PduType::LanHello(Level::L1) => PDU_TYPE_L1_LAN_HELLO,
            PduType::LanHello(Level::L2) => PDU_TYPE_L2_LAN_HELLO,
            PduType::P2pHello => PDU_TYPE_P2P_HELLO,
            PduType::Lsp(Level::L1) => PDU_TYPE_L1_LSP,
            PduType::Lsp(Level::L2) => PDU_TYPE_L2_LSP,
            PduType::Csnp(Level::L1) => PDU_TYPE_L1_CSNP,
            PduType::Csnp(Level::L2) => PDU_TYPE_L2_CSNP,
            PduType::Psnp(Level::L1) => PDU_TYPE_L1_PSNP,
            PduType::Psnp(Level::L2) => PDU_TYPE_L2_PSNP,
        }
    }

    /// Size of the fixed part of the PDU, including the common header.
    pub fn header_size(self) -> usize {
        match self {
            PduType::LanHello(_) => hello::LAN_HELLO_HEADER_SIZE,
            PduType::P2pHello => hello::P2P_HELLO_HEADER_SIZE,
            PduType::Lsp(_) => lsp::LSP_HEADER_SIZE,
            PduType::Csnp(_) => snp::CSNP_HEADER_SIZE,
            PduType::Psnp(_) => snp::PSNP_HEADER_SIZE,
        }
    }

    /// Offset of the PDU length field.
    fn length_offset(self) -> usize {
        match self {
            PduType::LanHello(_) | PduType::P2pHello => 17,
            PduType::Lsp(_) | PduType::Csnp(_) | PduType::Psnp(_) => HEADER_WIRE_SIZE,
        }
    }
}

impl Header {
    /// Read and validate the common header. The caller makes sure enough bytes are available.
    fn from_bytes(src: &mut impl Buf) -> Result<Self, DecodeError> {
        if src.get_u8() != DISCRIMINATOR {
            return Err(DecodeError::MalformedPdu("unknown protocol discriminator"));
        }
        let length_indicator = src.get_u8();
        if src.get_u8() != VERSION {
            return Err(DecodeError::MalformedPdu("unsupported protocol id extension"));
        }
        let id_length = src.get_u8();
        if id_length != 0 && id_length != 6 {
            return Err(DecodeError::MalformedPdu("unsupported id length"));
        }
        let pdu_type = PduType::from_wire(src.get_u8())
            .ok_or(DecodeError::MalformedPdu("unknown PDU type"))?;
        if src.get_u8() != VERSION {
            return Err(DecodeError::MalformedPdu("unsupported version"));
        }
        // Reserved
        src.advance(1);
        let max_area_addresses = src.get_u8();

        Ok(Self {
            length_indicator,
            pdu_type,
            max_area_addresses,
        })
    }

    fn write_bytes(&self, dst: &mut impl BufMut) {
        dst.put_u8(DISCRIMINATOR);
        dst.put_u8(self.length_indicator);
        dst.put_u8(VERSION);
        dst.put_u8(ID_LENGTH);
        dst.put_u8(self.pdu_type.to_wire());
        dst.put_u8(VERSION);
        dst.put_u8(0);
        dst.put_u8(self.max_area_addresses);
    }
}

/// Read the PDU length field, and limit `src` to the PDU. `total` is the size of the buffer the
/// PDU was received in, `header_size` the size of the fixed header of the PDU. Returns the PDU
/// length.
fn read_pdu_length(src: &mut Bytes, total: usize, header_size: usize) -> Result<usize, DecodeError> {
    let offset = total - src.len();
    let pdu_length = src.get_u16() as usize;
    if pdu_length < header_size {
        return Err(DecodeError::MalformedPdu("PDU length shorter than header"));
    }
    if pdu_length > total {
        return Err(DecodeError::MalformedPdu("PDU length exceeds the buffer"));
    }
    src.truncate(pdu_length - offset - 2);
    Ok(pdu_length)
}

/// Decode a single PDU from the buffer. Bytes following the PDU, as indicated by its length
/// field, are ignored.
pub fn decode(buf: &[u8]) -> Result<Pdu, DecodeError> {
    if buf.len() < HEADER_WIRE_SIZE {
        return Err(DecodeError::MalformedPdu("truncated common header"));
    }
    let total = buf.len();
    let mut src = Bytes::copy_from_slice(buf);
    let header = Header::from_bytes(&mut src)?;

    let header_size = header.pdu_type.header_size();
    if header.length_indicator as usize != header_size {
        return Err(DecodeError::MalformedPdu("wrong header length indicator"));
    }
    if total < header_size {
        return Err(DecodeError::MalformedPdu("header length exceeds the buffer"));
    }

    Ok(match header.pdu_type {
        PduType::LanHello(level) => Pdu::LanHello(LanHello::from_bytes(
            level,
            header.max_area_addresses,
            &mut src,
            total,
        )?),
        PduType::P2pHello => Pdu::P2pHello(P2pHello::from_bytes(
            header.max_area_addresses,
            &mut src,
            total,
        )?),
        PduType::Lsp(level) => Pdu::Lsp(Lsp::from_bytes(level, &mut src, buf)?),
        PduType::Csnp(level) => Pdu::Csnp(Csnp::from_bytes(level, &mut src, total)?),
        PduType::Psnp(level) => Pdu::Psnp(Psnp::from_bytes(level, &mut src, total)?),
    })
}

impl Pdu {
    /// The type of this PDU.
    pub fn pdu_type(&self) -> PduType {
        match self {
            Pdu::LanHello(h) => PduType::LanHello(h.level),
            Pdu::P2pHello(_) => PduType::P2pHello,
            Pdu::Lsp(l) => PduType::Lsp(l.level),
            Pdu::Csnp(c) => PduType::Csnp(c.level),
            Pdu::Psnp(p) => PduType::Psnp(p.level),
        }
    }

    /// Encode this PDU.
    pub fn encode(&self) -> BytesMut {
        let pdu_type = self.pdu_type();
        let max_area_addresses = match self {
            Pdu::LanHello(h) => h.max_area_addresses,
            Pdu::P2pHello(h) => h.max_area_addresses,
            _ => 0,
        };

        let mut dst = BytesMut::with_capacity(ORIGINATING_BUFFER_SIZE);
        Header {
            length_indicator: pdu_type.header_size() as u8,
            pdu_type,
            max_area_addresses,
        }
        .write_bytes(&mut dst);

        match self {
            Pdu::LanHello(h) => h.write_bytes(&mut dst),
            Pdu::P2pHello(h) => h.write_bytes(&mut dst),
            Pdu::Lsp(l) => l.write_bytes(&mut dst),
            Pdu::Csnp(c) => c.write_bytes(&mut dst),
            Pdu::Psnp(p) => p.write_bytes(&mut dst),
        }

        let offset = pdu_type.length_offset();
        let len = dst.len() as u16;
        dst[offset..offset + 2].copy_from_slice(&len.to_be_bytes());

        if let Pdu::Lsp(l) = self {
            l.finish(&mut dst);
        }

        dst
    }
}

impl From<LanHello> for Pdu {
    fn from(value: LanHello) -> Self {
        Pdu::LanHello(value)
    }
}

impl From<P2pHello> for Pdu {
    fn from(value: P2pHello) -> Self {
        Pdu::P2pHello(value)
    }
}

impl From<Lsp> for Pdu {
    fn from(value: Lsp) -> Self {
        Pdu::Lsp(value)
    }
}

impl From<Csnp> for Pdu {
    fn from(value: Csnp) -> Self {
        Pdu::Csnp(value)
    }
}

impl From<Psnp> for Pdu {
    fn from(value: Psnp) -> Self {
        Pdu::Psnp(value)
    }
}

/// A codec which can send and receive whole PDUs on a byte stream.
///
/// PDUs which are framed correctly but fail to decode are skipped. If the frame itself can't be
/// determined, because the PDU type is unknown or the length is bogus, the input is skipped up to
/// the next protocol discriminator.
#[derive(Debug, Clone, Default)]
pub struct Codec {}

impl Codec {
    /// Create a new `Codec`.
    pub fn new() -> Self {
        Self {}
    }
}

impl Decoder for Codec {
    type Item = Pdu;

    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.len() < HEADER_WIRE_SIZE {
                trace!("Insufficient bytes to read a common header");
                return Ok(None);
            }

            let Some(pdu_type) = PduType::from_wire(src[4]) else {
                trace!(pdu_type = src[4], "Skipping PDU of unknown type");
                resync(src);
                continue;
            };
            let offset = pdu_type.length_offset();
            if src.len() < offset + 2 {
                trace!("Insufficient bytes to read PDU length");
                return Ok(None);
            }

            let pdu_length = u16::from_be_bytes([src[offset], src[offset + 1]]) as usize;
            if pdu_length < pdu_type.header_size() {
                trace!(pdu_length, "Skipping PDU shorter than its header");
                resync(src);
                continue;
            }
            if src.len() < pdu_length {
                trace!(pdu_length, "Insufficient bytes to read PDU");
                src.reserve(pdu_length - src.len());
                return Ok(None);
            }

            let frame = src.split_to(pdu_length);
            match decode(&frame) {
                Ok(pdu) => return Ok(Some(pdu)),
                Err(err) => {
                    trace!(%err, "Skipping PDU which can't be decoded");
                    continue;
                }
            }
        }
    }
}

/// Drop the first byte of `src`, and everything up to the next protocol discriminator.
fn resync(src: &mut BytesMut) {
    let skip = src[1..]
        .iter()
        .position(|b| *b == DISCRIMINATOR)
        .map_or(src.len(), |pos| pos + 1);
    src.advance(skip);
}

impl Encoder<Pdu> for Codec {
    type Error = DecodeError;

    fn encode(&mut self, item: Pdu, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item.encode());
        Ok(())
    }
}
