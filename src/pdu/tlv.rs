//! Type-length-value records carried in the variable part of every PDU.
//!
//! Known TLVs are decoded into structured values. Anything else, including known TLVs whose value
//! can't be parsed, is kept as a [`RawTlv`] so it can be relayed unchanged.

use core::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ipnet::Ipv4Net;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use tracing::{trace, warn};

use crate::{
    metric::{Metric, MAX_LINK_METRIC},
    sequence_number::SeqNo,
    system_id::{LanId, LspId, ParseIdError, SystemId},
};

/// TLV type for [`Tlv::AreaAddresses`].
pub const TLV_TYPE_AREA_ADDRESSES: u8 = 1;
/// TLV type for [`Tlv::IsNeighbors`].
pub const TLV_TYPE_IS_NEIGHBORS: u8 = 6;
/// TLV type for [`Tlv::LspEntries`].
pub const TLV_TYPE_LSP_ENTRIES: u8 = 9;
/// TLV type for [`Tlv::Authentication`].
pub const TLV_TYPE_AUTHENTICATION: u8 = 10;
/// TLV type for [`Tlv::ExtIsReach`].
pub const TLV_TYPE_EXT_IS_REACH: u8 = 22;
/// TLV type for [`Tlv::ProtocolsSupported`].
pub const TLV_TYPE_PROTOCOLS_SUPPORTED: u8 = 129;
/// TLV type for [`Tlv::Ipv4InterfaceAddresses`].
pub const TLV_TYPE_IPV4_INTERFACE_ADDRESSES: u8 = 132;
/// TLV type for [`Tlv::ExtIpReach`].
pub const TLV_TYPE_EXT_IP_REACH: u8 = 135;
/// TLV type for [`Tlv::Hostname`].
pub const TLV_TYPE_HOSTNAME: u8 = 137;
/// TLV type for [`Tlv::ThreeWayAdjacency`].
pub const TLV_TYPE_THREE_WAY_ADJACENCY: u8 = 240;

/// Maximum length of a TLV value, the length field is a single byte.
pub const MAX_TLV_VALUE_SIZE: usize = 255;

/// Authentication type for cleartext passwords.
const AUTH_TYPE_CLEARTEXT: u8 = 1;

/// Network layer protocol identifier for IPv4, used in [`Tlv::ProtocolsSupported`].
pub const NLPID_IPV4: u8 = 0xCC;

/// Size of an [`LspEntry`] on the wire.
const LSP_ENTRY_WIRE_SIZE: usize = 16;
/// Size of an [`IsReach`] without sub TLVs on the wire.
const IS_REACH_BASE_WIRE_SIZE: usize = LanId::BYTE_SIZE + 3 + 1;
/// Size of the fixed part of an [`IpReach`] on the wire.
const IP_REACH_BASE_WIRE_SIZE: usize = 4 + 1;

/// Control byte bit indicating a prefix was redistributed down from level 2.
const IP_REACH_UP_DOWN: u8 = 0x80;
/// Control byte bit indicating sub TLVs follow the prefix.
const IP_REACH_SUB_TLVS: u8 = 0x40;
/// Control byte mask for the prefix length.
const IP_REACH_PREFIX_LEN_MASK: u8 = 0x3F;

/// A single TLV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tlv {
    AreaAddresses(Vec<AreaAddress>),
    /// The system ids of neighbors heard on a broadcast circuit.
    IsNeighbors(Vec<SystemId>),
    LspEntries(Vec<LspEntry>),
    Authentication(Authentication),
    ExtIsReach(Vec<IsReach>),
    ProtocolsSupported(Vec<u8>),
    Ipv4InterfaceAddresses(Vec<Ipv4Addr>),
    ExtIpReach(Vec<IpReach>),
    Hostname(String),
    ThreeWayAdjacency(ThreeWayAdjacency),
    Unknown(RawTlv),
}

/// An area address, between 1 and 13 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AreaAddress(Vec<u8>);

/// A TLV we don't interpret, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTlv {
    tlv_type: u8,
    value: Bytes,
}

/// Summary of an LSP as carried in sequence number PDUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LspEntry {
    pub remaining_lifetime: u16,
    pub lsp_id: LspId,
    pub seqno: SeqNo,
    pub checksum: u16,
}

/// Authentication information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    Cleartext(Bytes),
    Other { auth_type: u8, value: Bytes },
}

/// An adjacency to a router or pseudonode, with its wide metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsReach {
    neighbor: LanId,
    /// Never above [`MAX_LINK_METRIC`].
    metric: Metric,
    /// Sub TLVs, not interpreted.
    sub_tlvs: Bytes,
}

/// A reachable IPv4 prefix, with its wide metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpReach {
    prefix: Ipv4Net,
    metric: Metric,
    up_down: bool,
    sub_tlvs: Option<Bytes>,
}

/// State of the point-to-point three-way handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreeWayState {
    Up,
    Initializing,
    Down,
}

/// Point-to-point three-way adjacency TLV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreeWayAdjacency {
    pub state: ThreeWayState,
    /// Our extended circuit id, absent in the short form which only carries the state.
    pub local_circuit_id: Option<u32>,
    /// The neighbor's system id and extended circuit id, once known.
    pub neighbor: Option<(SystemId, u32)>,
}

impl Tlv {
    /// The TLV type code of this TLV.
    pub fn tlv_type(&self) -> u8 {
        match self {
            Tlv::AreaAddresses(_) => TLV_TYPE_AREA_ADDRESSES,
            Tlv::IsNeighbors(_) => TLV_TYPE_IS_NEIGHBORS,
            Tlv::LspEntries(_) => TLV_TYPE_LSP_ENTRIES,
            Tlv::Authentication(_) => TLV_TYPE_AUTHENTICATION,
            Tlv::ExtIsReach(_) => TLV_TYPE_EXT_IS_REACH,
            Tlv::ProtocolsSupported(_) => TLV_TYPE_PROTOCOLS_SUPPORTED,
            Tlv::Ipv4InterfaceAddresses(_) => TLV_TYPE_IPV4_INTERFACE_ADDRESSES,
            Tlv::ExtIpReach(_) => TLV_TYPE_EXT_IP_REACH,
            Tlv::Hostname(_) => TLV_TYPE_HOSTNAME,
            Tlv::ThreeWayAdjacency(_) => TLV_TYPE_THREE_WAY_ADJACENCY,
            Tlv::Unknown(raw) => raw.tlv_type,
        }
    }

    /// Size of this TLV on the wire, including the type and length bytes of every TLV it is
    /// split into.
    pub fn wire_size(&self) -> usize {
        let mut buf = BytesMut::new();
        self.write_bytes(&mut buf);
        buf.len()
    }

    /// Parse a TLV from its type and value. This never fails, values which can't be parsed are
    /// preserved as [`Tlv::Unknown`].
    pub fn from_value(tlv_type: u8, value: Bytes) -> Tlv {
        let parsed = match tlv_type {
            TLV_TYPE_AREA_ADDRESSES => parse_area_addresses(value.clone()),
            TLV_TYPE_IS_NEIGHBORS => {
                parse_fixed(value.clone(), SystemId::BYTE_SIZE, |b| SystemId::from_bytes(b))
                    .map(Tlv::IsNeighbors)
            }
            TLV_TYPE_LSP_ENTRIES => {
                parse_fixed(value.clone(), LSP_ENTRY_WIRE_SIZE, LspEntry::from_bytes)
                    .map(Tlv::LspEntries)
            }
            TLV_TYPE_AUTHENTICATION => Authentication::from_value(value.clone()),
            TLV_TYPE_EXT_IS_REACH => parse_is_reach(value.clone()),
            TLV_TYPE_PROTOCOLS_SUPPORTED => Some(Tlv::ProtocolsSupported(value.to_vec())),
            TLV_TYPE_IPV4_INTERFACE_ADDRESSES => {
                parse_fixed(value.clone(), 4, |b| Ipv4Addr::from(b.get_u32()))
                    .map(Tlv::Ipv4InterfaceAddresses)
            }
            TLV_TYPE_EXT_IP_REACH => parse_ip_reach(value.clone()),
            TLV_TYPE_HOSTNAME => String::from_utf8(value.to_vec()).ok().map(Tlv::Hostname),
            TLV_TYPE_THREE_WAY_ADJACENCY => ThreeWayAdjacency::from_value(value.clone()),
            _ => None,
        };

        parsed.unwrap_or_else(|| {
            trace!(tlv_type, len = value.len(), "Keeping uninterpreted TLV");
            Tlv::Unknown(RawTlv { tlv_type, value })
        })
    }

    /// Write this TLV to the buffer. List TLVs whose value would exceed
    /// [`MAX_TLV_VALUE_SIZE`] are split into multiple TLVs of the same type.
    pub fn write_bytes(&self, dst: &mut BytesMut) {
        let tlv_type = self.tlv_type();
        match self {
            Tlv::AreaAddresses(areas) => write_list(dst, tlv_type, areas, |a, b| {
                b.put_u8(a.0.len() as u8);
                b.put_slice(&a.0);
            }),
            Tlv::IsNeighbors(neighbors) => {
                write_list(dst, tlv_type, neighbors, |n, b| n.write_bytes(b))
            }
            Tlv::LspEntries(entries) => write_list(dst, tlv_type, entries, |e, b| e.write_bytes(b)),
            Tlv::Authentication(auth) => {
                let (auth_type, value) = match auth {
                    Authentication::Cleartext(value) => (AUTH_TYPE_CLEARTEXT, value),
                    Authentication::Other { auth_type, value } => (*auth_type, value),
                };
                let value = &value[..value.len().min(MAX_TLV_VALUE_SIZE - 1)];
                dst.put_u8(tlv_type);
                dst.put_u8(value.len() as u8 + 1);
                dst.put_u8(auth_type);
                dst.put_slice(value);
            }
            Tlv::ExtIsReach(reach) => write_list(dst, tlv_type, reach, |r, b| r.write_bytes(b)),
            Tlv::ProtocolsSupported(nlpids) => {
                write_list(dst, tlv_type, nlpids, |n, b| b.put_u8(*n))
            }
            Tlv::Ipv4InterfaceAddresses(addrs) => {
                write_list(dst, tlv_type, addrs, |a, b| b.put_slice(&a.octets()))
            }
            Tlv::ExtIpReach(reach) => write_list(dst, tlv_type, reach, |r, b| r.write_bytes(b)),
            Tlv::Hostname(name) => {
                let mut end = name.len().min(MAX_TLV_VALUE_SIZE);
                while !name.is_char_boundary(end) {
                    end -= 1;
                }
                dst.put_u8(tlv_type);
                dst.put_u8(end as u8);
                dst.put_slice(&name.as_bytes()[..end]);
            }
            Tlv::ThreeWayAdjacency(tw) => {
                dst.put_u8(tlv_type);
                tw.write_value(dst);
            }
            Tlv::Unknown(raw) => {
                dst.put_u8(raw.tlv_type);
                dst.put_u8(raw.value.len() as u8);
                dst.put_slice(&raw.value);
            }
        }
    }
}

/// Parse a sequence of TLVs which takes up the whole buffer.
pub(crate) fn decode_tlvs(mut src: Bytes) -> Result<Vec<Tlv>, super::DecodeError> {
    let mut tlvs = Vec::new();
    while src.has_remaining() {
        if src.remaining() < 2 {
            return Err(super::DecodeError::MalformedPdu("truncated TLV header"));
        }
        let tlv_type = src.get_u8();
        let len = src.get_u8() as usize;
        if src.remaining() < len {
            return Err(super::DecodeError::MalformedPdu(
                "TLV length overruns the PDU",
            ));
        }
        tlvs.push(Tlv::from_value(tlv_type, src.split_to(len)));
    }
    Ok(tlvs)
}

/// Write a sequence of TLVs.
pub(crate) fn encode_tlvs(tlvs: &[Tlv], dst: &mut BytesMut) {
    for tlv in tlvs {
        tlv.write_bytes(dst);
    }
}

/// Write items as one or more TLVs of the given type, starting a new TLV whenever the next item
/// would not fit. An empty list is written as a single empty TLV.
fn write_list<T>(dst: &mut BytesMut, tlv_type: u8, items: &[T], write: impl Fn(&T, &mut BytesMut)) {
    let mut value = BytesMut::new();
    let mut item = BytesMut::new();
    let mut written = false;
    for it in items {
        item.clear();
        write(it, &mut item);
        if item.len() > MAX_TLV_VALUE_SIZE {
            warn!(tlv_type, size = item.len(), "Dropping TLV entry which can't be encoded");
            continue;
        }
        if value.len() + item.len() > MAX_TLV_VALUE_SIZE {
            dst.put_u8(tlv_type);
            dst.put_u8(value.len() as u8);
            dst.put_slice(&value);
            value.clear();
            written = true;
        }
        value.put_slice(&item);
    }
    if !value.is_empty() || !written {
        dst.put_u8(tlv_type);
        dst.put_u8(value.len() as u8);
        dst.put_slice(&value);
    }
}

/// Parse a value consisting of fixed size items.
fn parse_fixed<T>(mut value: Bytes, size: usize, read: impl Fn(&mut Bytes) -> T) -> Option<Vec<T>> {
    if value.len() % size != 0 {
        return None;
    }
    let mut items = Vec::with_capacity(value.len() / size);
    while value.has_remaining() {
        items.push(read(&mut value));
    }
    Some(items)
}

fn parse_area_addresses(mut value: Bytes) -> Option<Tlv> {
    let mut areas = Vec::new();
    while value.has_remaining() {
        let len = value.get_u8() as usize;
        if len == 0 || value.remaining() < len {
            return None;
        }
        areas.push(AreaAddress(value.split_to(len).to_vec()));
    }
    Some(Tlv::AreaAddresses(areas))
}

fn parse_is_reach(mut value: Bytes) -> Option<Tlv> {
    let mut reach = Vec::new();
    while value.has_remaining() {
        if value.remaining() < IS_REACH_BASE_WIRE_SIZE {
            return None;
        }
        let neighbor = LanId::from_bytes(&mut value);
        let metric = Metric::new(read_u24(&mut value));
        let sub_len = value.get_u8() as usize;
        if value.remaining() < sub_len {
            return None;
        }
        reach.push(IsReach {
            neighbor,
            metric,
            sub_tlvs: value.split_to(sub_len),
        });
    }
    Some(Tlv::ExtIsReach(reach))
}

fn parse_ip_reach(mut value: Bytes) -> Option<Tlv> {
    let mut reach = Vec::new();
    while value.has_remaining() {
        if value.remaining() < IP_REACH_BASE_WIRE_SIZE {
            return None;
        }
        let metric = Metric::new(value.get_u32());
        let control = value.get_u8();
        let prefix_len = control & IP_REACH_PREFIX_LEN_MASK;
        if prefix_len > 32 {
            return None;
        }
        let prefix_bytes = (prefix_len as usize).div_ceil(8);
        if value.remaining() < prefix_bytes {
            return None;
        }
        let mut octets = [0; 4];
        value.copy_to_slice(&mut octets[..prefix_bytes]);
        let sub_tlvs = if control & IP_REACH_SUB_TLVS != 0 {
            if !value.has_remaining() {
                return None;
            }
            let sub_len = value.get_u8() as usize;
            if value.remaining() < sub_len {
                return None;
            }
            Some(value.split_to(sub_len))
        } else {
            None
        };
        let prefix = Ipv4Net::new(Ipv4Addr::from(octets), prefix_len).ok()?;
        reach.push(IpReach {
            prefix: prefix.trunc(),
            metric,
            up_down: control & IP_REACH_UP_DOWN != 0,
            sub_tlvs,
        });
    }
    Some(Tlv::ExtIpReach(reach))
}

fn read_u24(src: &mut impl Buf) -> u32 {
    let mut bytes = [0; 4];
    src.copy_to_slice(&mut bytes[1..]);
    u32::from_be_bytes(bytes)
}

fn write_u24(dst: &mut impl BufMut, value: u32) {
    debug_assert!(value <= MAX_LINK_METRIC, "{value} doesn't fit in 24 bits");
    dst.put_slice(&value.to_be_bytes()[1..]);
}

impl AreaAddress {
    /// Maximum length of an area address.
    pub const MAX_LEN: usize = 13;

    /// Create a new `AreaAddress`. Returns `None` if the address is empty or too long.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Option<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() || bytes.len() > Self::MAX_LEN {
            None
        } else {
            Some(Self(bytes))
        }
    }

    /// View the raw bytes of this `AreaAddress`.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for AreaAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (first, rest) = self.0.split_at(1);
        f.write_str(&faster_hex::hex_string(first))?;
        for chunk in rest.chunks(2) {
            f.write_fmt(format_args!(".{}", faster_hex::hex_string(chunk)))?;
        }
        Ok(())
    }
}

impl FromStr for AreaAddress {
    type Err = ParseIdError;

    /// Parses the dotted form `49.0001`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseIdError::new(s);
        let digits = s.replace('.', "");
        if digits.len() % 2 != 0 {
            return Err(err());
        }
        let mut bytes = vec![0; digits.len() / 2];
        faster_hex::hex_decode(digits.as_bytes(), &mut bytes).map_err(|_| err())?;
        AreaAddress::new(bytes).ok_or_else(err)
    }
}

impl Serialize for AreaAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AreaAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

impl RawTlv {
    /// Create a new `RawTlv`. Returns `None` if the value does not fit in a single TLV.
    pub fn new(tlv_type: u8, value: Bytes) -> Option<Self> {
        if value.len() > MAX_TLV_VALUE_SIZE {
            None
        } else {
            Some(Self { tlv_type, value })
        }
    }

    /// The TLV type code.
    pub fn tlv_type(&self) -> u8 {
        self.tlv_type
    }

    /// The uninterpreted value.
    pub fn value(&self) -> &Bytes {
        &self.value
    }
}

impl LspEntry {
    fn from_bytes(src: &mut Bytes) -> Self {
        Self {
            remaining_lifetime: src.get_u16(),
            lsp_id: LspId::from_bytes(src),
            seqno: SeqNo::new(src.get_u32()),
            checksum: src.get_u16(),
        }
    }

    fn write_bytes(&self, dst: &mut impl BufMut) {
        dst.put_u16(self.remaining_lifetime);
        self.lsp_id.write_bytes(dst);
        dst.put_u32(self.seqno.into());
        dst.put_u16(self.checksum);
    }
}

impl Authentication {
    /// Create cleartext authentication with the given password.
    pub fn cleartext(password: &str) -> Self {
        Authentication::Cleartext(Bytes::copy_from_slice(password.as_bytes()))
    }

    /// Checks if this authenticates with the given cleartext password.
    pub fn matches(&self, password: &str) -> bool {
        match self {
            Authentication::Cleartext(value) => value.as_ref() == password.as_bytes(),
            Authentication::Other { .. } => false,
        }
    }

    fn from_value(mut value: Bytes) -> Option<Tlv> {
        if !value.has_remaining() {
            return None;
        }
        let auth = match value.get_u8() {
            AUTH_TYPE_CLEARTEXT => Authentication::Cleartext(value),
            auth_type => Authentication::Other { auth_type, value },
        };
        Some(Tlv::Authentication(auth))
    }
}

impl IsReach {
    /// Create a new `IsReach` without sub TLVs. Metrics which don't fit in 24 bits are capped at
    /// [`MAX_LINK_METRIC`].
    pub fn new(neighbor: LanId, metric: Metric) -> Self {
        Self {
            neighbor,
            metric: Metric::new(metric.value().min(MAX_LINK_METRIC)),
            sub_tlvs: Bytes::new(),
        }
    }

    /// The router or pseudonode this adjacency leads to.
    pub fn neighbor(&self) -> LanId {
        self.neighbor
    }

    /// The metric of the adjacency.
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// The raw sub TLVs.
    pub fn sub_tlvs(&self) -> &Bytes {
        &self.sub_tlvs
    }

    fn write_bytes(&self, dst: &mut impl BufMut) {
        self.neighbor.write_bytes(dst);
        write_u24(dst, self.metric.value());
        dst.put_u8(self.sub_tlvs.len() as u8);
        dst.put_slice(&self.sub_tlvs);
    }
}

impl IpReach {
    /// Create a new `IpReach`. Host bits of the prefix are cleared.
    pub fn new(prefix: Ipv4Net, metric: Metric) -> Self {
        Self {
            prefix: prefix.trunc(),
            metric,
            up_down: false,
            sub_tlvs: None,
        }
    }

    /// The advertised prefix.
    pub fn prefix(&self) -> Ipv4Net {
        self.prefix
    }

    /// The metric of the prefix.
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Checks if this prefix was leaked down from level 2.
    pub fn up_down(&self) -> bool {
        self.up_down
    }

    fn write_bytes(&self, dst: &mut impl BufMut) {
        let prefix_len = self.prefix.prefix_len();
        let mut control = prefix_len & IP_REACH_PREFIX_LEN_MASK;
        if self.up_down {
            control |= IP_REACH_UP_DOWN;
        }
        if self.sub_tlvs.is_some() {
            control |= IP_REACH_SUB_TLVS;
        }
        dst.put_u32(self.metric.value());
        dst.put_u8(control);
        dst.put_slice(&self.prefix.addr().octets()[..(prefix_len as usize).div_ceil(8)]);
        if let Some(sub_tlvs) = &self.sub_tlvs {
            dst.put_u8(sub_tlvs.len() as u8);
            dst.put_slice(sub_tlvs);
        }
    }
}

impl ThreeWayState {
    fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(ThreeWayState::Up),
            1 => Some(ThreeWayState::Initializing),
            2 => Some(ThreeWayState::Down),
            _ => None,
        }
    }

    fn to_wire(self) -> u8 {
        match self {
            ThreeWayState::Up => 0,
            ThreeWayState::Initializing => 1,
            ThreeWayState::Down => 2,
        }
    }
}

impl ThreeWayAdjacency {
    fn from_value(mut value: Bytes) -> Option<Tlv> {
        let (with_circuit_id, with_neighbor) = match value.len() {
            1 => (false, false),
            5 => (true, false),
            15 => (true, true),
            _ => return None,
        };
        let state = ThreeWayState::from_wire(value.get_u8())?;
        let local_circuit_id = with_circuit_id.then(|| value.get_u32());
        let neighbor = with_neighbor.then(|| {
            let id = SystemId::from_bytes(&mut value);
            (id, value.get_u32())
        });
        Some(Tlv::ThreeWayAdjacency(ThreeWayAdjacency {
            state,
            local_circuit_id,
            neighbor,
        }))
    }

    fn write_value(&self, dst: &mut impl BufMut) {
        let len = match (self.local_circuit_id, self.neighbor) {
            (_, Some(_)) => 15,
            (Some(_), None) => 5,
            (None, None) => 1,
        };
        dst.put_u8(len);
        dst.put_u8(self.state.to_wire());
        if len > 1 {
            dst.put_u32(self.local_circuit_id.unwrap_or_default());
        }
        if let Some((id, circuit_id)) = self.neighbor {
            id.write_bytes(dst);
            dst.put_u32(circuit_id);
        }
    }
}

/// Accessors for the TLVs of a PDU.
pub trait TlvsExt {
    /// All area addresses, across every area addresses TLV.
    fn area_addresses(&self) -> Vec<&AreaAddress>;
    /// All IS neighbors, across every IS neighbors TLV.
    fn is_neighbors(&self) -> Vec<SystemId>;
    /// All LSP entries.
    fn lsp_entries(&self) -> Vec<LspEntry>;
    /// The first authentication TLV.
    fn authentication(&self) -> Option<&Authentication>;
    /// All extended IS reachability entries.
    fn is_reach(&self) -> Vec<&IsReach>;
    /// All extended IP reachability entries.
    fn ip_reach(&self) -> Vec<&IpReach>;
    /// The three-way adjacency TLV.
    fn three_way(&self) -> Option<&ThreeWayAdjacency>;
    /// The dynamic hostname.
    fn hostname(&self) -> Option<&str>;
}

impl TlvsExt for [Tlv] {
    fn area_addresses(&self) -> Vec<&AreaAddress> {
        self.iter()
            .filter_map(|t| match t {
                Tlv::AreaAddresses(a) => Some(a),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn is_neighbors(&self) -> Vec<SystemId> {
        self.iter()
            .filter_map(|t| match t {
                Tlv::IsNeighbors(n) => Some(n),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    fn lsp_entries(&self) -> Vec<LspEntry> {
        self.iter()
            .filter_map(|t| match t {
                Tlv::LspEntries(e) => Some(e),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    fn authentication(&self) -> Option<&Authentication> {
        self.iter().find_map(|t| match t {
            Tlv::Authentication(a) => Some(a),
            _ => None,
        })
    }

    fn is_reach(&self) -> Vec<&IsReach> {
        self.iter()
            .filter_map(|t| match t {
                Tlv::ExtIsReach(r) => Some(r),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn ip_reach(&self) -> Vec<&IpReach> {
        self.iter()
            .filter_map(|t| match t {
                Tlv::ExtIpReach(r) => Some(r),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn three_way(&self) -> Option<&ThreeWayAdjacency> {
        self.iter().find_map(|t| match t {
            Tlv::ThreeWayAdjacency(tw) => Some(tw),
            _ => None,
        })
    }

    fn hostname(&self) -> Option<&str> {
        self.iter().find_map(|t| match t {
            Tlv::Hostname(h) => Some(h.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};
    use ipnet::Ipv4Net;

    use super::{
        decode_tlvs, encode_tlvs, AreaAddress, Authentication, IpReach, IsReach, RawTlv,
        ThreeWayAdjacency, ThreeWayState, Tlv, TlvsExt,
    };
    use crate::{
        metric::{Metric, MAX_LINK_METRIC},
        system_id::{LanId, SystemId},
    };

    fn roundtrip(tlvs: Vec<Tlv>) -> Vec<Tlv> {
        let mut buf = BytesMut::new();
        encode_tlvs(&tlvs, &mut buf);
        decode_tlvs(buf.freeze()).expect("Encoded TLVs can be decoded; qed")
    }

    #[test]
    fn encode_ext_is_reach() {
        let tlv = Tlv::ExtIsReach(vec![IsReach::new(
            LanId::new(SystemId::new([1, 2, 3, 4, 5, 6]), 7),
            Metric::new(0x0a0b0c),
        )]);
        let mut buf = BytesMut::new();
        tlv.write_bytes(&mut buf);

        assert_eq!(
            &buf[..],
            &[22, 11, 1, 2, 3, 4, 5, 6, 7, 0x0a, 0x0b, 0x0c, 0][..]
        );
    }

    #[test]
    fn is_reach_metric_is_capped_to_24_bits() {
        let neighbor = LanId::router(SystemId::new([0, 0, 0, 0, 0, 2]));
        let reach = IsReach::new(neighbor, Metric::new(u32::MAX));
        assert_eq!(reach.metric(), Metric::new(MAX_LINK_METRIC));

        let tlv = Tlv::ExtIsReach(vec![reach]);
        assert_eq!(roundtrip(vec![tlv.clone()]), vec![tlv]);
    }

    #[test]
    fn encode_ext_ip_reach_writes_only_prefix_bytes() {
        let prefix: Ipv4Net = "10.20.30.0/23".parse().expect("Valid prefix; qed");
        let tlv = Tlv::ExtIpReach(vec![IpReach::new(prefix, Metric::new(10))]);
        let mut buf = BytesMut::new();
        tlv.write_bytes(&mut buf);

        assert_eq!(&buf[..], &[135, 8, 0, 0, 0, 10, 23, 10, 20, 30][..]);
    }

    #[test]
    fn ip_reach_clears_host_bits() {
        let prefix: Ipv4Net = "192.168.1.77/24".parse().expect("Valid prefix; qed");
        let reach = IpReach::new(prefix, Metric::new(1));
        assert_eq!(reach.prefix().to_string(), "192.168.1.0/24");
    }

    #[test]
    fn unknown_tlv_is_preserved() {
        let raw = Tlv::Unknown(
            RawTlv::new(250, Bytes::from_static(&[1, 2, 3, 4])).expect("Small value fits; qed"),
        );
        assert_eq!(roundtrip(vec![raw.clone()]), vec![raw]);
    }

    #[test]
    fn three_way_state_only() {
        let tlvs = decode_tlvs(Bytes::from_static(&[240, 1, 1])).expect("Lengths are fine");
        let expected = Tlv::ThreeWayAdjacency(ThreeWayAdjacency {
            state: ThreeWayState::Initializing,
            local_circuit_id: None,
            neighbor: None,
        });
        assert_eq!(tlvs, vec![expected.clone()]);

        let mut buf = BytesMut::new();
        expected.write_bytes(&mut buf);
        assert_eq!(&buf[..], &[240, 1, 1][..]);

        // Neither 1, 5 nor 15 bytes.
        let tlvs = decode_tlvs(Bytes::from_static(&[240, 2, 1, 0])).expect("Lengths are fine");
        assert!(matches!(tlvs[0], Tlv::Unknown(_)));
    }

    #[test]
    fn unparsable_known_tlv_is_kept_raw() {
        // IS neighbors must be a multiple of 6 bytes.
        let tlvs = decode_tlvs(Bytes::from_static(&[6, 4, 1, 2, 3, 4])).expect("Lengths are fine");
        assert_eq!(
            tlvs,
            vec![Tlv::Unknown(
                RawTlv::new(6, Bytes::from_static(&[1, 2, 3, 4])).expect("Small value fits; qed")
            )]
        );
    }

    #[test]
    fn long_lists_are_split() {
        let neighbors = (0..60u8)
            .map(|i| SystemId::new([0, 0, 0, 0, 0, i]))
            .collect::<Vec<_>>();
        let tlvs = roundtrip(vec![Tlv::IsNeighbors(neighbors.clone())]);

        // 42 neighbors fit in 252 bytes.
        assert_eq!(tlvs.len(), 2);
        assert_eq!(tlvs.is_neighbors(), neighbors);
    }

    #[test]
    fn overrun_is_malformed() {
        assert!(decode_tlvs(Bytes::from_static(&[1, 5, 1, 2])).is_err());
        assert!(decode_tlvs(Bytes::from_static(&[1])).is_err());
    }

    #[test]
    fn accessors() {
        let area: AreaAddress = "49.0001".parse().expect("Valid area; qed");
        let tlvs = roundtrip(vec![
            Tlv::AreaAddresses(vec![area.clone()]),
            Tlv::Authentication(Authentication::cleartext("secret")),
            Tlv::Hostname("core-1".into()),
        ]);

        assert_eq!(tlvs.area_addresses(), vec![&area]);
        assert!(tlvs
            .authentication()
            .expect("Authentication is present; qed")
            .matches("secret"));
        assert_eq!(tlvs.hostname(), Some("core-1"));
        assert!(tlvs.three_way().is_none());
    }

    #[test]
    fn area_address_text_form() {
        let area: AreaAddress = "49.0001".parse().expect("Valid area; qed");
        assert_eq!(area.as_bytes(), &[0x49, 0x00, 0x01]);
        assert_eq!(area.to_string(), "49.0001");
        assert!("".parse::<AreaAddress>().is_err());
        assert!("49.001".parse::<AreaAddress>().is_err());
    }
}
