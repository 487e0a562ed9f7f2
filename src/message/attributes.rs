use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fmt;
use std::io::{Cursor, Error, ErrorKind, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::family::{Family, AFI};
use super::nlri::{Action, Nlri};
use super::open::Negotiated;
use super::MessageError;

/// Attribute flag bits (RFC 4271 4.3)
pub mod flags {
    pub const OPTIONAL: u8 = 0x80;
    pub const TRANSITIVE: u8 = 0x40;
    pub const PARTIAL: u8 = 0x20;
    pub const EXTENDED_LENGTH: u8 = 0x10;
}

/// Path Attribute type codes
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
#[allow(non_camel_case_types)]
#[repr(u8)]
pub enum Identifier {
    ORIGIN = 1,
    AS_PATH = 2,
    NEXT_HOP = 3,
    MULTI_EXIT_DISC = 4,
    LOCAL_PREF = 5,
    ATOMIC_AGGREGATE = 6,
    AGGREGATOR = 7,
    COMMUNITY = 8,
    ORIGINATOR_ID = 9,
    CLUSTER_LIST = 10,
    MP_REACH_NLRI = 14,
    MP_UNREACH_NLRI = 15,
    EXTENDED_COMMUNITIES = 16,
    PMSI_TUNNEL = 22,
    AIGP = 26,
    LARGE_COMMUNITY = 32,
}

/// How an UPDATE message has been generated (RFC 4271)
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum Origin {
    IGP = 0,
    EGP = 1,
    INCOMPLETE = 2,
}

impl TryFrom<u8> for Origin {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Origin::IGP),
            1 => Ok(Origin::EGP),
            2 => Ok(Origin::INCOMPLETE),
            _ => Err(Error::new(
                ErrorKind::InvalidData,
                format!("Invalid ORIGIN value {}", value),
            )),
        }
    }
}

impl FromStr for Origin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "igp" => Ok(Origin::IGP),
            "egp" => Ok(Origin::EGP),
            "incomplete" => Ok(Origin::INCOMPLETE),
            _ => Err(Error::new(
                ErrorKind::InvalidInput,
                format!("Invalid ORIGIN '{}'", s),
            )),
        }
    }
}

/// AS_PATH segment (RFC 4271 4.3 b)
#[derive(Debug, Clone, Eq, PartialEq)]
#[allow(non_camel_case_types)]
pub enum Segment {
    AS_SEQUENCE(Vec<u32>),
    AS_SET(Vec<u32>),
}

/// The path through which an UPDATE message traveled
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ASPath {
    pub segments: Vec<Segment>,
}

impl ASPath {
    pub fn parse(stream: &mut impl Read, length: u16, asn4: bool) -> Result<ASPath, Error> {
        let asn_size = if asn4 { 4 } else { 2 };
        let mut segments: Vec<Segment> = Vec::with_capacity(1);
        let mut remaining = length as i64;
        while remaining > 0 {
            let segment_type = stream.read_u8()?;
            let count = stream.read_u8()?;
            let mut asns: Vec<u32> = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let asn = if asn4 {
                    stream.read_u32::<BigEndian>()?
                } else {
                    u32::from(stream.read_u16::<BigEndian>()?)
                };
                asns.push(asn);
            }
            segments.push(match segment_type {
                1 => Segment::AS_SET(asns),
                2 => Segment::AS_SEQUENCE(asns),
                t => {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        format!("Invalid AS_PATH segment type {}", t),
                    ))
                }
            });
            remaining -= 2 + i64::from(count) * asn_size;
        }
        if remaining != 0 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "AS_PATH length does not match segment contents",
            ));
        }
        Ok(ASPath { segments })
    }

    pub fn encode(&self, asn4: bool, buf: &mut impl Write) -> Result<(), Error> {
        for segment in &self.segments {
            let (segment_type, asns) = match segment {
                Segment::AS_SET(asns) => (1u8, asns),
                Segment::AS_SEQUENCE(asns) => (2u8, asns),
            };
            buf.write_u8(segment_type)?;
            buf.write_u8(asns.len() as u8)?;
            for asn in asns {
                if asn4 {
                    buf.write_u32::<BigEndian>(*asn)?;
                } else if *asn > u32::from(u16::MAX) {
                    // AS_TRANS: RFC 6793 4.2.3.9
                    buf.write_u16::<BigEndian>(23456)?;
                } else {
                    buf.write_u16::<BigEndian>(*asn as u16)?;
                }
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| match s {
            Segment::AS_SEQUENCE(asns) | Segment::AS_SET(asns) => asns.is_empty(),
        })
    }

    /// Prepend an ASN to the (first) sequence, creating one if needed
    pub fn prepended(&self, asn: u32) -> ASPath {
        let mut segments = self.segments.clone();
        match segments.first_mut() {
            Some(Segment::AS_SEQUENCE(seq)) => seq.insert(0, asn),
            _ => segments.insert(0, Segment::AS_SEQUENCE(vec![asn])),
        }
        ASPath { segments }
    }
}

impl fmt::Display for ASPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let display = self
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::AS_SEQUENCE(asns) => asns
                    .iter()
                    .map(|a| a.to_string())
                    .collect::<Vec<_>>()
                    .join(" "),
                Segment::AS_SET(asns) => format!(
                    "{{{}}}",
                    asns.iter()
                        .map(|a| a.to_string())
                        .collect::<Vec<_>>()
                        .join(",")
                ),
            })
            .collect::<Vec<_>>()
            .join(" ");
        write!(f, "{}", display)
    }
}

/// Multi-protocol reachability attribute (RFC 4760)
#[derive(Debug, Clone, PartialEq)]
pub struct MPReachNLRI {
    pub family: Family,
    /// Raw next-hop bytes; family-dependent length
    pub next_hop: Vec<u8>,
    pub announced: Vec<Nlri>,
}

impl MPReachNLRI {
    pub(crate) fn parse(
        stream: &mut impl Read,
        length: u16,
        negotiated: &Negotiated,
    ) -> Result<MPReachNLRI, Error> {
        let afi = AFI::try_from(stream.read_u16::<BigEndian>()?)?;
        let safi = super::family::SAFI::try_from(stream.read_u8()?)?;
        let family = Family::new(afi, safi);

        let next_hop_length = stream.read_u8()?;
        let mut next_hop = vec![0; usize::from(next_hop_length)];
        stream.read_exact(&mut next_hop)?;
        let _reserved = stream.read_u8()?;

        let size = length
            .checked_sub(u16::from(5 + next_hop_length))
            .ok_or_else(|| Error::new(ErrorKind::InvalidData, "MP_REACH_NLRI too short"))?;
        let mut buffer = vec![0; usize::from(size)];
        stream.read_exact(&mut buffer)?;
        let mut cursor = Cursor::new(&buffer[..]);
        let add_path = negotiated.addpath_receive(family);

        let mut announced: Vec<Nlri> = Vec::with_capacity(4);
        while (cursor.position() as usize) < buffer.len() {
            announced.push(Nlri::parse(family, Action::Announce, add_path, &mut cursor)?);
        }

        Ok(MPReachNLRI {
            family,
            next_hop,
            announced,
        })
    }

    pub(crate) fn encode(&self, buf: &mut impl Write) -> Result<(), Error> {
        buf.write_u16::<BigEndian>(self.family.afi as u16)?;
        buf.write_u8(self.family.safi as u8)?;
        buf.write_u8(self.next_hop.len() as u8)?;
        buf.write_all(&self.next_hop)?;
        buf.write_u8(0)?; // reserved
        for nlri in &self.announced {
            nlri.encode(buf)?;
        }
        Ok(())
    }
}

/// Multi-protocol withdrawal attribute (RFC 4760)
#[derive(Debug, Clone, PartialEq)]
pub struct MPUnreachNLRI {
    pub family: Family,
    pub withdrawn: Vec<Nlri>,
}

impl MPUnreachNLRI {
    pub(crate) fn parse(
        stream: &mut impl Read,
        length: u16,
        negotiated: &Negotiated,
    ) -> Result<MPUnreachNLRI, Error> {
        let afi = AFI::try_from(stream.read_u16::<BigEndian>()?)?;
        let safi = super::family::SAFI::try_from(stream.read_u8()?)?;
        let family = Family::new(afi, safi);

        let size = length
            .checked_sub(3)
            .ok_or_else(|| Error::new(ErrorKind::InvalidData, "MP_UNREACH_NLRI too short"))?;
        let mut buffer = vec![0; usize::from(size)];
        stream.read_exact(&mut buffer)?;
        let mut cursor = Cursor::new(&buffer[..]);
        let add_path = negotiated.addpath_receive(family);

        let mut withdrawn: Vec<Nlri> = Vec::with_capacity(4);
        while (cursor.position() as usize) < buffer.len() {
            withdrawn.push(Nlri::parse(family, Action::Withdraw, add_path, &mut cursor)?);
        }

        Ok(MPUnreachNLRI { family, withdrawn })
    }

    pub(crate) fn encode(&self, buf: &mut impl Write) -> Result<(), Error> {
        buf.write_u16::<BigEndian>(self.family.afi as u16)?;
        buf.write_u8(self.family.safi as u8)?;
        for nlri in &self.withdrawn {
            nlri.encode(buf)?;
        }
        Ok(())
    }
}

/// RFC 7606 disposition for a malformed attribute
#[derive(Debug)]
pub enum AttributeError {
    /// Close the session with a NOTIFICATION
    Fatal(MessageError),
    /// Keep the session; the NLRIs of this UPDATE become withdraws
    TreatAsWithdraw(u8, String),
    /// Drop the attribute, keep parsing
    Discard(u8, String),
}

impl AttributeError {
    fn classify(code: u8, err: Error) -> AttributeError {
        match code {
            // NLRI can no longer be trusted
            14 | 15 => AttributeError::Fatal(MessageError::update(1, &err.to_string())),
            6 | 7 | 26 => AttributeError::Discard(code, err.to_string()),
            _ => AttributeError::TreatAsWithdraw(code, err.to_string()),
        }
    }
}

/// Represents a path attribute describing metadata of a route
#[derive(Debug, Clone, PartialEq)]
#[allow(non_camel_case_types)]
pub enum PathAttribute {
    ORIGIN(Origin),
    AS_PATH(ASPath),
    NEXT_HOP(IpAddr),
    MULTI_EXIT_DISC(u32),
    LOCAL_PREF(u32),
    ATOMIC_AGGREGATE,
    AGGREGATOR((u32, Ipv4Addr)),
    COMMUNITY(Vec<u32>),
    ORIGINATOR_ID(u32),
    CLUSTER_LIST(Vec<u32>),
    MP_REACH_NLRI(MPReachNLRI),
    MP_UNREACH_NLRI(MPUnreachNLRI),
    EXTENDED_COMMUNITIES(Vec<u64>),
    /// (Flags, Tunnel Type + MPLS Label, Tunnel Identifier) - RFC 6514
    PMSI_TUNNEL((u8, u32, Vec<u8>)),
    /// Accumulated IGP metric (TLV type 1) - RFC 7311
    AIGP(u64),
    LARGE_COMMUNITY(Vec<(u32, u32, u32)>),
    /// Unknown optional attribute kept as opaque bytes
    UNKNOWN {
        flags: u8,
        code: u8,
        value: Vec<u8>,
    },
}

impl PathAttribute {
    pub fn code(&self) -> u8 {
        use PathAttribute::*;
        match self {
            ORIGIN(_) => 1,
            AS_PATH(_) => 2,
            NEXT_HOP(_) => 3,
            MULTI_EXIT_DISC(_) => 4,
            LOCAL_PREF(_) => 5,
            ATOMIC_AGGREGATE => 6,
            AGGREGATOR(_) => 7,
            COMMUNITY(_) => 8,
            ORIGINATOR_ID(_) => 9,
            CLUSTER_LIST(_) => 10,
            MP_REACH_NLRI(_) => 14,
            MP_UNREACH_NLRI(_) => 15,
            EXTENDED_COMMUNITIES(_) => 16,
            PMSI_TUNNEL(_) => 22,
            AIGP(_) => 26,
            LARGE_COMMUNITY(_) => 32,
            UNKNOWN { code, .. } => *code,
        }
    }

    /// The default wire flags for a known attribute code
    fn default_flags(code: u8) -> u8 {
        use self::flags::*;
        match code {
            // Well-known mandatory / discretionary
            1 | 2 | 3 | 5 | 6 => TRANSITIVE,
            // Optional non-transitive
            4 | 9 | 10 | 14 | 15 | 26 => OPTIONAL,
            // Optional transitive
            7 | 8 | 16 | 22 | 32 => OPTIONAL | TRANSITIVE,
            _ => OPTIONAL | TRANSITIVE,
        }
    }

    pub fn parse(
        stream: &mut impl Read,
        negotiated: &Negotiated,
    ) -> Result<PathAttribute, AttributeError> {
        let fatal = |err: Error| AttributeError::Fatal(MessageError::from(err));

        let attr_flags = stream.read_u8().map_err(fatal)?;
        let code = stream.read_u8().map_err(fatal)?;
        let length: u16 = if attr_flags & flags::EXTENDED_LENGTH == 0 {
            u16::from(stream.read_u8().map_err(fatal)?)
        } else {
            stream.read_u16::<BigEndian>().map_err(fatal)?
        };

        let mut buffer = vec![0u8; length as usize];
        stream.read_exact(&mut buffer).map_err(fatal)?;
        let mut value = Cursor::new(&buffer[..]);

        Self::parse_value(attr_flags, code, length, &mut value, negotiated)
            .map_err(|err| AttributeError::classify(code, err))
    }

    fn parse_value(
        attr_flags: u8,
        code: u8,
        length: u16,
        stream: &mut Cursor<&[u8]>,
        negotiated: &Negotiated,
    ) -> Result<PathAttribute, Error> {
        let attribute = match code {
            1 => PathAttribute::ORIGIN(Origin::try_from(stream.read_u8()?)?),
            2 => PathAttribute::AS_PATH(ASPath::parse(stream, length, negotiated.asn4)?),
            3 => {
                let ip: IpAddr = match length {
                    4 => IpAddr::V4(Ipv4Addr::from(stream.read_u32::<BigEndian>()?)),
                    16 => IpAddr::V6(Ipv6Addr::from(stream.read_u128::<BigEndian>()?)),
                    n => {
                        return Err(Error::new(
                            ErrorKind::InvalidData,
                            format!("Bogus NEXT_HOP length {}", n),
                        ))
                    }
                };
                PathAttribute::NEXT_HOP(ip)
            }
            4 => PathAttribute::MULTI_EXIT_DISC(stream.read_u32::<BigEndian>()?),
            5 => PathAttribute::LOCAL_PREF(stream.read_u32::<BigEndian>()?),
            6 => {
                if length != 0 {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        "ATOMIC_AGGREGATE must be empty",
                    ));
                }
                PathAttribute::ATOMIC_AGGREGATE
            }
            7 => {
                let asn = if length == 6 {
                    u32::from(stream.read_u16::<BigEndian>()?)
                } else {
                    stream.read_u32::<BigEndian>()?
                };
                let ip = Ipv4Addr::from(stream.read_u32::<BigEndian>()?);
                PathAttribute::AGGREGATOR((asn, ip))
            }
            8 => {
                if length % 4 != 0 {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        "COMMUNITY length must be divisible by 4",
                    ));
                }
                let mut communities = Vec::with_capacity(usize::from(length / 4));
                for _ in 0..(length / 4) {
                    communities.push(stream.read_u32::<BigEndian>()?)
                }
                PathAttribute::COMMUNITY(communities)
            }
            9 => PathAttribute::ORIGINATOR_ID(stream.read_u32::<BigEndian>()?),
            10 => {
                let mut ids = Vec::with_capacity(usize::from(length / 4));
                for _ in 0..(length / 4) {
                    ids.push(stream.read_u32::<BigEndian>()?)
                }
                PathAttribute::CLUSTER_LIST(ids)
            }
            14 => PathAttribute::MP_REACH_NLRI(MPReachNLRI::parse(stream, length, negotiated)?),
            15 => PathAttribute::MP_UNREACH_NLRI(MPUnreachNLRI::parse(stream, length, negotiated)?),
            16 => {
                if length % 8 != 0 {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        "EXTENDED_COMMUNITIES length must be divisible by 8",
                    ));
                }
                let mut communities = Vec::with_capacity(usize::from(length / 8));
                for _ in 0..(length / 8) {
                    communities.push(stream.read_u64::<BigEndian>()?)
                }
                PathAttribute::EXTENDED_COMMUNITIES(communities)
            }
            22 => {
                let tunnel_flags = stream.read_u8()?;
                let label = stream.read_u32::<BigEndian>()?;
                let mut identifier = vec![0; usize::from(length.saturating_sub(5))];
                stream.read_exact(&mut identifier)?;
                PathAttribute::PMSI_TUNNEL((tunnel_flags, label, identifier))
            }
            26 => {
                // TLV type 1 (accumulated metric) is the only defined type
                let aigp_type = stream.read_u8()?;
                let tlv_length = stream.read_u16::<BigEndian>()?;
                if aigp_type != 1 || tlv_length != 11 {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        format!("Unsupported AIGP TLV type {} length {}", aigp_type, tlv_length),
                    ));
                }
                PathAttribute::AIGP(stream.read_u64::<BigEndian>()?)
            }
            32 => {
                if length % 12 != 0 {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        "LARGE_COMMUNITY length must be divisible by 12",
                    ));
                }
                let mut communities = Vec::with_capacity(usize::from(length / 12));
                for _ in 0..(length / 12) {
                    communities.push((
                        stream.read_u32::<BigEndian>()?,
                        stream.read_u32::<BigEndian>()?,
                        stream.read_u32::<BigEndian>()?,
                    ))
                }
                PathAttribute::LARGE_COMMUNITY(communities)
            }
            _ => {
                if attr_flags & flags::OPTIONAL == 0 {
                    // Unrecognized well-known attribute
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        format!("Unrecognized well-known attribute {}", code),
                    ));
                }
                let mut value = vec![0; length as usize];
                stream.read_exact(&mut value)?;
                PathAttribute::UNKNOWN {
                    flags: attr_flags,
                    code,
                    value,
                }
            }
        };
        Ok(attribute)
    }

    fn encode_value(&self, negotiated: &Negotiated, buf: &mut Vec<u8>) -> Result<(), Error> {
        use PathAttribute::*;
        match self {
            ORIGIN(origin) => buf.write_u8(*origin as u8),
            AS_PATH(as_path) => as_path.encode(negotiated.asn4, buf),
            NEXT_HOP(next_hop) => match next_hop {
                IpAddr::V4(addr) => buf.write_all(&addr.octets()),
                IpAddr::V6(addr) => buf.write_all(&addr.octets()),
            },
            MULTI_EXIT_DISC(med) => buf.write_u32::<BigEndian>(*med),
            LOCAL_PREF(pref) => buf.write_u32::<BigEndian>(*pref),
            ATOMIC_AGGREGATE => Ok(()),
            AGGREGATOR((asn, ip)) => {
                if negotiated.asn4 {
                    buf.write_u32::<BigEndian>(*asn)?;
                } else if *asn > u32::from(u16::MAX) {
                    buf.write_u16::<BigEndian>(23456)?;
                } else {
                    buf.write_u16::<BigEndian>(*asn as u16)?;
                }
                buf.write_all(&ip.octets())
            }
            COMMUNITY(communities) => {
                for community in communities {
                    buf.write_u32::<BigEndian>(*community)?;
                }
                Ok(())
            }
            ORIGINATOR_ID(id) => buf.write_u32::<BigEndian>(*id),
            CLUSTER_LIST(ids) => {
                for id in ids {
                    buf.write_u32::<BigEndian>(*id)?;
                }
                Ok(())
            }
            MP_REACH_NLRI(mp) => mp.encode(buf),
            MP_UNREACH_NLRI(mp) => mp.encode(buf),
            EXTENDED_COMMUNITIES(communities) => {
                for community in communities {
                    buf.write_u64::<BigEndian>(*community)?;
                }
                Ok(())
            }
            PMSI_TUNNEL((tunnel_flags, label, identifier)) => {
                buf.write_u8(*tunnel_flags)?;
                buf.write_u32::<BigEndian>(*label)?;
                buf.write_all(identifier)
            }
            AIGP(metric) => {
                buf.write_u8(1)?;
                buf.write_u16::<BigEndian>(11)?;
                buf.write_u64::<BigEndian>(*metric)
            }
            LARGE_COMMUNITY(communities) => {
                for (global, local1, local2) in communities {
                    buf.write_u32::<BigEndian>(*global)?;
                    buf.write_u32::<BigEndian>(*local1)?;
                    buf.write_u32::<BigEndian>(*local2)?;
                }
                Ok(())
            }
            UNKNOWN { value, .. } => buf.write_all(value),
        }
    }

    /// Encode flags, code, length and value
    pub fn encode(&self, negotiated: &Negotiated, buf: &mut impl Write) -> Result<(), Error> {
        let mut value: Vec<u8> = Vec::with_capacity(8);
        self.encode_value(negotiated, &mut value)?;

        let mut attr_flags = match self {
            PathAttribute::UNKNOWN { flags, .. } => *flags & !flags::EXTENDED_LENGTH,
            attribute => Self::default_flags(attribute.code()),
        };
        if value.len() > 255 {
            attr_flags |= flags::EXTENDED_LENGTH;
        }
        buf.write_u8(attr_flags)?;
        buf.write_u8(self.code())?;
        if attr_flags & flags::EXTENDED_LENGTH != 0 {
            buf.write_u16::<BigEndian>(value.len() as u16)?;
        } else {
            buf.write_u8(value.len() as u8)?;
        }
        buf.write_all(&value)
    }
}

/// A collection of path attributes, at most one per type code.
///
/// Iteration and packing happen in code order, so two sets holding the
/// same (code, value) entries are byte-identical no matter the insertion
/// order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeSet(BTreeMap<u8, PathAttribute>);

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list; later duplicates replace earlier entries
    pub fn from_attributes(attributes: Vec<PathAttribute>) -> Self {
        Self(
            attributes
                .into_iter()
                .map(|attr| (attr.code(), attr))
                .collect(),
        )
    }

    /// Wire-facing insert: a duplicate code is a malformed attribute list
    pub fn insert(&mut self, attribute: PathAttribute) -> Result<(), MessageError> {
        let code = attribute.code();
        if self.0.contains_key(&code) {
            return Err(MessageError::update(
                1,
                &format!("Duplicate attribute code {}", code),
            ));
        }
        self.0.insert(code, attribute);
        Ok(())
    }

    /// Insert or replace (builder-facing)
    pub fn set(&mut self, attribute: PathAttribute) {
        self.0.insert(attribute.code(), attribute);
    }

    pub fn get(&self, id: Identifier) -> Option<&PathAttribute> {
        self.0.get(&(id as u8))
    }

    pub fn remove(&mut self, id: Identifier) -> Option<PathAttribute> {
        self.0.remove(&(id as u8))
    }

    pub fn contains(&self, id: Identifier) -> bool {
        self.0.contains_key(&(id as u8))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathAttribute> {
        self.0.values()
    }

    /// Content-derived identity: the canonical encoding in code order.
    /// Byte-identical for equal sets regardless of insertion order.
    pub fn index(&self) -> Vec<u8> {
        let mut bytes: Vec<u8> = Vec::with_capacity(16 * self.0.len());
        let canonical = Negotiated::default();
        for attribute in self.0.values() {
            // Unencodable attributes cannot have been constructed
            attribute
                .encode(&canonical, &mut bytes)
                .expect("attribute encodes into Vec");
        }
        bytes
    }

    /// Pack all attributes, honoring the negotiated session parameters
    pub fn pack(&self, negotiated: &Negotiated, buf: &mut impl Write) -> Result<(), Error> {
        for attribute in self.0.values() {
            attribute.encode(negotiated, buf)?;
        }
        Ok(())
    }

    pub fn packed_len(&self, negotiated: &Negotiated) -> usize {
        let mut bytes: Vec<u8> = Vec::with_capacity(16 * self.0.len());
        self.pack(negotiated, &mut bytes)
            .expect("attributes encode into Vec");
        bytes.len()
    }

    /// A new set with `overrides` taking precedence over `self`
    pub fn merged_with(&self, overrides: &AttributeSet) -> AttributeSet {
        let mut merged = self.clone();
        for attribute in overrides.0.values() {
            merged.set(attribute.clone());
        }
        merged
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Origin::IGP => "IGP",
            Origin::EGP => "EGP",
            Origin::INCOMPLETE => "Incomplete",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn negotiated() -> Negotiated {
        Negotiated::default()
    }

    #[test]
    fn test_origin_round_trip() {
        let attr = PathAttribute::ORIGIN(Origin::IGP);
        let mut buf = vec![];
        attr.encode(&negotiated(), &mut buf).unwrap();
        assert_eq!(buf, vec![flags::TRANSITIVE, 1, 1, 0]);
        let mut cursor = Cursor::new(&buf[..]);
        let parsed = PathAttribute::parse(&mut cursor, &negotiated()).unwrap();
        assert_eq!(parsed, attr);
    }

    #[test]
    fn test_as_path_two_byte_encoding() {
        let attr = PathAttribute::AS_PATH(ASPath {
            segments: vec![Segment::AS_SEQUENCE(vec![65000, 4_200_000_000])],
        });
        let two_byte = Negotiated {
            asn4: false,
            ..Negotiated::default()
        };
        let mut buf = vec![];
        attr.encode(&two_byte, &mut buf).unwrap();
        // flags, code, len, seg-type, count, 65000, AS_TRANS
        assert_eq!(
            buf,
            vec![flags::TRANSITIVE, 2, 6, 2, 2, 0xfd, 0xe8, 0x5b, 0xa0]
        );
        let mut cursor = Cursor::new(&buf[..]);
        match PathAttribute::parse(&mut cursor, &two_byte).unwrap() {
            PathAttribute::AS_PATH(path) => {
                assert_eq!(path.segments, vec![Segment::AS_SEQUENCE(vec![65000, 23456])]);
            }
            _ => panic!("expected AS_PATH"),
        }
    }

    #[test]
    fn test_attribute_set_index_order_independent() {
        let a = AttributeSet::from_attributes(vec![
            PathAttribute::ORIGIN(Origin::IGP),
            PathAttribute::MULTI_EXIT_DISC(100),
            PathAttribute::COMMUNITY(vec![65000 * 65536 + 100]),
        ]);
        let b = AttributeSet::from_attributes(vec![
            PathAttribute::COMMUNITY(vec![65000 * 65536 + 100]),
            PathAttribute::ORIGIN(Origin::IGP),
            PathAttribute::MULTI_EXIT_DISC(100),
        ]);
        assert_eq!(a.index(), b.index());

        let mut a_packed = vec![];
        let mut b_packed = vec![];
        a.pack(&negotiated(), &mut a_packed).unwrap();
        b.pack(&negotiated(), &mut b_packed).unwrap();
        assert_eq!(a_packed, b_packed);
    }

    #[test]
    fn test_duplicate_attribute_rejected() {
        let mut set = AttributeSet::new();
        set.insert(PathAttribute::ORIGIN(Origin::IGP)).unwrap();
        assert!(set.insert(PathAttribute::ORIGIN(Origin::EGP)).is_err());
    }

    #[test]
    fn test_malformed_origin_treated_as_withdraw() {
        // ORIGIN with out-of-range value 9
        let buf = vec![flags::TRANSITIVE, 1, 1, 9];
        let mut cursor = Cursor::new(&buf[..]);
        match PathAttribute::parse(&mut cursor, &negotiated()) {
            Err(AttributeError::TreatAsWithdraw(code, _)) => assert_eq!(code, 1),
            other => panic!("expected treat-as-withdraw, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_unknown_optional_attribute_passthrough() {
        let buf = vec![flags::OPTIONAL | flags::TRANSITIVE, 99, 2, 0xde, 0xad];
        let mut cursor = Cursor::new(&buf[..]);
        match PathAttribute::parse(&mut cursor, &negotiated()).unwrap() {
            PathAttribute::UNKNOWN { code, value, .. } => {
                assert_eq!(code, 99);
                assert_eq!(value, vec![0xde, 0xad]);
            }
            _ => panic!("expected unknown attribute"),
        }
    }

    #[test]
    fn test_large_community_round_trip() {
        let attr = PathAttribute::LARGE_COMMUNITY(vec![(65000, 1, 2), (65001, 3, 4)]);
        let mut buf = vec![];
        attr.encode(&negotiated(), &mut buf).unwrap();
        let mut cursor = Cursor::new(&buf[..]);
        assert_eq!(PathAttribute::parse(&mut cursor, &negotiated()).unwrap(), attr);
    }

    #[test]
    fn test_aigp_round_trip() {
        let attr = PathAttribute::AIGP(123456);
        let mut buf = vec![];
        attr.encode(&negotiated(), &mut buf).unwrap();
        let mut cursor = Cursor::new(&buf[..]);
        assert_eq!(PathAttribute::parse(&mut cursor, &negotiated()).unwrap(), attr);
    }
}
