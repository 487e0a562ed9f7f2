pub mod flowspec;

pub use flowspec::{FlowspecFilter, NumericOperator};

use std::convert::TryFrom;
use std::fmt::{self, Debug, Display, Formatter};
use std::io::{Cursor, Error, ErrorKind, Write};
use std::net::IpAddr;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;

use super::family::{Family, AFI, SAFI};

/// Direction of a route with regards to the RIB
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
pub enum Action {
    Announce,
    Withdraw,
    /// Not yet decided (e.g. a route spec parsed from the API
    /// before the verb is applied)
    Unset,
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let word = match self {
            Action::Announce => "announce",
            Action::Withdraw => "withdraw",
            Action::Unset => "unset",
        };
        write!(f, "{}", word)
    }
}

/// Next-hop of a route; `Unset` is a sentinel distinct from every real
/// address (Flowspec routes carry it, their MP_REACH next-hop is empty)
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
pub enum NextHop {
    Ip(IpAddr),
    Unset,
}

impl NextHop {
    /// Encode for the MP_REACH_NLRI next-hop field of the given family
    pub fn mp_bytes(&self, family: Family) -> Vec<u8> {
        match self {
            NextHop::Unset => vec![],
            NextHop::Ip(addr) => {
                let octets = match addr {
                    IpAddr::V4(v4) => v4.octets().to_vec(),
                    IpAddr::V6(v6) => v6.octets().to_vec(),
                };
                match family.safi {
                    // VPN next-hops are prefixed with an all-zero RD
                    SAFI::MplsVpn => {
                        let mut bytes = vec![0u8; 8];
                        bytes.extend(octets);
                        bytes
                    }
                    _ => octets,
                }
            }
        }
    }

    /// Decode from the MP_REACH_NLRI next-hop field
    pub fn from_mp_bytes(bytes: &[u8]) -> NextHop {
        match bytes.len() {
            4 => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(bytes);
                NextHop::Ip(IpAddr::from(buf))
            }
            // 32 bytes is global + link-local; keep the global address
            16 | 32 => {
                let mut buf = [0u8; 16];
                buf.copy_from_slice(&bytes[..16]);
                NextHop::Ip(IpAddr::from(buf))
            }
            // VPN forms carry a zero RD prefix
            12 => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(&bytes[8..12]);
                NextHop::Ip(IpAddr::from(buf))
            }
            24 => {
                let mut buf = [0u8; 16];
                buf.copy_from_slice(&bytes[8..24]);
                NextHop::Ip(IpAddr::from(buf))
            }
            _ => NextHop::Unset,
        }
    }

    pub fn addr(&self) -> Option<IpAddr> {
        match self {
            NextHop::Ip(addr) => Some(*addr),
            NextHop::Unset => None,
        }
    }

    /// Bytes contributing to a route's bucket identity
    pub fn index_bytes(&self) -> Vec<u8> {
        match self {
            NextHop::Unset => vec![],
            NextHop::Ip(IpAddr::V4(v4)) => v4.octets().to_vec(),
            NextHop::Ip(IpAddr::V6(v6)) => v6.octets().to_vec(),
        }
    }
}

impl Display for NextHop {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            NextHop::Ip(addr) => write!(f, "{}", addr),
            NextHop::Unset => write!(f, "no-nexthop"),
        }
    }
}

/// Represents a generic prefix. For example an IPv4 prefix or IPv6 prefix.
///
/// The address family is always explicit; it is never derived from the
/// mask length (a /32 may be either family).
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Prefix {
    /// IP version for prefix (v4|v6)
    pub afi: AFI,
    /// Prefix mask length in bits
    pub length: u8,
    /// Prefix octets
    pub octets: Vec<u8>,
}

impl Prefix {
    pub fn new(afi: AFI, length: u8, octets: Vec<u8>) -> Result<Self, Error> {
        if length > afi.max_prefix_length() {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("Bogus prefix length {} for {}", length, afi),
            ));
        }
        let mut padded = afi.empty_buffer();
        let used = Self::octet_length_of(length).min(octets.len());
        padded[..used].copy_from_slice(&octets[..used]);
        Ok(Self {
            afi,
            length,
            octets: padded,
        })
    }

    fn octet_length_of(length: u8) -> usize {
        (length as usize + 7) / 8
    }

    fn octet_length(&self) -> usize {
        Self::octet_length_of(self.length)
    }

    /// Get a slice of the prefix octets covered by the prefix mask
    pub fn masked_octets(&self) -> &[u8] {
        &self.octets[..self.octet_length()]
    }
}

impl From<(IpAddr, u8)> for Prefix {
    fn from(prefix: (IpAddr, u8)) -> Prefix {
        let (afi, octets) = match prefix.0 {
            IpAddr::V4(v4) => (AFI::IPV4, v4.octets().to_vec()),
            IpAddr::V6(v6) => (AFI::IPV6, v6.octets().to_vec()),
        };
        Prefix {
            afi,
            length: prefix.1,
            octets,
        }
    }
}

impl From<&Prefix> for IpAddr {
    fn from(prefix: &Prefix) -> Self {
        match prefix.afi {
            AFI::IPV6 => {
                let mut buffer: [u8; 16] = [0; 16];
                buffer[..prefix.octets.len().min(16)]
                    .copy_from_slice(&prefix.octets[..prefix.octets.len().min(16)]);
                IpAddr::from(buffer)
            }
            _ => {
                let mut buffer: [u8; 4] = [0; 4];
                buffer[..prefix.octets.len().min(4)]
                    .copy_from_slice(&prefix.octets[..prefix.octets.len().min(4)]);
                IpAddr::from(buffer)
            }
        }
    }
}

impl Display for Prefix {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        write!(f, "{}/{}", IpAddr::from(self), self.length)
    }
}

impl Debug for Prefix {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        write!(f, "{}/{}", IpAddr::from(self), self.length)
    }
}

/// Route Distinguisher (RFC 4364); types 0 (2-byte ASN), 1 (IPv4),
/// and 2 (4-byte ASN) share the 8-byte wire form
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
pub struct RouteDistinguisher(pub u64);

impl RouteDistinguisher {
    pub fn from_asn2(asn: u16, value: u32) -> Self {
        Self(((asn as u64) << 32) | value as u64)
    }

    pub fn from_ipv4(addr: [u8; 4], value: u16) -> Self {
        Self((1u64 << 48) | ((u32::from_be_bytes(addr) as u64) << 16) | value as u64)
    }

    pub fn from_asn4(asn: u32, value: u16) -> Self {
        Self((2u64 << 48) | ((asn as u64) << 16) | value as u64)
    }

    pub fn rd_type(&self) -> u16 {
        (self.0 >> 48) as u16
    }

    pub fn bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl Display for RouteDistinguisher {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self.rd_type() {
            0 => write!(
                f,
                "{}:{}",
                (self.0 >> 32) & 0xffff,
                self.0 & 0xffff_ffff
            ),
            1 => {
                let addr = ((self.0 >> 16) & 0xffff_ffff) as u32;
                write!(f, "{}:{}", IpAddr::from(addr.to_be_bytes()), self.0 & 0xffff)
            }
            2 => write!(
                f,
                "{}:{}",
                (self.0 >> 16) & 0xffff_ffff,
                self.0 & 0xffff
            ),
            t => write!(f, "rd-type-{}:{:x}", t, self.0 & 0xffff_ffff_ffff),
        }
    }
}

/// Network Layer Reachability Information, packed-bytes-first.
///
/// The canonical representation is the exact wire form (`packed`, without
/// the optional Add-Path identifier) plus an explicit family and action.
/// Semantic accessors decode on demand; construction validates, and a
/// constructed value never changes — derivations produce a new `Nlri`.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Nlri {
    family: Family,
    action: Action,
    path_id: Option<u32>,
    packed: Bytes,
}

impl Nlri {
    pub fn family(&self) -> Family {
        self.family
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn path_id(&self) -> Option<u32> {
        self.path_id
    }

    pub fn packed(&self) -> &[u8] {
        &self.packed
    }

    /// Globally unique per route identity; suitable as a map key
    pub fn index(&self) -> Vec<u8> {
        let mut index = Vec::with_capacity(7 + self.packed.len());
        index.extend_from_slice(&(self.family.afi as u16).to_be_bytes());
        index.push(self.family.safi as u8);
        if let Some(path_id) = self.path_id {
            index.extend_from_slice(&path_id.to_be_bytes());
        }
        index.extend_from_slice(&self.packed);
        index
    }

    pub fn with_action(&self, action: Action) -> Nlri {
        Nlri {
            action,
            ..self.clone()
        }
    }

    /// Bytes this NLRI occupies on the wire (given add-path in use)
    pub fn encoded_len(&self) -> usize {
        self.packed.len() + if self.path_id.is_some() { 4 } else { 0 }
    }

    pub fn encode(&self, buf: &mut impl Write) -> Result<(), Error> {
        if let Some(path_id) = self.path_id {
            buf.write_u32::<BigEndian>(path_id)?;
        }
        buf.write_all(&self.packed)
    }

    /// Parse one NLRI of `family` out of the cursor. The add-path flag and
    /// the family both come from the negotiated session state; neither is
    /// ever guessed from the payload.
    pub fn parse(
        family: Family,
        action: Action,
        add_path: bool,
        cursor: &mut Cursor<&[u8]>,
    ) -> Result<Nlri, Error> {
        let path_id = if add_path {
            Some(cursor.read_u32::<BigEndian>()?)
        } else {
            None
        };
        let start = cursor.position() as usize;
        let buf: &[u8] = cursor.get_ref();
        let at = |offset: usize| -> Result<u8, Error> {
            buf.get(start + offset).copied().ok_or_else(|| {
                Error::new(ErrorKind::UnexpectedEof, "NLRI truncated")
            })
        };

        let total = match family.safi {
            SAFI::Unicast | SAFI::Multicast => {
                let len_bits = at(0)?;
                if len_bits > family.afi.max_prefix_length() {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        format!("Bogus prefix length {}", len_bits),
                    ));
                }
                1 + (len_bits as usize + 7) / 8
            }
            SAFI::Mpls => {
                let len_bits = at(0)?;
                if len_bits < 24 {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        format!("Labeled NLRI length {} shorter than one label", len_bits),
                    ));
                }
                1 + (len_bits as usize + 7) / 8
            }
            SAFI::MplsVpn => {
                let len_bits = at(0)?;
                if len_bits < 88 {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        format!("VPN NLRI length {} shorter than label + RD", len_bits),
                    ));
                }
                1 + (len_bits as usize + 7) / 8
            }
            SAFI::Evpn => {
                let len = at(1)?;
                2 + len as usize
            }
            SAFI::Flowspec | SAFI::FlowspecVPN => {
                let b0 = at(0)?;
                if b0 < 0xf0 {
                    1 + b0 as usize
                } else {
                    2 + (((b0 as usize & 0x0f) << 8) | at(1)? as usize)
                }
            }
            SAFI::BGPLS => {
                let len = ((at(2)? as usize) << 8) | at(3)? as usize;
                4 + len
            }
        };

        if start + total > buf.len() {
            return Err(Error::new(ErrorKind::UnexpectedEof, "NLRI truncated"));
        }
        let packed = Bytes::copy_from_slice(&buf[start..start + total]);
        cursor.set_position((start + total) as u64);
        Ok(Nlri {
            family,
            action,
            path_id,
            packed,
        })
    }

    // ------------------------------------------------------------------
    // Factories; every path takes an explicit AFI (carried by Prefix or
    // given directly) -- the mask length never decides the family.
    // ------------------------------------------------------------------

    pub fn inet(prefix: &Prefix, path_id: Option<u32>, action: Action) -> Nlri {
        let mut packed = Vec::with_capacity(1 + prefix.octet_length());
        packed.push(prefix.length);
        packed.extend_from_slice(prefix.masked_octets());
        Nlri {
            family: Family::new(prefix.afi, SAFI::Unicast),
            action,
            path_id,
            packed: Bytes::from(packed),
        }
    }

    pub fn labeled(
        prefix: &Prefix,
        labels: &[u32],
        path_id: Option<u32>,
        action: Action,
    ) -> Nlri {
        let len_bits = prefix.length as usize + 24 * labels.len();
        let mut packed = Vec::with_capacity(1 + (len_bits + 7) / 8);
        packed.push(len_bits as u8);
        encode_labels(labels, &mut packed);
        packed.extend_from_slice(prefix.masked_octets());
        Nlri {
            family: Family::new(prefix.afi, SAFI::Mpls),
            action,
            path_id,
            packed: Bytes::from(packed),
        }
    }

    pub fn vpn(
        rd: RouteDistinguisher,
        prefix: &Prefix,
        labels: &[u32],
        action: Action,
    ) -> Nlri {
        let len_bits = prefix.length as usize + 24 * labels.len() + 64;
        let mut packed = Vec::with_capacity(1 + (len_bits + 7) / 8);
        packed.push(len_bits as u8);
        encode_labels(labels, &mut packed);
        packed.extend_from_slice(&rd.bytes());
        packed.extend_from_slice(prefix.masked_octets());
        Nlri {
            family: Family::new(prefix.afi, SAFI::MplsVpn),
            action,
            path_id: None,
            packed: Bytes::from(packed),
        }
    }

    /// EVPN MAC/IP Advertisement route (type 2)
    pub fn evpn_mac(
        rd: RouteDistinguisher,
        esi: [u8; 10],
        ethernet_tag: u32,
        mac: [u8; 6],
        ip: Option<IpAddr>,
        label: u32,
        action: Action,
    ) -> Nlri {
        let mut value: Vec<u8> = Vec::with_capacity(40);
        value.extend_from_slice(&rd.bytes());
        value.extend_from_slice(&esi);
        value.extend_from_slice(&ethernet_tag.to_be_bytes());
        value.push(48); // MAC length in bits
        value.extend_from_slice(&mac);
        match ip {
            Some(IpAddr::V4(v4)) => {
                value.push(32);
                value.extend_from_slice(&v4.octets());
            }
            Some(IpAddr::V6(v6)) => {
                value.push(128);
                value.extend_from_slice(&v6.octets());
            }
            None => value.push(0),
        }
        value.extend_from_slice(&label_bytes(label));
        evpn_route(2, value, action)
    }

    /// EVPN IP Prefix route (type 5)
    pub fn evpn_prefix(
        rd: RouteDistinguisher,
        esi: [u8; 10],
        ethernet_tag: u32,
        prefix: &Prefix,
        gateway: IpAddr,
        label: u32,
        action: Action,
    ) -> Nlri {
        let mut value: Vec<u8> = Vec::with_capacity(34);
        value.extend_from_slice(&rd.bytes());
        value.extend_from_slice(&esi);
        value.extend_from_slice(&ethernet_tag.to_be_bytes());
        value.push(prefix.length);
        value.extend_from_slice(&prefix.octets);
        match gateway {
            IpAddr::V4(v4) => value.extend_from_slice(&v4.octets()),
            IpAddr::V6(v6) => value.extend_from_slice(&v6.octets()),
        }
        value.extend_from_slice(&label_bytes(label));
        evpn_route(5, value, action)
    }

    pub fn flowspec(afi: AFI, vpn: bool, filters: &[FlowspecFilter], action: Action) -> Result<Nlri, Error> {
        let mut bytes: Vec<u8> = Vec::with_capacity(16);
        for filter in filters {
            filter.encode(&mut bytes)?;
        }
        let mut packed = Vec::with_capacity(2 + bytes.len());
        if bytes.len() < 0xf0 {
            packed.push(bytes.len() as u8);
        } else {
            packed.push(0xf0 | ((bytes.len() >> 8) as u8 & 0x0f));
            packed.push(bytes.len() as u8);
        }
        packed.extend_from_slice(&bytes);
        let safi = if vpn { SAFI::FlowspecVPN } else { SAFI::Flowspec };
        Ok(Nlri {
            family: Family::new(afi, safi),
            action,
            path_id: None,
            packed: Bytes::from(packed),
        })
    }

    /// BGP-LS NLRI: node (1), link (2) or prefix (3/4) TLV kept opaque
    pub fn bgp_ls(ls_type: u16, value: &[u8], action: Action) -> Nlri {
        let mut packed = Vec::with_capacity(4 + value.len());
        packed.extend_from_slice(&ls_type.to_be_bytes());
        packed.extend_from_slice(&(value.len() as u16).to_be_bytes());
        packed.extend_from_slice(value);
        Nlri {
            family: Family::new(AFI::BGPLS, SAFI::BGPLS),
            action,
            path_id: None,
            packed: Bytes::from(packed),
        }
    }

    // ------------------------------------------------------------------
    // Lazy semantic accessors
    // ------------------------------------------------------------------

    /// The IP prefix for inet-like families (unicast, multicast,
    /// labeled, VPN)
    pub fn prefix(&self) -> Option<Prefix> {
        match self.family.safi {
            SAFI::Unicast | SAFI::Multicast => {
                let length = *self.packed.get(0)?;
                Prefix::new(self.family.afi, length, self.packed[1..].to_vec()).ok()
            }
            SAFI::Mpls => {
                let len_bits = *self.packed.get(0)?;
                let labels = self.labels()?;
                let skip = 1 + 3 * labels.len();
                let length = len_bits.checked_sub(24 * labels.len() as u8)?;
                Prefix::new(self.family.afi, length, self.packed.get(skip..)?.to_vec()).ok()
            }
            SAFI::MplsVpn => {
                let len_bits = *self.packed.get(0)?;
                let labels = self.labels()?;
                let skip = 1 + 3 * labels.len() + 8;
                let length = len_bits.checked_sub(24 * labels.len() as u8 + 64)?;
                Prefix::new(self.family.afi, length, self.packed.get(skip..)?.to_vec()).ok()
            }
            _ => None,
        }
    }

    /// MPLS label stack for labeled/VPN families
    pub fn labels(&self) -> Option<Vec<u32>> {
        match self.family.safi {
            SAFI::Mpls | SAFI::MplsVpn => {
                let mut labels = Vec::with_capacity(1);
                let mut offset = 1usize;
                loop {
                    let group = self.packed.get(offset..offset + 3)?;
                    labels.push(
                        ((group[0] as u32) << 12) | ((group[1] as u32) << 4) | (group[2] as u32 >> 4),
                    );
                    let bottom = group[2] & 0x01 == 0x01;
                    // 0x800000 is the withdraw compatibility label
                    let compat = group == [0x80, 0x00, 0x00];
                    offset += 3;
                    if bottom || compat {
                        break;
                    }
                }
                Some(labels)
            }
            _ => None,
        }
    }

    pub fn rd(&self) -> Option<RouteDistinguisher> {
        match self.family.safi {
            SAFI::MplsVpn => {
                let labels = self.labels()?;
                let offset = 1 + 3 * labels.len();
                let bytes = self.packed.get(offset..offset + 8)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(bytes);
                Some(RouteDistinguisher(u64::from_be_bytes(buf)))
            }
            SAFI::Evpn => {
                let bytes = self.packed.get(2..10)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(bytes);
                Some(RouteDistinguisher(u64::from_be_bytes(buf)))
            }
            _ => None,
        }
    }

    pub fn filters(&self) -> Option<Vec<FlowspecFilter>> {
        match self.family.safi {
            SAFI::Flowspec | SAFI::FlowspecVPN => {
                let b0 = *self.packed.get(0)?;
                let skip = if b0 < 0xf0 { 1 } else { 2 };
                let inner = self.packed.get(skip..)?;
                let mut cursor = Cursor::new(inner);
                let mut filters = Vec::with_capacity(2);
                while (cursor.position() as usize) < inner.len() {
                    filters.push(FlowspecFilter::parse(&mut cursor, self.family.afi).ok()?);
                }
                Some(filters)
            }
            _ => None,
        }
    }

    pub fn evpn_route_type(&self) -> Option<u8> {
        match self.family.safi {
            SAFI::Evpn => self.packed.get(0).copied(),
            _ => None,
        }
    }

    pub fn bgpls_type(&self) -> Option<u16> {
        match self.family.safi {
            SAFI::BGPLS => {
                let bytes = self.packed.get(0..2)?;
                Some(((bytes[0] as u16) << 8) | bytes[1] as u16)
            }
            _ => None,
        }
    }
}

fn evpn_route(route_type: u8, value: Vec<u8>, action: Action) -> Nlri {
    let mut packed = Vec::with_capacity(2 + value.len());
    packed.push(route_type);
    packed.push(value.len() as u8);
    packed.extend_from_slice(&value);
    Nlri {
        family: Family::new(AFI::L2VPN, SAFI::Evpn),
        action,
        path_id: None,
        packed: Bytes::from(packed),
    }
}

fn label_bytes(label: u32) -> [u8; 3] {
    let shifted = (label << 4) | 0x01; // bottom of stack
    [(shifted >> 16) as u8, (shifted >> 8) as u8, shifted as u8]
}

fn encode_labels(labels: &[u32], packed: &mut Vec<u8>) {
    for (i, label) in labels.iter().enumerate() {
        let mut shifted = label << 4;
        if i == labels.len() - 1 {
            shifted |= 0x01; // bottom of stack
        }
        packed.extend_from_slice(&[(shifted >> 16) as u8, (shifted >> 8) as u8, shifted as u8]);
    }
}

impl Display for Nlri {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self.family.safi {
            SAFI::Unicast | SAFI::Multicast => match self.prefix() {
                Some(prefix) => write!(f, "{}", prefix),
                None => write!(f, "invalid-prefix"),
            },
            SAFI::Mpls => {
                let prefix = self.prefix();
                let labels = self.labels().unwrap_or_default();
                match prefix {
                    Some(prefix) => write!(f, "{} label {:?}", prefix, labels),
                    None => write!(f, "invalid-labeled-prefix"),
                }
            }
            SAFI::MplsVpn => match (self.rd(), self.prefix()) {
                (Some(rd), Some(prefix)) => write!(f, "{}:{}", rd, prefix),
                _ => write!(f, "invalid-vpn-prefix"),
            },
            SAFI::Evpn => write!(
                f,
                "evpn-{}",
                self.evpn_route_type()
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "?".to_string())
            ),
            SAFI::Flowspec | SAFI::FlowspecVPN => {
                let count = self.filters().map(|fs| fs.len()).unwrap_or(0);
                write!(f, "flow [{} rules]", count)
            }
            SAFI::BGPLS => {
                let kind = match self.bgpls_type() {
                    Some(1) => "node",
                    Some(2) => "link",
                    Some(3) | Some(4) => "prefix",
                    _ => "unknown",
                };
                write!(f, "bgp-ls {}", kind)
            }
        }
    }
}

impl Debug for Nlri {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "<Nlri {} {} {}{}>",
            self.family,
            self.action,
            self,
            self.path_id
                .map(|p| format!(" path-id {}", p))
                .unwrap_or_default()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_prefix_masked_octets() {
        let prefix = Prefix::new(AFI::IPV4, 32, vec![1, 1, 1, 1]).unwrap();
        assert_eq!(prefix.masked_octets(), &[1, 1, 1, 1]);
        assert_eq!(&prefix.to_string(), "1.1.1.1/32");

        let prefix = Prefix::new(AFI::IPV4, 16, vec![1, 1, 0, 0]).unwrap();
        assert_eq!(prefix.masked_octets(), &[1, 1]);

        let prefix = Prefix::new(AFI::IPV4, 18, vec![1, 1, 1, 0]).unwrap();
        assert_eq!(prefix.masked_octets(), &[1, 1, 1]);
    }

    #[test]
    fn test_prefix_bad_length() {
        assert!(Prefix::new(AFI::IPV4, 35, vec![5, 5, 5, 5]).is_err());
        assert!(Prefix::new(AFI::IPV6, 145, vec![0x20, 0x01]).is_err());
    }

    #[test]
    fn test_inet_round_trip() {
        let prefix = Prefix::new(AFI::IPV4, 24, vec![10, 0, 0, 0]).unwrap();
        let nlri = Nlri::inet(&prefix, None, Action::Announce);
        assert_eq!(nlri.packed(), &[24, 10, 0, 0][..]);

        let mut buf = vec![];
        nlri.encode(&mut buf).unwrap();
        let mut cursor = Cursor::new(&buf[..]);
        let parsed = Nlri::parse(
            Family::new(AFI::IPV4, SAFI::Unicast),
            Action::Announce,
            false,
            &mut cursor,
        )
        .unwrap();
        assert_eq!(parsed, nlri);
        assert_eq!(parsed.prefix().unwrap().to_string(), "10.0.0.0/24");
    }

    // A /32 (or any mask 0..=32) under AFI IPv6 must stay IPv6
    #[test]
    fn test_short_masks_keep_explicit_afi() {
        let addr: Ipv6Addr = "2001:db8::".parse().unwrap();
        for mask in 0..=32u8 {
            let prefix = Prefix::new(AFI::IPV6, mask, addr.octets().to_vec()).unwrap();
            let nlri = Nlri::inet(&prefix, None, Action::Announce);
            assert_eq!(nlri.family().afi, AFI::IPV6);
            let decoded = nlri.prefix().unwrap();
            assert_eq!(decoded.afi, AFI::IPV6);
            assert!(matches!(IpAddr::from(&decoded), IpAddr::V6(_)));

            let mut buf = vec![];
            nlri.encode(&mut buf).unwrap();
            let mut cursor = Cursor::new(&buf[..]);
            let parsed = Nlri::parse(
                Family::new(AFI::IPV6, SAFI::Unicast),
                Action::Announce,
                false,
                &mut cursor,
            )
            .unwrap();
            assert_eq!(parsed.prefix().unwrap().afi, AFI::IPV6);
        }
    }

    #[test]
    fn test_ipv6_32_is_never_v4() {
        let prefix = Prefix::new(AFI::IPV6, 32, vec![0x20, 0x01, 0x0d, 0xb8]).unwrap();
        let nlri = Nlri::inet(&prefix, None, Action::Announce);
        assert_eq!(nlri.packed(), &[0x20, 0x20, 0x01, 0x0d, 0xb8][..]);
        assert_eq!(nlri.prefix().unwrap().to_string(), "2001:db8::/32");
    }

    #[test]
    fn test_add_path_index_distinct() {
        let prefix = Prefix::new(AFI::IPV4, 24, vec![10, 0, 0, 0]).unwrap();
        let first = Nlri::inet(&prefix, Some(1), Action::Announce);
        let second = Nlri::inet(&prefix, Some(2), Action::Announce);
        assert_ne!(first.index(), second.index());
        assert_eq!(first.encoded_len(), 4 + 4);
    }

    #[test]
    fn test_labeled_round_trip() {
        let prefix = Prefix::new(AFI::IPV4, 24, vec![10, 0, 0, 0]).unwrap();
        let nlri = Nlri::labeled(&prefix, &[100], None, Action::Announce);
        assert_eq!(nlri.labels().unwrap(), vec![100]);
        assert_eq!(nlri.prefix().unwrap().to_string(), "10.0.0.0/24");

        let mut buf = vec![];
        nlri.encode(&mut buf).unwrap();
        let mut cursor = Cursor::new(&buf[..]);
        let parsed = Nlri::parse(
            Family::new(AFI::IPV4, SAFI::Mpls),
            Action::Announce,
            false,
            &mut cursor,
        )
        .unwrap();
        assert_eq!(parsed, nlri);
    }

    #[test]
    fn test_vpn_round_trip_all_rd_types() {
        let prefix = Prefix::new(AFI::IPV4, 24, vec![10, 0, 0, 0]).unwrap();
        let rds = vec![
            RouteDistinguisher::from_asn2(65000, 100),
            RouteDistinguisher::from_ipv4([192, 0, 2, 1], 100),
            RouteDistinguisher::from_asn4(4200000000, 100),
        ];
        for rd in rds {
            let nlri = Nlri::vpn(rd, &prefix, &[300], Action::Announce);
            assert_eq!(nlri.rd().unwrap(), rd);
            assert_eq!(nlri.labels().unwrap(), vec![300]);
            assert_eq!(nlri.prefix().unwrap().to_string(), "10.0.0.0/24");

            let mut buf = vec![];
            nlri.encode(&mut buf).unwrap();
            let mut cursor = Cursor::new(&buf[..]);
            let parsed = Nlri::parse(
                Family::new(AFI::IPV4, SAFI::MplsVpn),
                Action::Announce,
                false,
                &mut cursor,
            )
            .unwrap();
            assert_eq!(parsed, nlri);
        }
    }

    #[test]
    fn test_rd_display() {
        assert_eq!(
            RouteDistinguisher::from_asn2(65000, 100).to_string(),
            "65000:100"
        );
        assert_eq!(
            RouteDistinguisher::from_ipv4([192, 0, 2, 1], 5).to_string(),
            "192.0.2.1:5"
        );
        assert_eq!(
            RouteDistinguisher::from_asn4(4200000000, 7).to_string(),
            "4200000000:7"
        );
    }

    #[test]
    fn test_evpn_mac_accessors() {
        let rd = RouteDistinguisher::from_asn2(65000, 1);
        let nlri = Nlri::evpn_mac(
            rd,
            [0u8; 10],
            0,
            [0x00, 0x11, 0x22, 0x33, 0x44, 0x55],
            Some("192.0.2.10".parse().unwrap()),
            100,
            Action::Announce,
        );
        assert_eq!(nlri.evpn_route_type(), Some(2));
        assert_eq!(nlri.rd(), Some(rd));

        let mut buf = vec![];
        nlri.encode(&mut buf).unwrap();
        let mut cursor = Cursor::new(&buf[..]);
        let parsed = Nlri::parse(
            Family::new(AFI::L2VPN, SAFI::Evpn),
            Action::Announce,
            false,
            &mut cursor,
        )
        .unwrap();
        assert_eq!(parsed, nlri);
    }

    #[test]
    fn test_next_hop_mp_bytes() {
        let family = Family::new(AFI::IPV6, SAFI::Unicast);
        let hop = NextHop::Ip("2001:db8::1".parse().unwrap());
        let bytes = hop.mp_bytes(family);
        assert_eq!(bytes.len(), 16);
        assert_eq!(NextHop::from_mp_bytes(&bytes), hop);

        let vpn = Family::new(AFI::IPV4, SAFI::MplsVpn);
        let hop = NextHop::Ip("192.0.2.1".parse().unwrap());
        let bytes = hop.mp_bytes(vpn);
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[..8], &[0u8; 8]);
        assert_eq!(NextHop::from_mp_bytes(&bytes), hop);

        assert!(NextHop::Unset.mp_bytes(family).is_empty());
    }
}
