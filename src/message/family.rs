use std::collections::HashSet;
use std::convert::TryFrom;
use std::fmt;
use std::io::{Error, ErrorKind};

use serde::{self, Deserialize, Deserializer, Serialize, Serializer};

/// Represents an Address Family Identifier
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq, PartialOrd, Ord)]
#[repr(u16)]
pub enum AFI {
    /// Internet Protocol version 4 (32 bits)
    IPV4 = 1,
    /// Internet Protocol version 6 (128 bits)
    IPV6 = 2,
    /// Layer-2 VPN
    L2VPN = 25,
    /// BGP Link-State
    BGPLS = 16388,
}

impl AFI {
    /// Maximum prefix length (in bits) for this address family
    pub fn max_prefix_length(self) -> u8 {
        match self {
            AFI::IPV4 => 32,
            AFI::IPV6 => 128,
            _ => 0,
        }
    }

    /// An empty buffer sized to hold a full address of this family
    pub fn empty_buffer(self) -> Vec<u8> {
        match self {
            AFI::IPV4 => vec![0u8; 4],
            AFI::IPV6 => vec![0u8; 16],
            _ => vec![],
        }
    }
}

impl TryFrom<u16> for AFI {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(AFI::IPV4),
            2 => Ok(AFI::IPV6),
            25 => Ok(AFI::L2VPN),
            16388 => Ok(AFI::BGPLS),
            _ => Err(Error::new(
                ErrorKind::InvalidData,
                format!("Number {} does not represent a valid address family", value),
            )),
        }
    }
}

impl fmt::Display for AFI {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            AFI::IPV4 => "IPv4",
            AFI::IPV6 => "IPv6",
            AFI::L2VPN => "L2VPN",
            AFI::BGPLS => "BGP-LS",
        };
        write!(f, "{}", s)
    }
}

/// Represents a Subsequent Address Family Identifier
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SAFI {
    /// Unicast Forwarding
    Unicast = 1,
    /// Multicast Forwarding
    Multicast = 2,
    /// Labeled unicast (RFC 8277)
    Mpls = 4,
    /// Ethernet VPN (RFC 7432)
    Evpn = 70,
    /// BGP Link-State
    BGPLS = 71,
    /// MPLS-VPN (RFC 4364)
    MplsVpn = 128,
    /// Flowspec Traffic Filtering (RFC 5575)
    Flowspec = 133,
    /// Flowspec Traffic Filtering in VPNs
    FlowspecVPN = 134,
}

impl TryFrom<u8> for SAFI {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(SAFI::Unicast),
            2 => Ok(SAFI::Multicast),
            4 => Ok(SAFI::Mpls),
            70 => Ok(SAFI::Evpn),
            71 => Ok(SAFI::BGPLS),
            128 => Ok(SAFI::MplsVpn),
            133 => Ok(SAFI::Flowspec),
            134 => Ok(SAFI::FlowspecVPN),
            _ => Err(Error::new(
                ErrorKind::InvalidData,
                format!(
                    "Number {} does not represent a valid subsequent address family",
                    value
                ),
            )),
        }
    }
}

impl fmt::Display for SAFI {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            SAFI::Unicast => "Unicast",
            SAFI::Multicast => "Multicast",
            SAFI::Mpls => "Labeled Unicast",
            SAFI::Evpn => "EVPN",
            SAFI::BGPLS => "BGP-LS",
            SAFI::MplsVpn => "MPLS-VPN",
            SAFI::Flowspec => "Flowspec",
            SAFI::FlowspecVPN => "Flowspec VPN",
        };
        write!(f, "{}", s)
    }
}

/// An (AFI, SAFI) pair identifying the semantics of an NLRI
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Family {
    pub afi: AFI,
    pub safi: SAFI,
}

impl Family {
    pub fn new(afi: AFI, safi: SAFI) -> Self {
        Self { afi, safi }
    }

    pub fn ipv4_unicast() -> Self {
        Self::new(AFI::IPV4, SAFI::Unicast)
    }

    /// IPv4 Unicast routes are the only family carried in the
    /// classic UPDATE withdrawn/NLRI fields
    pub fn is_classic_unicast(self) -> bool {
        (self.afi, self.safi) == (AFI::IPV4, SAFI::Unicast)
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.afi, self.safi)
    }
}

impl From<&Family> for (AFI, SAFI) {
    fn from(family: &Family) -> (AFI, SAFI) {
        (family.afi, family.safi)
    }
}

impl TryFrom<(u16, u8)> for Family {
    type Error = Error;

    fn try_from(v: (u16, u8)) -> Result<Self, Self::Error> {
        Ok(Self::new(AFI::try_from(v.0)?, SAFI::try_from(v.1)?))
    }
}

impl TryFrom<&str> for Family {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let parts: Vec<&str> = s.trim().split_whitespace().collect();
        if parts.len() != 2 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!("Incorrect family format: '{}'", s),
            ));
        }
        let afi = match parts[0] {
            "ipv4" => AFI::IPV4,
            "ipv6" => AFI::IPV6,
            "l2vpn" => AFI::L2VPN,
            "bgp-ls" => AFI::BGPLS,
            family => {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    format!("Unsupported AFI: '{}'", family),
                ))
            }
        };
        let safi = match parts[1] {
            "unicast" => SAFI::Unicast,
            "multicast" => SAFI::Multicast,
            "nlri-mpls" => SAFI::Mpls,
            "evpn" => SAFI::Evpn,
            "bgp-ls" => SAFI::BGPLS,
            "mpls-vpn" => SAFI::MplsVpn,
            "flow" => SAFI::Flowspec,
            "flow-vpn" => SAFI::FlowspecVPN,
            sfamily => {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    format!("Unsupported SAFI: '{}'", sfamily),
                ))
            }
        };
        Ok(Family::new(afi, safi))
    }
}

impl Serialize for Family {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Family {
    fn deserialize<D>(deserializer: D) -> Result<Family, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Family::try_from(s.as_str()).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Families(HashSet<Family>);

impl Families {
    pub fn new(families: Vec<Family>) -> Self {
        Self(families.into_iter().collect())
    }

    pub fn common(&self, other: &Families) -> Self {
        Self(self.0.intersection(&other.0).cloned().collect())
    }

    pub fn contains(&self, family: Family) -> bool {
        self.0.contains(&family)
    }

    pub fn insert(&mut self, family: Family) {
        self.0.insert(family);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::collections::hash_set::Iter<Family> {
        self.0.iter()
    }
}

impl From<Vec<Family>> for Families {
    fn from(families: Vec<Family>) -> Self {
        Self::new(families)
    }
}
