use std::convert::TryFrom;
use std::fmt;
use std::io;
use std::net::Ipv4Addr;
use std::slice::Iter;

use itertools::Itertools;
use serde::Serialize;

use crate::utils::u32_to_dotted;

#[derive(Serialize, Debug, Copy, Clone, PartialEq)]
pub enum Community {
    STANDARD(u32),
    EXTENDED(u64),
    LARGE((u32, u32, u32)),
}

impl fmt::Display for Community {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Community::STANDARD(value) => write!(f, "{}", u32_to_dotted(*value, ':')),
            Community::EXTENDED(value) => fmt_extended(*value, f),
            Community::LARGE((global, local1, local2)) => {
                write!(f, "{}:{}:{}", global, local1, local2)
            }
        }
    }
}

/// Render an extended community from its wire bytes.
///
/// Layout is type(1) || subtype(1) || six value bytes whose split
/// depends on the type (RFC 4360, RFC 5668, and the Flowspec action
/// communities of RFC 5575). Two layout details worth stating because
/// in-house tooling historically got them wrong: the IPv4-address form
/// is addr(4) || local-admin(2), and the traffic-action sample flag is
/// bit 1 of the last value byte.
fn fmt_extended(value: u64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let bytes = value.to_be_bytes();
    let as2 = u16::from_be_bytes([bytes[2], bytes[3]]);
    let tail32 = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    match (bytes[0], bytes[1]) {
        // 2-octet-AS specific: asn(2) || local-admin(4)
        (0x00, 0x02) => write!(f, "target:{}:{}", as2, tail32),
        (0x00, _) => write!(f, "{}:{}", as2, u32_to_dotted(tail32, '.')),
        // IPv4-address specific: addr(4) || local-admin(2)
        (0x01, subtype) => {
            let addr = Ipv4Addr::from([bytes[2], bytes[3], bytes[4], bytes[5]]);
            let local = u16::from_be_bytes([bytes[6], bytes[7]]);
            if subtype == 0x02 {
                write!(f, "target:{}:{}", addr, local)
            } else {
                write!(f, "{}:{}", addr, local)
            }
        }
        // 4-octet-AS specific: asn(4) || local-admin(2)
        (0x02, subtype) => {
            let asn = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
            let local = u16::from_be_bytes([bytes[6], bytes[7]]);
            if subtype == 0x02 {
                write!(f, "target:{}:{}", asn, local)
            } else {
                write!(f, "{}:{}", asn, local)
            }
        }
        (0x03, _) => write!(f, "opaque:{:#014x}", value & 0xffff_ffff_ffff),
        (0x80, 0x06) => write!(
            f,
            "traffic-rate:{}:{}bps",
            as2,
            f32::from_bits(tail32)
        ),
        (0x80, 0x07) => {
            let sample = bytes[7] & 0b10 != 0;
            let terminal = bytes[7] & 0b01 != 0;
            match (sample, terminal) {
                (true, true) => write!(f, "traffic-action:sample+terminal"),
                (true, false) => write!(f, "traffic-action:sample"),
                (false, true) => write!(f, "traffic-action:terminal"),
                (false, false) => write!(f, "traffic-action:none"),
            }
        }
        (0x80, 0x08) => write!(f, "redirect:{}:{}", as2, u32_to_dotted(tail32, '.')),
        (0x80, 0x09) => write!(f, "traffic-marking:{}", bytes[7]),
        (kind, subtype) => write!(f, "unknown:{:#04x}:{:#04x}:{:#x}", kind, subtype, value),
    }
}

impl TryFrom<&str> for Community {
    type Error = io::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let invalid = || {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid community '{}'", value),
            )
        };
        if let Some(rt) = value.strip_prefix("target:") {
            let chunks: Vec<_> = rt.split(':').collect();
            if chunks.len() != 2 {
                return Err(invalid());
            }
            let asn: u16 = chunks[0].parse().map_err(|_| invalid())?;
            let local: u32 = chunks[1].parse().map_err(|_| invalid())?;
            let mut bytes = [0u8; 8];
            bytes[0..2].copy_from_slice(&[0x00, 0x02]);
            bytes[2..4].copy_from_slice(&asn.to_be_bytes());
            bytes[4..8].copy_from_slice(&local.to_be_bytes());
            return Ok(Community::EXTENDED(u64::from_be_bytes(bytes)));
        }
        let chunks: Vec<_> = value.split(':').collect();
        match chunks.len() {
            // Support 4-byte ASN communities as a single int (e.g. "4259840100")
            1 => chunks[0]
                .parse()
                .map(Community::STANDARD)
                .map_err(|_| invalid()),
            2 => {
                let (a, b) = (
                    chunks[0].parse::<u32>().map_err(|_| invalid())?,
                    chunks[1].parse::<u32>().map_err(|_| invalid())?,
                );
                if a > u32::from(u16::MAX) || b > u32::from(u16::MAX) {
                    return Err(invalid());
                }
                Ok(Community::STANDARD((a * 65536) + b))
            }
            3 => {
                let parts: Vec<u32> = chunks
                    .iter()
                    .map(|c| c.parse::<u32>().map_err(|_| invalid()))
                    .collect::<Result<_, _>>()?;
                Ok(Community::LARGE((parts[0], parts[1], parts[2])))
            }
            _ => Err(invalid()),
        }
    }
}

#[derive(Serialize, Debug, Clone, Default)]
pub struct CommunityList(pub Vec<Community>);

impl CommunityList {
    pub fn iter(&self) -> Iter<Community> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn standard(&self) -> Vec<u32> {
        self.0
            .iter()
            .filter_map(|c| match c {
                Community::STANDARD(comm) => Some(*comm),
                _ => None,
            })
            .collect()
    }

    pub fn extended(&self) -> Vec<u64> {
        self.0
            .iter()
            .filter_map(|c| match c {
                Community::EXTENDED(comm) => Some(*comm),
                _ => None,
            })
            .collect()
    }

    pub fn large(&self) -> Vec<(u32, u32, u32)> {
        self.0
            .iter()
            .filter_map(|c| match c {
                Community::LARGE(comm) => Some(*comm),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for CommunityList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.iter().join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_community_parse() {
        assert_eq!(
            Community::try_from("65000:100").unwrap(),
            Community::STANDARD(65000 * 65536 + 100)
        );
        assert_eq!(
            Community::try_from("65000:1:2").unwrap(),
            Community::LARGE((65000, 1, 2))
        );
        assert!(Community::try_from("65536:65536").is_err());
        assert!(Community::try_from("not-a-community").is_err());
        match Community::try_from("target:65000:100").unwrap() {
            Community::EXTENDED(value) => {
                assert_eq!(value >> 48, 0x02);
            }
            _ => panic!("expected extended community"),
        }
    }

    #[test]
    fn test_community_list_display() {
        assert_eq!(
            CommunityList(vec![Community::STANDARD(100), Community::STANDARD(200)]).to_string(),
            "100 200"
        );
        assert_eq!(
            CommunityList(vec![
                Community::LARGE((65000, 1, 2)),
                Community::STANDARD(200)
            ])
            .to_string(),
            "65000:1:2 200"
        );
    }

    #[test]
    fn test_extended_display() {
        let two_byte_asn =
            u64::from_be_bytes([0x00, 0x00, 0xfd, 0xe8, 0x00, 0x64, 0x00, 0x64]);
        assert_eq!(
            Community::EXTENDED(two_byte_asn).to_string(),
            "65000:100.100"
        );

        let target = u64::from_be_bytes([0x00, 0x02, 0xfd, 0xe8, 0x00, 0x00, 0x00, 0x64]);
        assert_eq!(Community::EXTENDED(target).to_string(), "target:65000:100");

        let redirect = u64::from_be_bytes([0x80, 0x08, 0xfd, 0xe8, 0x00, 0x00, 0x00, 0x64]);
        assert_eq!(
            Community::EXTENDED(redirect).to_string(),
            "redirect:65000:100"
        );

        let traffic_rate =
            u64::from_be_bytes([0x80, 0x06, 0xfd, 0xe8, 0x3f, 0xa0, 0x00, 0x00]);
        assert_eq!(
            Community::EXTENDED(traffic_rate).to_string(),
            "traffic-rate:65000:1.25bps"
        );
    }

    // The address occupies value bytes 0..4 and the local administrator
    // the final two; a /16 shift of the address field is wrong
    #[test]
    fn test_ipv4_specific_layout() {
        let value = u64::from_be_bytes([0x01, 0x01, 192, 0, 2, 1, 0x00, 0x64]);
        assert_eq!(Community::EXTENDED(value).to_string(), "192.0.2.1:100");

        let target = u64::from_be_bytes([0x01, 0x02, 192, 0, 2, 1, 0x00, 0x05]);
        assert_eq!(Community::EXTENDED(target).to_string(), "target:192.0.2.1:5");
    }

    // The sample flag is bit 1 of the final value byte, terminal bit 0
    #[test]
    fn test_traffic_action_flag_bits() {
        let sample = u64::from_be_bytes([0x80, 0x07, 0, 0, 0, 0, 0, 0b10]);
        assert_eq!(
            Community::EXTENDED(sample).to_string(),
            "traffic-action:sample"
        );
        let terminal = u64::from_be_bytes([0x80, 0x07, 0, 0, 0, 0, 0, 0b01]);
        assert_eq!(
            Community::EXTENDED(terminal).to_string(),
            "traffic-action:terminal"
        );
        let neither = u64::from_be_bytes([0x80, 0x07, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            Community::EXTENDED(neither).to_string(),
            "traffic-action:none"
        );
    }
}
