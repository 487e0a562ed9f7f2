use std::convert::TryFrom;
use std::fmt;
use std::io::{Error, ErrorKind, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::family::Family;

/// The reserved byte of a ROUTE-REFRESH doubles as the Enhanced
/// Route Refresh subtype (RFC 7313)
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum RefreshSubtype {
    /// Plain route-refresh request
    Request = 0,
    /// Start of a refresh window (BoRR)
    Begin = 1,
    /// End of a refresh window (EoRR)
    End = 2,
}

impl TryFrom<u8> for RefreshSubtype {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RefreshSubtype::Request),
            1 => Ok(RefreshSubtype::Begin),
            2 => Ok(RefreshSubtype::End),
            _ => Err(Error::new(
                ErrorKind::InvalidData,
                format!("Invalid route-refresh subtype {}", value),
            )),
        }
    }
}

impl fmt::Display for RefreshSubtype {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let word = match self {
            RefreshSubtype::Request => "request",
            RefreshSubtype::Begin => "begin",
            RefreshSubtype::End => "end",
        };
        write!(f, "{}", word)
    }
}

/// Represents a BGP ROUTE-REFRESH message (RFC 2918 / RFC 7313)
#[derive(Debug, Clone, PartialEq)]
pub struct RouteRefresh {
    pub family: Family,
    pub subtype: RefreshSubtype,
}

impl RouteRefresh {
    pub fn new(family: Family, subtype: RefreshSubtype) -> Self {
        Self { family, subtype }
    }

    pub fn parse(stream: &mut impl Read) -> Result<RouteRefresh, Error> {
        let afi = stream.read_u16::<BigEndian>()?;
        let subtype = RefreshSubtype::try_from(stream.read_u8()?)?;
        let safi = stream.read_u8()?;

        Ok(RouteRefresh {
            family: Family::try_from((afi, safi))?,
            subtype,
        })
    }

    pub fn encode(&self, buf: &mut impl Write) -> Result<(), Error> {
        buf.write_u16::<BigEndian>(self.family.afi as u16)?;
        buf.write_u8(self.subtype as u8)?;
        buf.write_u8(self.family.safi as u8)
    }
}

impl fmt::Display for RouteRefresh {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ROUTE-REFRESH {} [{}]", self.family, self.subtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::family::{AFI, SAFI};

    #[test]
    fn test_refresh_round_trip() {
        for subtype in [RefreshSubtype::Request, RefreshSubtype::Begin, RefreshSubtype::End] {
            let refresh = RouteRefresh::new(Family::new(AFI::IPV6, SAFI::Unicast), subtype);
            let mut buf = vec![];
            refresh.encode(&mut buf).unwrap();
            assert_eq!(buf.len(), 4);
            let mut cursor = std::io::Cursor::new(&buf[..]);
            assert_eq!(RouteRefresh::parse(&mut cursor).unwrap(), refresh);
        }
    }
}
