use std::fmt;
use std::io::{Error, Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};

use super::Header;

/// Represents a BGP Notification message (RFC 4271 4.5)
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    /// Major error code
    pub code: u8,
    /// Minor error code (subcode)
    pub subcode: u8,
    /// Notification data
    pub data: Vec<u8>,
}

impl Notification {
    pub fn new(code: u8, subcode: u8) -> Self {
        Self {
            code,
            subcode,
            data: vec![],
        }
    }

    pub fn with_data(code: u8, subcode: u8, data: Vec<u8>) -> Self {
        Self {
            code,
            subcode,
            data,
        }
    }

    pub fn parse(header: &Header, stream: &mut impl Read) -> Result<Notification, Error> {
        let code = stream.read_u8()?;
        let subcode = stream.read_u8()?;
        let data = if header.length > 21 {
            let mut data = vec![0; header.length as usize - 21];
            stream.read_exact(&mut data)?;
            data
        } else {
            vec![]
        };

        Ok(Notification {
            code,
            subcode,
            data,
        })
    }

    pub fn encode(&self, buf: &mut impl Write) -> Result<(), Error> {
        buf.write_u8(self.code)?;
        buf.write_u8(self.subcode)?;
        buf.write_all(&self.data)
    }

    /// Major error code description
    pub fn major(&self) -> String {
        match self.code {
            1 => "Message Header Error".to_string(),
            2 => "OPEN Message Error".to_string(),
            3 => "UPDATE Message Error".to_string(),
            4 => "Hold Timer Expired".to_string(),
            5 => "Finite State Machine Error".to_string(),
            6 => "Cease".to_string(),
            7 => "ROUTE-REFRESH Message Error".to_string(),
            _ => format!("Major Code {}", self.code),
        }
    }

    /// Minor error code description
    pub fn minor(&self) -> String {
        let minor = match (self.code, self.subcode) {
            (1, 1) => "Connection Not Synchronized",
            (1, 2) => "Bad Message Length",
            (1, 3) => "Bad Message Type",
            (2, 1) => "Unsupported Version Number",
            (2, 2) => "Bad Peer AS",
            (2, 3) => "Bad BGP Identifier",
            (2, 4) => "Unsupported Optional Parameter",
            (2, 6) => "Unacceptable Hold Time",
            (2, 7) => "Unsupported Capability",
            (3, 1) => "Malformed Attribute List",
            (3, 2) => "Unrecognized Well-known Attribute",
            (3, 3) => "Missing Well-known Attribute",
            (3, 4) => "Attribute Flags Error",
            (3, 5) => "Attribute Length Error",
            (3, 6) => "Invalid ORIGIN Attribute",
            (3, 8) => "Invalid NEXT_HOP Attribute",
            (3, 9) => "Optional Attribute Error",
            (3, 10) => "Invalid Network Field",
            (3, 11) => "Malformed AS_PATH",
            (6, 1) => "Maximum Number of Prefixes Reached",
            (6, 2) => "Administrative Shutdown",
            (6, 3) => "Peer De-configured",
            (6, 4) => "Administrative Reset",
            (6, 5) => "Connection Rejected",
            (6, 6) => "Other Configuration Change",
            (6, 7) => "Connection Collision Resolution",
            (6, 8) => "Out of Resources",
            _ => return format!("{}", self.subcode),
        };
        minor.to_string()
    }

    /// Included message (if the data bytes are printable)
    pub fn message(&self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        String::from_utf8(self.data.clone()).ok()
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.message() {
            Some(message) => write!(f, "{} / {} ({})", self.major(), self.minor(), message),
            None => write!(f, "{} / {}", self.major(), self.minor()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_display() {
        let notification = Notification::new(6, 3);
        assert_eq!(&notification.to_string(), "Cease / Peer De-configured");

        let notification =
            Notification::with_data(2, 7, b"capability negotiation failed".to_vec());
        assert_eq!(
            &notification.to_string(),
            "OPEN Message Error / Unsupported Capability (capability negotiation failed)"
        );

        let notification = Notification::new(9, 0);
        assert_eq!(&notification.to_string(), "Major Code 9 / 0");
    }

    #[test]
    fn test_notification_round_trip() {
        let notification = Notification::with_data(3, 1, vec![0xde, 0xad]);
        let mut buf = vec![];
        notification.encode(&mut buf).unwrap();
        let header = Header {
            length: 19 + buf.len() as u16,
            message_type: 3,
        };
        let mut cursor = std::io::Cursor::new(&buf[..]);
        let parsed = Notification::parse(&header, &mut cursor).unwrap();
        assert_eq!(parsed, notification);
    }
}
