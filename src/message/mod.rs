pub mod attributes;
pub mod community;
pub mod family;
pub mod nlri;
pub mod notification;
pub mod open;
pub mod refresh;
pub mod update;

pub use attributes::{
    ASPath, AttributeSet, Identifier, MPReachNLRI, MPUnreachNLRI, Origin, PathAttribute, Segment,
};
pub use community::{Community, CommunityList};
pub use family::{Families, Family, AFI, SAFI};
pub use nlri::{Action, FlowspecFilter, NextHop, Nlri, Prefix, RouteDistinguisher};
pub use notification::Notification;
pub use open::{
    AddPathDirection, Capabilities, GracefulRestart, Negotiated, Open, OpenCapability,
    OpenParameter, AS_TRANS,
};
pub use refresh::{RefreshSubtype, RouteRefresh};
pub use update::Update;

use std::error;
use std::fmt;
use std::io::{self, Error, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// Every BGP message starts with 16 bytes of 0xFF
pub const MARKER: [u8; 16] = [0xff; 16];
/// Header length: marker + length + type
pub const HEADER_LENGTH: u16 = 19;
/// Default maximum message size (RFC 4271)
pub const MAX_MESSAGE_LENGTH: u16 = 4096;
/// Maximum size with the Extended Message capability (RFC 8654)
pub const MAX_EXTENDED_MESSAGE_LENGTH: u16 = 65535;

/// Represents the BGP header accompanying every BGP message
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    /// Total length of the message, including the header, in bytes
    pub length: u16,
    /// The type of message that follows the header
    pub message_type: u8,
}

impl Header {
    pub fn parse(stream: &mut impl Read, negotiated: &Negotiated) -> Result<Header, MessageError> {
        let mut marker: [u8; 16] = [0; 16];
        stream.read_exact(&mut marker).map_err(MessageError::from)?;
        if marker != MARKER {
            return Err(MessageError::header(1, "Marker is not all ones"));
        }
        let length = stream.read_u16::<BigEndian>().map_err(MessageError::from)?;
        if length < HEADER_LENGTH || length > negotiated.max_message_size() {
            return Err(MessageError::header(
                2,
                &format!("Bad message length {}", length),
            ));
        }
        let message_type = stream.read_u8().map_err(MessageError::from)?;
        if !(1..=5).contains(&message_type) {
            return Err(MessageError::header(
                3,
                &format!("Bad message type {}", message_type),
            ));
        }
        Ok(Header {
            length,
            message_type,
        })
    }

    pub fn encode(&self, buf: &mut impl Write) -> Result<(), Error> {
        buf.write_all(&MARKER)?;
        buf.write_u16::<BigEndian>(self.length)?;
        buf.write_u8(self.message_type)
    }
}

/// Represents a single BGP message
#[derive(Debug, Clone)]
pub enum Message {
    Open(Open),
    Update(Update),
    Notification(Notification),
    KeepAlive,
    RouteRefresh(RouteRefresh),
}

impl Message {
    pub fn message_type(&self) -> u8 {
        match self {
            Message::Open(_) => 1,
            Message::Update(_) => 2,
            Message::Notification(_) => 3,
            Message::KeepAlive => 4,
            Message::RouteRefresh(_) => 5,
        }
    }

    /// Parse the payload following an already-validated header
    pub fn parse(
        header: &Header,
        stream: &mut impl Read,
        negotiated: &Negotiated,
    ) -> Result<Message, MessageError> {
        match header.message_type {
            1 => Open::parse(stream)
                .map(Message::Open)
                .map_err(|err| MessageError::open(0, &err.to_string())),
            2 => Update::parse(header, stream, negotiated).map(Message::Update),
            3 => Notification::parse(header, stream)
                .map(Message::Notification)
                .map_err(MessageError::from),
            4 => Ok(Message::KeepAlive),
            5 => RouteRefresh::parse(stream)
                .map(Message::RouteRefresh)
                .map_err(MessageError::from),
            t => Err(MessageError::header(3, &format!("Bad message type {}", t))),
        }
    }

    /// Emit header + payload, enforcing the negotiated size ceiling
    pub fn encode(&self, negotiated: &Negotiated, buf: &mut impl Write) -> Result<(), Error> {
        let mut payload: Vec<u8> = Vec::with_capacity(64);
        match self {
            Message::Open(open) => open.encode(&mut payload)?,
            Message::Update(update) => update.encode(negotiated, &mut payload)?,
            Message::Notification(notification) => notification.encode(&mut payload)?,
            Message::KeepAlive => (),
            Message::RouteRefresh(refresh) => refresh.encode(&mut payload)?,
        }
        let length = payload.len() + usize::from(HEADER_LENGTH);
        if length > usize::from(negotiated.max_message_size()) {
            return Err(Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Cannot encode message of length {} (maximum {})",
                    length,
                    negotiated.max_message_size()
                ),
            ));
        }
        let header = Header {
            length: length as u16,
            message_type: self.message_type(),
        };
        header.encode(buf)?;
        buf.write_all(&payload)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let word = match self {
            Message::Open(_) => "OPEN",
            Message::Update(_) => "UPDATE",
            Message::Notification(_) => "NOTIFICATION",
            Message::KeepAlive => "KEEPALIVE",
            Message::RouteRefresh(_) => "ROUTE-REFRESH",
        };
        write!(f, "{}", word)
    }
}

/// Wire-format error; `Notify` carries the NOTIFICATION to send before
/// the session closes
#[derive(Debug)]
pub enum MessageError {
    Notify {
        code: u8,
        subcode: u8,
        reason: String,
    },
    Io(io::Error),
}

impl MessageError {
    pub fn header(subcode: u8, reason: &str) -> Self {
        MessageError::Notify {
            code: 1,
            subcode,
            reason: reason.to_string(),
        }
    }

    pub fn open(subcode: u8, reason: &str) -> Self {
        MessageError::Notify {
            code: 2,
            subcode,
            reason: reason.to_string(),
        }
    }

    pub fn update(subcode: u8, reason: &str) -> Self {
        MessageError::Notify {
            code: 3,
            subcode,
            reason: reason.to_string(),
        }
    }

    /// The NOTIFICATION to send for this error
    pub fn notification(&self) -> Notification {
        match self {
            MessageError::Notify { code, subcode, .. } => Notification::new(*code, *subcode),
            // Unreadable framing; the connection is out of sync
            MessageError::Io(_) => Notification::new(1, 1),
        }
    }
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MessageError::Notify {
                code,
                subcode,
                reason,
            } => write!(f, "{}: {}", Notification::new(*code, *subcode), reason),
            MessageError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl error::Error for MessageError {}

impl From<io::Error> for MessageError {
    fn from(error: io::Error) -> Self {
        MessageError::Io(error)
    }
}
