mod codec;
mod manager;
mod message_counts;
mod poller;
mod session;
mod timers;
pub mod transport;

use std::error;
use std::fmt;
use std::io;
use std::net::IpAddr;

pub use codec::{MessageCodec, MessageProtocol};
pub use manager::SessionManager;
use message_counts::MessageCounts;
pub use poller::{Poller, PollerTx};
pub use session::Session;
use timers::SessionTimers;

use crate::message::{MessageError, Notification, Update};

/// Identity of a neighbor in the session table
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
pub struct NeighborKey {
    pub local_ip: IpAddr,
    pub peer_ip: IpAddr,
    pub local_as: u32,
    pub peer_as: u32,
}

impl fmt::Display for NeighborKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}({})<->{}({})",
            self.local_ip, self.local_as, self.peer_ip, self.peer_as
        )
    }
}

#[derive(Debug)]
pub enum SessionUpdate {
    /// Update received from a peer
    Learned((NeighborKey, IpAddr, Update)),
    /// Session reached ESTABLISHED
    Established((NeighborKey, IpAddr)),
    /// Sessions have ended, clear RIB-in for these peers
    /// (`graceful` marks those ending under graceful restart)
    Ended(Vec<(NeighborKey, IpAddr, bool)>),
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Connect,
    Active,
    OpenSent,
    OpenConfirm,
    Established,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let word = match self {
            SessionState::Idle => "Idle",
            SessionState::Connect => "Connect",
            SessionState::Active => "Active",
            SessionState::OpenSent => "OpenSent",
            SessionState::OpenConfirm => "OpenConfirm",
            SessionState::Established => "Established",
        };
        write!(f, "{}", word)
    }
}

#[derive(Debug)]
pub enum SessionError {
    /// Peer de-configured
    Deconfigured,
    /// Received an unexpected ASN [received, expected]
    OpenAsnMismatch(u32, u32),
    /// We announced a 4-byte ASN but the peer did not; the session
    /// restarts in 2-byte compatibility mode (not a protocol error)
    Asn4Downgrade,
    /// Unexpected transition [minor error code]
    FiniteStateMachine(u8),
    /// Hold time expired [interval]
    HoldTimeExpired(u16),
    /// The peer sent a NOTIFICATION; close without replying
    NotificationReceived(Notification),
    /// Wire-format error; close after sending the carried NOTIFICATION
    Protocol(MessageError),
    /// Something happened in transport [reason]
    TransportError(String),
    /// Some other issue happened [reason]
    Other(String),
}

impl SessionError {
    /// The NOTIFICATION we owe the peer before closing, if any
    pub fn notification(&self) -> Option<Notification> {
        use SessionError::*;
        match self {
            Deconfigured => Some(Notification::new(6, 3)),
            OpenAsnMismatch(_, _) => Some(Notification::new(2, 2)),
            FiniteStateMachine(minor) => Some(Notification::new(5, *minor)),
            HoldTimeExpired(_) => Some(Notification::new(4, 0)),
            Protocol(err) => Some(err.notification()),
            Asn4Downgrade | NotificationReceived(_) | TransportError(_) | Other(_) => None,
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Session Error: ")?;
        use SessionError::*;
        match self {
            Deconfigured => write!(f, "Peer De-configured")?,
            OpenAsnMismatch(r, e) => {
                write!(f, "Open ASN Mismatch (received={}, expected={})", r, e)?;
            }
            Asn4Downgrade => write!(f, "Restarting in 2-byte ASN compatibility mode")?,
            HoldTimeExpired(h) => write!(f, "Hold time expired after {} seconds", h)?,
            FiniteStateMachine(minor) => write!(f, "Finite State Machine err [{}]", minor)?,
            NotificationReceived(notification) => {
                write!(f, "Peer sent NOTIFICATION: {}", notification)?;
            }
            Protocol(err) => write!(f, "{}", err)?,
            TransportError(r) => write!(f, "Transport error [{}]", r)?,
            Other(r) => write!(f, "{}", r)?,
        }
        Ok(())
    }
}

impl From<io::Error> for SessionError {
    fn from(error: io::Error) -> Self {
        SessionError::TransportError(error.to_string())
    }
}

impl From<MessageError> for SessionError {
    fn from(error: MessageError) -> Self {
        match error {
            MessageError::Io(err) => SessionError::TransportError(err.to_string()),
            err => SessionError::Protocol(err),
        }
    }
}

impl error::Error for SessionError {}
