use std::collections::HashMap;
use std::convert::TryFrom;
use std::fmt;
use std::io::{Error, ErrorKind, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::family::{Families, Family};
use super::{MAX_EXTENDED_MESSAGE_LENGTH, MAX_MESSAGE_LENGTH};

/// AS_TRANS, the 2-byte stand-in for a 4-byte ASN (RFC 6793)
pub const AS_TRANS: u16 = 23456;

/// Represents a BGP Open message
#[derive(Clone, Debug)]
pub struct Open {
    /// Protocol version; the current BGP version number is 4
    pub version: u8,
    /// ASN of the sender (AS_TRANS when it does not fit in 2 bytes)
    pub peer_asn: u16,
    /// Seconds the sender proposes for the hold timer
    pub hold_timer: u16,
    /// BGP Identifier (router-id) of the sender
    pub identifier: u32,
    /// Optional parameters
    pub parameters: Vec<OpenParameter>,
}

impl Open {
    pub fn parse(stream: &mut impl Read) -> Result<Open, Error> {
        let version = stream.read_u8()?;
        let peer_asn = stream.read_u16::<BigEndian>()?;
        let hold_timer = stream.read_u16::<BigEndian>()?;
        let identifier = stream.read_u32::<BigEndian>()?;
        let mut length = i32::from(stream.read_u8()?);

        let mut parameters: Vec<OpenParameter> = Vec::with_capacity(4);
        while length > 0 {
            let (bytes_read, parameter) = OpenParameter::parse(stream)?;
            parameters.push(parameter);
            length -= i32::from(bytes_read);
        }
        if length != 0 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "Open length does not match options length",
            ));
        }

        Ok(Open {
            version,
            peer_asn,
            hold_timer,
            identifier,
            parameters,
        })
    }

    pub fn encode(&self, buf: &mut impl Write) -> Result<(), Error> {
        buf.write_u8(self.version)?;
        buf.write_u16::<BigEndian>(self.peer_asn)?;
        buf.write_u16::<BigEndian>(self.hold_timer)?;
        buf.write_u32::<BigEndian>(self.identifier)?;

        let mut parameter_buf: Vec<u8> = Vec::with_capacity(32);
        for p in self.parameters.iter() {
            p.encode(&mut parameter_buf)?;
        }
        if parameter_buf.len() > usize::from(u8::MAX) {
            return Err(Error::new(
                ErrorKind::Other,
                format!(
                    "Cannot encode parameters with length {}",
                    parameter_buf.len()
                ),
            ));
        }
        buf.write_u8(parameter_buf.len() as u8)?;
        buf.write_all(&parameter_buf)
    }

    /// The peer ASN; 4-byte capability value first, 2-byte field fallback
    pub fn asn(&self) -> u32 {
        self.capabilities()
            .iter()
            .find_map(|cap| match cap {
                OpenCapability::FourByteASN(asn) => Some(*asn),
                _ => None,
            })
            .unwrap_or_else(|| u32::from(self.peer_asn))
    }

    pub fn capabilities(&self) -> Vec<&OpenCapability> {
        self.parameters
            .iter()
            .filter_map(|p| match p {
                OpenParameter::Capabilities(caps) => Some(caps.iter()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

/// The direction which an ADD-PATH capability indicates a peer can
/// provide additional paths
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum AddPathDirection {
    ReceivePaths = 1,
    SendPaths = 2,
    SendReceivePaths = 3,
}

impl AddPathDirection {
    pub fn can_send(self) -> bool {
        matches!(self, AddPathDirection::SendPaths | AddPathDirection::SendReceivePaths)
    }

    pub fn can_receive(self) -> bool {
        matches!(
            self,
            AddPathDirection::ReceivePaths | AddPathDirection::SendReceivePaths
        )
    }
}

impl TryFrom<u8> for AddPathDirection {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(AddPathDirection::ReceivePaths),
            2 => Ok(AddPathDirection::SendPaths),
            3 => Ok(AddPathDirection::SendReceivePaths),
            _ => Err(Error::new(
                ErrorKind::InvalidData,
                format!("Number {} does not represent a valid ADD-PATH direction", value),
            )),
        }
    }
}

/// Graceful Restart parameters (RFC 4724)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GracefulRestart {
    /// Restart State flag: the sender has restarted
    pub restarting: bool,
    /// Seconds the receiver should retain routes for
    pub restart_time: u16,
    /// Families and their forwarding-state-preserved flag
    pub families: Vec<(Family, bool)>,
}

/// Represents a known capability held in an OpenParameter
#[derive(Debug, Clone, PartialEq)]
pub enum OpenCapability {
    /// Willing to exchange this (AFI, SAFI) over the session (code 1)
    MultiProtocol(Family),
    /// Supports ROUTE-REFRESH messages (code 2)
    RouteRefresh,
    /// Supports messages up to 65535 bytes (code 6)
    ExtendedMessage,
    /// Graceful Restart timers and families (code 64)
    GracefulRestart(GracefulRestart),
    /// Supports 4-byte ASNs; carries the sender ASN (code 65)
    FourByteASN(u32),
    /// Supports multiple paths per prefix (code 69)
    AddPath(Vec<(Family, AddPathDirection)>),
    /// Brackets route refreshes with BEGIN/END markers (code 70)
    EnhancedRouteRefresh,
    /// Unknown (or unsupported) capability, recorded but not rejected
    Unknown { code: u8, value: Vec<u8> },
}

impl OpenCapability {
    fn parse(stream: &mut impl Read) -> Result<(u16, OpenCapability), Error> {
        let cap_code = stream.read_u8()?;
        let cap_length = stream.read_u8()?;

        let capability = match cap_code {
            1 => {
                if cap_length != 4 {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        "Multi-Protocol capability must be 4 bytes in length",
                    ));
                }
                let afi = stream.read_u16::<BigEndian>()?;
                let _ = stream.read_u8()?;
                let safi = stream.read_u8()?;
                OpenCapability::MultiProtocol(Family::try_from((afi, safi))?)
            }
            2 => {
                if cap_length != 0 {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        "Route-Refresh capability must be 0 bytes in length",
                    ));
                }
                OpenCapability::RouteRefresh
            }
            6 => {
                if cap_length != 0 {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        "Extended-Message capability must be 0 bytes in length",
                    ));
                }
                OpenCapability::ExtendedMessage
            }
            64 => {
                if cap_length < 2 || (cap_length - 2) % 4 != 0 {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        "Graceful-Restart capability has invalid length",
                    ));
                }
                let header = stream.read_u16::<BigEndian>()?;
                let restarting = header & 0x8000 != 0;
                let restart_time = header & 0x0fff;
                let mut families = Vec::with_capacity(usize::from((cap_length - 2) / 4));
                for _ in 0..((cap_length - 2) / 4) {
                    let afi = stream.read_u16::<BigEndian>()?;
                    let safi = stream.read_u8()?;
                    let family_flags = stream.read_u8()?;
                    families.push((Family::try_from((afi, safi))?, family_flags & 0x80 != 0));
                }
                OpenCapability::GracefulRestart(GracefulRestart {
                    restarting,
                    restart_time,
                    families,
                })
            }
            65 => {
                if cap_length != 4 {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        "4-byte ASN capability must be 4 bytes in length",
                    ));
                }
                OpenCapability::FourByteASN(stream.read_u32::<BigEndian>()?)
            }
            69 => {
                if cap_length % 4 != 0 {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        "ADD-PATH capability length must be divisible by 4",
                    ));
                }
                let mut add_paths = Vec::with_capacity(usize::from(cap_length / 4));
                for _ in 0..(cap_length / 4) {
                    let afi = stream.read_u16::<BigEndian>()?;
                    let safi = stream.read_u8()?;
                    let direction = AddPathDirection::try_from(stream.read_u8()?)?;
                    add_paths.push((Family::try_from((afi, safi))?, direction));
                }
                OpenCapability::AddPath(add_paths)
            }
            70 => {
                if cap_length != 0 {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        "Enhanced-Route-Refresh capability must be 0 bytes in length",
                    ));
                }
                OpenCapability::EnhancedRouteRefresh
            }
            _ => {
                let mut value = vec![0; cap_length as usize];
                stream.read_exact(&mut value)?;
                OpenCapability::Unknown {
                    code: cap_code,
                    value,
                }
            }
        };
        Ok((2 + u16::from(cap_length), capability))
    }

    fn encode(&self, buf: &mut impl Write) -> Result<(), Error> {
        match self {
            OpenCapability::MultiProtocol(family) => {
                buf.write_u8(1)?;
                buf.write_u8(4)?;
                buf.write_u16::<BigEndian>(family.afi as u16)?;
                buf.write_u8(0)?;
                buf.write_u8(family.safi as u8)
            }
            OpenCapability::RouteRefresh => {
                buf.write_u8(2)?;
                buf.write_u8(0)
            }
            OpenCapability::ExtendedMessage => {
                buf.write_u8(6)?;
                buf.write_u8(0)
            }
            OpenCapability::GracefulRestart(gr) => {
                buf.write_u8(64)?;
                buf.write_u8(2 + 4 * gr.families.len() as u8)?;
                let mut header = gr.restart_time & 0x0fff;
                if gr.restarting {
                    header |= 0x8000;
                }
                buf.write_u16::<BigEndian>(header)?;
                for (family, preserved) in &gr.families {
                    buf.write_u16::<BigEndian>(family.afi as u16)?;
                    buf.write_u8(family.safi as u8)?;
                    buf.write_u8(if *preserved { 0x80 } else { 0 })?;
                }
                Ok(())
            }
            OpenCapability::FourByteASN(asn) => {
                buf.write_u8(65)?;
                buf.write_u8(4)?;
                buf.write_u32::<BigEndian>(*asn)
            }
            OpenCapability::AddPath(add_paths) => {
                buf.write_u8(69)?;
                if add_paths.len() * 4 > usize::from(u8::MAX) {
                    return Err(Error::new(
                        ErrorKind::Other,
                        format!("Cannot encode ADD-PATH with {} families", add_paths.len()),
                    ));
                }
                buf.write_u8(add_paths.len() as u8 * 4)?;
                for (family, direction) in add_paths.iter() {
                    buf.write_u16::<BigEndian>(family.afi as u16)?;
                    buf.write_u8(family.safi as u8)?;
                    buf.write_u8(*direction as u8)?;
                }
                Ok(())
            }
            OpenCapability::EnhancedRouteRefresh => {
                buf.write_u8(70)?;
                buf.write_u8(0)
            }
            OpenCapability::Unknown { code, value } => {
                buf.write_u8(*code)?;
                buf.write_u8(value.len() as u8)?;
                buf.write_all(value)
            }
        }
    }
}

/// Represents a parameter in the optional parameter section of an Open
#[derive(Debug, Clone, PartialEq)]
pub enum OpenParameter {
    /// A list of capabilities supported by the sender
    Capabilities(Vec<OpenCapability>),
    /// Unknown (or unsupported) parameter
    Unknown { param_type: u8, value: Vec<u8> },
}

impl OpenParameter {
    fn parse(stream: &mut impl Read) -> Result<(u16, OpenParameter), Error> {
        let param_type = stream.read_u8()?;
        let param_length = stream.read_u8()?;

        let parameter = if param_type == 2 {
            let mut bytes_read: i32 = 0;
            let mut capabilities = Vec::with_capacity(usize::from(param_length) / 2);
            while bytes_read < i32::from(param_length) {
                let (cap_length, cap) = OpenCapability::parse(stream)?;
                capabilities.push(cap);
                bytes_read += i32::from(cap_length);
            }
            if bytes_read != i32::from(param_length) {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!(
                        "Capability length {} does not match parameter length {}",
                        bytes_read, param_length
                    ),
                ));
            }
            OpenParameter::Capabilities(capabilities)
        } else {
            let mut value = vec![0; param_length as usize];
            stream.read_exact(&mut value)?;
            OpenParameter::Unknown { param_type, value }
        };
        Ok((2 + u16::from(param_length), parameter))
    }

    fn encode(&self, buf: &mut impl Write) -> Result<(), Error> {
        match self {
            OpenParameter::Capabilities(caps) => {
                buf.write_u8(2)?;
                let mut cap_buf: Vec<u8> = Vec::with_capacity(16);
                for c in caps.iter() {
                    c.encode(&mut cap_buf)?;
                }
                if cap_buf.len() > usize::from(u8::MAX) {
                    return Err(Error::new(
                        ErrorKind::Other,
                        format!("Cannot encode capabilities with length {}", cap_buf.len()),
                    ));
                }
                buf.write_u8(cap_buf.len() as u8)?;
                buf.write_all(&cap_buf)
            }
            OpenParameter::Unknown { param_type, value } => {
                buf.write_u8(*param_type)?;
                buf.write_u8(value.len() as u8)?;
                buf.write_all(value)
            }
        }
    }
}

/// The set of capabilities one side declares in its OPEN
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub four_byte_asn: Option<u32>,
    pub families: Families,
    pub add_path: HashMap<Family, AddPathDirection>,
    pub route_refresh: bool,
    pub enhanced_route_refresh: bool,
    pub extended_message: bool,
    pub graceful_restart: Option<GracefulRestart>,
    pub unknown: Vec<(u8, Vec<u8>)>,
}

impl Capabilities {
    pub fn from_parameters(parameters: &[OpenParameter]) -> Self {
        let mut caps = Capabilities::default();
        for parameter in parameters {
            let list = match parameter {
                OpenParameter::Capabilities(list) => list,
                OpenParameter::Unknown { .. } => continue,
            };
            for capability in list {
                match capability {
                    OpenCapability::MultiProtocol(family) => caps.families.insert(*family),
                    OpenCapability::RouteRefresh => caps.route_refresh = true,
                    OpenCapability::ExtendedMessage => caps.extended_message = true,
                    OpenCapability::GracefulRestart(gr) => {
                        caps.graceful_restart = Some(gr.clone())
                    }
                    OpenCapability::FourByteASN(asn) => caps.four_byte_asn = Some(*asn),
                    OpenCapability::AddPath(paths) => {
                        for (family, direction) in paths {
                            caps.add_path.insert(*family, *direction);
                        }
                    }
                    OpenCapability::EnhancedRouteRefresh => caps.enhanced_route_refresh = true,
                    OpenCapability::Unknown { code, value } => {
                        caps.unknown.push((*code, value.clone()))
                    }
                }
            }
        }
        caps
    }

    pub fn to_parameters(&self) -> Vec<OpenParameter> {
        let mut capabilities: Vec<OpenCapability> = Vec::with_capacity(8);
        for family in self.families.iter() {
            capabilities.push(OpenCapability::MultiProtocol(*family));
        }
        if self.route_refresh {
            capabilities.push(OpenCapability::RouteRefresh);
        }
        if self.enhanced_route_refresh {
            capabilities.push(OpenCapability::EnhancedRouteRefresh);
        }
        if self.extended_message {
            capabilities.push(OpenCapability::ExtendedMessage);
        }
        if let Some(asn) = self.four_byte_asn {
            capabilities.push(OpenCapability::FourByteASN(asn));
        }
        if !self.add_path.is_empty() {
            let mut paths: Vec<_> = self
                .add_path
                .iter()
                .map(|(family, direction)| (*family, *direction))
                .collect();
            paths.sort_by_key(|(family, _)| *family);
            capabilities.push(OpenCapability::AddPath(paths));
        }
        if let Some(gr) = &self.graceful_restart {
            capabilities.push(OpenCapability::GracefulRestart(gr.clone()));
        }
        vec![OpenParameter::Capabilities(capabilities)]
    }

    /// Intersect our declared capabilities with the peer's; the result is
    /// frozen at OPENCONFIRM and drives all further codec decisions
    pub fn negotiate(
        &self,
        received: &Capabilities,
        local_asn: u32,
        remote_asn: u32,
        hold_time: u16,
    ) -> Negotiated {
        let mut add_path = HashMap::new();
        for (family, local_dir) in &self.add_path {
            if let Some(remote_dir) = received.add_path.get(family) {
                let send = local_dir.can_send() && remote_dir.can_receive();
                let receive = local_dir.can_receive() && remote_dir.can_send();
                let direction = match (send, receive) {
                    (true, true) => Some(AddPathDirection::SendReceivePaths),
                    (true, false) => Some(AddPathDirection::SendPaths),
                    (false, true) => Some(AddPathDirection::ReceivePaths),
                    (false, false) => None,
                };
                if let Some(direction) = direction {
                    add_path.insert(*family, direction);
                }
            }
        }
        // Legacy blanket negotiation path: when every common family ended
        // up bidirectional, older speakers treat the whole session as
        // path-id extended. Kept alongside the per-family map.
        let families = self.families.common(&received.families);
        let extended_path_nlri = !add_path.is_empty()
            && families
                .iter()
                .all(|f| add_path.get(f) == Some(&AddPathDirection::SendReceivePaths));

        let graceful_restart = match (&self.graceful_restart, &received.graceful_restart) {
            (Some(_), Some(theirs)) => Some(theirs.clone()),
            _ => None,
        };

        Negotiated {
            asn4: self.four_byte_asn.is_some() && received.four_byte_asn.is_some(),
            local_asn,
            remote_asn,
            hold_time,
            families,
            add_path,
            extended_path_nlri,
            route_refresh: self.route_refresh && received.route_refresh,
            enhanced_route_refresh: self.enhanced_route_refresh
                && received.enhanced_route_refresh,
            extended_message: self.extended_message && received.extended_message,
            graceful_restart,
        }
    }
}

/// The intersection of local and peer OPEN capabilities, plus the
/// session constants the codec needs. Frozen at OPENCONFIRM.
#[derive(Debug, Clone)]
pub struct Negotiated {
    pub asn4: bool,
    pub local_asn: u32,
    pub remote_asn: u32,
    pub hold_time: u16,
    pub families: Families,
    pub add_path: HashMap<Family, AddPathDirection>,
    /// Legacy blanket add-path flag; see `Capabilities::negotiate`
    pub extended_path_nlri: bool,
    pub route_refresh: bool,
    pub enhanced_route_refresh: bool,
    pub extended_message: bool,
    pub graceful_restart: Option<GracefulRestart>,
}

impl Default for Negotiated {
    fn default() -> Self {
        Negotiated {
            // 4-byte ASNs assumed until an OPEN exchange says otherwise
            asn4: true,
            local_asn: 0,
            remote_asn: 0,
            hold_time: 180,
            families: Families::default(),
            add_path: HashMap::new(),
            extended_path_nlri: false,
            route_refresh: false,
            enhanced_route_refresh: false,
            extended_message: false,
            graceful_restart: None,
        }
    }
}

impl Negotiated {
    pub fn max_message_size(&self) -> u16 {
        if self.extended_message {
            MAX_EXTENDED_MESSAGE_LENGTH
        } else {
            MAX_MESSAGE_LENGTH
        }
    }

    pub fn addpath_send(&self, family: Family) -> bool {
        self.extended_path_nlri
            || self
                .add_path
                .get(&family)
                .map(|d| d.can_send())
                .unwrap_or(false)
    }

    pub fn addpath_receive(&self, family: Family) -> bool {
        self.extended_path_nlri
            || self
                .add_path
                .get(&family)
                .map(|d| d.can_receive())
                .unwrap_or(false)
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut parts: Vec<String> = self.families.iter().map(|fam| fam.to_string()).collect();
        parts.sort();
        if self.four_byte_asn.is_some() {
            parts.push("4-byte ASN".to_string());
        }
        if self.route_refresh {
            parts.push("Route-Refresh".to_string());
        }
        if self.enhanced_route_refresh {
            parts.push("Enhanced-Route-Refresh".to_string());
        }
        if self.extended_message {
            parts.push("Extended-Message".to_string());
        }
        if self.graceful_restart.is_some() {
            parts.push("Graceful-Restart".to_string());
        }
        if !self.add_path.is_empty() {
            parts.push("Add-Path".to_string());
        }
        write!(f, "{}", parts.join(", "))
    }
}
