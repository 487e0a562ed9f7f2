use bitflags::bitflags;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use std::fmt;
use std::io::{Error, ErrorKind, Read, Write};

use super::Prefix;
use crate::message::family::AFI;

/// Check if the EOL bit is set, signaling the last filter in the list
fn is_end_of_list(b: u8) -> bool {
    b & (1 << 7) != 0
}

/// Determine the value length; will only return a value in [1, 2, 4, 8]
fn find_length(b: u8) -> u8 {
    1 << ((b & 0x30) >> 4)
}

bitflags! {
    /// Operator for numeric values, providing ways to compare values
    pub struct NumericOperator: u8 {
        /// Equality comparison between data and value
        const EQ  = 0b0000_0001;
        /// Greater-than comparison between data and value
        const GT  = 0b0000_0010;
        /// Lesser-than comparison between data and value
        const LT  = 0b0000_0100;
        /// Value length of 2 bytes
        const V2  = 0b0001_0000;
        /// Value length of 4 bytes
        const V4  = 0b0010_0000;
        /// Value length of 8 bytes
        const V8  = 0b0011_0000;
        /// AND bit, if set, must be matched in addition to previous value
        const AND = 0b0100_0000;
        /// This is the last {op, value} pair in the list
        const EOL = 0b1000_0000;
    }
}

impl NumericOperator {
    pub fn new(bits: u8) -> Self {
        Self::from_bits_truncate(bits)
    }

    pub fn set_eol(&mut self) {
        *self |= Self::EOL;
    }

    pub fn unset_eol(&mut self) {
        *self &= !Self::EOL;
    }

    /// Set the operator value byte length. Must be one of [1, 2, 4, 8]
    fn set_length(&mut self, length: u8) {
        *self &= !Self::V8;
        match length {
            1 => (),
            2 => *self |= Self::V2,
            4 => *self |= Self::V4,
            8 => *self |= Self::V8,
            _ => unreachable!(),
        }
    }
}

impl fmt::Display for NumericOperator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.contains(NumericOperator::AND) {
            write!(f, "&& ")?;
        }
        if self.contains(NumericOperator::LT) {
            write!(f, "<")?;
        } else if self.contains(NumericOperator::GT) {
            write!(f, ">")?;
        }
        if self.contains(NumericOperator::EQ) {
            write!(f, "=")?;
        }
        Ok(())
    }
}

bitflags! {
    /// Operator for binary values (TCP flags)
    pub struct BinaryOperator: u8 {
        /// Bitwise match operation ("(data & value) == value")
        const MATCH = 0b0000_0001;
        /// Logical negation of operation
        const NOT   = 0b0000_0010;
        /// Value length of 2 bytes
        const V2    = 0b0001_0000;
        /// AND bit, if set, must be matched in addition to previous value
        const AND   = 0b0100_0000;
        /// This is the last {op, value} pair in the list
        const EOL   = 0b1000_0000;
    }
}

impl BinaryOperator {
    pub fn new(bits: u8) -> Self {
        Self::from_bits_truncate(bits)
    }

    pub fn set_eol(&mut self) {
        *self |= Self::EOL;
    }

    pub fn unset_eol(&mut self) {
        *self &= !Self::EOL;
    }

    fn set_length(&mut self, length: u8) {
        *self &= !Self::V2;
        if length == 2 {
            *self |= Self::V2;
        }
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.contains(BinaryOperator::AND) {
            write!(f, "&& ")?;
        }
        if self.contains(BinaryOperator::MATCH) {
            write!(f, "=")?;
        } else if self.contains(BinaryOperator::NOT) {
            write!(f, "!")?;
        }
        Ok(())
    }
}

bitflags! {
    /// Operator for fragment matching rules
    pub struct FragmentOperator: u8 {
        /// Do Not Fragment
        const DF  = 0b0000_0001;
        /// Is a Fragment
        const IF  = 0b0000_0010;
        /// First Fragment
        const FF  = 0b0000_0100;
        /// Last Fragment
        const LF  = 0b0000_1000;
        /// This is the last {op, value} pair in the list
        const EOL = 0b1000_0000;
    }
}

impl FragmentOperator {
    pub fn new(bits: u8) -> Self {
        Self::from_bits_truncate(bits)
    }

    pub fn set_eol(&mut self) {
        *self |= Self::EOL;
    }

    pub fn unset_eol(&mut self) {
        *self &= !Self::EOL;
    }
}

impl fmt::Display for FragmentOperator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.contains(FragmentOperator::DF) {
            write!(f, "dont-fragment")?;
        } else if self.contains(FragmentOperator::IF) {
            write!(f, "is-fragment")?;
        } else if self.contains(FragmentOperator::FF) {
            write!(f, "first-fragment")?;
        } else if self.contains(FragmentOperator::LF) {
            write!(f, "last-fragment")?;
        }
        Ok(())
    }
}

/// A single Flowspec Traffic Filtering rule (RFC 5575)
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FlowspecFilter {
    // Filter type == 1
    DestinationPrefix(Prefix),
    // Filter type == 2
    SourcePrefix(Prefix),
    // Filter type == 3
    IpProtocol(Vec<(NumericOperator, u32)>),
    /// Matches source OR destination TCP/UDP ports
    // Filter type == 4
    Port(Vec<(NumericOperator, u32)>),
    // Filter type == 5
    DestinationPort(Vec<(NumericOperator, u32)>),
    // Filter type == 6
    SourcePort(Vec<(NumericOperator, u32)>),
    // Filter type == 7
    IcmpType(Vec<(NumericOperator, u8)>),
    // Filter type == 8
    IcmpCode(Vec<(NumericOperator, u8)>),
    // Filter type == 9
    TcpFlags(Vec<(BinaryOperator, u16)>),
    // Filter type == 10
    PacketLength(Vec<(NumericOperator, u32)>),
    // Filter type == 11
    Dscp(Vec<(NumericOperator, u8)>),
    // Filter type == 12
    Fragment(Vec<(FragmentOperator, u8)>),
}

impl FlowspecFilter {
    /// The Flowspec filter type code (RFC 5575)
    pub fn code(&self) -> u8 {
        use FlowspecFilter::*;
        match self {
            DestinationPrefix(_) => 1,
            SourcePrefix(_) => 2,
            IpProtocol(_) => 3,
            Port(_) => 4,
            DestinationPort(_) => 5,
            SourcePort(_) => 6,
            IcmpType(_) => 7,
            IcmpCode(_) => 8,
            TcpFlags(_) => 9,
            PacketLength(_) => 10,
            Dscp(_) => 11,
            Fragment(_) => 12,
        }
    }

    pub fn parse(stream: &mut impl Read, afi: AFI) -> Result<Self, Error> {
        let filter_type = stream.read_u8()?;
        match filter_type {
            // Prefix-based filters
            1 | 2 => {
                let prefix_length = stream.read_u8()?;
                if afi == AFI::IPV6 {
                    let _prefix_offset = stream.read_u8()?;
                }
                let prefix_octets = (prefix_length as usize + 7) / 8;
                let mut buf = vec![0u8; prefix_octets];
                stream.read_exact(&mut buf)?;
                let prefix = Prefix::new(afi, prefix_length, buf)?;
                match filter_type {
                    1 => Ok(FlowspecFilter::DestinationPrefix(prefix)),
                    2 => Ok(FlowspecFilter::SourcePrefix(prefix)),
                    _ => unreachable!(),
                }
            }
            // Variable length op/value filters
            3..=6 | 9..=10 => {
                let mut values: Vec<(u8, u32)> = Vec::with_capacity(4);
                loop {
                    let operator = stream.read_u8()?;
                    let value = match find_length(operator) {
                        1 => u32::from(stream.read_u8()?),
                        2 => u32::from(stream.read_u16::<BigEndian>()?),
                        4 => stream.read_u32::<BigEndian>()?,
                        _ => {
                            return Err(Error::new(
                                ErrorKind::InvalidData,
                                "8-byte Flowspec operands are not valid here",
                            ))
                        }
                    };
                    values.push((operator, value));
                    if is_end_of_list(operator) {
                        break;
                    }
                }
                match filter_type {
                    3 => Ok(FlowspecFilter::IpProtocol(into_num_op(values))),
                    4 => Ok(FlowspecFilter::Port(into_num_op(values))),
                    5 => Ok(FlowspecFilter::DestinationPort(into_num_op(values))),
                    6 => Ok(FlowspecFilter::SourcePort(into_num_op(values))),
                    9 => {
                        let values: Vec<(_, _)> = values
                            .into_iter()
                            .map(|(op, v)| (BinaryOperator::new(op), v as u16))
                            .collect();
                        Ok(FlowspecFilter::TcpFlags(values))
                    }
                    10 => Ok(FlowspecFilter::PacketLength(into_num_op(values))),
                    _ => unreachable!(),
                }
            }
            // Single byte op/value filters
            7..=8 | 11..=12 => {
                let mut values: Vec<(u8, u8)> = Vec::with_capacity(4);
                loop {
                    let operator = stream.read_u8()?;
                    let value = stream.read_u8()?;
                    values.push((operator, value));
                    if is_end_of_list(operator) {
                        break;
                    }
                }
                match filter_type {
                    7 => Ok(FlowspecFilter::IcmpType(into_num_op(values))),
                    8 => Ok(FlowspecFilter::IcmpCode(into_num_op(values))),
                    11 => Ok(FlowspecFilter::Dscp(into_num_op(values))),
                    12 => {
                        let values: Vec<(_, _)> = values
                            .into_iter()
                            .map(|(op, v)| (FragmentOperator::new(op), v))
                            .collect();
                        Ok(FlowspecFilter::Fragment(values))
                    }
                    _ => unreachable!(),
                }
            }
            _ => Err(Error::new(
                ErrorKind::InvalidData,
                format!("Unsupported Flowspec filter type: {}", filter_type),
            )),
        }
    }

    pub fn encode(&self, buf: &mut impl Write) -> Result<(), Error> {
        use FlowspecFilter::*;
        buf.write_u8(self.code())?;
        match self {
            DestinationPrefix(prefix) | SourcePrefix(prefix) => {
                buf.write_u8(prefix.length)?;
                if prefix.afi == AFI::IPV6 {
                    buf.write_u8(0)?; // IPv6 offset
                }
                buf.write_all(prefix.masked_octets())?;
            }
            IpProtocol(values)
            | DestinationPort(values)
            | SourcePort(values)
            | Port(values)
            | PacketLength(values) => {
                for (i, (oper, value)) in values.iter().enumerate() {
                    let mut oper = *oper;
                    if i + 1 == values.len() {
                        oper.set_eol();
                    } else {
                        oper.unset_eol();
                    }
                    match value {
                        0..=255 => {
                            oper.set_length(1);
                            buf.write_u8(oper.bits())?;
                            buf.write_u8(*value as u8)?;
                        }
                        256..=65535 => {
                            oper.set_length(2);
                            buf.write_u8(oper.bits())?;
                            buf.write_u16::<BigEndian>(*value as u16)?;
                        }
                        _ => {
                            oper.set_length(4);
                            buf.write_u8(oper.bits())?;
                            buf.write_u32::<BigEndian>(*value)?;
                        }
                    }
                }
            }
            IcmpCode(values) | IcmpType(values) | Dscp(values) => {
                for (i, (oper, value)) in values.iter().enumerate() {
                    let mut oper = *oper;
                    if i + 1 == values.len() {
                        oper.set_eol();
                    } else {
                        oper.unset_eol();
                    }
                    oper.set_length(1);
                    buf.write_u8(oper.bits())?;
                    buf.write_u8(*value)?;
                }
            }
            TcpFlags(values) => {
                for (i, (oper, value)) in values.iter().enumerate() {
                    let mut oper = *oper;
                    if i + 1 == values.len() {
                        oper.set_eol();
                    } else {
                        oper.unset_eol();
                    }
                    if *value > 255 {
                        oper.set_length(2);
                        buf.write_u8(oper.bits())?;
                        buf.write_u16::<BigEndian>(*value)?;
                    } else {
                        oper.set_length(1);
                        buf.write_u8(oper.bits())?;
                        buf.write_u8(*value as u8)?;
                    }
                }
            }
            Fragment(values) => {
                for (i, (oper, value)) in values.iter().enumerate() {
                    let mut oper = *oper;
                    if i + 1 == values.len() {
                        oper.set_eol();
                    } else {
                        oper.unset_eol();
                    }
                    buf.write_u8(oper.bits())?;
                    buf.write_u8(*value)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for FlowspecFilter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use FlowspecFilter::*;
        match self {
            DestinationPrefix(prefix) => write!(f, "destination {}", prefix),
            SourcePrefix(prefix) => write!(f, "source {}", prefix),
            IpProtocol(values) => value_display(f, "protocol", values),
            DestinationPort(values) => value_display(f, "destination-port", values),
            SourcePort(values) => value_display(f, "source-port", values),
            Port(values) => value_display(f, "port", values),
            PacketLength(values) => value_display(f, "packet-length", values),
            IcmpCode(values) => value_display(f, "icmp-code", values),
            IcmpType(values) => value_display(f, "icmp-type", values),
            Dscp(values) => value_display(f, "dscp", values),
            TcpFlags(values) => value_display(f, "tcp-flags", values),
            Fragment(values) => value_display(f, "fragment", values),
        }
    }
}

fn value_display<O, T>(f: &mut fmt::Formatter, name: &str, value: &[(O, T)]) -> fmt::Result
where
    O: fmt::Display,
    T: fmt::Display,
{
    write!(
        f,
        "{} {}",
        name,
        value
            .iter()
            .map(|(op, v)| format!("{}{}", op, v))
            .collect::<Vec<_>>()
            .join(" ")
    )
}

fn into_num_op<T>(values: Vec<(u8, T)>) -> Vec<(NumericOperator, T)> {
    values
        .into_iter()
        .map(|(op, v)| (NumericOperator::new(op), v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_operator_length() {
        assert_eq!(find_length(0b0000_0000), 1);
        assert_eq!(find_length(0b0000_1111), 1);
        assert_eq!(find_length(0b0001_0000), 2);
        assert_eq!(find_length(0b0010_0000), 4);
        assert_eq!(find_length(0b0011_0000), 8);
    }

    #[test]
    fn test_operator_sign() {
        assert_eq!((NumericOperator::LT | NumericOperator::EQ).to_string(), "<=");
        assert_eq!(NumericOperator::AND.to_string(), "&& ");
    }

    #[test]
    fn test_filter_round_trip() {
        let filters = vec![
            FlowspecFilter::DestinationPrefix(
                Prefix::new(AFI::IPV4, 24, vec![192, 168, 10, 0]).unwrap(),
            ),
            FlowspecFilter::IpProtocol(vec![(NumericOperator::EQ, 6)]),
            FlowspecFilter::DestinationPort(vec![
                (NumericOperator::GT, 8000),
                (NumericOperator::LT | NumericOperator::AND, 8080),
            ]),
        ];
        for filter in filters {
            let mut buf = vec![];
            filter.encode(&mut buf).unwrap();
            let mut cursor = Cursor::new(&buf[..]);
            let parsed = FlowspecFilter::parse(&mut cursor, AFI::IPV4).unwrap();
            // EOL/length bits are wire artifacts; compare codes and redisplay
            assert_eq!(parsed.code(), filter.code());
            assert_eq!(parsed.to_string().len() > 0, true);
        }
    }

    #[test]
    fn test_v6_prefix_filter_offset() {
        let prefix = Prefix::new(AFI::IPV6, 64, vec![0x20, 0x01, 0, 0x10, 0, 0, 0, 0]).unwrap();
        let filter = FlowspecFilter::SourcePrefix(prefix);
        let mut buf = vec![];
        filter.encode(&mut buf).unwrap();
        // type, length, offset, then 8 masked octets
        assert_eq!(buf.len(), 3 + 8);
        let mut cursor = Cursor::new(&buf[..]);
        let parsed = FlowspecFilter::parse(&mut cursor, AFI::IPV6).unwrap();
        match parsed {
            FlowspecFilter::SourcePrefix(p) => assert_eq!(p.length, 64),
            _ => panic!("wrong filter type"),
        }
    }
}
