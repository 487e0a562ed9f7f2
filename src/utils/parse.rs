use std::convert::TryFrom;
use std::error::Error;
use std::fmt;
use std::io;
use std::net::{AddrParseError, IpAddr};
use std::num::ParseIntError;
use std::sync::Arc;

use ipnetwork::{IpNetwork, NetworkSize};

use crate::message::attributes::{ASPath, AttributeSet, Origin, PathAttribute, Segment};
use crate::message::nlri::flowspec::{FlowspecFilter, NumericOperator};
use crate::message::{Action, Community, CommunityList, NextHop, Nlri, Prefix, RouteDistinguisher, AFI};
use crate::rib::Route;

#[derive(Debug)]
pub struct ParseError {
    pub reason: String,
}

impl ParseError {
    pub fn new(reason: String) -> Self {
        ParseError { reason }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParseError: {}", self.reason)
    }
}

impl Error for ParseError {}

impl From<io::Error> for ParseError {
    fn from(error: io::Error) -> Self {
        ParseError::new(error.to_string())
    }
}

// Determine if a given IpNetwork is for a single host
// If so, return the IpAddr
pub fn get_host_address(network: &IpNetwork) -> Option<IpAddr> {
    let is_host = match network.size() {
        NetworkSize::V4(size) => size == 1,
        NetworkSize::V6(size) => size == 1,
    };
    if is_host {
        Some(network.ip())
    } else {
        None
    }
}

/// Convert an ASN string to a u32
/// E.g. "65000.100" -> 4259840100
pub fn asn_from_dotted(value: &str) -> Result<u32, ParseError> {
    // Parse to a list of u32 since we also support 4-byte ASNs as a
    // single int (e.g. "4259840100")
    let mut chunks = [0u32; 2];
    let check_for_overflow = value.contains('.');
    // Iterate through chunks in reverse, so if there's no dot (only one
    // number), it lands in the least significant position
    for (i, chunk) in value
        .splitn(2, '.')
        .collect::<Vec<&str>>()
        .into_iter()
        .rev()
        .enumerate()
    {
        let chunk: u32 = chunk
            .parse()
            .map_err(|err| ParseError::new(format!("{} '{}'", err, value)))?;
        if check_for_overflow && chunk > u32::from(u16::MAX) {
            return Err(ParseError::new(format!("Unsupported ASN '{}'", value)));
        }
        chunks[i] = chunk;
    }
    chunks[1]
        .checked_mul(65536)
        .and_then(|high| high.checked_add(chunks[0]))
        .ok_or_else(|| ParseError::new(format!("Unsupported ASN '{}'", value)))
}

/// Convert a CIDR prefix (E.g. "192.168.0.0/24") to a Prefix.
/// The address family comes from the parsed address, never from the
/// mask length.
pub fn prefix_from_str(prefix: &str) -> Result<Prefix, ParseError> {
    if let Some(i) = prefix.find('/') {
        let (addr, mask) = prefix.split_at(i);
        let mask = &mask[1..]; // Skip remaining '/'
        let addr: IpAddr = addr
            .parse()
            .map_err(|err: AddrParseError| ParseError::new(format!("{} '{}'", err, prefix)))?;
        let length: u8 = mask
            .parse()
            .map_err(|err: ParseIntError| ParseError::new(format!("{} '{}'", err, prefix)))?;
        let (afi, octets) = match addr {
            IpAddr::V4(v4) => (AFI::IPV4, v4.octets().to_vec()),
            IpAddr::V6(v6) => (AFI::IPV6, v6.octets().to_vec()),
        };
        Prefix::new(afi, length, octets)
            .map_err(|err| ParseError::new(format!("{} '{}'", err, prefix)))
    } else {
        Err(ParseError {
            reason: format!("Not a valid prefix: '{}'", prefix),
        })
    }
}

fn rd_from_str(value: &str) -> Result<RouteDistinguisher, ParseError> {
    let chunks: Vec<&str> = value.split(':').collect();
    if chunks.len() != 2 {
        return Err(ParseError::new(format!("Invalid RD '{}'", value)));
    }
    if let Ok(addr) = chunks[0].parse::<std::net::Ipv4Addr>() {
        let local: u16 = chunks[1]
            .parse()
            .map_err(|_| ParseError::new(format!("Invalid RD '{}'", value)))?;
        return Ok(RouteDistinguisher::from_ipv4(addr.octets(), local));
    }
    let asn: u32 = asn_from_dotted(chunks[0])?;
    if asn <= u32::from(u16::MAX) {
        let local: u32 = chunks[1]
            .parse()
            .map_err(|_| ParseError::new(format!("Invalid RD '{}'", value)))?;
        Ok(RouteDistinguisher::from_asn2(asn as u16, local))
    } else {
        let local: u16 = chunks[1]
            .parse()
            .map_err(|_| ParseError::new(format!("Invalid RD '{}'", value)))?;
        Ok(RouteDistinguisher::from_asn4(asn, local))
    }
}

/// A route parsed from API/config text, before a verb is applied
#[derive(Debug, Clone)]
pub struct RouteSpec {
    pub nlri: Nlri,
    pub next_hop: NextHop,
    pub attributes: AttributeSet,
    pub watchdog: Option<String>,
}

impl RouteSpec {
    pub fn into_route(self, action: Action) -> Route {
        Route::new(
            self.nlri.with_action(action),
            Arc::new(self.attributes),
            action,
            self.next_hop,
        )
    }
}

/// Consume a bracketed or single-token value list:
/// `[ a b c ]` or `a`
fn take_list<'a, 'b>(
    words: &mut std::slice::Iter<'a, &'b str>,
) -> Result<Vec<&'b str>, ParseError> {
    match words.next() {
        Some(&"[") => {
            let mut values = Vec::with_capacity(4);
            for word in words.by_ref() {
                if *word == "]" {
                    return Ok(values);
                }
                values.push(*word);
            }
            Err(ParseError::new("Unterminated '[' list".to_string()))
        }
        Some(word) => Ok(vec![*word]),
        None => Err(ParseError::new("Missing value".to_string())),
    }
}

fn take_value<'a, 'b>(
    words: &mut std::slice::Iter<'a, &'b str>,
    keyword: &str,
) -> Result<&'b str, ParseError> {
    words
        .next()
        .copied()
        .ok_or_else(|| ParseError::new(format!("Missing value for '{}'", keyword)))
}

/// Parse a route spec:
/// `<prefix> [next-hop <ip>] [origin <o>] [med <n>] [local-preference <n>]
///  [as-path [..]] [community [..]] [extended-community [..]]
///  [large-community [..]] [label [..]] [rd <rd>]
///  [path-information <n>] [watchdog <name>]`
pub fn parse_route_spec(words: &[&str]) -> Result<RouteSpec, ParseError> {
    let mut iter = words.iter();
    let prefix_word = iter
        .next()
        .ok_or_else(|| ParseError::new("Missing prefix".to_string()))?;
    let prefix = prefix_from_str(prefix_word)?;

    let mut next_hop = NextHop::Unset;
    let mut attributes = AttributeSet::new();
    let mut communities = CommunityList::default();
    let mut labels: Vec<u32> = vec![];
    let mut rd: Option<RouteDistinguisher> = None;
    let mut path_id: Option<u32> = None;
    let mut watchdog: Option<String> = None;
    let mut as_path: Option<ASPath> = None;

    while let Some(keyword) = iter.next() {
        match keyword.to_lowercase().as_str() {
            "next-hop" => {
                let value = take_value(&mut iter, keyword)?;
                if value == "self" {
                    return Err(ParseError::new(
                        "next-hop self is resolved by the caller".to_string(),
                    ));
                }
                let addr: IpAddr = value
                    .parse()
                    .map_err(|err| ParseError::new(format!("{} '{}'", err, value)))?;
                next_hop = NextHop::Ip(addr);
            }
            "origin" => {
                let value = take_value(&mut iter, keyword)?;
                attributes.set(PathAttribute::ORIGIN(value.parse::<Origin>()?));
            }
            "med" | "multi-exit-disc" => {
                let value = take_value(&mut iter, keyword)?;
                let med: u32 = value
                    .parse()
                    .map_err(|_| ParseError::new(format!("Invalid MED '{}'", value)))?;
                attributes.set(PathAttribute::MULTI_EXIT_DISC(med));
            }
            "local-preference" => {
                let value = take_value(&mut iter, keyword)?;
                let pref: u32 = value
                    .parse()
                    .map_err(|_| ParseError::new(format!("Invalid local-preference '{}'", value)))?;
                attributes.set(PathAttribute::LOCAL_PREF(pref));
            }
            "as-path" => {
                let values = take_list(&mut iter)?;
                let mut asns: Vec<u32> = Vec::with_capacity(values.len());
                for value in values {
                    asns.push(asn_from_dotted(value)?);
                }
                as_path = Some(ASPath {
                    segments: vec![Segment::AS_SEQUENCE(asns)],
                });
            }
            "community" | "extended-community" | "large-community" => {
                for value in take_list(&mut iter)? {
                    communities.0.push(Community::try_from(value)?);
                }
            }
            "label" => {
                for value in take_list(&mut iter)? {
                    labels.push(
                        value
                            .parse()
                            .map_err(|_| ParseError::new(format!("Invalid label '{}'", value)))?,
                    );
                }
            }
            "rd" | "route-distinguisher" => {
                rd = Some(rd_from_str(take_value(&mut iter, keyword)?)?);
            }
            "path-information" => {
                let value = take_value(&mut iter, keyword)?;
                path_id = Some(value.parse().map_err(|_| {
                    ParseError::new(format!("Invalid path-information '{}'", value))
                })?);
            }
            "watchdog" => {
                watchdog = Some(take_value(&mut iter, keyword)?.to_string());
            }
            "split" => {
                return Err(ParseError::new(
                    "split is not supported; announce the subnets directly".to_string(),
                ));
            }
            other => {
                return Err(ParseError::new(format!("Unknown route keyword '{}'", other)));
            }
        }
    }

    attributes.set(PathAttribute::AS_PATH(as_path.unwrap_or_default()));
    if !attributes.contains(crate::message::Identifier::ORIGIN) {
        attributes.set(PathAttribute::ORIGIN(Origin::IGP));
    }
    let standard = communities.standard();
    if !standard.is_empty() {
        attributes.set(PathAttribute::COMMUNITY(standard));
    }
    let extended = communities.extended();
    if !extended.is_empty() {
        attributes.set(PathAttribute::EXTENDED_COMMUNITIES(extended));
    }
    let large = communities.large();
    if !large.is_empty() {
        attributes.set(PathAttribute::LARGE_COMMUNITY(large));
    }

    let nlri = match (rd, labels.is_empty()) {
        (Some(rd), _) => Nlri::vpn(rd, &prefix, &labels, Action::Unset),
        (None, false) => Nlri::labeled(&prefix, &labels, path_id, Action::Unset),
        (None, true) => Nlri::inet(&prefix, path_id, Action::Unset),
    };

    Ok(RouteSpec {
        nlri,
        next_hop,
        attributes,
        watchdog,
    })
}

#[derive(Debug)]
pub enum FlowAction {
    /// Redirect (with 2:4 byte route target)
    Redirect(Community),
    /// Traffic rate in bytes per second
    TrafficRate(f32),
    /// Action to take (sample, terminal)
    TrafficAction((bool, bool)),
    /// DSCP value to mark
    MarkDscp(u8),
    /// Rate 0: drop everything
    Discard,
}

impl From<FlowAction> for PathAttribute {
    fn from(action: FlowAction) -> PathAttribute {
        use FlowAction::*;
        let community = match action {
            TrafficRate(bps) => {
                let mut comm_bytes = [0x80, 0x06, 0, 0, 0, 0, 0, 0];
                comm_bytes[4..8].clone_from_slice(&bps.to_be_bytes());
                u64::from_be_bytes(comm_bytes)
            }
            Discard => u64::from_be_bytes([0x80, 0x06, 0, 0, 0, 0, 0, 0]),
            TrafficAction((sample, terminal)) => {
                let mut comm_bytes = [0x80, 0x07, 0, 0, 0, 0, 0, 0];
                let mut val = 0u8;
                if sample {
                    val |= 0b10;
                }
                if terminal {
                    val |= 0b1;
                }
                comm_bytes[7] = val;
                u64::from_be_bytes(comm_bytes)
            }
            Redirect(comm) => match comm {
                Community::STANDARD(val) => {
                    let mut comm_bytes = [0u8; 8];
                    let bytes = val.to_be_bytes();
                    comm_bytes[0..2].clone_from_slice(&[0x80, 0x08]);
                    comm_bytes[2..4].clone_from_slice(&[bytes[0], bytes[1]]);
                    comm_bytes[4..6].clone_from_slice(&[0; 2]);
                    comm_bytes[6..8].clone_from_slice(&[bytes[2], bytes[3]]);
                    u64::from_be_bytes(comm_bytes)
                }
                _ => u64::from_be_bytes([0x80, 0x08, 0, 0, 0, 0, 0, 0]),
            },
            MarkDscp(dscp) => {
                let mut comm_bytes = [0x80, 0x09, 0, 0, 0, 0, 0, 0];
                comm_bytes[7] = dscp;
                u64::from_be_bytes(comm_bytes)
            }
        };
        PathAttribute::EXTENDED_COMMUNITIES(vec![community])
    }
}

fn parse_flowspec_action(words: &[&str]) -> Result<FlowAction, ParseError> {
    if words.is_empty() {
        return Err(ParseError::new(String::from("No FlowSpec action found")));
    }
    match words[0].to_lowercase().as_str() {
        "discard" => Ok(FlowAction::Discard),
        "redirect" if words.len() >= 2 => Ok(FlowAction::Redirect(
            Community::try_from(words[1]).map_err(|_| {
                ParseError::new(format!("Unable to parse redirect community '{}'", words[1]))
            })?,
        )),
        "traffic-action" => Ok(FlowAction::TrafficAction((
            words.contains(&"sample"),
            words.contains(&"terminal"),
        ))),
        "traffic-rate" | "rate-limit" if words.len() >= 2 => Ok(FlowAction::TrafficRate(
            words[1].parse::<f32>().map_err(|_| {
                ParseError::new(format!("Unable to parse traffic-rate bps '{}'", words[1]))
            })?,
        )),
        "mark" if words.len() >= 2 => {
            let dscp = words[1].parse::<u8>().map_err(|_| {
                ParseError::new(format!("Unable to parse DSCP value '{}'", words[1]))
            })?;
            if dscp > 63 {
                return Err(ParseError::new(format!("Not a valid DSCP value '{}'", dscp)));
            }
            Ok(FlowAction::MarkDscp(dscp))
        }
        _ => Err(ParseError::new(format!(
            "Unsupported Flowspec action: '{}'",
            words.join(" ")
        ))),
    }
}

fn parse_flowspec_match(keyword: &str, value: &str) -> Result<FlowspecFilter, ParseError> {
    let num_values = |value: &str| -> Result<Vec<(NumericOperator, u32)>, ParseError> {
        value
            .split_whitespace()
            .enumerate()
            .map(|(i, w)| parse_num_operator(w, i))
            .collect()
    };
    let byte_values = |value: &str| -> Result<Vec<(NumericOperator, u8)>, ParseError> {
        value
            .split_whitespace()
            .enumerate()
            .map(|(i, w)| parse_num_operator(w, i))
            .collect()
    };
    match keyword {
        "destination" => {
            let dest = prefix_from_str(value)
                .map_err(|_| ParseError::new(format!("Unable to parse prefix '{}'", value)))?;
            Ok(FlowspecFilter::DestinationPrefix(dest))
        }
        "source" => {
            let src = prefix_from_str(value)
                .map_err(|_| ParseError::new(format!("Unable to parse prefix '{}'", value)))?;
            Ok(FlowspecFilter::SourcePrefix(src))
        }
        "protocol" => Ok(FlowspecFilter::IpProtocol(num_values(value)?)),
        "port" => Ok(FlowspecFilter::Port(num_values(value)?)),
        "destination-port" => Ok(FlowspecFilter::DestinationPort(num_values(value)?)),
        "source-port" => Ok(FlowspecFilter::SourcePort(num_values(value)?)),
        "icmp-type" => Ok(FlowspecFilter::IcmpType(byte_values(value)?)),
        "icmp-code" => Ok(FlowspecFilter::IcmpCode(byte_values(value)?)),
        "packet-length" => Ok(FlowspecFilter::PacketLength(num_values(value)?)),
        "dscp" => Ok(FlowspecFilter::Dscp(byte_values(value)?)),
        _ => Err(ParseError::new(format!(
            "Unsupported Flowspec match: {}",
            keyword
        ))),
    }
}

/// Parse a flow spec:
/// `<match> <value> [<match> <value> ...] then <action>`
/// e.g. `destination 10.0.0.0/24 protocol =6 port =80 then discard`
pub fn parse_flow_spec(words: &[&str]) -> Result<RouteSpec, ParseError> {
    let then_at = words.iter().position(|w| *w == "then");
    let (match_words, action_words) = match then_at {
        Some(i) => (&words[..i], &words[i + 1..]),
        None => (words, &words[words.len()..]),
    };

    let mut filters: Vec<FlowspecFilter> = Vec::with_capacity(4);
    let mut afi: Option<AFI> = None;
    let mut iter = match_words.iter();
    while let Some(keyword) = iter.next() {
        let keyword = keyword.to_lowercase();
        // operator values for the same match are space separated; collect
        // until the next keyword
        let mut values: Vec<&str> = Vec::with_capacity(2);
        let mut lookahead = iter.clone();
        while let Some(word) = lookahead.next() {
            if word
                .chars()
                .next()
                .map(|c| c.is_alphabetic() && !word.contains('.') && !word.contains(':'))
                .unwrap_or(false)
                && values.len() > 0
            {
                break;
            }
            values.push(*word);
            iter = lookahead.clone();
            if matches!(keyword.as_str(), "destination" | "source") {
                break;
            }
        }
        if values.is_empty() {
            return Err(ParseError::new(format!("Missing value for '{}'", keyword)));
        }
        let filter = parse_flowspec_match(&keyword, &values.join(" "))?;
        if let FlowspecFilter::DestinationPrefix(prefix) | FlowspecFilter::SourcePrefix(prefix) =
            &filter
        {
            match afi {
                None => afi = Some(prefix.afi),
                Some(existing) if existing != prefix.afi => {
                    return Err(ParseError::new(
                        "Flowspec source and destination families differ".to_string(),
                    ))
                }
                _ => (),
            }
        }
        filters.push(filter);
    }
    if filters.is_empty() {
        return Err(ParseError::new("No FlowSpec match found".to_string()));
    }

    let mut attributes = AttributeSet::new();
    attributes.set(PathAttribute::ORIGIN(Origin::IGP));
    attributes.set(PathAttribute::AS_PATH(ASPath::default()));
    if !action_words.is_empty() {
        attributes.set(parse_flowspec_action(action_words)?.into());
    }

    let nlri = Nlri::flowspec(afi.unwrap_or(AFI::IPV4), false, &filters, Action::Unset)?;
    Ok(RouteSpec {
        nlri,
        next_hop: NextHop::Unset,
        attributes,
        watchdog: None,
    })
}

fn parse_num_operator<T>(word: &str, index: usize) -> Result<(NumericOperator, T), ParseError>
where
    T: std::str::FromStr,
{
    let mut pos = 0usize;
    let mut oper = NumericOperator::new(0);
    for (i, chr) in word.chars().enumerate() {
        match chr {
            '>' => oper |= NumericOperator::GT,
            '<' => oper |= NumericOperator::LT,
            '=' => oper |= NumericOperator::EQ,
            _ => {
                pos = i;
                break;
            }
        }
    }
    let value = word[pos..]
        .parse()
        .map_err(|_| ParseError::new(format!("Unable to parse '{}'", word)))?;
    // No operator was included (I.e. "8080" instead of "=8080"), assume EQ
    if oper.is_empty() {
        oper |= NumericOperator::EQ;
    }
    // All subsequent items in the same filter are AND'd
    if index > 0 {
        oper |= NumericOperator::AND;
    }
    Ok((oper, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Identifier, SAFI};
    use std::net::Ipv4Addr;

    #[test]
    fn test_get_host_address() {
        assert!(get_host_address(&"1.1.1.0/24".parse::<IpNetwork>().unwrap()).is_none());
        assert_eq!(
            get_host_address(&"1.1.1.1".parse::<IpNetwork>().unwrap()),
            Some(IpAddr::from(Ipv4Addr::new(1, 1, 1, 1)))
        );
        assert!(get_host_address(&"2001:1:2::10".parse::<IpNetwork>().unwrap()).is_some());
        assert!(get_host_address(&"2001:1:2::10/64".parse::<IpNetwork>().unwrap()).is_none());
    }

    #[test]
    fn test_asn_from_dotted() {
        assert_eq!(asn_from_dotted("100").unwrap(), 100);
        assert_eq!(asn_from_dotted("65000.100").unwrap(), 4259840100);
        assert_eq!(asn_from_dotted("4259840100").unwrap(), 4259840100);
        assert!(asn_from_dotted("4259840100.200").is_err());
        assert!(asn_from_dotted("200.4259840100").is_err());
        assert!(asn_from_dotted("100.200300").is_err());
        assert!(asn_from_dotted("test").is_err());
    }

    #[test]
    fn test_prefix_from_string() {
        let prefix = prefix_from_str("1.1.1.0/24").unwrap();
        assert_eq!(prefix.length, 24);
        assert_eq!(prefix.masked_octets(), [1, 1, 1]);

        let prefix = prefix_from_str("2001:10::/64").unwrap();
        assert_eq!(prefix.length, 64);
        assert_eq!(prefix.afi, AFI::IPV6);

        // explicit family from the address text, never the mask
        let prefix = prefix_from_str("2001:db8::/32").unwrap();
        assert_eq!(prefix.afi, AFI::IPV6);

        assert!(prefix_from_str("1.1.1.0/40").is_err());
        assert!(prefix_from_str("1.1.1.0").is_err());
    }

    #[test]
    fn test_parse_route_spec() {
        let words: Vec<&str> = "10.0.0.0/24 next-hop 192.0.2.1 origin igp med 100 community [ 65000:100 ]"
            .split_whitespace()
            .collect();
        let spec = parse_route_spec(&words).unwrap();
        assert_eq!(spec.next_hop, NextHop::Ip("192.0.2.1".parse().unwrap()));
        assert_eq!(spec.nlri.family().safi, SAFI::Unicast);
        assert!(spec.attributes.contains(Identifier::COMMUNITY));
        assert!(spec.attributes.contains(Identifier::MULTI_EXIT_DISC));
        assert!(spec.attributes.contains(Identifier::AS_PATH));
    }

    #[test]
    fn test_parse_route_spec_vpn() {
        let words: Vec<&str> = "10.0.0.0/24 rd 65000:1 label [ 100 ] next-hop 192.0.2.1"
            .split_whitespace()
            .collect();
        let spec = parse_route_spec(&words).unwrap();
        assert_eq!(spec.nlri.family().safi, SAFI::MplsVpn);
        assert_eq!(spec.nlri.labels().unwrap(), vec![100]);
        assert_eq!(
            spec.nlri.rd().unwrap(),
            RouteDistinguisher::from_asn2(65000, 1)
        );
    }

    #[test]
    fn test_parse_route_spec_watchdog_and_path_id() {
        let words: Vec<&str> = "10.0.0.0/24 next-hop 192.0.2.1 path-information 2 watchdog dns"
            .split_whitespace()
            .collect();
        let spec = parse_route_spec(&words).unwrap();
        assert_eq!(spec.nlri.path_id(), Some(2));
        assert_eq!(spec.watchdog.as_deref(), Some("dns"));
    }

    #[test]
    fn test_parse_route_spec_errors() {
        assert!(parse_route_spec(&["10.0.0.0/24", "bogus-keyword", "x"]).is_err());
        assert!(parse_route_spec(&["10.0.0.0/24", "next-hop"]).is_err());
        assert!(parse_route_spec(&[]).is_err());
    }

    #[test]
    fn test_parse_flow_spec() {
        let words: Vec<&str> = "destination 10.0.0.0/24 protocol =6 port =80 then discard"
            .split_whitespace()
            .collect();
        let spec = parse_flow_spec(&words).unwrap();
        assert_eq!(spec.nlri.family().safi, SAFI::Flowspec);
        assert_eq!(spec.nlri.family().afi, AFI::IPV4);
        assert_eq!(spec.next_hop, NextHop::Unset);
        let filters = spec.nlri.filters().unwrap();
        assert_eq!(filters.len(), 3);
    }

    #[test]
    fn test_parse_flow_spec_v6() {
        let words: Vec<&str> = "destination 2001:db8::/64 then rate-limit 1000"
            .split_whitespace()
            .collect();
        let spec = parse_flow_spec(&words).unwrap();
        assert_eq!(spec.nlri.family().afi, AFI::IPV6);
    }

    #[test]
    fn test_parse_flowspec_actions() {
        match parse_flowspec_action(&["redirect", "6:302"]) {
            Ok(FlowAction::Redirect(comm)) => {
                assert_eq!(String::from("6:302"), comm.to_string());
            }
            _ => panic!(),
        }
        match parse_flowspec_action(&["traffic-rate", "1000000"]) {
            Ok(FlowAction::TrafficRate(bps)) => {
                assert_eq!(bps, 1000000.0);
            }
            _ => panic!(),
        }
        assert!(parse_flowspec_action(&["traffic-rate", "10Kbps"]).is_err());
        match parse_flowspec_action(&["mark", "63"]) {
            Ok(FlowAction::MarkDscp(dscp)) => assert_eq!(dscp, 63),
            _ => panic!(),
        }
        assert!(parse_flowspec_action(&["mark", "255"]).is_err());
    }

    #[test]
    fn test_parse_num_operator() {
        let (oper, value): (NumericOperator, u32) = parse_num_operator("<=17", 0).unwrap();
        assert_eq!(value, 17);
        assert_eq!(oper, NumericOperator::EQ | NumericOperator::LT);

        let (oper, value): (NumericOperator, u32) = parse_num_operator("443", 0).unwrap();
        assert_eq!(value, 443);
        assert_eq!(oper, NumericOperator::EQ);

        let (oper, _value): (NumericOperator, u32) = parse_num_operator(">8000", 1).unwrap();
        assert!(oper.contains(NumericOperator::AND));
    }
}
