use std::io::Cursor;
use std::net::IpAddr;

use sbgpd::message::attributes::{ASPath, AttributeSet, Origin, PathAttribute, Segment};
use sbgpd::message::nlri::flowspec::{FlowspecFilter, NumericOperator};
use sbgpd::message::{
    Action, AddPathDirection, Capabilities, Families, Family, Header, Identifier, Message,
    Negotiated, NextHop, Nlri, Open, Prefix, RouteDistinguisher, Update, AFI, SAFI,
};

fn base_attributes() -> AttributeSet {
    AttributeSet::from_attributes(vec![
        PathAttribute::ORIGIN(Origin::IGP),
        PathAttribute::AS_PATH(ASPath {
            segments: vec![Segment::AS_SEQUENCE(vec![65000])],
        }),
        PathAttribute::LOCAL_PREF(100),
    ])
}

fn decode(bytes: &[u8], negotiated: &Negotiated) -> Message {
    let mut cursor = Cursor::new(bytes);
    let header = Header::parse(&mut cursor, negotiated).unwrap();
    Message::parse(&header, &mut cursor, negotiated).unwrap()
}

fn round_trip(update: Update, negotiated: &Negotiated) -> Update {
    let mut buf = vec![];
    Message::Update(update)
        .encode(negotiated, &mut buf)
        .unwrap();
    match decode(&buf, negotiated) {
        Message::Update(update) => update,
        other => panic!("expected UPDATE, got {}", other),
    }
}

/// pack(unpack(x)) must re-unpack structurally equal
fn assert_idempotent(update: Update, negotiated: &Negotiated) {
    let first = round_trip(update, negotiated);
    let second = round_trip(first.clone(), negotiated);
    assert_eq!(first, second);
}

#[test]
fn test_round_trip_ipv4_unicast() {
    let prefix = Prefix::new(AFI::IPV4, 24, vec![10, 0, 0, 0]).unwrap();
    let update = Update::for_announce(
        Family::new(AFI::IPV4, SAFI::Unicast),
        NextHop::Ip("192.0.2.1".parse().unwrap()),
        &base_attributes(),
        vec![Nlri::inet(&prefix, None, Action::Announce)],
    );
    let negotiated = Negotiated::default();
    let decoded = round_trip(update, &negotiated);
    let (next_hop, nlris) = decoded.announced_routes();
    assert_eq!(next_hop, NextHop::Ip("192.0.2.1".parse::<IpAddr>().unwrap()));
    assert_eq!(nlris.len(), 1);
    assert_eq!(nlris[0].prefix().unwrap().to_string(), "10.0.0.0/24");
    assert_idempotent(decoded, &negotiated);
}

#[test]
fn test_round_trip_ipv6_unicast() {
    let addr: std::net::Ipv6Addr = "2001:db8::".parse().unwrap();
    let prefix = Prefix::new(AFI::IPV6, 32, addr.octets().to_vec()).unwrap();
    let family = Family::new(AFI::IPV6, SAFI::Unicast);
    let update = Update::for_announce(
        family,
        NextHop::Ip("2001:db8::1".parse().unwrap()),
        &base_attributes(),
        vec![Nlri::inet(&prefix, None, Action::Announce)],
    );
    let negotiated = Negotiated::default();
    let decoded = round_trip(update, &negotiated);
    let (next_hop, nlris) = decoded.announced_routes();
    assert_eq!(
        next_hop,
        NextHop::Ip("2001:db8::1".parse::<IpAddr>().unwrap())
    );
    // the canonical bytes for 2001:db8::/32 -- and always an IPv6 CIDR
    assert_eq!(nlris[0].packed(), &[0x20, 0x20, 0x01, 0x0d, 0xb8][..]);
    let cidr = nlris[0].prefix().unwrap();
    assert_eq!(cidr.afi, AFI::IPV6);
    assert_eq!(cidr.to_string(), "2001:db8::/32");
    assert_idempotent(decoded, &negotiated);
}

#[test]
fn test_round_trip_ipv6_withdraw() {
    let addr: std::net::Ipv6Addr = "2001:db8::".parse().unwrap();
    let prefix = Prefix::new(AFI::IPV6, 32, addr.octets().to_vec()).unwrap();
    let family = Family::new(AFI::IPV6, SAFI::Unicast);
    let update = Update::for_withdraw(
        family,
        vec![Nlri::inet(&prefix, None, Action::Withdraw)],
    );
    let negotiated = Negotiated::default();
    let decoded = round_trip(update, &negotiated);
    assert!(decoded.is_withdrawal());
    let withdrawn = decoded.withdrawn_routes();
    assert_eq!(withdrawn[0].packed(), &[0x20, 0x20, 0x01, 0x0d, 0xb8][..]);
    assert_eq!(withdrawn[0].prefix().unwrap().afi, AFI::IPV6);
    assert_idempotent(decoded, &negotiated);
}

#[test]
fn test_round_trip_labeled_unicast() {
    let prefix = Prefix::new(AFI::IPV4, 24, vec![10, 1, 0, 0]).unwrap();
    let family = Family::new(AFI::IPV4, SAFI::Mpls);
    let update = Update::for_announce(
        family,
        NextHop::Ip("192.0.2.1".parse().unwrap()),
        &base_attributes(),
        vec![Nlri::labeled(&prefix, &[100], None, Action::Announce)],
    );
    let negotiated = Negotiated::default();
    let decoded = round_trip(update, &negotiated);
    let (_, nlris) = decoded.announced_routes();
    assert_eq!(nlris[0].labels().unwrap(), vec![100]);
    assert_eq!(nlris[0].prefix().unwrap().to_string(), "10.1.0.0/24");
    assert_idempotent(decoded, &negotiated);
}

#[test]
fn test_round_trip_mpls_vpn_all_rd_types() {
    let prefix = Prefix::new(AFI::IPV4, 24, vec![10, 2, 0, 0]).unwrap();
    let family = Family::new(AFI::IPV4, SAFI::MplsVpn);
    let rds = vec![
        RouteDistinguisher::from_asn2(65000, 100),
        RouteDistinguisher::from_ipv4([192, 0, 2, 1], 100),
        RouteDistinguisher::from_asn4(4_200_000_000, 100),
    ];
    let negotiated = Negotiated::default();
    for rd in rds {
        let update = Update::for_announce(
            family,
            NextHop::Ip("192.0.2.1".parse().unwrap()),
            &base_attributes(),
            vec![Nlri::vpn(rd, &prefix, &[300], Action::Announce)],
        );
        let decoded = round_trip(update, &negotiated);
        let (next_hop, nlris) = decoded.announced_routes();
        // VPN next-hop carries the zero RD prefix on the wire
        assert_eq!(next_hop, NextHop::Ip("192.0.2.1".parse::<IpAddr>().unwrap()));
        assert_eq!(nlris[0].rd().unwrap(), rd);
        assert_eq!(nlris[0].labels().unwrap(), vec![300]);
        assert_idempotent(decoded, &negotiated);
    }
}

#[test]
fn test_round_trip_evpn_mac() {
    let family = Family::new(AFI::L2VPN, SAFI::Evpn);
    let nlri = Nlri::evpn_mac(
        RouteDistinguisher::from_asn2(65000, 1),
        [1u8; 10],
        100,
        [0x00, 0x11, 0x22, 0x33, 0x44, 0x55],
        Some("192.0.2.10".parse().unwrap()),
        1000,
        Action::Announce,
    );
    let update = Update::for_announce(
        family,
        NextHop::Ip("192.0.2.1".parse().unwrap()),
        &base_attributes(),
        vec![nlri.clone()],
    );
    let negotiated = Negotiated::default();
    let decoded = round_trip(update, &negotiated);
    let (_, nlris) = decoded.announced_routes();
    assert_eq!(nlris[0], &nlri);
    assert_eq!(nlris[0].evpn_route_type(), Some(2));
    assert_idempotent(decoded, &negotiated);
}

#[test]
fn test_round_trip_evpn_prefix() {
    let family = Family::new(AFI::L2VPN, SAFI::Evpn);
    let prefix = Prefix::new(AFI::IPV4, 24, vec![10, 3, 0, 0]).unwrap();
    let nlri = Nlri::evpn_prefix(
        RouteDistinguisher::from_asn2(65000, 2),
        [0u8; 10],
        0,
        &prefix,
        "192.0.2.254".parse().unwrap(),
        2000,
        Action::Announce,
    );
    let update = Update::for_announce(
        family,
        NextHop::Ip("192.0.2.1".parse().unwrap()),
        &base_attributes(),
        vec![nlri.clone()],
    );
    let negotiated = Negotiated::default();
    let decoded = round_trip(update, &negotiated);
    let (_, nlris) = decoded.announced_routes();
    assert_eq!(nlris[0], &nlri);
    assert_eq!(nlris[0].evpn_route_type(), Some(5));
    assert_idempotent(decoded, &negotiated);
}

#[test]
fn test_round_trip_flowspec_v4_and_v6() {
    let negotiated = Negotiated::default();
    for (afi, prefix) in [
        (AFI::IPV4, Prefix::new(AFI::IPV4, 24, vec![10, 4, 0, 0]).unwrap()),
        (
            AFI::IPV6,
            Prefix::new(
                AFI::IPV6,
                64,
                "2001:db8::".parse::<std::net::Ipv6Addr>().unwrap().octets().to_vec(),
            )
            .unwrap(),
        ),
    ] {
        let filters = vec![
            FlowspecFilter::DestinationPrefix(prefix),
            FlowspecFilter::IpProtocol(vec![(NumericOperator::EQ, 6)]),
            FlowspecFilter::DestinationPort(vec![(NumericOperator::EQ, 80)]),
        ];
        let nlri = Nlri::flowspec(afi, false, &filters, Action::Announce).unwrap();
        let family = Family::new(afi, SAFI::Flowspec);
        let update =
            Update::for_announce(family, NextHop::Unset, &base_attributes(), vec![nlri.clone()]);
        let decoded = round_trip(update, &negotiated);
        let (next_hop, nlris) = decoded.announced_routes();
        assert_eq!(next_hop, NextHop::Unset);
        assert_eq!(nlris[0], &nlri);
        assert_eq!(nlris[0].filters().unwrap().len(), 3);
        assert_idempotent(decoded, &negotiated);
    }
}

#[test]
fn test_round_trip_bgp_ls() {
    let negotiated = Negotiated::default();
    // node (1), link (2), prefix (3)
    for ls_type in [1u16, 2, 3] {
        let nlri = Nlri::bgp_ls(ls_type, &[0xca, 0xfe, 0x00, 0x01], Action::Announce);
        let family = Family::new(AFI::BGPLS, SAFI::BGPLS);
        let update = Update::for_announce(
            family,
            NextHop::Ip("192.0.2.1".parse().unwrap()),
            &base_attributes(),
            vec![nlri.clone()],
        );
        let decoded = round_trip(update, &negotiated);
        let (_, nlris) = decoded.announced_routes();
        assert_eq!(nlris[0], &nlri);
        assert_eq!(nlris[0].bgpls_type(), Some(ls_type));
        assert_idempotent(decoded, &negotiated);
    }
}

#[test]
fn test_round_trip_with_add_path() {
    let family = Family::new(AFI::IPV4, SAFI::Unicast);
    let mut negotiated = Negotiated::default();
    negotiated
        .add_path
        .insert(family, AddPathDirection::SendReceivePaths);

    let prefix = Prefix::new(AFI::IPV4, 24, vec![10, 5, 0, 0]).unwrap();
    let update = Update::for_announce(
        family,
        NextHop::Ip("192.0.2.1".parse().unwrap()),
        &base_attributes(),
        vec![Nlri::inet(&prefix, Some(7), Action::Announce)],
    );
    let decoded = round_trip(update, &negotiated);
    let (_, nlris) = decoded.announced_routes();
    assert_eq!(nlris[0].path_id(), Some(7));
    assert_idempotent(decoded, &negotiated);
}

#[test]
fn test_two_byte_asn_session_uses_as_trans() {
    let negotiated = Negotiated {
        asn4: false,
        ..Negotiated::default()
    };
    let attributes = AttributeSet::from_attributes(vec![
        PathAttribute::ORIGIN(Origin::IGP),
        PathAttribute::AS_PATH(ASPath {
            segments: vec![Segment::AS_SEQUENCE(vec![4_200_000_000])],
        }),
    ]);
    let prefix = Prefix::new(AFI::IPV4, 24, vec![10, 6, 0, 0]).unwrap();
    let update = Update::for_announce(
        Family::new(AFI::IPV4, SAFI::Unicast),
        NextHop::Ip("192.0.2.1".parse().unwrap()),
        &attributes,
        vec![Nlri::inet(&prefix, None, Action::Announce)],
    );
    let decoded = round_trip(update, &negotiated);
    match decoded.get(Identifier::AS_PATH) {
        Some(PathAttribute::AS_PATH(path)) => {
            assert_eq!(path.segments, vec![Segment::AS_SEQUENCE(vec![23456])]);
        }
        _ => panic!("missing AS_PATH"),
    }
}

// S2: the full attribute list and NLRI bytes of a classic announce
#[test]
fn test_classic_announce_wire_content() {
    let attributes = AttributeSet::from_attributes(vec![
        PathAttribute::ORIGIN(Origin::IGP),
        PathAttribute::AS_PATH(ASPath::default()),
        PathAttribute::MULTI_EXIT_DISC(100),
        PathAttribute::LOCAL_PREF(100),
        PathAttribute::COMMUNITY(vec![65000 * 65536 + 100]),
    ]);
    let prefix = Prefix::new(AFI::IPV4, 24, vec![10, 0, 0, 0]).unwrap();
    let update = Update::for_announce(
        Family::new(AFI::IPV4, SAFI::Unicast),
        NextHop::Ip("192.0.2.1".parse().unwrap()),
        &attributes,
        vec![Nlri::inet(&prefix, None, Action::Announce)],
    );
    let mut buf = vec![];
    Message::Update(update)
        .encode(&Negotiated::default(), &mut buf)
        .unwrap();

    // marker, then length and type 2
    assert_eq!(&buf[..16], &[0xff; 16]);
    assert_eq!(buf[18], 2);
    let length = u16::from_be_bytes([buf[16], buf[17]]) as usize;
    assert_eq!(length, buf.len());
    // withdrawn length is zero
    assert_eq!(&buf[19..21], &[0, 0]);
    // trailing NLRI bytes
    assert_eq!(&buf[buf.len() - 4..], &[0x18, 0x0a, 0x00, 0x00]);

    let decoded = match decode(&buf, &Negotiated::default()) {
        Message::Update(update) => update,
        other => panic!("expected UPDATE, got {}", other),
    };
    assert!(decoded.get(Identifier::ORIGIN).is_some());
    assert!(decoded.get(Identifier::NEXT_HOP).is_some());
    assert!(decoded.get(Identifier::MULTI_EXIT_DISC).is_some());
    assert!(decoded.get(Identifier::LOCAL_PREF).is_some());
    assert!(decoded.get(Identifier::COMMUNITY).is_some());
}

// S1: our OPEN with {MP v4 unicast, 4-byte ASN, Route-Refresh} is 45 bytes
#[test]
fn test_open_handshake_length() {
    let capabilities = Capabilities {
        four_byte_asn: Some(65000),
        families: Families::new(vec![Family::new(AFI::IPV4, SAFI::Unicast)]),
        route_refresh: true,
        ..Capabilities::default()
    };
    let open = Open {
        version: 4,
        peer_asn: 65000,
        hold_timer: 180,
        identifier: u32::from_be_bytes([1, 1, 1, 1]),
        parameters: capabilities.to_parameters(),
    };
    let mut buf = vec![];
    Message::Open(open)
        .encode(&Negotiated::default(), &mut buf)
        .unwrap();
    assert_eq!(buf.len(), 45);

    match decode(&buf, &Negotiated::default()) {
        Message::Open(parsed) => {
            assert_eq!(parsed.asn(), 65000);
            assert_eq!(parsed.hold_timer, 180);
        }
        other => panic!("expected OPEN, got {}", other),
    }
}

#[test]
fn test_attribute_set_pack_equal_for_equal_content() {
    let negotiated = Negotiated::default();
    let a = AttributeSet::from_attributes(vec![
        PathAttribute::LOCAL_PREF(200),
        PathAttribute::ORIGIN(Origin::EGP),
        PathAttribute::LARGE_COMMUNITY(vec![(65000, 1, 2)]),
    ]);
    let b = AttributeSet::from_attributes(vec![
        PathAttribute::LARGE_COMMUNITY(vec![(65000, 1, 2)]),
        PathAttribute::LOCAL_PREF(200),
        PathAttribute::ORIGIN(Origin::EGP),
    ]);
    assert_eq!(a.index(), b.index());
    let mut a_buf = vec![];
    let mut b_buf = vec![];
    a.pack(&negotiated, &mut a_buf).unwrap();
    b.pack(&negotiated, &mut b_buf).unwrap();
    assert_eq!(a_buf, b_buf);
}
