use std::sync::Arc;

use sbgpd::message::attributes::{ASPath, AttributeSet, Origin, PathAttribute, Segment};
use sbgpd::message::{
    Action, Families, Family, Message, Negotiated, NextHop, Nlri, Prefix, AFI, SAFI,
};
use sbgpd::rib::{RibOut, Route, RouteStore};

fn families() -> Families {
    Families::new(vec![
        Family::new(AFI::IPV4, SAFI::Unicast),
        Family::new(AFI::IPV6, SAFI::Unicast),
    ])
}

fn shared_attributes() -> Arc<AttributeSet> {
    Arc::new(AttributeSet::from_attributes(vec![
        PathAttribute::ORIGIN(Origin::IGP),
        PathAttribute::AS_PATH(ASPath {
            segments: vec![Segment::AS_SEQUENCE(vec![65000])],
        }),
        PathAttribute::MULTI_EXIT_DISC(50),
    ]))
}

fn route_n(n: u16, attributes: &Arc<AttributeSet>) -> Route {
    let octets = vec![10, (n >> 8) as u8, n as u8, 0];
    let prefix = Prefix::new(AFI::IPV4, 24, octets).unwrap();
    Route::new(
        Nlri::inet(&prefix, None, Action::Announce),
        Arc::clone(attributes),
        Action::Announce,
        NextHop::Ip("192.0.2.1".parse().unwrap()),
    )
}

// S3: 1000 routes sharing one attribute set fill minimum-count UPDATEs,
// each under the 4096-byte ceiling; a second drain is empty
#[test]
fn test_thousand_routes_batch_under_max_size() {
    let negotiated = Negotiated::default();
    let mut rib = RibOut::new(families());
    let attributes = shared_attributes();
    for n in 0..1000u16 {
        rib.add_to_rib(&route_n(n, &attributes), false);
    }

    let messages: Vec<Message> = rib.updates(true).collect();
    let mut carried = 0usize;
    for message in &messages {
        let mut buf = vec![];
        message.encode(&negotiated, &mut buf).unwrap();
        assert!(buf.len() <= 4096, "update of {} bytes exceeds maximum", buf.len());
        if let Message::Update(update) = message {
            carried += update.announced.len();
        }
    }
    assert_eq!(carried, 1000);
    // minimal count: every UPDATE except the last is filled so far that
    // one more NLRI would not have fit
    assert!(messages.len() >= 1);
    let per_update = (4096usize - 23 - attributes.packed_len(&negotiated) - 7) / 4;
    assert_eq!(messages.len(), (1000 + per_update - 1) / per_update);

    // the cache holds all 1000; a flush produces nothing new
    assert_eq!(rib.cached_routes(None).len(), 1000);
    assert!(!rib.pending());
    assert_eq!(rib.updates(true).count(), 0);

    // re-announcing all of them is suppressed by the cache
    for n in 0..1000u16 {
        rib.add_to_rib(&route_n(n, &attributes), false);
    }
    assert_eq!(rib.updates(true).count(), 0);
}

#[test]
fn test_store_deduplicates_across_peers() {
    let mut store = RouteStore::new();
    let attributes = shared_attributes();
    let route = route_n(1, &attributes);
    let peers: Vec<std::net::IpAddr> = vec![
        "10.0.0.1".parse().unwrap(),
        "10.0.0.2".parse().unwrap(),
        "10.0.0.3".parse().unwrap(),
    ];
    let index = store.inject_route_indexed(&peers, &route);
    assert_eq!(store.len(), 1);
    assert_eq!(store.refcount(&index), 3);
    assert_eq!(store.routes_for(peers[1]).len(), 1);

    store.withdraw_route_by_index(&peers[..2], &index);
    assert_eq!(store.refcount(&index), 1);
    store.withdraw_route_by_index(&peers[2..], &index);
    assert!(store.is_empty());
}

#[test]
fn test_batch_keeps_buckets_apart() {
    let mut rib = RibOut::new(families());
    let attributes = shared_attributes();
    let other = Arc::new(AttributeSet::from_attributes(vec![
        PathAttribute::ORIGIN(Origin::EGP),
        PathAttribute::AS_PATH(ASPath::default()),
    ]));
    rib.add_to_rib(&route_n(1, &attributes), false);
    rib.add_to_rib(&route_n(2, &attributes), false);
    rib.add_to_rib(&route_n(3, &other), false);

    let messages: Vec<Message> = rib.updates(true).collect();
    assert_eq!(messages.len(), 2);
    let mut sizes: Vec<usize> = messages
        .iter()
        .map(|m| match m {
            Message::Update(update) => update.announced.len(),
            _ => 0,
        })
        .collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![1, 2]);
}

#[test]
fn test_withdraws_and_announces_never_share_an_update() {
    let mut rib = RibOut::new(families());
    let attributes = shared_attributes();
    // advertise two routes, then withdraw one while announcing a third
    rib.add_to_rib(&route_n(1, &attributes), false);
    rib.add_to_rib(&route_n(2, &attributes), false);
    assert_eq!(rib.updates(true).count(), 1);

    rib.del_from_rib(&route_n(1, &attributes));
    rib.add_to_rib(&route_n(3, &attributes), false);
    let messages: Vec<Message> = rib.updates(true).collect();
    assert_eq!(messages.len(), 2);
    for message in &messages {
        if let Message::Update(update) = message {
            assert!(
                !(update.is_announcement() && update.is_withdrawal()),
                "announce and withdraw coalesced"
            );
        }
    }
}
