use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use sbgpd::config::PeerConfig;
use sbgpd::message::{
    Capabilities, Families, Family, Message, Negotiated, Notification, Open, AFI, SAFI,
};
use sbgpd::session::{MessageCodec, NeighborKey, Session, SessionError, SessionState, SessionUpdate};

fn peer_config(remote_as: u32) -> Arc<PeerConfig> {
    Arc::new(PeerConfig {
        remote_ip: "127.0.0.1".parse().unwrap(),
        remote_as,
        local_as: 65000,
        local_router_id: "1.1.1.1".parse().unwrap(),
        local_ip: None,
        enabled: true,
        passive: false,
        hold_timer: 30,
        dest_port: 179,
        families: vec![Family::new(AFI::IPV4, SAFI::Unicast)],
        add_path: vec![],
        route_refresh: true,
        enhanced_route_refresh: false,
        extended_message: false,
        graceful_restart: None,
        md5_password: None,
        ttl_security: None,
        static_routes: vec![],
        static_flows: vec![],
    })
}

async fn session_pair(remote_as: u32) -> (Session, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).await.unwrap();
    let (server, _) = listener.accept().await.unwrap();

    let key = NeighborKey {
        local_ip: server.local_addr().unwrap().ip(),
        peer_ip: server.peer_addr().unwrap().ip(),
        local_as: 65000,
        peer_as: remote_as,
    };
    let protocol = Framed::new(server, MessageCodec::new());
    let session = Session::new(key, peer_config(remote_as), protocol, false);
    (session, client)
}

fn remote_open(asn: u32, hold_timer: u16, identifier: u32) -> Vec<u8> {
    let capabilities = Capabilities {
        four_byte_asn: Some(asn),
        families: Families::new(vec![Family::new(AFI::IPV4, SAFI::Unicast)]),
        route_refresh: true,
        ..Capabilities::default()
    };
    let open = Open {
        version: 4,
        peer_asn: asn.min(65535) as u16,
        hold_timer,
        identifier,
        parameters: capabilities.to_parameters(),
    };
    let mut buf = vec![];
    Message::Open(open)
        .encode(&Negotiated::default(), &mut buf)
        .unwrap();
    buf
}

async fn drain_client(client: &mut TcpStream) {
    let mut buf = [0u8; 4096];
    let _ = client.read(&mut buf).await.unwrap();
}

#[tokio::test]
async fn test_handshake_to_established() {
    let (mut session, mut client) = session_pair(65001).await;
    assert_eq!(session.state(), SessionState::Connect);

    // our OPEN goes out; the peer answers with its OPEN
    client
        .write_all(&remote_open(65001, 90, u32::from_be_bytes([2, 2, 2, 2])))
        .await
        .unwrap();
    let update = session.run().await.unwrap();
    assert!(update.is_none());
    assert_eq!(session.state(), SessionState::OpenConfirm);
    drain_client(&mut client).await;

    let negotiated = session.negotiated().unwrap();
    assert!(negotiated.asn4);
    assert!(negotiated.route_refresh);
    // hold time is min(local, peer)
    assert_eq!(negotiated.hold_time, 30);

    // peer KEEPALIVE completes the handshake
    let mut keepalive = vec![];
    Message::KeepAlive
        .encode(&Negotiated::default(), &mut keepalive)
        .unwrap();
    client.write_all(&keepalive).await.unwrap();
    match session.run().await.unwrap() {
        Some(SessionUpdate::Established(_)) => (),
        other => panic!("expected established, got {:?}", other.is_some()),
    }
    assert_eq!(session.state(), SessionState::Established);
}

#[tokio::test]
async fn test_open_with_zero_router_id_is_rejected() {
    let (mut session, mut client) = session_pair(65001).await;
    client.write_all(&remote_open(65001, 90, 0)).await.unwrap();
    match session.run().await {
        Err(SessionError::Protocol(err)) => {
            let notification = err.notification();
            assert_eq!((notification.code, notification.subcode), (2, 3));
        }
        other => panic!("expected protocol error, got {:?}", other.is_ok()),
    }
}

#[tokio::test]
async fn test_open_asn_mismatch() {
    let (mut session, mut client) = session_pair(65001).await;
    client
        .write_all(&remote_open(65099, 90, u32::from_be_bytes([2, 2, 2, 2])))
        .await
        .unwrap();
    match session.run().await {
        Err(SessionError::OpenAsnMismatch(received, expected)) => {
            assert_eq!(received, 65099);
            assert_eq!(expected, 65001);
        }
        other => panic!("expected ASN mismatch, got {:?}", other.is_ok()),
    }
}

#[tokio::test]
async fn test_open_low_hold_time_rejected() {
    let (mut session, mut client) = session_pair(65001).await;
    client
        .write_all(&remote_open(65001, 2, u32::from_be_bytes([2, 2, 2, 2])))
        .await
        .unwrap();
    match session.run().await {
        Err(SessionError::Protocol(err)) => {
            let notification = err.notification();
            assert_eq!((notification.code, notification.subcode), (2, 6));
        }
        other => panic!("expected protocol error, got {:?}", other.is_ok()),
    }
}

#[tokio::test]
async fn test_asn4_downgrade_surfaces_distinctly() {
    let (mut session, mut client) = session_pair(65001).await;
    // peer OPEN without the 4-byte ASN capability
    let open = Open {
        version: 4,
        peer_asn: 65001,
        hold_timer: 90,
        identifier: u32::from_be_bytes([2, 2, 2, 2]),
        parameters: Capabilities {
            families: Families::new(vec![Family::new(AFI::IPV4, SAFI::Unicast)]),
            route_refresh: true,
            ..Capabilities::default()
        }
        .to_parameters(),
    };
    let mut buf = vec![];
    Message::Open(open)
        .encode(&Negotiated::default(), &mut buf)
        .unwrap();
    client.write_all(&buf).await.unwrap();
    match session.run().await {
        Err(SessionError::Asn4Downgrade) => (),
        other => panic!("expected downgrade, got {:?}", other.is_ok()),
    }
    // a downgrade owes the peer no NOTIFICATION
    assert!(SessionError::Asn4Downgrade.notification().is_none());
}

// A NOTIFICATION in any state drops the session within one turn
#[tokio::test]
async fn test_notification_closes_session() {
    let (mut session, mut client) = session_pair(65001).await;
    let mut buf = vec![];
    Message::Notification(Notification::new(6, 2))
        .encode(&Negotiated::default(), &mut buf)
        .unwrap();
    client.write_all(&buf).await.unwrap();
    match session.run().await {
        Err(SessionError::NotificationReceived(notification)) => {
            assert_eq!((notification.code, notification.subcode), (6, 2));
        }
        other => panic!("expected notification error, got {:?}", other.is_ok()),
    }
}

#[tokio::test]
async fn test_remote_close_ends_session() {
    let (mut session, client) = session_pair(65001).await;
    drop(client);
    // the first run sends OPEN into a closing socket; either that write
    // or the following read must surface the loss
    let mut closed = false;
    for _ in 0..3 {
        if session.run().await.is_err() {
            closed = true;
            break;
        }
    }
    assert!(closed);
}
