use std::cmp;
use std::fmt;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use log::{debug, trace, warn};
use tokio::time::{timeout, Duration};

use super::codec::MessageProtocol;
use super::{MessageCounts, SessionTimers};
use super::{NeighborKey, SessionError, SessionState, SessionUpdate};
use crate::config::PeerConfig;
use crate::message::{
    Capabilities, Families, GracefulRestart, Message, Negotiated, Notification, Open,
    RefreshSubtype, RouteRefresh, AddPathDirection, AS_TRANS,
};
use crate::rib::RibOut;
use crate::utils::{as_u32_be, format_time_as_elapsed};

/// This is where a connected peer is managed.
///
/// A `Session` drives the BGP state machine over a framed TCP stream:
/// OPEN negotiation, keepalive timing, and draining the outgoing RIB.
pub struct Session {
    pub(crate) key: NeighborKey,
    pub(crate) addr: IpAddr,
    pub(crate) state: SessionState,
    pub(crate) router_id: IpAddr,
    pub(crate) peer: Arc<PeerConfig>,
    pub(crate) protocol: MessageProtocol,
    pub(crate) connect_time: DateTime<Utc>,
    pub(crate) timers: SessionTimers,
    pub(crate) counts: MessageCounts,
    pub rib_out: RibOut,
    /// Capabilities we announce in our OPEN
    capabilities: Capabilities,
    /// Result of the capability exchange, once OPEN has been received
    negotiated: Option<Negotiated>,
    asn4_compat: bool,
}

impl Session {
    pub fn new(
        key: NeighborKey,
        peer: Arc<PeerConfig>,
        protocol: MessageProtocol,
        asn4_compat: bool,
    ) -> Session {
        let hold_seconds = peer.hold_timer;
        let capabilities = build_capabilities(&peer, asn4_compat);
        let families = Families::new(peer.families.clone());
        Session {
            key,
            addr: key.peer_ip,
            state: SessionState::Connect,
            router_id: key.peer_ip,
            peer,
            protocol,
            connect_time: Utc::now(),
            timers: SessionTimers::new(hold_seconds),
            counts: MessageCounts::new(),
            rib_out: RibOut::new(families),
            capabilities,
            negotiated: None,
            asn4_compat,
        }
    }

    pub fn key(&self) -> NeighborKey {
        self.key
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    /// True when every queued change has been written to the network
    pub fn is_flushed(&self) -> bool {
        !self.rib_out.pending()
    }

    pub fn negotiated(&self) -> Option<&Negotiated> {
        self.negotiated.as_ref()
    }

    pub fn counts(&self) -> MessageCounts {
        self.counts
    }

    pub fn connect_time(&self) -> DateTime<Utc> {
        self.connect_time
    }

    pub fn peer_router_id(&self) -> IpAddr {
        self.router_id
    }

    pub fn update_state(&mut self, new_state: SessionState) {
        debug!("{} went from {} to {}", self.addr, self.state, new_state);
        self.state = new_state;
    }

    pub fn update_config(&mut self, new_config: Arc<PeerConfig>) {
        debug!("Peer config for {} (active session) updated", self.addr);
        self.peer = new_config;
    }

    /// Advance the session one step: send our OPEN if due, read one
    /// message if available, check timers, then drain pending UPDATEs.
    pub async fn run(&mut self) -> Result<Option<SessionUpdate>, SessionError> {
        if !self.peer.enabled {
            return Err(SessionError::Deconfigured);
        }
        if self.state == SessionState::Connect || self.state == SessionState::Active {
            let open = self.create_open();
            self.send_message(Message::Open(open)).await?;
            self.update_state(SessionState::OpenSent);
        }

        match timeout(Duration::from_millis(100), self.protocol.next()).await {
            // Framed stream is exhausted, remote side closed connection
            Ok(None) => {
                return Err(SessionError::Other(format!(
                    "Connection closed by {}",
                    self.addr
                )));
            }
            Ok(Some(Ok(message))) => {
                trace!("[{}] Incoming: {}", self.addr, message);
                self.counts.tally_received(&message);
                self.timers.mark_heard();
                match self.process_message(message)? {
                    MessageResponse::Reply(message) => {
                        self.send_message(message).await?;
                    }
                    MessageResponse::Established => {
                        self.flush_rib().await?;
                        return Ok(Some(SessionUpdate::Established((self.key, self.addr))));
                    }
                    MessageResponse::Update(update) => {
                        return Ok(Some(SessionUpdate::Learned((self.key, self.addr, update))));
                    }
                    MessageResponse::Empty => (),
                }
                return Ok(None);
            }
            // Error decoding; close after sending the owed NOTIFICATION
            Ok(Some(Err(err))) => {
                return Err(SessionError::from(err));
            }
            // Timeout hit first; carry on to timers
            Err(_) => (),
        }

        if self.state != SessionState::Established {
            return Ok(None);
        }

        trace!("Hold time on {}: {}", self.addr, self.timers);
        if self.timers.keepalive_due().await? {
            self.send_message(Message::KeepAlive).await?;
        }

        self.flush_rib().await?;
        Ok(None)
    }

    /// Drain the outgoing RIB onto the wire; returns messages written
    pub async fn flush_rib(&mut self) -> Result<usize, SessionError> {
        if self.state != SessionState::Established {
            return Ok(0);
        }
        let mut queued: Vec<Message> = Vec::new();
        {
            let mut updates = self.rib_out.updates(true);
            while let Some(message) = updates.next() {
                queued.push(message);
            }
        }
        let count = queued.len();
        for message in queued {
            self.send_message(message).await?;
        }
        Ok(count)
    }

    pub fn process_message(&mut self, message: Message) -> Result<MessageResponse, SessionError> {
        let response = match message {
            Message::Open(open) => {
                let negotiated = self.open_received(open)?;
                self.timers = SessionTimers::new(negotiated.hold_time);
                self.protocol.codec_mut().set_negotiated(negotiated.clone());
                self.rib_out.set_negotiated(negotiated.clone());
                self.negotiated = Some(negotiated);
                match &self.state {
                    SessionState::OpenSent => {
                        self.update_state(SessionState::OpenConfirm);
                        MessageResponse::Reply(Message::KeepAlive)
                    }
                    _ => {
                        return Err(SessionError::FiniteStateMachine(fsm_err_for_state(
                            &self.state,
                        )));
                    }
                }
            }
            Message::KeepAlive => match self.state {
                SessionState::OpenConfirm => {
                    self.update_state(SessionState::Established);
                    MessageResponse::Established
                }
                _ => MessageResponse::Empty,
            },
            Message::Update(update) => match self.state {
                SessionState::Established => MessageResponse::Update(update),
                _ => {
                    return Err(SessionError::FiniteStateMachine(fsm_err_for_state(
                        &self.state,
                    )));
                }
            },
            Message::Notification(notification) => {
                warn!("{} NOTIFICATION: {}", self.addr, notification);
                return Err(SessionError::NotificationReceived(notification));
            }
            Message::RouteRefresh(refresh) => self.refresh_received(refresh),
        };
        Ok(response)
    }

    fn refresh_received(&mut self, refresh: RouteRefresh) -> MessageResponse {
        let enhanced = self
            .negotiated
            .as_ref()
            .map(|n| n.enhanced_route_refresh)
            .unwrap_or(false);
        match refresh.subtype {
            RefreshSubtype::Request => {
                debug!("[{}] {} requested", self.addr, refresh);
                self.rib_out.resend(Some(&[refresh.family]), enhanced);
            }
            subtype => {
                // Markers bracketing the peer's own refresh of us
                debug!("[{}] refresh {} for {}", self.addr, subtype, refresh.family);
            }
        }
        MessageResponse::Empty
    }

    // Send a message, and flush the send buffer afterwards. A socket
    // that stays blocked past the hold time means the peer is gone.
    pub async fn send_message(&mut self, message: Message) -> Result<(), io::Error> {
        trace!("[{}] Outgoing: {}", self.addr, message);
        let stall_limit = match self.timers.hold_seconds() {
            0 => 90,
            hold => hold,
        };
        self.counts.tally_sent(&message);
        timeout(
            Duration::from_secs(stall_limit.into()),
            self.protocol.send(message),
        )
        .await
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                "send buffer blocked longer than the hold time",
            )
        })?
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;
        self.timers.mark_wrote();
        Ok(())
    }

    pub fn open_received(&mut self, received_open: Open) -> Result<Negotiated, SessionError> {
        if received_open.version != 4 {
            return Err(SessionError::Protocol(crate::message::MessageError::open(
                1,
                &format!("Unsupported version {}", received_open.version),
            )));
        }
        let router_id = IpAddr::from(received_open.identifier.to_be_bytes());
        if received_open.identifier == 0 {
            return Err(SessionError::Protocol(crate::message::MessageError::open(
                3,
                "Router ID 0.0.0.0",
            )));
        }
        let remote_asn = received_open.asn();
        if remote_asn != self.peer.remote_as {
            return Err(SessionError::OpenAsnMismatch(remote_asn, self.peer.remote_as));
        }
        // Hold time below 3 is unacceptable; exactly 0 disables
        if received_open.hold_timer != 0 && received_open.hold_timer < 3 {
            return Err(SessionError::Protocol(crate::message::MessageError::open(
                6,
                &format!("Unacceptable hold time {}", received_open.hold_timer),
            )));
        }
        let received_capabilities = Capabilities::from_parameters(&received_open.parameters);

        // We announced a 4-byte ASN but the peer cannot: restart the
        // session in 2-byte compatibility mode rather than erroring out
        if self.capabilities.four_byte_asn.is_some() && received_capabilities.four_byte_asn.is_none()
        {
            return Err(SessionError::Asn4Downgrade);
        }

        let hold_time = if received_open.hold_timer == 0 || self.peer.hold_timer == 0 {
            0
        } else {
            cmp::min(received_open.hold_timer, self.peer.hold_timer)
        };
        debug!(
            "[{}] Received OPEN [w/ {} params]",
            self.addr,
            received_open.parameters.len()
        );
        self.router_id = router_id;
        Ok(self.capabilities.negotiate(
            &received_capabilities,
            self.peer.local_as,
            remote_asn,
            hold_time,
        ))
    }

    pub fn create_open(&self) -> Open {
        let router_id = match self.peer.local_router_id {
            IpAddr::V4(ipv4) => ipv4.octets(),
            // Router IDs are 4 bytes; fold a v6 ID down to its tail
            IpAddr::V6(ipv6) => {
                let octets = ipv6.octets();
                [octets[12], octets[13], octets[14], octets[15]]
            }
        };
        let two_byte_asn = if self.peer.local_as <= u32::from(u16::MAX) {
            self.peer.local_as as u16
        } else {
            AS_TRANS
        };
        Open {
            version: 4,
            peer_asn: two_byte_asn,
            hold_timer: self.peer.hold_timer,
            identifier: as_u32_be(router_id),
            parameters: self.capabilities.to_parameters(),
        }
    }

    /// The NOTIFICATION we send on an orderly local teardown
    pub async fn send_notification(&mut self, notification: Notification) {
        if let Err(err) = self.send_message(Message::Notification(notification)).await {
            debug!("Could not notify {}: {}", self.addr, err);
        }
    }

    /// Graceful restart negotiated on both sides with at least one
    /// family preserved?
    pub fn graceful_restart_negotiated(&self) -> bool {
        self.negotiated
            .as_ref()
            .and_then(|n| n.graceful_restart.as_ref())
            .map(|gr| !gr.families.is_empty())
            .unwrap_or(false)
    }

    pub fn asn4_compat(&self) -> bool {
        self.asn4_compat
    }
}

fn build_capabilities(peer: &PeerConfig, asn4_compat: bool) -> Capabilities {
    let mut capabilities = Capabilities {
        four_byte_asn: if asn4_compat {
            None
        } else {
            Some(peer.local_as)
        },
        families: Families::new(peer.families.clone()),
        route_refresh: peer.route_refresh,
        enhanced_route_refresh: peer.enhanced_route_refresh,
        extended_message: peer.extended_message,
        graceful_restart: peer.graceful_restart.map(|restart_time| GracefulRestart {
            restarting: false,
            restart_time,
            families: peer.families.iter().map(|f| (*f, true)).collect(),
        }),
        ..Capabilities::default()
    };
    for family in &peer.add_path {
        capabilities
            .add_path
            .insert(*family, AddPathDirection::SendReceivePaths);
    }
    capabilities
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<Session {} uptime={} hold_time={}>",
            self.addr,
            format_time_as_elapsed(self.connect_time),
            self.timers,
        )
    }
}

#[derive(Debug)]
pub enum MessageResponse {
    Reply(Message),
    Update(crate::message::Update),
    Established,
    Empty,
}

fn fsm_err_for_state(state: &SessionState) -> u8 {
    use SessionState::*;
    match state {
        OpenSent => 1,
        OpenConfirm => 2,
        Established => 3,
        _ => 0,
    }
}
