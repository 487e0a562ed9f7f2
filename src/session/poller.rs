use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use futures::{future, pin_mut, select, FutureExt};
use ipnetwork::IpNetwork;
use log::{debug, trace, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration, Instant};
use tokio_util::time::DelayQueue;

use super::transport;
use crate::config::PeerConfig;
use crate::message::{Message, Negotiated, Notification};
use crate::utils::get_host_address;

const TCP_INIT_TIMEOUT_MS: u16 = 1000;

/// Reconnect backoff bounds (seconds)
const BACKOFF_FLOOR: u64 = 1;
const BACKOFF_CAP: u64 = 60;

pub type PollerTx = mpsc::UnboundedSender<(Arc<PeerConfig>, bool)>;
pub type PollerRx = mpsc::UnboundedReceiver<(Arc<PeerConfig>, bool)>;

#[derive(Debug)]
pub struct IdlePeer {
    config: Arc<PeerConfig>,
    /// Reconnect with 4-byte ASN support withheld
    asn4_compat: bool,
}

impl IdlePeer {
    pub fn new(config: Arc<PeerConfig>, asn4_compat: bool) -> Self {
        Self {
            config,
            asn4_compat,
        }
    }

    pub fn get_config(&self) -> Arc<PeerConfig> {
        Arc::clone(&self.config)
    }

    async fn connect(
        &self,
        source_addr: SocketAddr,
    ) -> Result<(TcpStream, Arc<PeerConfig>, bool), io::Error> {
        let remote_ip = get_host_address(&self.config.remote_ip).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "Cannot dial a peer configured as a range",
            )
        })?;
        let peer_addr = SocketAddr::new(remote_ip, self.config.dest_port);
        let stream = transport::connect(
            peer_addr,
            source_addr,
            self.config.md5_password.as_deref(),
            self.config.ttl_security,
        )
        .await?;
        Ok((stream, Arc::clone(&self.config), self.asn4_compat))
    }
}

impl fmt::Display for IdlePeer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<IdlePeer {}>", self.config.remote_ip)
    }
}

/// What woke the poller up
enum PollEvent {
    Incoming(TcpStream, SocketAddr),
    Dial(IpAddr),
    Reschedule(Arc<PeerConfig>, bool),
    Idle,
}

/// Holds peers without an active session: accepts their incoming
/// connections and dials out to them with exponential backoff
pub struct Poller {
    idle_peers: HashMap<IpNetwork, IdlePeer>,
    tcp_listener: TcpListener,
    rx: PollerRx,
    interval: Duration,
    delay_queue: DelayQueue<IpAddr>,
    backoff: HashMap<IpNetwork, u64>,
}

impl Poller {
    pub fn new(listener: TcpListener, interval: u32 /* seconds */, rx: PollerRx) -> Self {
        let mut delay_queue = DelayQueue::with_capacity(4);
        // Keep an entry a year out so the queue is never empty
        delay_queue.insert_at(
            IpAddr::from(Ipv4Addr::new(0, 0, 0, 0)),
            Instant::now() + Duration::from_secs(31_536_000),
        );
        Self {
            idle_peers: HashMap::new(),
            tcp_listener: listener,
            interval: Duration::from_secs(interval.into()),
            delay_queue,
            rx,
            backoff: HashMap::new(),
        }
    }

    pub fn upsert_config(&mut self, config: Arc<PeerConfig>) {
        let network = config.remote_ip;
        if self
            .idle_peers
            .insert(network, IdlePeer::new(config, false))
            .is_some()
        {
            debug!("Peer config for {} updated", network);
        } else if let Some(remote_ip) = get_host_address(&network) {
            // Queue an outgoing connection attempt for new host peers
            self.delay_queue.insert(remote_ip, self.interval);
        }
    }

    pub fn remove_config(&mut self, network: &IpNetwork) {
        self.idle_peers.remove(network);
        self.backoff.remove(network);
    }

    /// A session reached ESTABLISHED; its next failure starts over at
    /// the backoff floor
    pub fn reset_backoff(&mut self, network: &IpNetwork) {
        self.backoff.remove(network);
    }

    pub fn idle_configs(&self) -> Vec<Arc<PeerConfig>> {
        self.idle_peers.values().map(|p| p.get_config()).collect()
    }

    fn next_backoff(&mut self, network: IpNetwork) -> u64 {
        let next = self
            .backoff
            .get(&network)
            .map(|current| (current * 2).min(BACKOFF_CAP))
            .unwrap_or(BACKOFF_FLOOR);
        self.backoff.insert(network, next);
        next
    }

    pub async fn get_connection(
        &mut self,
    ) -> Result<Option<(TcpStream, Arc<PeerConfig>, bool)>, io::Error> {
        let local_outbound = self.tcp_listener.local_addr()?;
        let event = {
            let listener = &self.tcp_listener;
            let delay_queue = &mut self.delay_queue;
            let rx = &mut self.rx;

            let accept = FutureExt::fuse(timeout(
                Duration::from_millis(TCP_INIT_TIMEOUT_MS.into()),
                listener.accept(),
            ));
            let expired = future::poll_fn(move |cx| delay_queue.poll_expired(cx)).fuse();
            let rescheduled = rx.recv().fuse();
            pin_mut!(accept, expired, rescheduled);
            select! {
                incoming = accept => match incoming {
                    Ok(Ok((stream, socket))) => PollEvent::Incoming(stream, socket),
                    _ => PollEvent::Idle,
                },
                outgoing = expired => match outgoing {
                    Some(entry) => PollEvent::Dial(entry.into_inner()),
                    None => PollEvent::Idle,
                },
                peer = rescheduled => match peer {
                    Some((config, asn4_compat)) => PollEvent::Reschedule(config, asn4_compat),
                    None => PollEvent::Idle,
                },
            }
        };

        match event {
            PollEvent::Incoming(stream, socket) => self.accept_incoming(stream, socket),
            PollEvent::Dial(addr) => self.dial(addr, local_outbound).await,
            PollEvent::Reschedule(config, asn4_compat) => {
                let network = config.remote_ip;
                let passive = config.passive;
                self.idle_peers
                    .insert(network, IdlePeer::new(config, asn4_compat));
                if let Some(addr) = get_host_address(&network) {
                    if passive {
                        debug!("Peer {} is passive; waiting for it to connect", addr);
                    } else {
                        let delay = self.next_backoff(network);
                        self.delay_queue.insert(addr, Duration::from_secs(delay));
                    }
                }
                Ok(None)
            }
            PollEvent::Idle => Ok(None),
        }
    }

    async fn dial(
        &mut self,
        addr: IpAddr,
        local_outbound: SocketAddr,
    ) -> Result<Option<(TcpStream, Arc<PeerConfig>, bool)>, io::Error> {
        trace!("Poller outbound triggered for {}", addr);
        // Peer may be gone if an incoming connection was established in
        // the meantime
        let network = match find_network(&self.idle_peers, addr) {
            Some(network) => network,
            None => return Ok(None),
        };
        let config = self.idle_peers[&network].get_config();
        if !config.enabled || config.passive {
            return Ok(None);
        }
        let source = SocketAddr::new(
            config.local_ip.unwrap_or_else(|| unspecified_for(addr)),
            0u16,
        );
        let peer = match self.idle_peers.remove(&network) {
            Some(peer) => peer,
            None => return Ok(None),
        };
        match peer.connect(source).await {
            Ok(connection) => Ok(Some(connection)),
            Err(err) => {
                let delay = self.next_backoff(network);
                warn!("Error connecting to {}: {} (retrying in {}s)", addr, err, delay);
                self.idle_peers.insert(network, peer);
                self.delay_queue.insert(addr, Duration::from_secs(delay));
                Ok(None)
            }
        }
    }

    fn accept_incoming(
        &mut self,
        stream: TcpStream,
        socket: SocketAddr,
    ) -> Result<Option<(TcpStream, Arc<PeerConfig>, bool)>, io::Error> {
        let matches: Vec<IpNetwork> = self
            .idle_peers
            .keys()
            .filter(|network| network.contains(socket.ip()))
            .cloned()
            .collect();
        // An incoming connection matching several wildcard ranges is
        // ambiguous; reject it
        if matches.len() > 1 {
            warn!(
                "Rejecting connection from {}: matches {} configured ranges",
                socket.ip(),
                matches.len()
            );
            reject_connection(&stream);
            return Ok(None);
        }
        let network = match matches.first() {
            Some(network) => *network,
            None => {
                warn!(
                    "Unexpected connection from {}: Not a configured peer",
                    socket.ip()
                );
                return Ok(None);
            }
        };
        let config = self.idle_peers[&network].get_config();
        if !config.enabled {
            return Ok(None);
        }
        // Respect a pinned local address
        if let Some(wanted) = config.local_ip {
            let local = stream.local_addr()?.ip();
            if local != wanted {
                warn!(
                    "Rejecting connection from {}: arrived on {} instead of {}",
                    socket.ip(),
                    local,
                    wanted
                );
                reject_connection(&stream);
                return Ok(None);
            }
        }
        if let Some(hops) = config.ttl_security {
            transport::set_ttl_security(&stream, &socket.ip(), hops)?;
        }
        let peer = match self.idle_peers.remove(&network) {
            Some(peer) => peer,
            None => return Ok(None),
        };
        debug!("Incoming new connection from {}", socket.ip());
        let asn4_compat = peer.asn4_compat;
        Ok(Some((stream, peer.get_config(), asn4_compat)))
    }
}

impl fmt::Display for Poller {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<Poller peers={}>", self.idle_peers.len())
    }
}

fn find_network(idle_peers: &HashMap<IpNetwork, IdlePeer>, peer: IpAddr) -> Option<IpNetwork> {
    idle_peers
        .keys()
        .find(|network| network.contains(peer))
        .cloned()
}

fn unspecified_for(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V4(_) => IpAddr::from([0u8; 4]),
        IpAddr::V6(_) => IpAddr::from([0u8; 16]),
    }
}

/// Best-effort CEASE / Connection Rejected before dropping the socket
fn reject_connection(stream: &TcpStream) {
    let mut buf = BytesMut::with_capacity(21);
    let message = Message::Notification(Notification::new(6, 5));
    if message
        .encode(&Negotiated::default(), &mut (&mut buf).writer())
        .is_ok()
    {
        let _ = stream.try_write(&buf);
    }
}
