use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{Duration, Instant};

use super::codec::{MessageCodec, MessageProtocol};
use super::{NeighborKey, Poller, PollerTx, Session, SessionError, SessionUpdate};
use crate::config::{PeerConfig, ServerConfig};
use crate::message::{Family, Notification};
use crate::rib::Route;
use tokio_util::codec::Framed;

type RibCache = HashMap<Family, HashMap<Vec<u8>, Route>>;

pub struct SessionManager {
    pub(crate) idle_peers: Poller,
    /// Active sessions by neighbor key
    pub sessions: Arc<Mutex<HashMap<NeighborKey, Session>>>,
    config: Arc<ServerConfig>,
    poller_tx: PollerTx,
    /// Advertised caches preserved across a graceful restart, with the
    /// deadline after which they are discarded as stale
    gr_stash: HashMap<NeighborKey, (RibCache, Instant)>,
}

impl SessionManager {
    pub fn new(config: Arc<ServerConfig>, listener: TcpListener) -> Self {
        let (poller_tx, poller_rx) = mpsc::unbounded_channel();
        let mut poller = Poller::new(listener, config.poll_interval.into(), poller_rx);
        for peer_config in config.peers.iter() {
            poller.upsert_config(Arc::clone(peer_config));
        }

        Self {
            idle_peers: poller,
            sessions: Arc::new(Mutex::new(HashMap::with_capacity(config.peers.len()))),
            config,
            poller_tx,
            gr_stash: HashMap::new(),
        }
    }

    pub fn get_peer_configs(&self) -> Vec<Arc<PeerConfig>> {
        self.config.peers.to_vec()
    }

    pub fn sessions_handle(&self) -> Arc<Mutex<HashMap<NeighborKey, Session>>> {
        Arc::clone(&self.sessions)
    }

    /// Advance every session one step and watch for new connections.
    /// Returns at most one SessionUpdate per call.
    pub async fn get_update(&mut self) -> Result<Option<SessionUpdate>, Box<dyn Error>> {
        {
            // Sessions that have ended this turn
            let mut ended: Vec<(NeighborKey, std::net::IpAddr, bool)> = Vec::new();
            let sessions_handle = Arc::clone(&self.sessions);
            let mut sessions = sessions_handle.lock().await;
            let mut result: Option<SessionUpdate> = None;

            for (key, session) in sessions.iter_mut() {
                match session.run().await {
                    Ok(Some(SessionUpdate::Established(info))) => {
                        self.idle_peers.reset_backoff(&session.peer.remote_ip);
                        info!("Session established with {}", key);
                        result = Some(SessionUpdate::Established(info));
                    }
                    Ok(Some(update)) => {
                        result = Some(update);
                    }
                    Ok(None) => (),
                    Err(err) => {
                        let graceful = self.close_session(key, session, &err).await;
                        ended.push((*key, session.addr, graceful));
                    }
                }
                if result.is_some() {
                    break;
                }
            }

            if !ended.is_empty() {
                for (key, _, _) in &ended {
                    sessions.remove(key);
                }
                return Ok(Some(SessionUpdate::Ended(ended)));
            }
            if result.is_some() {
                return Ok(result);
            }
        }

        self.expire_stale_caches();

        // No session work; look for a new connection (in or out)
        if let Some((stream, peer_config, asn4_compat)) =
            self.idle_peers.get_connection().await?
        {
            let local_addr = stream.local_addr()?;
            let remote_addr = stream.peer_addr()?;
            let key = NeighborKey {
                local_ip: local_addr.ip(),
                peer_ip: remote_addr.ip(),
                local_as: peer_config.local_as,
                peer_as: peer_config.remote_as,
            };
            let mut sessions = self.sessions.lock().await;
            if sessions.contains_key(&key) {
                warn!(
                    "Unexpected connection from {}: Already have an existing session",
                    remote_addr.ip(),
                );
                return Ok(None);
            }
            let protocol: MessageProtocol = Framed::new(stream, MessageCodec::new());
            let mut new_session = Session::new(key, peer_config, protocol, asn4_compat);
            // Graceful restart: hand the preserved advertisement cache
            // back so nothing is needlessly re-advertised
            if let Some((cache, deadline)) = self.gr_stash.remove(&key) {
                if Instant::now() < deadline {
                    debug!("Restoring graceful-restart cache for {}", key);
                    new_session.rib_out.restore_cache(cache);
                }
            }
            info!("New session started: {}", remote_addr.ip());
            sessions.insert(key, new_session);
        }
        Ok(None)
    }

    /// Send whatever NOTIFICATION the error calls for and arrange the
    /// reconnect. Returns whether the close is graceful-restart scoped.
    async fn close_session(
        &mut self,
        key: &NeighborKey,
        session: &mut Session,
        err: &SessionError,
    ) -> bool {
        if let Some(notification) = err.notification() {
            session.send_notification(notification).await;
        }
        warn!("{}", err);

        let graceful = session.graceful_restart_negotiated()
            && !matches!(err, SessionError::Deconfigured);
        if graceful {
            let restart_time = session
                .negotiated()
                .and_then(|n| n.graceful_restart.as_ref())
                .map(|gr| gr.restart_time)
                .unwrap_or(0);
            let deadline = Instant::now() + Duration::from_secs(restart_time.into());
            self.gr_stash
                .insert(*key, (session.rib_out.take_cache(), deadline));
        }

        // An ASN4 downgrade is a restart in compatibility mode, not an
        // error: reconnect with the 4-byte capability withheld
        let asn4_compat =
            matches!(err, SessionError::Asn4Downgrade) || session.asn4_compat();
        if !matches!(err, SessionError::Deconfigured) {
            if self
                .poller_tx
                .send((Arc::clone(&session.peer), asn4_compat))
                .is_err()
            {
                warn!("Could not reschedule {} for reconnection", key);
            }
        }
        graceful
    }

    fn expire_stale_caches(&mut self) {
        let now = Instant::now();
        self.gr_stash.retain(|key, (_, deadline)| {
            if now >= *deadline {
                debug!("Graceful-restart cache for {} went stale", key);
                false
            } else {
                true
            }
        });
    }

    /// Queue a peer for (re)connection, optionally in 2-byte ASN
    /// compatibility mode
    pub fn reschedule(&self, config: Arc<PeerConfig>, asn4_compat: bool) {
        if self.poller_tx.send((config, asn4_compat)).is_err() {
            warn!("Could not reschedule peer for reconnection");
        }
    }

    /// Add a runtime-created peer
    pub fn add_peer(&mut self, config: Arc<PeerConfig>) {
        self.idle_peers.upsert_config(config);
    }

    /// Drop a peer configuration (its session, if any, is closed by the
    /// caller)
    pub fn remove_peer(&mut self, network: &ipnetwork::IpNetwork) {
        self.idle_peers.remove_config(network);
    }

    pub fn idle_peer_configs(&self) -> Vec<Arc<PeerConfig>> {
        self.idle_peers.idle_configs()
    }

    /// Orderly daemon shutdown: CEASE to every established peer
    pub async fn shutdown(&mut self) {
        let mut sessions = self.sessions.lock().await;
        for (key, session) in sessions.iter_mut() {
            debug!("Shutting down session with {}", key);
            session.send_notification(Notification::new(6, 2)).await;
        }
        sessions.clear();
    }

    /// Apply a reloaded configuration: new peers are added to the
    /// poller, removed peers are torn down
    pub async fn reload(&mut self, new_config: Arc<ServerConfig>) {
        let mut keep: Vec<ipnetwork::IpNetwork> = Vec::with_capacity(new_config.peers.len());
        for peer in new_config.peers.iter() {
            keep.push(peer.remote_ip);
            self.idle_peers.upsert_config(Arc::clone(peer));
        }
        let mut sessions = self.sessions.lock().await;
        let mut removed: Vec<NeighborKey> = Vec::new();
        for (key, session) in sessions.iter_mut() {
            match new_config
                .peers
                .iter()
                .find(|p| p.remote_ip.contains(key.peer_ip))
            {
                Some(config) => session.update_config(Arc::clone(config)),
                None => removed.push(*key),
            }
        }
        for key in removed {
            if let Some(mut session) = sessions.remove(&key) {
                warn!("Session ended with {}, peer de-configured", key.peer_ip);
                session.send_notification(Notification::new(6, 3)).await;
            }
        }
        for stale in self
            .idle_peers
            .idle_configs()
            .iter()
            .filter(|c| !keep.contains(&c.remote_ip))
        {
            self.idle_peers.remove_config(&stale.remote_ip);
        }
        self.config = new_config;
    }
}
