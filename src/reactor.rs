use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::net::TcpListener;
use tokio::time::{Duration, Instant};

use crate::api::{response, Api, DaemonControl, FlushWaiter};
use crate::config::{self, ServerConfig};
use crate::message::Action;
use crate::process::{fifo, ProcessManager, Subscription};
use crate::rib::{RibIn, Route, RouteStore};
use crate::session::{transport, NeighborKey, SessionManager, SessionUpdate};
use crate::signal::{SignalAction, SignalQueue};
use crate::utils::{get_host_address, parse_flow_spec, parse_route_spec};

/// Bind the BGP listener and apply per-peer TCP MD5 keys to it
async fn build_listener(
    addr: IpAddr,
    port: u16,
    config: &ServerConfig,
) -> io::Result<TcpListener> {
    let listener = TcpListener::bind((addr, port)).await.map_err(|err| {
        error!("Could not listen on {}:{}: {}", addr, port, err);
        err
    })?;
    for peer in &config.peers {
        if let Some(password) = &peer.md5_password {
            if let Some(peer_ip) = get_host_address(&peer.remote_ip) {
                transport::set_md5sig(&listener, &peer_ip, password)?;
            }
        }
    }
    info!("Listening for BGP connections on {}:{}", addr, port);
    Ok(listener)
}

/// Run the daemon until shutdown. `config_path` enables reload on
/// SIGUSR1 / the `reload` API command.
pub async fn serve(
    addr: IpAddr,
    port: u16,
    config: ServerConfig,
    config_path: Option<String>,
) -> io::Result<()> {
    let config = Arc::new(config);
    let listener = build_listener(addr, port, &config).await?;
    let mut reactor = Reactor::new(config, config_path, listener)?;
    reactor.run().await
}

enum Turn {
    Session(Option<SessionUpdate>),
    Line(String, String),
    Signal,
    Tick,
}

/// The single-threaded cooperative core: every turn handles at most one
/// pending signal, advances the peers, drains one helper command, and
/// sleeps until the next deadline.
pub struct Reactor {
    config: Arc<ServerConfig>,
    config_path: Option<String>,
    manager: SessionManager,
    processes: ProcessManager,
    api: Api,
    signals: SignalQueue,
    store: RouteStore,
    rib_in: RibIn,
    waiters: Vec<FlushWaiter>,
    control: DaemonControl,
    /// RIB-in purge deadlines for peers that dropped under graceful
    /// restart: routes go stale when the timer fires without a reconnect
    gr_purges: Vec<(IpAddr, Instant)>,
}

impl Reactor {
    pub fn new(
        config: Arc<ServerConfig>,
        config_path: Option<String>,
        listener: TcpListener,
    ) -> io::Result<Self> {
        Ok(Reactor {
            manager: SessionManager::new(Arc::clone(&config), listener),
            processes: ProcessManager::new(),
            api: Api::new(),
            signals: SignalQueue::new()?,
            store: RouteStore::new(),
            rib_in: RibIn::new(),
            waiters: Vec::new(),
            control: DaemonControl::default(),
            gr_purges: Vec::new(),
            config_path,
            config,
        })
    }

    pub async fn run(&mut self) -> io::Result<()> {
        self.processes.start(&self.config.processes, false);
        if let Some(pipe_name) = self.config.pipe_name.clone() {
            match fifo::open_cli(&pipe_name) {
                Ok((receiver, out_path, keepalive)) => {
                    self.processes.register_cli(receiver, out_path, keepalive);
                }
                Err(err) => warn!("FIFO CLI unavailable: {}", err),
            }
        }
        // Signals delivered before this point were queued, not lost
        self.signals.mark_ready();

        loop {
            if let Some(action) = self.signals.active() {
                self.signals.rearm();
                match action {
                    SignalAction::Shutdown => self.control.shutdown = true,
                    SignalAction::Reload => self.control.reload = true,
                    SignalAction::FullReload => {
                        self.control.reload = true;
                        self.processes.start(&self.config.processes, true);
                    }
                }
            }
            if self.processes.terminate_requested() {
                warn!("Helper process loss requested termination");
                self.control.shutdown = true;
            }
            if self.control.shutdown {
                break;
            }
            if self.control.restart {
                self.control.restart = false;
                self.restart_sessions().await;
            }
            if self.control.reload {
                self.control.reload = false;
                self.reload().await;
            }

            let speed = Duration::from_secs_f64(self.config.reactor_speed.max(0.01));
            let turn = tokio::select! {
                update = self.manager.get_update() => match update {
                    Ok(update) => Turn::Session(update),
                    Err(err) => {
                        warn!("Session error: {}", err);
                        Turn::Tick
                    }
                },
                line = self.processes.next_line() => Turn::Line(line.0, line.1),
                _ = self.signals.recv() => Turn::Signal,
                _ = tokio::time::sleep(speed) => Turn::Tick,
            };

            match turn {
                Turn::Session(Some(update)) => self.handle_session_update(update).await,
                Turn::Session(None) => (),
                Turn::Line(service, line) => {
                    self.api
                        .dispatch(
                            &service,
                            &line,
                            &mut self.manager,
                            &mut self.store,
                            &mut self.rib_in,
                            &mut self.processes,
                            &mut self.waiters,
                            &mut self.control,
                        )
                        .await;
                }
                Turn::Signal | Turn::Tick => (),
            }

            self.processes.reap();
            self.complete_flushed_waiters().await;
            self.purge_stale_rib_in().await;
        }

        self.shutdown().await;
        Ok(())
    }

    async fn handle_session_update(&mut self, update: SessionUpdate) {
        match update {
            SessionUpdate::Learned((_key, addr, update)) => {
                self.processes
                    .broadcast(Subscription::ReceivePackets, |encoder| {
                        response::neighbor_event_line(encoder, addr, "receive update")
                    })
                    .await;
                if let Some(family) = update.eor() {
                    debug!("End-of-RIB for {} from {}", family, addr);
                    return;
                }
                let (announced, withdrawn) = self.rib_in.update_from_peer(addr, &update);
                for route in announced.iter().chain(withdrawn.iter()) {
                    let line_route = route.clone();
                    self.processes
                        .broadcast(Subscription::ReceiveRoutes, |encoder| {
                            response::route_line(encoder, Some(addr), &line_route)
                        })
                        .await;
                }
            }
            SessionUpdate::Established((key, addr)) => {
                self.seed_session(key, addr).await;
                self.gr_purges.retain(|(peer, _)| *peer != addr);
                self.processes
                    .broadcast(Subscription::NeighborChanges, |encoder| {
                        response::neighbor_event_line(encoder, addr, "up")
                    })
                    .await;
            }
            SessionUpdate::Ended(ended) => {
                for (_key, addr, graceful) in ended {
                    if graceful {
                        // Keep learned routes until the restart timer fires
                        let restart_time = self
                            .config
                            .peers
                            .iter()
                            .find(|p| p.remote_ip.contains(addr))
                            .and_then(|p| p.graceful_restart)
                            .unwrap_or(0);
                        self.gr_purges.push((
                            addr,
                            Instant::now() + Duration::from_secs(restart_time.into()),
                        ));
                    } else {
                        self.withdraw_rib_in(addr).await;
                    }
                    self.processes
                        .broadcast(Subscription::NeighborChanges, |encoder| {
                            response::neighbor_event_line(encoder, addr, "down")
                        })
                        .await;
                }
            }
        }
    }

    /// New session reached ESTABLISHED: queue the stored API routes and
    /// the configured static routes, then push them out
    async fn seed_session(&mut self, key: NeighborKey, addr: IpAddr) {
        let sessions = self.manager.sessions_handle();
        let mut sessions = sessions.lock().await;
        let session = match sessions.get_mut(&key) {
            Some(session) => session,
            None => return,
        };
        for route in self.store.routes_for(addr) {
            session.rib_out.add_to_rib(&route, false);
        }
        let mut statics: Vec<Route> = Vec::new();
        for spec in &session.peer.static_routes {
            let words: Vec<&str> = spec.split_whitespace().collect();
            match parse_route_spec(&words) {
                Ok(parsed) => statics.push(parsed.into_route(Action::Announce)),
                Err(err) => warn!("Bad static route '{}': {}", spec, err),
            }
        }
        for spec in &session.peer.static_flows {
            let words: Vec<&str> = spec.split_whitespace().collect();
            match parse_flow_spec(&words) {
                Ok(parsed) => statics.push(parsed.into_route(Action::Announce)),
                Err(err) => warn!("Bad static flow '{}': {}", spec, err),
            }
        }
        for route in statics {
            session.rib_out.add_to_rib(&route, false);
        }
        if let Err(err) = session.flush_rib().await {
            warn!("Could not flush initial routes to {}: {}", addr, err);
        }
    }

    /// Synthetic withdraws for everything a vanished peer had told us
    async fn withdraw_rib_in(&mut self, addr: IpAddr) {
        let withdrawn = self.rib_in.drop_peer(addr);
        for route in withdrawn {
            self.processes
                .broadcast(Subscription::ReceiveRoutes, |encoder| {
                    response::route_line(encoder, Some(addr), &route)
                })
                .await;
        }
    }

    async fn purge_stale_rib_in(&mut self) {
        let now = Instant::now();
        let expired: Vec<IpAddr> = self
            .gr_purges
            .iter()
            .filter(|(_, deadline)| now >= *deadline)
            .map(|(addr, _)| *addr)
            .collect();
        self.gr_purges.retain(|(_, deadline)| now < *deadline);
        for addr in expired {
            debug!("Graceful-restart timer expired for {}; flushing stale routes", addr);
            self.withdraw_rib_in(addr).await;
        }
    }

    /// Release `done` acks whose peers have flushed to the network
    async fn complete_flushed_waiters(&mut self) {
        if self.waiters.is_empty() {
            return;
        }
        let sessions = self.manager.sessions_handle();
        let sessions = sessions.lock().await;
        let mut completed: Vec<String> = Vec::new();
        self.waiters.retain(|waiter| {
            let flushed = waiter.peers.iter().all(|key| {
                sessions
                    .get(key)
                    // A vanished session has nothing left to flush
                    .map(|session| session.is_flushed())
                    .unwrap_or(true)
            });
            if flushed {
                completed.push(waiter.service.clone());
                false
            } else {
                true
            }
        });
        drop(sessions);
        for service in completed {
            self.processes.answer_done(&service).await;
        }
    }

    /// Kill every BGP session; peers reconnect with backoff
    async fn restart_sessions(&mut self) {
        info!("Restarting all BGP sessions");
        let sessions = self.manager.sessions_handle();
        let mut sessions = sessions.lock().await;
        let keys: Vec<NeighborKey> = sessions.keys().cloned().collect();
        for key in keys {
            if let Some(mut session) = sessions.remove(&key) {
                session
                    .send_notification(crate::message::Notification::new(6, 4))
                    .await;
                self.manager
                    .reschedule(Arc::clone(&session.peer), session.asn4_compat());
            }
        }
    }

    async fn reload(&mut self) {
        let path = match &self.config_path {
            Some(path) => path.clone(),
            None => {
                warn!("No configuration path; reload ignored");
                return;
            }
        };
        match config::from_file(&path) {
            Ok(new_config) => {
                info!("Configuration reloaded from {}", path);
                let new_config = Arc::new(new_config);
                self.manager.reload(Arc::clone(&new_config)).await;
                self.processes.start(&new_config.processes, false);
                self.config = new_config;
            }
            Err(err) => error!("Reload failed, keeping old configuration: {}", err),
        }
    }

    /// Two-phase shutdown: one more turn's worth of NOTIFICATIONs and
    /// helper goodbyes, then sockets close
    async fn shutdown(&mut self) {
        info!("Shutting down");
        self.manager.shutdown().await;
        self.processes.shutdown().await;
    }
}
