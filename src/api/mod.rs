mod command;
pub mod response;

pub use command::{parse_command, Command, RibDirection, Selector, SpecKind};

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use ipnetwork::IpNetwork;
use log::{debug, warn};

use crate::config::PeerConfig;
use crate::message::{Action, AttributeSet, Family, Notification, AFI, SAFI};
use crate::process::ProcessManager;
use crate::rib::{RibIn, RouteStore};
use crate::session::{NeighborKey, SessionManager};
use crate::utils::{get_host_address, parse_flow_spec, parse_route_spec, RouteSpec};

/// The dispatch grammar version we answer `api version` with
const API_VERSION: u8 = 6;

const HELP: &[&str] = &[
    "announce route <prefix> [next-hop <ip>] [attributes..] [sync]",
    "withdraw route <prefix> [sync]",
    "announce flow <matches> then <action>",
    "announce|withdraw watchdog <name>",
    "neighbor <selector> announce|withdraw|refresh|teardown|show",
    "neighbor <ip> create remote-as <asn> [..] | neighbor <selector> delete",
    "show rib in|out [selector] [family]",
    "flush rib out [selector] | clear rib in|out [selector]",
    "group start | group end | group <cmd>; <cmd>",
    "ack enable|disable|silence | sync enable|disable",
    "ping | version | api version <n> | status | help | bye",
    "reload | restart | shutdown",
];

/// A `done` owed to a service once a set of peers has flushed
#[derive(Debug)]
pub struct FlushWaiter {
    pub service: String,
    pub peers: Vec<NeighborKey>,
}

/// Daemon-level effects a command can request
#[derive(Debug, Default)]
pub struct DaemonControl {
    pub shutdown: bool,
    pub reload: bool,
    pub restart: bool,
}

#[derive(Debug, Default)]
struct GroupBuffer {
    commands: Vec<String>,
    /// Shared attributes installed by an `attributes` command
    attributes: Option<AttributeSet>,
}

/// Translates helper-process command lines into RIB operations and
/// response framing
#[derive(Default)]
pub struct Api {
    groups: HashMap<String, GroupBuffer>,
}

impl Api {
    pub fn new() -> Self {
        Api::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn dispatch(
        &mut self,
        service: &str,
        line: &str,
        manager: &mut SessionManager,
        store: &mut RouteStore,
        rib_in: &mut RibIn,
        processes: &mut ProcessManager,
        waiters: &mut Vec<FlushWaiter>,
        control: &mut DaemonControl,
    ) {
        debug!("[api] {} :: {}", service, line);

        // Inside a group block everything except `group end` is buffered
        if self.groups.contains_key(service) {
            let trimmed = line.trim();
            if trimmed != "group end" {
                if trimmed == "group start" {
                    processes
                        .answer_error(service, Some("already in group block"))
                        .await;
                    return;
                }
                match parse_command(trimmed) {
                    Ok(Command::Announce { .. })
                    | Ok(Command::Withdraw { .. })
                    | Ok(Command::Attributes(_)) => {
                        let buffer = self.groups.get_mut(service).expect("group exists");
                        buffer.commands.push(trimmed.to_string());
                        processes.answer_done(service).await;
                    }
                    Ok(_) => {
                        processes
                            .answer_error(
                                service,
                                Some("only announce/withdraw/attributes in groups"),
                            )
                            .await;
                    }
                    Err(err) => {
                        processes.answer_error(service, Some(&err.reason)).await;
                    }
                }
                return;
            }
        }

        let command = match parse_command(line) {
            Ok(command) => command,
            Err(err) => {
                processes.answer_error(service, Some(&err.reason)).await;
                return;
            }
        };

        match command {
            Command::Shutdown => {
                control.shutdown = true;
                processes.answer_done(service).await;
            }
            Command::Reload => {
                control.reload = true;
                processes.answer_done(service).await;
            }
            Command::Restart => {
                control.restart = true;
                processes.answer_done(service).await;
            }
            Command::Status => {
                processes.write(service, "running").await;
                processes.answer_done(service).await;
            }
            Command::Version => {
                processes
                    .write(service, concat!("sbgpd ", env!("CARGO_PKG_VERSION")))
                    .await;
                processes.answer_done(service).await;
            }
            Command::Help => {
                for help_line in HELP {
                    processes.write(service, help_line).await;
                }
                processes.answer_done(service).await;
            }
            Command::ApiVersion(version) => {
                if version == API_VERSION {
                    processes.answer_done(service).await;
                } else {
                    processes
                        .answer_error(
                            service,
                            Some(&format!("supported api version {}", API_VERSION)),
                        )
                        .await;
                }
            }
            Command::Ping => {
                processes.write(service, "pong").await;
                processes.answer_done(service).await;
            }
            Command::Bye => {
                processes.answer_done(service).await;
            }
            Command::Reset => {
                self.groups.remove(service);
                processes.set_sync_mode(service, false);
                processes.set_ack_mode(service, crate::process::AckMode::Enabled);
                processes.answer_done(service).await;
            }
            Command::AckEnable => {
                processes.set_ack_mode(service, crate::process::AckMode::Enabled);
                processes.answer_done(service).await;
            }
            Command::AckDisable => {
                processes.set_ack_mode(service, crate::process::AckMode::Disabled);
                processes.answer_done(service).await;
            }
            Command::AckSilence => {
                processes.set_ack_mode(service, crate::process::AckMode::Silenced);
                processes.answer_done(service).await;
            }
            Command::SyncEnable => {
                processes.set_sync_mode(service, true);
                processes.answer_done(service).await;
            }
            Command::SyncDisable => {
                processes.set_sync_mode(service, false);
                processes.answer_done(service).await;
            }
            Command::GroupStart => {
                self.groups
                    .insert(service.to_string(), GroupBuffer::default());
                processes.answer_done(service).await;
            }
            Command::GroupEnd => match self.groups.remove(service) {
                Some(buffer) => {
                    self.run_group(service, buffer, manager, store, processes, waiters)
                        .await;
                }
                None => {
                    processes
                        .answer_error(service, Some("not in group block"))
                        .await;
                }
            },
            Command::GroupInline(commands) => {
                let buffer = GroupBuffer {
                    commands,
                    attributes: None,
                };
                self.run_group(service, buffer, manager, store, processes, waiters)
                    .await;
            }
            Command::Attributes(_) => {
                processes
                    .answer_error(service, Some("attributes is only valid inside a group"))
                    .await;
            }
            Command::Announce {
                selector,
                spec,
                sync,
            } => {
                self.apply_spec(
                    service,
                    &selector,
                    spec,
                    Action::Announce,
                    sync,
                    None,
                    manager,
                    store,
                    processes,
                    waiters,
                )
                .await;
            }
            Command::Withdraw {
                selector,
                spec,
                sync,
            } => {
                self.apply_spec(
                    service,
                    &selector,
                    spec,
                    Action::Withdraw,
                    sync,
                    None,
                    manager,
                    store,
                    processes,
                    waiters,
                )
                .await;
            }
            Command::AnnounceWatchdog { selector, name } => {
                let sessions = manager.sessions_handle();
                let mut sessions = sessions.lock().await;
                for session in sessions
                    .values_mut()
                    .filter(|s| selector.matches(s.key().peer_ip))
                {
                    session.rib_out.announce_watchdog(&name);
                }
                drop(sessions);
                processes.answer_done(service).await;
            }
            Command::WithdrawWatchdog { selector, name } => {
                let sessions = manager.sessions_handle();
                let mut sessions = sessions.lock().await;
                for session in sessions
                    .values_mut()
                    .filter(|s| selector.matches(s.key().peer_ip))
                {
                    session.rib_out.withdraw_watchdog(&name);
                }
                drop(sessions);
                processes.answer_done(service).await;
            }
            Command::Refresh { selector, family } => {
                let sessions = manager.sessions_handle();
                let mut sessions = sessions.lock().await;
                let mut refreshed = 0usize;
                for session in sessions
                    .values_mut()
                    .filter(|s| selector.matches(s.key().peer_ip))
                {
                    session.rib_out.refresh(family);
                    refreshed += 1;
                }
                drop(sessions);
                if refreshed > 0 {
                    processes.answer_done(service).await;
                } else {
                    processes
                        .answer_error(service, Some("no matching sessions"))
                        .await;
                }
            }
            Command::Teardown { selector, code } => {
                let sessions = manager.sessions_handle();
                let mut sessions = sessions.lock().await;
                let keys: Vec<NeighborKey> = sessions
                    .keys()
                    .filter(|key| selector.matches(key.peer_ip))
                    .cloned()
                    .collect();
                for key in keys {
                    if let Some(mut session) = sessions.remove(&key) {
                        session
                            .send_notification(Notification::new(6, code.unwrap_or(2)))
                            .await;
                        manager.reschedule(Arc::clone(&session.peer), session.asn4_compat());
                    }
                }
                drop(sessions);
                processes.answer_done(service).await;
            }
            Command::ShowRib {
                direction,
                selector,
                family,
            } => {
                self.show_rib(
                    service, direction, &selector, family, manager, rib_in, processes,
                )
                .await;
            }
            Command::FlushRib { selector } => {
                let sessions = manager.sessions_handle();
                let mut sessions = sessions.lock().await;
                for session in sessions
                    .values_mut()
                    .filter(|s| selector.matches(s.key().peer_ip))
                {
                    if let Err(err) = session.flush_rib().await {
                        warn!("Flush failed for {}: {}", session.key(), err);
                    }
                }
                drop(sessions);
                processes.answer_done(service).await;
            }
            Command::ClearRib {
                direction,
                selector,
            } => {
                match direction {
                    RibDirection::Out => {
                        let sessions = manager.sessions_handle();
                        let mut sessions = sessions.lock().await;
                        for session in sessions
                            .values_mut()
                            .filter(|s| selector.matches(s.key().peer_ip))
                        {
                            session.rib_out.clear();
                        }
                    }
                    RibDirection::In => match &selector {
                        Selector::All => {
                            rib_in.clear(None);
                        }
                        Selector::Peers(peers) => {
                            for peer in peers {
                                rib_in.clear(Some(*peer));
                            }
                        }
                    },
                }
                processes.answer_done(service).await;
            }
            Command::ShowNeighbors {
                selector,
                extensive,
            } => {
                let encoder = processes.encoder(service);
                let sessions = manager.sessions_handle();
                let sessions = sessions.lock().await;
                let mut lines: Vec<String> = Vec::with_capacity(sessions.len());
                for session in sessions
                    .values()
                    .filter(|s| selector.matches(s.key().peer_ip))
                {
                    let prefixes = rib_in.prefixes_from(session.key().peer_ip);
                    lines.push(response::session_summary(encoder, session, prefixes));
                    if extensive {
                        lines.push(response::session_detail(encoder, session));
                    }
                }
                drop(sessions);
                for config in manager.idle_peer_configs() {
                    if let Some(addr) = get_host_address(&config.remote_ip) {
                        if selector.matches(addr) {
                            lines.push(format!("neighbor {} state Idle", addr));
                        }
                    }
                }
                for response_line in lines {
                    processes.write(service, &response_line).await;
                }
                processes.answer_done(service).await;
            }
            Command::CreatePeer {
                peer_ip,
                remote_as,
                local_as,
                hold_timer,
                passive,
            } => {
                let configs = manager.get_peer_configs();
                let template = configs.first();
                let config = Arc::new(PeerConfig {
                    remote_ip: IpNetwork::from(peer_ip),
                    remote_as,
                    local_as: local_as
                        .or_else(|| template.map(|t| t.local_as))
                        .unwrap_or(0),
                    local_router_id: template
                        .map(|t| t.local_router_id)
                        .unwrap_or_else(|| IpAddr::from([0u8; 4])),
                    local_ip: None,
                    enabled: true,
                    passive,
                    hold_timer: hold_timer.unwrap_or(180),
                    dest_port: 179,
                    families: vec![
                        Family::new(AFI::IPV4, SAFI::Unicast),
                        Family::new(AFI::IPV6, SAFI::Unicast),
                    ],
                    add_path: vec![],
                    route_refresh: true,
                    enhanced_route_refresh: false,
                    extended_message: false,
                    graceful_restart: None,
                    md5_password: None,
                    ttl_security: None,
                    static_routes: vec![],
                    static_flows: vec![],
                });
                manager.add_peer(config);
                processes.answer_done(service).await;
            }
            Command::DeletePeer { selector } => {
                let sessions = manager.sessions_handle();
                let mut sessions = sessions.lock().await;
                let keys: Vec<NeighborKey> = sessions
                    .keys()
                    .filter(|key| selector.matches(key.peer_ip))
                    .cloned()
                    .collect();
                let mut networks: Vec<IpNetwork> = Vec::new();
                for key in keys {
                    if let Some(mut session) = sessions.remove(&key) {
                        session.send_notification(Notification::new(6, 3)).await;
                        networks.push(session.peer.remote_ip);
                        store.remove_peer(key.peer_ip);
                    }
                }
                drop(sessions);
                for config in manager.idle_peer_configs() {
                    if let Some(addr) = get_host_address(&config.remote_ip) {
                        if selector.matches(addr) {
                            networks.push(config.remote_ip);
                        }
                    }
                }
                for network in networks {
                    manager.remove_peer(&network);
                }
                processes.answer_done(service).await;
            }
        }
    }

    /// Apply all buffered commands of a group in one batch, so routes
    /// sharing attributes coalesce into minimum-count UPDATEs
    async fn run_group(
        &mut self,
        service: &str,
        buffer: GroupBuffer,
        manager: &mut SessionManager,
        store: &mut RouteStore,
        processes: &mut ProcessManager,
        waiters: &mut Vec<FlushWaiter>,
    ) {
        let mut shared = buffer.attributes;
        let mut failed: Option<String> = None;
        for line in buffer.commands {
            let command = match parse_command(&line) {
                Ok(command) => command,
                Err(err) => {
                    failed = Some(err.reason);
                    break;
                }
            };
            match command {
                Command::Attributes(words) => {
                    let word_refs: Vec<&str> = words.iter().map(|w| w.as_str()).collect();
                    match parse_attribute_spec(&word_refs) {
                        Ok(attributes) => shared = Some(attributes),
                        Err(err) => {
                            failed = Some(err.reason);
                            break;
                        }
                    }
                }
                Command::Announce {
                    selector,
                    spec,
                    sync,
                } => {
                    self.apply_spec(
                        service,
                        &selector,
                        spec,
                        Action::Announce,
                        sync,
                        shared.as_ref(),
                        manager,
                        store,
                        processes,
                        waiters,
                    )
                    .await;
                }
                Command::Withdraw {
                    selector,
                    spec,
                    sync,
                } => {
                    self.apply_spec(
                        service,
                        &selector,
                        spec,
                        Action::Withdraw,
                        sync,
                        shared.as_ref(),
                        manager,
                        store,
                        processes,
                        waiters,
                    )
                    .await;
                }
                _ => {
                    failed = Some("only announce/withdraw/attributes in groups".to_string());
                    break;
                }
            }
        }
        match failed {
            Some(reason) => processes.answer_error(service, Some(&reason)).await,
            None => processes.answer_done(service).await,
        }
    }

    /// Validate a route/flow spec and apply it to every matching peer
    #[allow(clippy::too_many_arguments)]
    async fn apply_spec(
        &mut self,
        service: &str,
        selector: &Selector,
        spec: SpecKind,
        action: Action,
        sync: bool,
        shared_attributes: Option<&AttributeSet>,
        manager: &mut SessionManager,
        store: &mut RouteStore,
        processes: &mut ProcessManager,
        waiters: &mut Vec<FlushWaiter>,
    ) {
        let parsed: Result<RouteSpec, _> = match &spec {
            SpecKind::Route(words) => {
                let word_refs: Vec<&str> = words.iter().map(|w| w.as_str()).collect();
                parse_route_spec(&word_refs)
            }
            SpecKind::Flow(words) => {
                let word_refs: Vec<&str> = words.iter().map(|w| w.as_str()).collect();
                parse_flow_spec(&word_refs)
            }
        };
        let spec = match parsed {
            Ok(spec) => spec,
            Err(err) => {
                processes.answer_error(service, Some(&err.reason)).await;
                return;
            }
        };
        let watchdog = spec.watchdog.clone();
        let mut route = spec.into_route(action);
        if let Some(shared) = shared_attributes {
            route = route.with_merged_attributes(shared);
        }
        if action == Action::Announce
            && route.next_hop == crate::message::NextHop::Unset
            && route.family().safi != SAFI::Flowspec
            && route.family().safi != SAFI::FlowspecVPN
        {
            processes
                .answer_error(service, Some("announce requires next-hop"))
                .await;
            return;
        }

        // Apply to live sessions
        let sessions = manager.sessions_handle();
        let mut sessions = sessions.lock().await;
        let mut flushed_peers: Vec<NeighborKey> = Vec::new();
        for session in sessions
            .values_mut()
            .filter(|s| selector.matches(s.key().peer_ip))
        {
            match (action, &watchdog) {
                (Action::Announce, Some(name)) => {
                    session.rib_out.insert_watchdog(name, &route, false)
                }
                (Action::Announce, None) => session.rib_out.add_to_rib(&route, false),
                (_, _) => session.rib_out.del_from_rib(&route),
            }
            flushed_peers.push(session.key());
        }
        drop(sessions);

        // Keep the store in line for peers that connect later
        let mut store_peers: Vec<IpAddr> = Vec::new();
        for config in manager.get_peer_configs() {
            if let Some(addr) = get_host_address(&config.remote_ip) {
                if selector.matches(addr) {
                    store_peers.push(addr);
                }
            }
        }
        match action {
            Action::Announce => {
                store.inject_route_indexed(&store_peers, &route);
            }
            _ => {
                store.withdraw_route_by_index(&store_peers, &route.index());
            }
        }

        let sync = sync || processes.sync_mode(service);
        if sync && !flushed_peers.is_empty() {
            waiters.push(FlushWaiter {
                service: service.to_string(),
                peers: flushed_peers,
            });
        } else {
            processes.answer_done(service).await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn show_rib(
        &mut self,
        service: &str,
        direction: RibDirection,
        selector: &Selector,
        family: Option<Family>,
        manager: &mut SessionManager,
        rib_in: &mut RibIn,
        processes: &mut ProcessManager,
    ) {
        let encoder = processes.encoder(service);
        let mut lines: Vec<String> = Vec::new();
        match direction {
            RibDirection::Out => {
                let sessions = manager.sessions_handle();
                let sessions = sessions.lock().await;
                for session in sessions
                    .values()
                    .filter(|s| selector.matches(s.key().peer_ip))
                {
                    let peer_ip = session.key().peer_ip;
                    for route in session.rib_out.cached_routes(family) {
                        lines.push(response::route_line(encoder, Some(peer_ip), route));
                    }
                    for route in session.rib_out.queued_routes() {
                        if family.map(|f| route.family() == f).unwrap_or(true) {
                            lines.push(response::route_line(encoder, Some(peer_ip), route));
                        }
                    }
                }
            }
            RibDirection::In => {
                let peer = match selector {
                    Selector::All => None,
                    Selector::Peers(peers) => peers.first().copied(),
                };
                for entry in rib_in.routes(peer, family) {
                    lines.push(response::route_line(encoder, None, &entry.route));
                }
            }
        }
        for response_line in lines {
            processes.write(service, &response_line).await;
        }
        processes.answer_done(service).await;
    }
}

/// Parse an `attributes ...` spec: attribute keywords without a prefix
fn parse_attribute_spec(words: &[&str]) -> Result<AttributeSet, crate::utils::ParseError> {
    // Reuse the route spec parser with a throwaway prefix
    let mut padded: Vec<&str> = Vec::with_capacity(words.len() + 1);
    padded.push("0.0.0.0/32");
    padded.extend_from_slice(words);
    let spec = parse_route_spec(&padded)?;
    Ok(spec.attributes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_attribute_spec() {
        let words: Vec<&str> = "med 100 local-preference 200".split_whitespace().collect();
        let attributes = parse_attribute_spec(&words).unwrap();
        assert!(attributes.contains(crate::message::Identifier::MULTI_EXIT_DISC));
        assert!(attributes.contains(crate::message::Identifier::LOCAL_PREF));
    }
}
