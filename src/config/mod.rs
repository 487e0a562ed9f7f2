mod file;

use std::io::Result;
use std::net::IpAddr;
use std::sync::Arc;

use ipnetwork::IpNetwork;
use log::warn;

use crate::message::Family;
use crate::process::{Encoder, Subscription};

/// Parse a TOML config file and return a ServerConfig
pub fn from_file(path: &str) -> Result<ServerConfig> {
    let spec = file::ServerConfigSpec::from_file(path)?;
    Ok(ServerConfig::from_spec(spec))
}

/// Parse TOML config contents (reload path, tests)
pub fn from_str(contents: &str) -> Result<ServerConfig> {
    let spec = file::ServerConfigSpec::from_str(contents)?;
    Ok(ServerConfig::from_spec(spec))
}

#[derive(Debug)]
pub struct ServerConfig {
    pub router_id: IpAddr,
    pub default_as: u32,
    pub poll_interval: u16,
    /// Upper bound on the reactor sleep, seconds
    pub reactor_speed: f64,
    /// FIFO CLI pipe name; `None` disables the CLI
    pub pipe_name: Option<String>,
    pub peers: Vec<Arc<PeerConfig>>,
    pub processes: Vec<Arc<ProcessConfig>>,
}

/// In-memory server representation of a peer config.
/// Missing spec items are defaulted to server values.
#[derive(Debug)]
pub struct PeerConfig {
    pub remote_ip: IpNetwork,
    pub remote_as: u32,
    pub local_as: u32,
    pub local_router_id: IpAddr,
    pub local_ip: Option<IpAddr>,
    pub enabled: bool,
    pub passive: bool,
    pub hold_timer: u16,
    pub dest_port: u16,
    pub families: Vec<Family>,
    pub add_path: Vec<Family>,
    pub route_refresh: bool,
    pub enhanced_route_refresh: bool,
    pub extended_message: bool,
    pub graceful_restart: Option<u16>,
    pub md5_password: Option<String>,
    pub ttl_security: Option<u8>,
    /// API text form route specs advertised at establishment
    pub static_routes: Vec<String>,
    pub static_flows: Vec<String>,
}

impl PeerConfig {
    /// Is this an eBGP session
    pub fn is_ebgp(&self) -> bool {
        self.remote_as != self.local_as
    }
}

/// Runtime config of a helper process; `file::ProcessConfigSpec`
/// documents the respawn/terminate contract
#[derive(Debug)]
pub struct ProcessConfig {
    pub name: String,
    pub run: String,
    pub encoder: Encoder,
    pub respawn: bool,
    pub terminate: bool,
    pub subscriptions: Vec<Subscription>,
}

impl ServerConfig {
    fn from_spec(spec: file::ServerConfigSpec) -> Self {
        let peers: Vec<_> = spec
            .peers
            .iter()
            .map(|p| {
                Arc::new(PeerConfig {
                    remote_ip: p.remote_ip,
                    remote_as: p.remote_as,
                    local_as: p.local_as.unwrap_or(spec.default_as),
                    local_router_id: p.local_router_id.unwrap_or(spec.router_id),
                    local_ip: p.local_ip,
                    enabled: p.enabled,
                    passive: p.passive,
                    hold_timer: p.hold_timer,
                    dest_port: p.dest_port,
                    families: p.families.clone(),
                    add_path: p.add_path.clone(),
                    route_refresh: p.route_refresh,
                    enhanced_route_refresh: p.enhanced_route_refresh,
                    extended_message: p.extended_message,
                    graceful_restart: p.graceful_restart,
                    md5_password: p.md5_password.clone(),
                    ttl_security: p.ttl_security,
                    static_routes: p.static_routes.clone(),
                    static_flows: p.static_flows.clone(),
                })
            })
            .collect();

        let processes: Vec<_> = spec
            .processes
            .iter()
            .map(|p| {
                let subscriptions = p
                    .subscriptions
                    .iter()
                    .filter_map(|s| match s.parse::<Subscription>() {
                        Ok(subscription) => Some(subscription),
                        Err(_) => {
                            warn!("Ignoring unknown subscription '{}' for {}", s, p.name);
                            None
                        }
                    })
                    .collect();
                Arc::new(ProcessConfig {
                    name: p.name.clone(),
                    run: p.run.clone(),
                    encoder: p.encoder.parse().unwrap_or(Encoder::Json),
                    respawn: p.respawn,
                    terminate: p.terminate,
                    subscriptions,
                })
            })
            .collect();

        Self {
            router_id: spec.router_id,
            default_as: spec.default_as,
            poll_interval: spec.poll_interval,
            reactor_speed: spec.reactor_speed,
            pipe_name: spec.pipe_name,
            peers,
            processes,
        }
    }
}
