use std::fs::File;
use std::io::{self, Read};
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::Deserialize;

use crate::message::Family;
use crate::message::{AFI, SAFI};

struct Defaults {}

impl Defaults {
    fn enabled() -> bool {
        true
    }

    fn passive() -> bool {
        false
    }

    fn poll_interval() -> u16 {
        30
    }

    fn reactor_speed() -> f64 {
        1.0
    }

    fn hold_timer() -> u16 {
        180
    }

    fn dest_port() -> u16 {
        179
    }

    fn families() -> Vec<Family> {
        vec![
            Family::new(AFI::IPV4, SAFI::Unicast),
            Family::new(AFI::IPV6, SAFI::Unicast),
        ]
    }

    fn route_refresh() -> bool {
        true
    }

    fn encoder() -> String {
        "json".to_string()
    }

    fn respawn() -> bool {
        true
    }

    fn subscriptions() -> Vec<String> {
        vec!["neighbor-changes".to_string(), "receive-routes".to_string()]
    }
}

/// Config (toml) representation of a peer
#[derive(Clone, Debug, Deserialize)]
pub(super) struct PeerConfigSpec {
    // Peer connection details; a range admits incoming connections from
    // any address inside it
    pub(super) remote_ip: IpNetwork,
    pub(super) remote_as: u32,
    // Local connection details, deferring to server config if not provided
    pub(super) local_as: Option<u32>,
    pub(super) local_router_id: Option<IpAddr>,
    // Source address for the outgoing TCP connection
    pub(super) local_ip: Option<IpAddr>,

    #[serde(default = "Defaults::enabled")]
    pub(super) enabled: bool,

    // Only accept incoming TCP sessions, never connect out
    #[serde(default = "Defaults::passive")]
    pub(super) passive: bool,

    // Keepalives go out every 1/3rd of this value
    #[serde(default = "Defaults::hold_timer")]
    pub(super) hold_timer: u16,

    #[serde(default = "Defaults::dest_port")]
    pub(super) dest_port: u16,

    #[serde(default = "Defaults::families")]
    pub(super) families: Vec<Family>,

    // Families to negotiate ADD-PATH (send+receive) for
    #[serde(default = "Vec::new")]
    pub(super) add_path: Vec<Family>,

    #[serde(default = "Defaults::route_refresh")]
    pub(super) route_refresh: bool,

    #[serde(default)]
    pub(super) enhanced_route_refresh: bool,

    #[serde(default)]
    pub(super) extended_message: bool,

    // Graceful restart time in seconds; absent disables GR
    pub(super) graceful_restart: Option<u16>,

    // TCP MD5 signature password
    pub(super) md5_password: Option<String>,

    // Minimum accepted TTL (GTSM); 255 means directly connected
    pub(super) ttl_security: Option<u8>,

    // Routes to advertise at session establishment, in the API text form
    // (e.g. "10.1.0.0/24 next-hop 192.0.2.1 med 100")
    #[serde(default = "Vec::new")]
    pub(super) static_routes: Vec<String>,

    // Flow routes in the API text form
    // (e.g. "destination 10.0.0.0/24 protocol =6 then discard")
    #[serde(default = "Vec::new")]
    pub(super) static_flows: Vec<String>,
}

/// Config (toml) representation of a helper process.
///
/// Lifecycle flags: `respawn` re-executes the helper when its pipe
/// breaks or it exits; `terminate` shuts the whole daemon down when a
/// helper is lost for good. With both set, respawn wins until
/// `max_respawns` consecutive failures, then `terminate` applies. With
/// neither, the helper is marked broken and its subscriptions go dark.
#[derive(Clone, Debug, Deserialize)]
pub(super) struct ProcessConfigSpec {
    pub(super) name: String,
    // Command line to execute
    pub(super) run: String,
    // "json" or "text"
    #[serde(default = "Defaults::encoder")]
    pub(super) encoder: String,
    #[serde(default = "Defaults::respawn")]
    pub(super) respawn: bool,
    #[serde(default)]
    pub(super) terminate: bool,
    #[serde(default = "Defaults::subscriptions")]
    pub(super) subscriptions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ServerConfigSpec {
    // Global router-id (can be overridden per peer)
    pub(super) router_id: IpAddr,
    // Global ASN (can be overridden per peer)
    pub(super) default_as: u32,
    // Interval to poll idle peers (outbound connection), seconds
    #[serde(default = "Defaults::poll_interval")]
    pub(super) poll_interval: u16,
    // Upper bound on the reactor sleep, seconds
    #[serde(default = "Defaults::reactor_speed")]
    pub(super) reactor_speed: f64,
    // Name of the FIFO CLI pipe pair; absent disables the CLI
    pub(super) pipe_name: Option<String>,
    #[serde(default = "Vec::new")]
    pub(super) peers: Vec<PeerConfigSpec>,
    #[serde(default = "Vec::new")]
    pub(super) processes: Vec<ProcessConfigSpec>,
}

impl ServerConfigSpec {
    pub(super) fn from_file(path: &str) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Self::from_str(&contents)
    }

    pub(super) fn from_str(contents: &str) -> io::Result<Self> {
        toml::from_str(contents)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const CONFIG: &str = r#"
router_id = "1.1.1.1"
default_as = 65000
poll_interval = 15
pipe_name = "sbgpd"

[[peers]]
remote_ip = "127.0.0.2"
remote_as = 65001
local_as = 65000
hold_timer = 30
dest_port = 1179
passive = true
md5_password = "s3cret"
ttl_security = 255
graceful_restart = 120
families = ["ipv4 unicast", "ipv4 flow"]
static_routes = ["10.1.0.0/24 next-hop 192.0.2.1"]

[[peers]]
remote_ip = "2001:db8::/64"
remote_as = 65002
families = ["ipv6 unicast"]
add_path = ["ipv6 unicast"]

[[processes]]
name = "healthcheck"
run = "/usr/bin/env python3 watcher.py"
encoder = "text"
respawn = false
terminate = true
subscriptions = ["receive-routes"]
"#;

    #[test]
    fn test_parse_config() {
        let config = ServerConfigSpec::from_str(CONFIG).unwrap();
        assert_eq!(config.router_id, IpAddr::from(Ipv4Addr::new(1, 1, 1, 1)));
        assert_eq!(config.default_as, 65000);
        assert_eq!(config.poll_interval, 15);
        assert_eq!(config.pipe_name.as_deref(), Some("sbgpd"));
        assert_eq!(config.peers.len(), 2);

        let v4_peer = &config.peers[0];
        assert_eq!(v4_peer.local_as, Some(65000));
        assert_eq!(v4_peer.hold_timer, 30);
        assert_eq!(v4_peer.dest_port, 1179);
        assert!(v4_peer.passive);
        assert_eq!(v4_peer.md5_password.as_deref(), Some("s3cret"));
        assert_eq!(v4_peer.ttl_security, Some(255));
        assert_eq!(v4_peer.graceful_restart, Some(120));
        assert_eq!(v4_peer.families.len(), 2);
        assert_eq!(v4_peer.static_routes.len(), 1);

        let v6_peer = &config.peers[1];
        assert_eq!(v6_peer.hold_timer, 180);
        assert!(!v6_peer.passive);
        assert_eq!(v6_peer.add_path.len(), 1);

        let process = &config.processes[0];
        assert_eq!(process.name, "healthcheck");
        assert_eq!(process.encoder, "text");
        assert!(!process.respawn);
        assert!(process.terminate);
    }
}
