use std::net::IpAddr;

use itertools::Itertools;
use serde_json::json;

use crate::message::attributes::{Identifier, PathAttribute};
use crate::message::{Community, CommunityList};
use crate::process::Encoder;
use crate::rib::Route;
use crate::session::Session;
use crate::utils::format_time_as_elapsed;

/// One line describing a route, framed for the service's encoder.
/// Text form matches the command grammar so output can be replayed.
pub fn route_line(encoder: Encoder, neighbor: Option<IpAddr>, route: &Route) -> String {
    match encoder {
        Encoder::Text => {
            let mut line = String::with_capacity(64);
            if let Some(addr) = neighbor {
                line.push_str(&format!("neighbor {} ", addr));
            }
            line.push_str(&format!("{}", route));
            let attributes = route
                .attributes
                .iter()
                .filter_map(attribute_text)
                .join(" ");
            if !attributes.is_empty() {
                line.push(' ');
                line.push_str(&attributes);
            }
            line
        }
        Encoder::Json => {
            let mut value = json!({
                "type": "update",
                "action": route.action().to_string(),
                "nlri": route.nlri.to_string(),
                "family": route.family().to_string(),
                "next-hop": route.next_hop.to_string(),
                "attributes": attributes_json(route),
            });
            if let Some(addr) = neighbor {
                value["neighbor"] = json!({ "address": addr.to_string() });
            }
            value.to_string()
        }
    }
}

fn attribute_text(attribute: &PathAttribute) -> Option<String> {
    use PathAttribute::*;
    let rendered = match attribute {
        ORIGIN(origin) => format!("origin {}", origin.to_string().to_lowercase()),
        AS_PATH(path) if !path.is_empty() => format!("as-path [ {} ]", path),
        AS_PATH(_) => return None,
        MULTI_EXIT_DISC(med) => format!("med {}", med),
        LOCAL_PREF(pref) => format!("local-preference {}", pref),
        COMMUNITY(communities) => format!(
            "community [ {} ]",
            CommunityList(communities.iter().map(|c| Community::STANDARD(*c)).collect())
        ),
        EXTENDED_COMMUNITIES(communities) => format!(
            "extended-community [ {} ]",
            CommunityList(communities.iter().map(|c| Community::EXTENDED(*c)).collect())
        ),
        LARGE_COMMUNITY(communities) => format!(
            "large-community [ {} ]",
            CommunityList(communities.iter().map(|c| Community::LARGE(*c)).collect())
        ),
        _ => return None,
    };
    Some(rendered)
}

fn attributes_json(route: &Route) -> serde_json::Value {
    let mut attributes = json!({});
    for attribute in route.attributes.iter() {
        use PathAttribute::*;
        match attribute {
            ORIGIN(origin) => {
                attributes["origin"] = json!(origin.to_string().to_lowercase());
            }
            AS_PATH(path) => {
                attributes["as-path"] = json!(path.to_string());
            }
            MULTI_EXIT_DISC(med) => attributes["med"] = json!(med),
            LOCAL_PREF(pref) => attributes["local-preference"] = json!(pref),
            COMMUNITY(communities) => {
                attributes["community"] = json!(communities
                    .iter()
                    .map(|c| Community::STANDARD(*c).to_string())
                    .collect::<Vec<_>>());
            }
            EXTENDED_COMMUNITIES(communities) => {
                attributes["extended-community"] = json!(communities
                    .iter()
                    .map(|c| Community::EXTENDED(*c).to_string())
                    .collect::<Vec<_>>());
            }
            LARGE_COMMUNITY(communities) => {
                attributes["large-community"] = json!(communities
                    .iter()
                    .map(|c| Community::LARGE(*c).to_string())
                    .collect::<Vec<_>>());
            }
            _ => (),
        }
    }
    if route.attributes.get(Identifier::AS_PATH).is_none() {
        attributes["as-path"] = json!("");
    }
    attributes
}

/// One line announcing a neighbor state change
pub fn neighbor_event_line(encoder: Encoder, addr: IpAddr, event: &str) -> String {
    match encoder {
        Encoder::Text => format!("neighbor {} {}", addr, event),
        Encoder::Json => json!({
            "type": "state",
            "neighbor": { "address": addr.to_string(), "state": event },
        })
        .to_string(),
    }
}

/// Summary of an active session for `show neighbor`
pub fn session_summary(encoder: Encoder, session: &Session, prefixes_received: usize) -> String {
    match encoder {
        Encoder::Text => format!(
            "neighbor {} state {} router-id {} uptime {} msg-rcvd {} msg-sent {} prefixes {}",
            session.key().peer_ip,
            session.state(),
            session.peer_router_id(),
            format_time_as_elapsed(session.connect_time()),
            session.counts().received(),
            session.counts().sent(),
            prefixes_received,
        ),
        Encoder::Json => json!({
            "type": "neighbor",
            "address": session.key().peer_ip.to_string(),
            "state": session.state().to_string(),
            "router-id": session.peer_router_id().to_string(),
            "local-as": session.key().local_as,
            "peer-as": session.key().peer_as,
            "uptime": format_time_as_elapsed(session.connect_time()),
            "messages": {
                "received": session.counts().received(),
                "sent": session.counts().sent(),
            },
            "prefixes-received": prefixes_received,
        })
        .to_string(),
    }
}

/// Extended per-session detail (capabilities, timers)
pub fn session_detail(encoder: Encoder, session: &Session) -> String {
    let (hold_time, families, asn4): (u16, Vec<String>, bool) = match session.negotiated() {
        Some(negotiated) => (
            negotiated.hold_time,
            negotiated.families.iter().map(|f| f.to_string()).collect(),
            negotiated.asn4,
        ),
        None => (0, vec![], false),
    };
    match encoder {
        Encoder::Text => format!(
            "neighbor {} hold-time {} asn4 {} families [ {} ] updates-rcvd {} updates-sent {}",
            session.key().peer_ip,
            hold_time,
            asn4,
            families.join(", "),
            session.counts().updates_received(),
            session.counts().updates_sent(),
        ),
        Encoder::Json => json!({
            "type": "neighbor-detail",
            "address": session.key().peer_ip.to_string(),
            "hold-time": hold_time,
            "asn4": asn4,
            "families": families,
            "updates": {
                "received": session.counts().updates_received(),
                "sent": session.counts().updates_sent(),
            },
        })
        .to_string(),
    }
}
