use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use log::debug;

use super::Route;

#[derive(Debug)]
struct StoredRoute {
    route: Route,
    /// Peers currently using this route; its refcount
    peers: HashSet<IpAddr>,
}

/// Process-wide route store. A route used by many neighbors is held
/// once, keyed by its byte index, with a refcount; memory stays
/// O(#routes) instead of O(#routes x #peers).
#[derive(Debug, Default)]
pub struct RouteStore {
    routes: HashMap<Vec<u8>, StoredRoute>,
}

impl RouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Store the route once and attach it to `peers`; returns the
    /// byte-string index identifying it from now on
    pub fn inject_route_indexed(&mut self, peers: &[IpAddr], route: &Route) -> Vec<u8> {
        let index = route.index();
        let stored = self
            .routes
            .entry(index.clone())
            .or_insert_with(|| StoredRoute {
                route: route.clone(),
                peers: HashSet::new(),
            });
        stored.peers.extend(peers.iter().cloned());
        index
    }

    /// Release the route for `peers`; the entry disappears when the
    /// refcount drops to zero. Returns the stored route when found.
    pub fn withdraw_route_by_index(&mut self, peers: &[IpAddr], index: &[u8]) -> Option<Route> {
        let stored = self.routes.get_mut(index)?;
        for peer in peers {
            stored.peers.remove(peer);
        }
        let route = stored.route.clone();
        if stored.peers.is_empty() {
            self.routes.remove(index);
            debug!("Route store entry released");
        }
        Some(route)
    }

    pub fn refcount(&self, index: &[u8]) -> usize {
        self.routes
            .get(index)
            .map(|stored| stored.peers.len())
            .unwrap_or(0)
    }

    pub fn get(&self, index: &[u8]) -> Option<&Route> {
        self.routes.get(index).map(|stored| &stored.route)
    }

    /// Routes attached to a peer (used to seed a fresh session)
    pub fn routes_for(&self, peer: IpAddr) -> Vec<Route> {
        self.routes
            .values()
            .filter(|stored| stored.peers.contains(&peer))
            .map(|stored| stored.route.clone())
            .collect()
    }

    /// Drop a peer from every entry (it was deconfigured)
    pub fn remove_peer(&mut self, peer: IpAddr) {
        self.routes.retain(|_, stored| {
            stored.peers.remove(&peer);
            !stored.peers.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::attributes::{Origin, PathAttribute};
    use crate::message::{Action, AttributeSet, NextHop, Nlri, Prefix, AFI};
    use std::sync::Arc;

    fn route() -> Route {
        let prefix = Prefix::new(AFI::IPV4, 24, vec![10, 0, 0, 0]).unwrap();
        Route::new(
            Nlri::inet(&prefix, None, Action::Announce),
            Arc::new(AttributeSet::from_attributes(vec![PathAttribute::ORIGIN(
                Origin::IGP,
            )])),
            Action::Announce,
            NextHop::Ip("192.0.2.1".parse().unwrap()),
        )
    }

    #[test]
    fn test_store_refcount() {
        let mut store = RouteStore::new();
        let peers: Vec<IpAddr> = vec!["10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap()];
        let index = store.inject_route_indexed(&peers, &route());
        assert_eq!(store.len(), 1);
        assert_eq!(store.refcount(&index), 2);

        // same route for another peer does not duplicate storage
        let third: Vec<IpAddr> = vec!["10.0.0.3".parse().unwrap()];
        let same = store.inject_route_indexed(&third, &route());
        assert_eq!(index, same);
        assert_eq!(store.len(), 1);
        assert_eq!(store.refcount(&index), 3);

        store.withdraw_route_by_index(&peers, &index).unwrap();
        assert_eq!(store.refcount(&index), 1);
        store.withdraw_route_by_index(&third, &index).unwrap();
        assert_eq!(store.len(), 0);
        assert!(store.withdraw_route_by_index(&third, &index).is_none());
    }

    #[test]
    fn test_routes_for_peer() {
        let mut store = RouteStore::new();
        let peer: IpAddr = "10.0.0.1".parse().unwrap();
        store.inject_route_indexed(&[peer], &route());
        assert_eq!(store.routes_for(peer).len(), 1);
        assert!(store.routes_for("10.0.0.9".parse().unwrap()).is_empty());
        store.remove_peer(peer);
        assert!(store.is_empty());
    }
}
