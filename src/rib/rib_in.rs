use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use log::debug;

use crate::message::{Action, Family, Update};

use super::route::{routes_from_update, Route};

/// One received route with its arrival time
#[derive(Debug, Clone)]
pub struct RibInEntry {
    pub route: Route,
    pub received_at: DateTime<Utc>,
}

/// Adj-RIB-In: everything peers told us, as-is. No decision process
/// runs on it; it exists to be surfaced to helper processes and the
/// `show rib in` command.
#[derive(Debug, Default)]
pub struct RibIn {
    entries: HashMap<IpAddr, HashMap<Vec<u8>, RibInEntry>>,
}

impl RibIn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(|peer| peer.len()).sum()
    }

    pub fn prefixes_from(&self, peer: IpAddr) -> usize {
        self.entries.get(&peer).map(|peer| peer.len()).unwrap_or(0)
    }

    /// Apply a parsed UPDATE; returns the (announced, withdrawn) routes
    /// for event fan-out to subscribed helpers
    pub fn update_from_peer(&mut self, peer: IpAddr, update: &Update) -> (Vec<Route>, Vec<Route>) {
        let (announced, withdrawn) = routes_from_update(update);
        let table = self.entries.entry(peer).or_default();
        for route in &withdrawn {
            table.remove(&route.index());
        }
        for route in &announced {
            table.insert(
                route.index(),
                RibInEntry {
                    route: route.clone(),
                    received_at: Utc::now(),
                },
            );
        }
        (announced, withdrawn)
    }

    /// Routes learned from one peer (or all with `None`)
    pub fn routes(&self, peer: Option<IpAddr>, family: Option<Family>) -> Vec<&RibInEntry> {
        self.entries
            .iter()
            .filter(|(addr, _)| peer.map(|wanted| **addr == wanted).unwrap_or(true))
            .flat_map(|(_, table)| table.values())
            .filter(|entry| {
                family
                    .map(|wanted| entry.route.family() == wanted)
                    .unwrap_or(true)
            })
            .collect()
    }

    /// Session ended: drop the peer's table. The returned synthetic
    /// withdraws are surfaced to subscribed helpers.
    pub fn drop_peer(&mut self, peer: IpAddr) -> Vec<Route> {
        let withdrawn: Vec<Route> = self
            .entries
            .remove(&peer)
            .map(|table| {
                table
                    .into_iter()
                    .map(|(_, entry)| entry.route.with_action(Action::Withdraw))
                    .collect()
            })
            .unwrap_or_default();
        if !withdrawn.is_empty() {
            debug!("Removed {} routes from RIB-in for {}", withdrawn.len(), peer);
        }
        withdrawn
    }

    pub fn clear(&mut self, peer: Option<IpAddr>) -> usize {
        match peer {
            Some(addr) => self
                .entries
                .remove(&addr)
                .map(|table| table.len())
                .unwrap_or(0),
            None => {
                let total = self.len();
                self.entries.clear();
                total
            }
        }
    }
}
