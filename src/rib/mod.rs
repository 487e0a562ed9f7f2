pub mod rib_in;
pub mod route;
pub mod store;

pub use rib_in::RibIn;
pub use route::{routes_from_update, Route};
pub use store::RouteStore;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, trace};

use crate::message::{
    Action, AttributeSet, Families, Family, Message, Negotiated, NextHop, RefreshSubtype,
    RouteRefresh, Update, HEADER_LENGTH,
};

/// One group of pending routes sharing an attribute set and next-hop
#[derive(Debug)]
struct Bucket {
    attributes: Arc<AttributeSet>,
    next_hop: NextHop,
    /// NLRI indices in arrival order
    order: VecDeque<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Watchdog {
    /// Announced routes under this watchdog name
    plus: HashMap<Vec<u8>, Route>,
    /// Parked (withdrawn) routes under this watchdog name
    minus: HashMap<Vec<u8>, Route>,
}

/// Per-neighbor outgoing RIB: the routes we owe the peer, grouped so
/// that `updates()` can emit minimum-count UPDATE messages.
///
/// * `pending` — NLRI index → route still to send
/// * `buckets` — attribute identity → FIFO of pending NLRI indices
/// * `seen`    — per family, what the peer currently holds from us
#[derive(Debug, Default)]
pub struct RibOut {
    families: Families,
    negotiated: Negotiated,
    pending: HashMap<Vec<u8>, Route>,
    buckets: HashMap<Vec<u8>, Bucket>,
    seen: HashMap<Family, HashMap<Vec<u8>, Route>>,
    /// Families inside an Enhanced-Route-Refresh window
    refresh_window: Vec<Family>,
    refresh_begin_queue: VecDeque<Family>,
    refresh_end_queue: VecDeque<Family>,
    /// Changes that arrived during a refresh window
    refresh_delayed: Vec<Route>,
    watchdogs: HashMap<String, Watchdog>,
}

impl RibOut {
    pub fn new(families: Families) -> Self {
        RibOut {
            families,
            ..Default::default()
        }
    }

    /// Called when a session reaches OPENCONFIRM: the negotiated state
    /// drives message sizing and add-path encoding from here on
    pub fn set_negotiated(&mut self, negotiated: Negotiated) {
        self.families = negotiated.families.clone();
        self.negotiated = negotiated;
    }

    pub fn families(&self) -> &Families {
        &self.families
    }

    /// Is there anything left to emit?
    pub fn pending(&self) -> bool {
        !self.pending.is_empty()
            || !self.refresh_begin_queue.is_empty()
            || !self.refresh_end_queue.is_empty()
    }

    /// Routes queued but not yet sent
    pub fn queued_routes(&self) -> Vec<&Route> {
        self.pending.values().collect()
    }

    /// Routes the peer currently holds from us
    pub fn cached_routes(&self, family: Option<Family>) -> Vec<&Route> {
        self.seen
            .iter()
            .filter(|(f, _)| family.map(|wanted| **f == wanted).unwrap_or(true))
            .flat_map(|(_, routes)| routes.values())
            .collect()
    }

    /// Forget everything, pending and sent
    pub fn clear(&mut self) {
        self.pending.clear();
        self.buckets.clear();
        self.seen.clear();
        self.refresh_window.clear();
        self.refresh_begin_queue.clear();
        self.refresh_end_queue.clear();
        self.refresh_delayed.clear();
    }

    /// Keep the advertised cache across a session drop (graceful
    /// restart); pending work is dropped, it will be rebuilt
    pub fn take_cache(&mut self) -> HashMap<Family, HashMap<Vec<u8>, Route>> {
        let cache = std::mem::take(&mut self.seen);
        self.clear();
        cache
    }

    pub fn restore_cache(&mut self, cache: HashMap<Family, HashMap<Vec<u8>, Route>>) {
        self.seen = cache;
    }

    /// Queue every cached route as a withdraw (stale graceful-restart
    /// state after the restart timer fired)
    pub fn withdraw_cached(&mut self) {
        let routes: Vec<Route> = self
            .seen
            .values()
            .flat_map(|family| family.values().cloned())
            .collect();
        for route in routes {
            self.insert(route.with_action(Action::Withdraw), true);
        }
    }

    /// Add a route. With `force` unset, changes arriving during an
    /// enhanced-refresh window are delayed until the window closes, and
    /// an announce identical to the advertised state is suppressed.
    pub fn add_to_rib(&mut self, route: &Route, force: bool) {
        if !force && !self.refresh_window.is_empty() {
            self.refresh_delayed.push(route.clone());
            return;
        }
        // Re-announcing exactly what the peer already holds is a no-op
        if !force && route.action() == Action::Announce {
            if let Some(seen) = self.seen.get(&route.family()) {
                if let Some(advertised) = seen.get(&route.index()) {
                    if advertised.same_attributes(route) {
                        trace!("Suppressing duplicate announce for {}", route.nlri);
                        return;
                    }
                }
            }
        }
        self.insert(route.clone(), force);
    }

    /// Withdraw a route. Only the NLRI identity matters; withdrawing an
    /// NLRI the peer never saw (and which is not pending) is a no-op.
    pub fn del_from_rib(&mut self, route: &Route) {
        let index = route.index();
        let advertised = self
            .seen
            .get(&route.family())
            .map(|seen| seen.contains_key(&index))
            .unwrap_or(false);
        if !advertised && !self.pending.contains_key(&index) {
            trace!("Ignoring withdraw of never-advertised {}", route.nlri);
            return;
        }
        let withdraw = route.with_action(Action::Withdraw);
        if !self.refresh_window.is_empty() {
            self.refresh_delayed.push(withdraw);
            return;
        }
        self.insert(withdraw, false);
    }

    fn insert(&mut self, route: Route, _force: bool) {
        let index = route.index();

        // A change to an NLRI we have not sent yet replaces the queued one
        if let Some(old) = self.pending.remove(&index) {
            self.remove_from_bucket(&old.bucket_key(), &index);
            // Announce cancelled by a withdraw before it ever went out:
            // nothing to send unless the peer holds an older version
            if old.action() == Action::Announce && route.action() == Action::Withdraw {
                let advertised = self
                    .seen
                    .get(&route.family())
                    .map(|seen| seen.contains_key(&index))
                    .unwrap_or(false);
                if !advertised {
                    return;
                }
            }
        }

        let key = route.bucket_key();
        let bucket = self.buckets.entry(key).or_insert_with(|| Bucket {
            attributes: Arc::clone(&route.attributes),
            next_hop: route.next_hop,
            order: VecDeque::new(),
        });
        bucket.order.push_back(index.clone());
        self.pending.insert(index, route);
    }

    fn remove_from_bucket(&mut self, key: &[u8], index: &[u8]) {
        if let Some(bucket) = self.buckets.get_mut(key) {
            bucket.order.retain(|i| i != index);
            if bucket.order.is_empty() {
                self.buckets.remove(key);
            }
        }
    }

    /// Replay the advertised cache for the requested families. With
    /// `enhanced`, the replay is bracketed by ROUTE-REFRESH BEGIN/END
    /// and mutations arriving in between are buffered.
    pub fn resend(&mut self, families: Option<&[Family]>, enhanced: bool) {
        let requested: Vec<Family> = match families {
            Some(list) => list
                .iter()
                .filter(|f| self.families.contains(**f))
                .cloned()
                .collect(),
            None => self.families.iter().cloned().collect(),
        };
        for family in requested {
            if enhanced {
                if self.refresh_window.contains(&family) {
                    continue;
                }
                self.refresh_window.push(family);
                self.refresh_begin_queue.push_back(family);
            }
            let announced: Vec<Route> = self
                .seen
                .get_mut(&family)
                .map(|seen| seen.drain().map(|(_, route)| route).collect())
                .unwrap_or_default();
            debug!("Resending {} routes for {}", announced.len(), family);
            for route in announced {
                self.insert(route, true);
            }
        }
    }

    /// Enhanced route refresh for one family (RFC 7313)
    pub fn refresh(&mut self, family: Family) {
        self.resend(Some(&[family]), true);
    }

    // ------------------------------------------------------------------
    // Watchdogs: named route groups that can be parked and re-announced
    // without the controlling process resending them
    // ------------------------------------------------------------------

    pub fn insert_watchdog(&mut self, name: &str, route: &Route, parked: bool) {
        let watchdog = self.watchdogs.entry(name.to_string()).or_default();
        if parked {
            watchdog.minus.insert(route.index(), route.clone());
        } else {
            watchdog.plus.insert(route.index(), route.clone());
            self.add_to_rib(route, false);
        }
    }

    pub fn announce_watchdog(&mut self, name: &str) {
        if let Some(watchdog) = self.watchdogs.get_mut(name) {
            let parked: Vec<(Vec<u8>, Route)> = watchdog.minus.drain().collect();
            let mut announces = Vec::with_capacity(parked.len());
            for (index, route) in parked {
                let announce = route.with_action(Action::Announce);
                watchdog.plus.insert(index, announce.clone());
                announces.push(announce);
            }
            for announce in announces {
                self.add_to_rib(&announce, false);
            }
        }
    }

    pub fn withdraw_watchdog(&mut self, name: &str) {
        if let Some(watchdog) = self.watchdogs.get_mut(name) {
            let active: Vec<(Vec<u8>, Route)> = watchdog.plus.drain().collect();
            let mut withdraws = Vec::with_capacity(active.len());
            for (index, route) in active {
                let withdraw = route.with_action(Action::Withdraw);
                watchdog.minus.insert(index, withdraw.clone());
                withdraws.push(withdraw);
            }
            for withdraw in withdraws {
                self.del_from_rib(&withdraw);
            }
        }
    }

    /// Drain pending changes as wire messages. The iterator is
    /// restartable: state is committed per yielded message, so stopping
    /// early leaves the RIB consistent and the next call resumes from
    /// the unsent tail.
    pub fn updates(&mut self, grouped: bool) -> Updates<'_> {
        Updates { rib: self, grouped }
    }

    /// Build at most one UPDATE out of the buckets, committing the
    /// eviction and cache effects for exactly the NLRIs it carries
    fn next_bucket_update(&mut self, grouped: bool) -> Option<Message> {
        let max_size = usize::from(self.negotiated.max_message_size());

        while let Some(key) = self.buckets.keys().next().cloned() {
            let bucket = match self.buckets.get_mut(&key) {
                Some(bucket) => bucket,
                None => continue,
            };
            let attributes = Arc::clone(&bucket.attributes);
            let next_hop = bucket.next_hop;

            let mut taken: Vec<Route> = Vec::new();
            let mut family: Option<Family> = None;
            let mut action = Action::Unset;
            let mut size = 0usize;

            while let Some(index) = bucket.order.front().cloned() {
                let route = match self.pending.get(&index) {
                    Some(route) => route.clone(),
                    None => {
                        bucket.order.pop_front();
                        continue;
                    }
                };
                // Suppression against the advertised cache
                let advertised = self
                    .seen
                    .get(&route.family())
                    .and_then(|seen| seen.get(&index));
                let suppress = match route.action() {
                    Action::Announce => advertised
                        .map(|sent| sent.same_attributes(&route))
                        .unwrap_or(false),
                    Action::Withdraw => advertised.is_none(),
                    Action::Unset => true,
                };
                if suppress {
                    trace!("Suppressing {} at drain time", route.nlri);
                    bucket.order.pop_front();
                    self.pending.remove(&index);
                    continue;
                }

                match family {
                    None => {
                        family = Some(route.family());
                        action = route.action();
                        size = update_overhead(
                            route.family(),
                            route.action(),
                            &attributes,
                            next_hop,
                            &self.negotiated,
                        );
                    }
                    Some(started) => {
                        // One UPDATE: one family, one action
                        if route.family() != started || route.action() != action {
                            break;
                        }
                    }
                }

                let entry_len = route.nlri.encoded_len();
                if !taken.is_empty() && size + entry_len > max_size {
                    break;
                }
                size += entry_len;

                bucket.order.pop_front();
                self.pending.remove(&index);
                match route.action() {
                    Action::Announce => {
                        self.seen
                            .entry(route.family())
                            .or_default()
                            .insert(index, route.clone());
                    }
                    Action::Withdraw | Action::Unset => {
                        if let Some(seen) = self.seen.get_mut(&route.family()) {
                            seen.remove(&index);
                        }
                    }
                }
                taken.push(route);

                if !grouped {
                    break;
                }
            }

            if bucket.order.is_empty() {
                self.buckets.remove(&key);
            }
            if taken.is_empty() {
                continue;
            }

            let family = family.expect("taken is non-empty");
            let nlris = taken.into_iter().map(|route| route.nlri).collect();
            let update = match action {
                Action::Announce => Update::for_announce(family, next_hop, &attributes, nlris),
                _ => Update::for_withdraw(family, nlris),
            };
            return Some(Message::Update(update));
        }
        None
    }
}

/// Restartable draining iterator over a `RibOut`
pub struct Updates<'a> {
    rib: &'a mut RibOut,
    grouped: bool,
}

impl<'a> Iterator for Updates<'a> {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        // Owed refresh BEGIN markers go out before any replayed route
        if let Some(family) = self.rib.refresh_begin_queue.pop_front() {
            self.rib.refresh_end_queue.push_back(family);
            return Some(Message::RouteRefresh(RouteRefresh::new(
                family,
                RefreshSubtype::Begin,
            )));
        }

        if let Some(update) = self.rib.next_bucket_update(self.grouped) {
            return Some(update);
        }

        // All traffic drained: close any open refresh windows
        if let Some(family) = self.rib.refresh_end_queue.pop_front() {
            self.rib.refresh_window.retain(|f| *f != family);
            if self.rib.refresh_window.is_empty() {
                let delayed: Vec<Route> = self.rib.refresh_delayed.drain(..).collect();
                for route in delayed {
                    self.rib.insert(route, true);
                }
            }
            return Some(Message::RouteRefresh(RouteRefresh::new(
                family,
                RefreshSubtype::End,
            )));
        }
        None
    }
}

/// Fixed per-UPDATE byte cost before any NLRI is added
fn update_overhead(
    family: Family,
    action: Action,
    attributes: &AttributeSet,
    next_hop: NextHop,
    negotiated: &Negotiated,
) -> usize {
    let base = usize::from(HEADER_LENGTH) + 4; // header + the two length fields
    match (family.is_classic_unicast(), action) {
        // NEXT_HOP attribute: flags + code + len + 4 octets
        (true, Action::Announce) => base + attributes.packed_len(negotiated) + 7,
        (true, _) => base,
        // MP_REACH: attr header (ext. length) + afi/safi/nh-len/reserved + next-hop
        (false, Action::Announce) => {
            base + attributes.packed_len(negotiated) + 4 + 5 + next_hop.mp_bytes(family).len()
        }
        // MP_UNREACH: attr header + afi/safi
        (false, _) => base + 4 + 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::attributes::{Origin, PathAttribute};
    use crate::message::{Nlri, Prefix, AFI, SAFI};

    fn test_families() -> Families {
        Families::new(vec![
            Family::new(AFI::IPV4, SAFI::Unicast),
            Family::new(AFI::IPV6, SAFI::Unicast),
        ])
    }

    fn attrs() -> Arc<AttributeSet> {
        Arc::new(AttributeSet::from_attributes(vec![
            PathAttribute::ORIGIN(Origin::IGP),
            PathAttribute::AS_PATH(Default::default()),
            PathAttribute::LOCAL_PREF(100),
        ]))
    }

    fn v4_route(last_octet: u8, third_octet: u8) -> Route {
        let prefix = Prefix::new(AFI::IPV4, 24, vec![10, 0, third_octet, last_octet]).unwrap();
        Route::new(
            Nlri::inet(&prefix, None, Action::Announce),
            attrs(),
            Action::Announce,
            NextHop::Ip("192.0.2.1".parse().unwrap()),
        )
    }

    fn drain(rib: &mut RibOut) -> Vec<Message> {
        rib.updates(true).collect()
    }

    #[test]
    fn test_single_update_for_shared_attributes() {
        let mut rib = RibOut::new(test_families());
        for i in 0..10 {
            rib.add_to_rib(&v4_route(0, i), false);
        }
        let messages = drain(&mut rib);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            Message::Update(update) => assert_eq!(update.announced.len(), 10),
            _ => panic!("expected update"),
        }
        assert!(!rib.pending());
        assert_eq!(rib.cached_routes(None).len(), 10);
    }

    #[test]
    fn test_duplicate_announce_suppressed() {
        let mut rib = RibOut::new(test_families());
        let route = v4_route(0, 1);
        rib.add_to_rib(&route, false);
        assert_eq!(drain(&mut rib).len(), 1);
        // identical announce: no new messages
        rib.add_to_rib(&route, false);
        assert_eq!(drain(&mut rib).len(), 0);
        // changed next-hop: one new message
        rib.add_to_rib(&route.with_next_hop(NextHop::Ip("192.0.2.9".parse().unwrap())), false);
        assert_eq!(drain(&mut rib).len(), 1);
    }

    #[test]
    fn test_withdraw_of_unknown_is_noop() {
        let mut rib = RibOut::new(test_families());
        rib.del_from_rib(&v4_route(0, 1));
        assert!(!rib.pending());
        assert_eq!(drain(&mut rib).len(), 0);
    }

    #[test]
    fn test_withdraw_cancels_unsent_announce() {
        let mut rib = RibOut::new(test_families());
        let route = v4_route(0, 1);
        rib.add_to_rib(&route, false);
        rib.del_from_rib(&route);
        assert_eq!(drain(&mut rib).len(), 0);
    }

    #[test]
    fn test_withdraw_after_send_emits_and_evicts() {
        let mut rib = RibOut::new(test_families());
        let route = v4_route(0, 1);
        rib.add_to_rib(&route, false);
        assert_eq!(drain(&mut rib).len(), 1);
        rib.del_from_rib(&route);
        let messages = drain(&mut rib);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            Message::Update(update) => {
                assert!(update.is_withdrawal());
                assert!(!update.is_announcement());
            }
            _ => panic!("expected update"),
        }
        assert!(rib.cached_routes(None).is_empty());
    }

    #[test]
    fn test_updates_restartable() {
        let mut rib = RibOut::new(test_families());
        // two buckets via two different next-hops
        rib.add_to_rib(&v4_route(0, 1), false);
        rib.add_to_rib(
            &v4_route(0, 2).with_next_hop(NextHop::Ip("192.0.2.7".parse().unwrap())),
            false,
        );
        let first = rib.updates(true).next();
        assert!(first.is_some());
        assert!(rib.pending());
        let rest = drain(&mut rib);
        assert_eq!(rest.len(), 1);
        assert!(!rib.pending());
        assert_eq!(rib.cached_routes(None).len(), 2);
    }

    #[test]
    fn test_grouping_capacity_split() {
        let mut rib = RibOut::new(test_families());
        let shared = attrs();
        let overhead = update_overhead(
            Family::new(AFI::IPV4, SAFI::Unicast),
            Action::Announce,
            &shared,
            NextHop::Ip("192.0.2.1".parse().unwrap()),
            &Negotiated::default(),
        );
        // Each /24 NLRI costs 4 bytes on the wire
        let capacity = (4096 - overhead) / 4;
        let mut count = 0usize;
        'outer: for third in 0..=255u8 {
            for fourth in 0..=255u8 {
                if count == capacity + 1 {
                    break 'outer;
                }
                let prefix = Prefix::new(AFI::IPV4, 24, vec![10, third, fourth, 0]).unwrap();
                let route = Route::new(
                    Nlri::inet(&prefix, None, Action::Announce),
                    Arc::clone(&shared),
                    Action::Announce,
                    NextHop::Ip("192.0.2.1".parse().unwrap()),
                );
                rib.add_to_rib(&route, false);
                count += 1;
            }
        }
        let messages = drain(&mut rib);
        assert_eq!(messages.len(), 2);
        match &messages[0] {
            Message::Update(update) => assert_eq!(update.announced.len(), capacity),
            _ => panic!("expected update"),
        }
        match &messages[1] {
            Message::Update(update) => assert_eq!(update.announced.len(), 1),
            _ => panic!("expected update"),
        }
    }

    #[test]
    fn test_enhanced_refresh_brackets_replay() {
        let family = Family::new(AFI::IPV4, SAFI::Unicast);
        let mut rib = RibOut::new(test_families());
        rib.add_to_rib(&v4_route(0, 1), false);
        rib.add_to_rib(&v4_route(0, 2), false);
        assert_eq!(drain(&mut rib).len(), 1);

        rib.refresh(family);
        // a change arriving during the window is deferred
        let late = v4_route(0, 3);
        rib.add_to_rib(&late, false);

        let messages = drain(&mut rib);
        // BEGIN, replayed cache, END, then the deferred announce
        assert!(matches!(
            &messages[0],
            Message::RouteRefresh(rr) if rr.subtype == RefreshSubtype::Begin
        ));
        match &messages[1] {
            Message::Update(update) => assert_eq!(update.announced.len(), 2),
            _ => panic!("expected replayed update"),
        }
        assert!(matches!(
            &messages[2],
            Message::RouteRefresh(rr) if rr.subtype == RefreshSubtype::End
        ));
        match &messages[3] {
            Message::Update(update) => assert_eq!(update.announced.len(), 1),
            _ => panic!("expected deferred update"),
        }
        assert_eq!(messages.len(), 4);
        assert_eq!(rib.cached_routes(Some(family)).len(), 3);
    }

    #[test]
    fn test_ungrouped_one_nlri_per_update() {
        let mut rib = RibOut::new(test_families());
        for i in 0..3 {
            rib.add_to_rib(&v4_route(0, i), false);
        }
        let messages: Vec<Message> = rib.updates(false).collect();
        assert_eq!(messages.len(), 3);
    }

    #[test]
    fn test_fifo_order_within_bucket() {
        let mut rib = RibOut::new(test_families());
        let routes: Vec<Route> = (1..=3).map(|i| v4_route(0, i)).collect();
        for route in &routes {
            rib.add_to_rib(route, false);
        }
        let messages = drain(&mut rib);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            Message::Update(update) => {
                let sent: Vec<_> = update.announced.iter().map(|n| n.index()).collect();
                let expected: Vec<_> = routes.iter().map(|r| r.index()).collect();
                assert_eq!(sent, expected);
            }
            _ => panic!("expected update"),
        }
    }

    #[test]
    fn test_watchdog_park_and_announce() {
        let mut rib = RibOut::new(test_families());
        let route = v4_route(0, 1);
        rib.insert_watchdog("dns", &route, false);
        assert_eq!(drain(&mut rib).len(), 1);

        rib.withdraw_watchdog("dns");
        let messages = drain(&mut rib);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            Message::Update(update) => assert!(update.is_withdrawal()),
            _ => panic!("expected withdraw"),
        }

        rib.announce_watchdog("dns");
        let messages = drain(&mut rib);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            Message::Update(update) => assert!(update.is_announcement()),
            _ => panic!("expected announce"),
        }
    }

    #[test]
    fn test_graceful_restart_cache_survives() {
        let mut rib = RibOut::new(test_families());
        rib.add_to_rib(&v4_route(0, 1), false);
        assert_eq!(drain(&mut rib).len(), 1);

        let cache = rib.take_cache();
        assert!(rib.cached_routes(None).is_empty());
        rib.restore_cache(cache);
        assert_eq!(rib.cached_routes(None).len(), 1);

        // the restored cache still suppresses duplicate announces
        rib.add_to_rib(&v4_route(0, 1), false);
        assert_eq!(drain(&mut rib).len(), 0);

        rib.withdraw_cached();
        let messages = drain(&mut rib);
        assert_eq!(messages.len(), 1);
    }
}
