use std::fmt;
use std::sync::Arc;

use crate::message::{
    Action, AttributeSet, Family, Identifier, NextHop, Nlri, Update,
};

/// A route: NLRI + attributes + an explicit action and next-hop.
///
/// The action always lives on the Route; nothing reads it back out of
/// the NLRI. The next-hop is likewise kept out of the attribute set and
/// only materialized as NEXT_HOP / MP_REACH_NLRI when an UPDATE is
/// built. Routes are immutable; the `with_*` methods derive new ones.
#[derive(Debug, Clone)]
pub struct Route {
    pub nlri: Nlri,
    pub attributes: Arc<AttributeSet>,
    action: Action,
    pub next_hop: NextHop,
}

impl Route {
    pub fn new(
        nlri: Nlri,
        attributes: Arc<AttributeSet>,
        action: Action,
        next_hop: NextHop,
    ) -> Route {
        Route {
            nlri,
            attributes,
            action,
            next_hop,
        }
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn family(&self) -> Family {
        self.nlri.family()
    }

    /// Identity of the route (the NLRI index)
    pub fn index(&self) -> Vec<u8> {
        self.nlri.index()
    }

    /// Identity of the attribute grouping this route belongs to: the
    /// attribute-set index plus the next-hop (one UPDATE carries exactly
    /// one next-hop)
    pub fn bucket_key(&self) -> Vec<u8> {
        let mut key = self.attributes.index();
        key.extend(self.next_hop.index_bytes());
        key
    }

    /// Same advertisement content (attributes and next-hop)
    pub fn same_attributes(&self, other: &Route) -> bool {
        self.next_hop == other.next_hop && self.attributes.index() == other.attributes.index()
    }

    pub fn with_action(&self, action: Action) -> Route {
        Route {
            nlri: self.nlri.with_action(action),
            attributes: Arc::clone(&self.attributes),
            action,
            next_hop: self.next_hop,
        }
    }

    pub fn with_next_hop(&self, next_hop: NextHop) -> Route {
        Route {
            nlri: self.nlri.clone(),
            attributes: Arc::clone(&self.attributes),
            action: self.action,
            next_hop,
        }
    }

    /// Derive a route inheriting shared `defaults`; attributes already
    /// present on this route win
    pub fn with_merged_attributes(&self, defaults: &AttributeSet) -> Route {
        Route {
            nlri: self.nlri.clone(),
            attributes: Arc::new(defaults.merged_with(&self.attributes)),
            action: self.action,
            next_hop: self.next_hop,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} next-hop {}",
            self.action, self.nlri, self.next_hop
        )
    }
}

/// Split a parsed UPDATE into announced/withdrawn routes. The wire-level
/// attributes (NEXT_HOP, MP_REACH, MP_UNREACH) are stripped; the
/// remaining portable set is shared by every produced route.
pub fn routes_from_update(update: &Update) -> (Vec<Route>, Vec<Route>) {
    let mut portable = update.attributes.clone();
    portable.remove(Identifier::NEXT_HOP);
    portable.remove(Identifier::MP_REACH_NLRI);
    portable.remove(Identifier::MP_UNREACH_NLRI);
    let attributes = Arc::new(portable);

    let (next_hop, announced_nlris) = update.announced_routes();
    let mut announced: Vec<Route> = announced_nlris
        .into_iter()
        .map(|nlri| {
            Route::new(
                nlri.clone(),
                Arc::clone(&attributes),
                Action::Announce,
                next_hop,
            )
        })
        .collect();

    let mut withdrawn: Vec<Route> = update
        .withdrawn_routes()
        .into_iter()
        .map(|nlri| {
            Route::new(
                nlri.clone(),
                Arc::clone(&attributes),
                Action::Withdraw,
                NextHop::Unset,
            )
        })
        .collect();

    // RFC 7606: a recoverable malformation turns announcements into
    // withdraws
    if update.treat_as_withdraw {
        withdrawn.extend(
            announced
                .drain(..)
                .map(|route| route.with_action(Action::Withdraw)),
        );
    }

    (announced, withdrawn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::attributes::{Origin, PathAttribute};
    use crate::message::{Prefix, AFI};

    fn route(next_hop: &str, med: u32) -> Route {
        let prefix = Prefix::new(AFI::IPV4, 24, vec![10, 0, 0, 0]).unwrap();
        Route::new(
            Nlri::inet(&prefix, None, Action::Announce),
            Arc::new(AttributeSet::from_attributes(vec![
                PathAttribute::ORIGIN(Origin::IGP),
                PathAttribute::MULTI_EXIT_DISC(med),
            ])),
            Action::Announce,
            NextHop::Ip(next_hop.parse().unwrap()),
        )
    }

    #[test]
    fn test_bucket_key_includes_next_hop() {
        let a = route("192.0.2.1", 100);
        let b = route("192.0.2.2", 100);
        let c = route("192.0.2.1", 100);
        assert_ne!(a.bucket_key(), b.bucket_key());
        assert_eq!(a.bucket_key(), c.bucket_key());
        assert!(a.same_attributes(&c));
        assert!(!a.same_attributes(&b));
    }

    #[test]
    fn test_with_action_sets_both() {
        let a = route("192.0.2.1", 100);
        let w = a.with_action(Action::Withdraw);
        assert_eq!(w.action(), Action::Withdraw);
        assert_eq!(w.nlri.action(), Action::Withdraw);
        assert_eq!(w.index(), a.index());
    }

    #[test]
    fn test_merged_attributes_route_wins() {
        let a = route("192.0.2.1", 100);
        let defaults = AttributeSet::from_attributes(vec![
            PathAttribute::MULTI_EXIT_DISC(999),
            PathAttribute::LOCAL_PREF(200),
        ]);
        let merged = a.with_merged_attributes(&defaults);
        match merged.attributes.get(Identifier::MULTI_EXIT_DISC) {
            Some(PathAttribute::MULTI_EXIT_DISC(med)) => assert_eq!(*med, 100),
            _ => panic!("missing MED"),
        }
        assert!(merged.attributes.contains(Identifier::LOCAL_PREF));
    }
}
