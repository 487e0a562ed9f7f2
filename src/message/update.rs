use std::io::{Cursor, Error, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, warn};

use super::attributes::{
    AttributeError, AttributeSet, Identifier, MPReachNLRI, MPUnreachNLRI, PathAttribute,
};
use super::family::Family;
use super::nlri::{Action, NextHop, Nlri};
use super::open::Negotiated;
use super::{Header, MessageError};

/// Represents a BGP Update message
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Update {
    /// Routes withdrawn in the classic (IPv4 unicast) field
    pub withdrawn: Vec<Nlri>,
    /// Attributes associated with the announced routes
    pub attributes: AttributeSet,
    /// Routes announced in the classic (IPv4 unicast) field
    pub announced: Vec<Nlri>,
    /// RFC 7606: a recoverable attribute malformation was seen; the
    /// NLRIs of this UPDATE must be handled as withdraws
    pub treat_as_withdraw: bool,
}

impl Update {
    pub fn parse(
        header: &Header,
        stream: &mut impl Read,
        negotiated: &Negotiated,
    ) -> Result<Update, MessageError> {
        if header.length < 23 {
            return Err(MessageError::update(
                1,
                &format!("UPDATE length {} below minimum", header.length),
            ));
        }
        let mut remaining: usize = header.length as usize - 23;
        let classic = Family::ipv4_unicast();
        let add_path = negotiated.addpath_receive(classic);
        let mut treat_as_withdraw = false;

        // ----------------------------
        // Withdrawn routes
        // ----------------------------
        let withdrawn_len = stream.read_u16::<BigEndian>().map_err(MessageError::from)? as usize;
        if withdrawn_len > remaining {
            return Err(MessageError::update(
                1,
                &format!(
                    "Withdrawn length {} exceeds message length {}",
                    withdrawn_len, header.length
                ),
            ));
        }
        remaining -= withdrawn_len;
        let mut buffer = vec![0; withdrawn_len];
        stream.read_exact(&mut buffer).map_err(MessageError::from)?;
        let mut withdrawn: Vec<Nlri> = Vec::with_capacity(0);
        let mut cursor = Cursor::new(&buffer[..]);
        while (cursor.position() as usize) < withdrawn_len {
            withdrawn.push(
                Nlri::parse(classic, Action::Withdraw, add_path, &mut cursor)
                    .map_err(|err| MessageError::update(10, &err.to_string()))?,
            );
        }

        // ----------------------------
        // Path attributes
        // ----------------------------
        let attrs_len = stream.read_u16::<BigEndian>().map_err(MessageError::from)? as usize;
        if attrs_len > remaining {
            return Err(MessageError::update(
                1,
                &format!(
                    "Attribute length {} exceeds message length {}",
                    attrs_len, header.length
                ),
            ));
        }
        remaining -= attrs_len;
        let mut buffer = vec![0; attrs_len];
        stream.read_exact(&mut buffer).map_err(MessageError::from)?;
        let mut attributes = AttributeSet::new();
        let mut cursor = Cursor::new(&buffer[..]);
        while (cursor.position() as usize) < attrs_len {
            match PathAttribute::parse(&mut cursor, negotiated) {
                Ok(attribute) => attributes.insert(attribute)?,
                Err(AttributeError::Fatal(err)) => return Err(err),
                Err(AttributeError::TreatAsWithdraw(code, reason)) => {
                    warn!(
                        "Malformed attribute {} ({}), treating NLRIs as withdraws",
                        code, reason
                    );
                    treat_as_withdraw = true;
                }
                Err(AttributeError::Discard(code, reason)) => {
                    debug!("Discarding malformed attribute {} ({})", code, reason);
                }
            }
        }

        // ----------------------------
        // Announced NLRI
        // ----------------------------
        let mut buffer = vec![0; remaining];
        stream.read_exact(&mut buffer).map_err(MessageError::from)?;
        let mut announced: Vec<Nlri> = Vec::with_capacity(4);
        let mut cursor = Cursor::new(&buffer[..]);
        while (cursor.position() as usize) < buffer.len() {
            announced.push(
                Nlri::parse(classic, Action::Announce, add_path, &mut cursor)
                    .map_err(|err| MessageError::update(10, &err.to_string()))?,
            );
        }

        let update = Update {
            withdrawn,
            attributes,
            announced,
            treat_as_withdraw,
        };

        // RFC 7606 3.d: announcements missing a mandatory attribute are
        // handled as withdraws, not as session errors
        if update.is_announcement() && update.eor().is_none() {
            let missing_mandatory = !update.attributes.contains(Identifier::ORIGIN)
                || !update.attributes.contains(Identifier::AS_PATH)
                || (!update.announced.is_empty()
                    && !update.attributes.contains(Identifier::NEXT_HOP));
            if missing_mandatory {
                warn!("UPDATE missing a well-known mandatory attribute");
                return Ok(Update {
                    treat_as_withdraw: true,
                    ..update
                });
            }
        }
        Ok(update)
    }

    /// Encode the UPDATE payload (header excluded)
    pub fn encode(&self, negotiated: &Negotiated, buf: &mut impl Write) -> Result<(), Error> {
        let mut temp_buf: Vec<u8> = Vec::with_capacity(64);
        for withdraw in &self.withdrawn {
            withdraw.encode(&mut temp_buf)?;
        }
        buf.write_u16::<BigEndian>(temp_buf.len() as u16)?;
        buf.write_all(&temp_buf)?;
        temp_buf.clear();

        self.attributes.pack(negotiated, &mut temp_buf)?;
        buf.write_u16::<BigEndian>(temp_buf.len() as u16)?;
        buf.write_all(&temp_buf)?;
        temp_buf.clear();

        for route in &self.announced {
            route.encode(&mut temp_buf)?;
        }
        buf.write_all(&temp_buf)
    }

    pub fn get(&self, id: Identifier) -> Option<&PathAttribute> {
        self.attributes.get(id)
    }

    /// Checks if this UPDATE message contains announced prefixes
    pub fn is_announcement(&self) -> bool {
        !self.announced.is_empty() || self.get(Identifier::MP_REACH_NLRI).is_some()
    }

    /// Checks if this UPDATE message contains withdrawn routes
    pub fn is_withdrawal(&self) -> bool {
        !self.withdrawn.is_empty() || self.get(Identifier::MP_UNREACH_NLRI).is_some()
    }

    /// End-of-RIB detection: an empty UPDATE marks IPv4 unicast, an
    /// UPDATE holding only an empty MP_UNREACH marks that family
    pub fn eor(&self) -> Option<Family> {
        if self.withdrawn.is_empty() && self.announced.is_empty() {
            if self.attributes.is_empty() {
                return Some(Family::ipv4_unicast());
            }
            if self.attributes.len() == 1 {
                if let Some(PathAttribute::MP_UNREACH_NLRI(mp)) =
                    self.get(Identifier::MP_UNREACH_NLRI)
                {
                    if mp.withdrawn.is_empty() {
                        return Some(mp.family);
                    }
                }
            }
        }
        None
    }

    /// Build the End-of-RIB marker for a family
    pub fn eor_marker(family: Family) -> Update {
        let mut update = Update::default();
        if !family.is_classic_unicast() {
            update.attributes.set(PathAttribute::MP_UNREACH_NLRI(MPUnreachNLRI {
                family,
                withdrawn: vec![],
            }));
        }
        update
    }

    /// Build an announcement UPDATE for one family and one shared
    /// attribute set. IPv4 unicast rides in the classic NLRI field with a
    /// NEXT_HOP attribute; every other family uses MP_REACH_NLRI.
    pub fn for_announce(
        family: Family,
        next_hop: NextHop,
        attributes: &AttributeSet,
        nlris: Vec<Nlri>,
    ) -> Update {
        let mut attributes = attributes.clone();
        if family.is_classic_unicast() {
            if let Some(addr) = next_hop.addr() {
                attributes.set(PathAttribute::NEXT_HOP(addr));
            }
            Update {
                withdrawn: vec![],
                attributes,
                announced: nlris,
                treat_as_withdraw: false,
            }
        } else {
            attributes.set(PathAttribute::MP_REACH_NLRI(MPReachNLRI {
                family,
                next_hop: next_hop.mp_bytes(family),
                announced: nlris,
            }));
            Update {
                withdrawn: vec![],
                attributes,
                announced: vec![],
                treat_as_withdraw: false,
            }
        }
    }

    /// Build a withdraw UPDATE for one family
    pub fn for_withdraw(family: Family, nlris: Vec<Nlri>) -> Update {
        if family.is_classic_unicast() {
            Update {
                withdrawn: nlris,
                attributes: AttributeSet::new(),
                announced: vec![],
                treat_as_withdraw: false,
            }
        } else {
            let mut attributes = AttributeSet::new();
            attributes.set(PathAttribute::MP_UNREACH_NLRI(MPUnreachNLRI {
                family,
                withdrawn: nlris,
            }));
            Update {
                withdrawn: vec![],
                attributes,
                announced: vec![],
                treat_as_withdraw: false,
            }
        }
    }

    /// All NLRIs announced by this UPDATE (classic + MP), with the
    /// effective next-hop
    pub fn announced_routes(&self) -> (NextHop, Vec<&Nlri>) {
        let mut nlris: Vec<&Nlri> = self.announced.iter().collect();
        let mut next_hop = match self.get(Identifier::NEXT_HOP) {
            Some(PathAttribute::NEXT_HOP(addr)) => NextHop::Ip(*addr),
            _ => NextHop::Unset,
        };
        if let Some(PathAttribute::MP_REACH_NLRI(mp)) = self.get(Identifier::MP_REACH_NLRI) {
            nlris.extend(mp.announced.iter());
            if next_hop == NextHop::Unset {
                next_hop = NextHop::from_mp_bytes(&mp.next_hop);
            }
        }
        (next_hop, nlris)
    }

    /// All NLRIs withdrawn by this UPDATE (classic + MP)
    pub fn withdrawn_routes(&self) -> Vec<&Nlri> {
        let mut nlris: Vec<&Nlri> = self.withdrawn.iter().collect();
        if let Some(PathAttribute::MP_UNREACH_NLRI(mp)) = self.get(Identifier::MP_UNREACH_NLRI) {
            nlris.extend(mp.withdrawn.iter());
        }
        nlris
    }
}
