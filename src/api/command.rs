use std::convert::TryFrom;
use std::net::IpAddr;

use crate::message::Family;
use crate::utils::ParseError;

/// Which peers a command applies to
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    All,
    Peers(Vec<IpAddr>),
}

impl Selector {
    fn parse(word: &str) -> Result<Selector, ParseError> {
        if word == "*" {
            return Ok(Selector::All);
        }
        let peers = word
            .split(',')
            .map(|p| {
                p.parse::<IpAddr>()
                    .map_err(|err| ParseError::new(format!("{} '{}'", err, p)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Selector::Peers(peers))
    }

    pub fn matches(&self, addr: IpAddr) -> bool {
        match self {
            Selector::All => true,
            Selector::Peers(peers) => peers.contains(&addr),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RibDirection {
    In,
    Out,
}

impl RibDirection {
    fn parse(word: &str) -> Result<RibDirection, ParseError> {
        match word {
            "in" => Ok(RibDirection::In),
            "out" => Ok(RibDirection::Out),
            other => Err(ParseError::new(format!(
                "Expected 'in' or 'out', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpecKind {
    /// Words of a route spec (prefix + keywords)
    Route(Vec<String>),
    /// Words of a flow spec (matches + action)
    Flow(Vec<String>),
}

/// The dispatcher grammar, canonical (v6) form. Legacy (v4) lines are
/// translated during parsing: a bare announce/withdraw targets `*`.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // daemon
    Shutdown,
    Reload,
    Restart,
    Status,
    // session
    AckEnable,
    AckDisable,
    AckSilence,
    SyncEnable,
    SyncDisable,
    Reset,
    Ping,
    Bye,
    // system
    Help,
    Version,
    ApiVersion(u8),
    // rib
    ShowRib {
        direction: RibDirection,
        selector: Selector,
        family: Option<Family>,
    },
    FlushRib {
        selector: Selector,
    },
    ClearRib {
        direction: RibDirection,
        selector: Selector,
    },
    // peer
    Announce {
        selector: Selector,
        spec: SpecKind,
        sync: bool,
    },
    Withdraw {
        selector: Selector,
        spec: SpecKind,
        sync: bool,
    },
    AnnounceWatchdog {
        selector: Selector,
        name: String,
    },
    WithdrawWatchdog {
        selector: Selector,
        name: String,
    },
    Refresh {
        selector: Selector,
        family: Family,
    },
    Teardown {
        selector: Selector,
        code: Option<u8>,
    },
    ShowNeighbors {
        selector: Selector,
        extensive: bool,
    },
    CreatePeer {
        peer_ip: IpAddr,
        remote_as: u32,
        local_as: Option<u32>,
        hold_timer: Option<u16>,
        passive: bool,
    },
    DeletePeer {
        selector: Selector,
    },
    // group
    GroupStart,
    GroupEnd,
    GroupInline(Vec<String>),
    /// Shared attributes installed inside a group block
    Attributes(Vec<String>),
}

pub fn parse_command(line: &str) -> Result<Command, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::new("Empty command".to_string()));
    }
    // Inline group form: `group a; b; c`
    if let Some(rest) = line.strip_prefix("group ") {
        let rest = rest.trim();
        match rest {
            "start" => return Ok(Command::GroupStart),
            "end" => return Ok(Command::GroupEnd),
            _ => {
                let commands: Vec<String> = rest
                    .split(';')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect();
                if commands.is_empty() {
                    return Err(ParseError::new("Empty group".to_string()));
                }
                return Ok(Command::GroupInline(commands));
            }
        }
    }

    let words: Vec<&str> = line.split_whitespace().collect();
    match words[0] {
        "shutdown" => expect_end(&words, 1, Command::Shutdown),
        "reload" => expect_end(&words, 1, Command::Reload),
        "restart" => expect_end(&words, 1, Command::Restart),
        "status" => expect_end(&words, 1, Command::Status),
        "version" => expect_end(&words, 1, Command::Version),
        "help" => expect_end(&words, 1, Command::Help),
        "ping" => expect_end(&words, 1, Command::Ping),
        "bye" => expect_end(&words, 1, Command::Bye),
        "reset" => expect_end(&words, 1, Command::Reset),
        "api" => match words.get(1) {
            Some(&"version") => {
                let version = words
                    .get(2)
                    .ok_or_else(|| ParseError::new("api version requires a number".to_string()))?
                    .parse::<u8>()
                    .map_err(|_| ParseError::new("api version requires a number".to_string()))?;
                Ok(Command::ApiVersion(version))
            }
            _ => Err(ParseError::new("Unknown api subcommand".to_string())),
        },
        "ack" => match words.get(1) {
            Some(&"enable") => Ok(Command::AckEnable),
            Some(&"disable") => Ok(Command::AckDisable),
            Some(&"silence") => Ok(Command::AckSilence),
            _ => Err(ParseError::new("ack requires enable|disable|silence".to_string())),
        },
        "sync" => match words.get(1) {
            Some(&"enable") => Ok(Command::SyncEnable),
            Some(&"disable") => Ok(Command::SyncDisable),
            _ => Err(ParseError::new("sync requires enable|disable".to_string())),
        },
        "show" => parse_show(&words[1..]),
        "flush" => {
            // flush rib out [selector]
            if words.get(1) != Some(&"rib") || words.get(2) != Some(&"out") {
                return Err(ParseError::new("Usage: flush rib out [selector]".to_string()));
            }
            let selector = match words.get(3) {
                Some(word) => Selector::parse(word)?,
                None => Selector::All,
            };
            Ok(Command::FlushRib { selector })
        }
        "clear" => {
            if words.get(1) != Some(&"rib") {
                return Err(ParseError::new("Usage: clear rib in|out [selector]".to_string()));
            }
            let direction = RibDirection::parse(
                words
                    .get(2)
                    .ok_or_else(|| ParseError::new("clear rib requires in|out".to_string()))?,
            )?;
            let selector = match words.get(3) {
                Some(word) => Selector::parse(word)?,
                None => Selector::All,
            };
            Ok(Command::ClearRib {
                direction,
                selector,
            })
        }
        "neighbor" => {
            let selector_word = words
                .get(1)
                .ok_or_else(|| ParseError::new("neighbor requires a selector".to_string()))?;
            let selector = Selector::parse(selector_word)?;
            parse_peer_verb(selector, &words[2..])
        }
        // Legacy form: a verb without a neighbor prefix targets all peers
        "announce" | "withdraw" | "attributes" | "teardown" => {
            if words[0] == "attributes" {
                return Ok(Command::Attributes(
                    words[1..].iter().map(|w| w.to_string()).collect(),
                ));
            }
            parse_peer_verb(Selector::All, &words)
        }
        other => Err(ParseError::new(format!("Unknown command '{}'", other))),
    }
}

fn expect_end(words: &[&str], at: usize, command: Command) -> Result<Command, ParseError> {
    if words.len() > at {
        return Err(ParseError::new(format!(
            "Unexpected input after '{}'",
            words[..at].join(" ")
        )));
    }
    Ok(command)
}

fn parse_show(words: &[&str]) -> Result<Command, ParseError> {
    match words.first() {
        Some(&"rib") => {
            let direction = RibDirection::parse(
                words
                    .get(1)
                    .ok_or_else(|| ParseError::new("show rib requires in|out".to_string()))?,
            )?;
            let mut selector = Selector::All;
            let mut family = None;
            let mut rest = &words[2..];
            if let Some(word) = rest.first() {
                if let Ok(parsed) = Selector::parse(word) {
                    selector = parsed;
                    rest = &rest[1..];
                }
            }
            if rest.len() == 2 {
                family = Some(
                    Family::try_from(rest.join(" ").as_str())
                        .map_err(|err| ParseError::new(err.to_string()))?,
                );
            } else if !rest.is_empty() {
                return Err(ParseError::new(format!(
                    "Unexpected input '{}'",
                    rest.join(" ")
                )));
            }
            Ok(Command::ShowRib {
                direction,
                selector,
                family,
            })
        }
        Some(&"neighbor") | Some(&"neighbors") => {
            let mut selector = Selector::All;
            let mut extensive = false;
            for word in &words[1..] {
                match *word {
                    "summary" => extensive = false,
                    "extensive" => extensive = true,
                    other => selector = Selector::parse(other)?,
                }
            }
            Ok(Command::ShowNeighbors {
                selector,
                extensive,
            })
        }
        _ => Err(ParseError::new(
            "Usage: show rib in|out | show neighbor".to_string(),
        )),
    }
}

fn parse_peer_verb(selector: Selector, words: &[&str]) -> Result<Command, ParseError> {
    match words.first() {
        Some(&"announce") | Some(&"withdraw") => {
            let announcing = words[0] == "announce";
            let kind = words
                .get(1)
                .ok_or_else(|| ParseError::new("Expected route|flow|watchdog|attributes".to_string()))?;
            match *kind {
                "route" | "flow" => {
                    let mut spec_words: Vec<String> =
                        words[2..].iter().map(|w| w.to_string()).collect();
                    let sync = spec_words.last().map(|w| w == "sync").unwrap_or(false);
                    if sync {
                        spec_words.pop();
                    }
                    if spec_words.is_empty() {
                        return Err(ParseError::new(format!("Missing {} spec", kind)));
                    }
                    let spec = if *kind == "route" {
                        SpecKind::Route(spec_words)
                    } else {
                        SpecKind::Flow(spec_words)
                    };
                    if announcing {
                        Ok(Command::Announce {
                            selector,
                            spec,
                            sync,
                        })
                    } else {
                        Ok(Command::Withdraw {
                            selector,
                            spec,
                            sync,
                        })
                    }
                }
                "watchdog" => {
                    let name = words
                        .get(2)
                        .ok_or_else(|| ParseError::new("watchdog requires a name".to_string()))?
                        .to_string();
                    if announcing {
                        Ok(Command::AnnounceWatchdog { selector, name })
                    } else {
                        Ok(Command::WithdrawWatchdog { selector, name })
                    }
                }
                other => Err(ParseError::new(format!(
                    "Cannot {} '{}'",
                    words[0], other
                ))),
            }
        }
        Some(&"refresh") => {
            if words.len() != 3 {
                return Err(ParseError::new(
                    "Usage: neighbor <selector> refresh <afi> <safi>".to_string(),
                ));
            }
            let family = Family::try_from(format!("{} {}", words[1], words[2]).as_str())
                .map_err(|err| ParseError::new(err.to_string()))?;
            Ok(Command::Refresh { selector, family })
        }
        Some(&"teardown") => {
            let code = match words.get(1) {
                Some(word) => Some(
                    word.parse::<u8>()
                        .map_err(|_| ParseError::new(format!("Invalid code '{}'", word)))?,
                ),
                None => None,
            };
            Ok(Command::Teardown { selector, code })
        }
        Some(&"show") => {
            let extensive = words.get(1) == Some(&"extensive");
            Ok(Command::ShowNeighbors {
                selector,
                extensive,
            })
        }
        Some(&"delete") => Ok(Command::DeletePeer { selector }),
        Some(&"create") => {
            let peer_ip = match &selector {
                Selector::Peers(peers) if peers.len() == 1 => peers[0],
                _ => {
                    return Err(ParseError::new(
                        "create requires a single peer address".to_string(),
                    ))
                }
            };
            let mut remote_as = None;
            let mut local_as = None;
            let mut hold_timer = None;
            let mut passive = false;
            let mut iter = words[1..].iter();
            while let Some(keyword) = iter.next() {
                match *keyword {
                    "remote-as" => {
                        remote_as = Some(take_u32(&mut iter, keyword)?);
                    }
                    "local-as" => {
                        local_as = Some(take_u32(&mut iter, keyword)?);
                    }
                    "hold-time" => {
                        hold_timer = Some(take_u32(&mut iter, keyword)? as u16);
                    }
                    "passive" => passive = true,
                    other => {
                        return Err(ParseError::new(format!(
                            "Unknown create keyword '{}'",
                            other
                        )))
                    }
                }
            }
            let remote_as = remote_as
                .ok_or_else(|| ParseError::new("create requires remote-as".to_string()))?;
            Ok(Command::CreatePeer {
                peer_ip,
                remote_as,
                local_as,
                hold_timer,
                passive,
            })
        }
        _ => Err(ParseError::new(format!(
            "Unknown neighbor verb '{}'",
            words.first().unwrap_or(&"")
        ))),
    }
}

fn take_u32(iter: &mut std::slice::Iter<&str>, keyword: &str) -> Result<u32, ParseError> {
    iter.next()
        .ok_or_else(|| ParseError::new(format!("Missing value for '{}'", keyword)))?
        .parse::<u32>()
        .map_err(|_| ParseError::new(format!("Invalid value for '{}'", keyword)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{AFI, SAFI};

    #[test]
    fn test_parse_daemon_commands() {
        assert_eq!(parse_command("shutdown").unwrap(), Command::Shutdown);
        assert_eq!(parse_command("reload").unwrap(), Command::Reload);
        assert_eq!(parse_command(" version ").unwrap(), Command::Version);
        assert_eq!(parse_command("api version 6").unwrap(), Command::ApiVersion(6));
        assert!(parse_command("shutdown now").is_err());
        assert!(parse_command("").is_err());
    }

    #[test]
    fn test_parse_session_commands() {
        assert_eq!(parse_command("ack enable").unwrap(), Command::AckEnable);
        assert_eq!(parse_command("ack silence").unwrap(), Command::AckSilence);
        assert_eq!(parse_command("sync disable").unwrap(), Command::SyncDisable);
        assert!(parse_command("ack maybe").is_err());
    }

    #[test]
    fn test_parse_announce_legacy_targets_all() {
        let command =
            parse_command("announce route 10.0.0.0/24 next-hop 192.0.2.1").unwrap();
        match command {
            Command::Announce {
                selector,
                spec: SpecKind::Route(words),
                sync,
            } => {
                assert_eq!(selector, Selector::All);
                assert_eq!(words[0], "10.0.0.0/24");
                assert!(!sync);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_announce_with_selector_and_sync() {
        let command =
            parse_command("neighbor 10.0.0.1,10.0.0.2 announce route 10.0.0.0/24 next-hop 1.2.3.4 sync")
                .unwrap();
        match command {
            Command::Announce {
                selector: Selector::Peers(peers),
                sync,
                ..
            } => {
                assert_eq!(peers.len(), 2);
                assert!(sync);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_withdraw_flow() {
        let command =
            parse_command("neighbor * withdraw flow destination 10.0.0.0/24 then discard").unwrap();
        match command {
            Command::Withdraw {
                spec: SpecKind::Flow(words),
                ..
            } => assert_eq!(words[0], "destination"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_show_rib() {
        match parse_command("show rib out").unwrap() {
            Command::ShowRib {
                direction: RibDirection::Out,
                selector: Selector::All,
                family: None,
            } => (),
            other => panic!("unexpected {:?}", other),
        }
        match parse_command("show rib in 10.0.0.1 ipv4 unicast").unwrap() {
            Command::ShowRib {
                direction: RibDirection::In,
                selector: Selector::Peers(peers),
                family: Some(family),
            } => {
                assert_eq!(peers.len(), 1);
                assert_eq!(family, Family::new(AFI::IPV4, SAFI::Unicast));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_group_forms() {
        assert_eq!(parse_command("group start").unwrap(), Command::GroupStart);
        assert_eq!(parse_command("group end").unwrap(), Command::GroupEnd);
        match parse_command("group announce route 10.0.0.0/24 next-hop 1.1.1.1 ; announce route 10.0.1.0/24 next-hop 1.1.1.1").unwrap() {
            Command::GroupInline(commands) => assert_eq!(commands.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_refresh_and_teardown() {
        match parse_command("neighbor 10.0.0.1 refresh ipv4 unicast").unwrap() {
            Command::Refresh { family, .. } => {
                assert_eq!(family, Family::new(AFI::IPV4, SAFI::Unicast))
            }
            other => panic!("unexpected {:?}", other),
        }
        match parse_command("neighbor * teardown 4").unwrap() {
            Command::Teardown { code: Some(4), .. } => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_create_peer() {
        match parse_command("neighbor 10.0.0.9 create remote-as 65009 hold-time 90 passive").unwrap()
        {
            Command::CreatePeer {
                peer_ip,
                remote_as,
                hold_timer,
                passive,
                ..
            } => {
                assert_eq!(peer_ip, "10.0.0.9".parse::<IpAddr>().unwrap());
                assert_eq!(remote_as, 65009);
                assert_eq!(hold_timer, Some(90));
                assert!(passive);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse_command("neighbor 10.0.0.9 create").is_err());
    }

    #[test]
    fn test_parse_watchdog() {
        match parse_command("announce watchdog dns").unwrap() {
            Command::AnnounceWatchdog { name, .. } => assert_eq!(name, "dns"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
