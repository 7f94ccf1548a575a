//! Channel mode translation
//!
//! A mode string such as `+ov-l alice bob` is read one character at a time
//! with a running sign. Flags that take an argument consume the next one in
//! order; the resulting changes are then applied to the channel record.

use tracing::{debug, warn};

use crate::directory::{ChannelId, ChannelModes};
use crate::dispatch::Request;
use crate::gateway::Gateway;
use crate::link::Dialect;
use crate::message::is_channel_name;
use crate::{identity, Result};

/// Per-membership privilege
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberFlag {
    Creator,
    Operator,
    Voice,
}

/// One decoded mode change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeChange {
    Member { flag: MemberFlag, set: bool, nick: String },
    Flag { flag: char, set: bool },
    Key(Option<String>),
    /// New member limit, -1 for none
    Limit(i64),
    /// Ban, exception and invitation masks, which are not tracked
    List { flag: char, set: bool, mask: Option<String> },
    Unknown(char),
}

/// Decode `modes`, taking arguments from `args` in order
pub fn parse_mode_changes(modes: &str, args: &[String]) -> Vec<ModeChange> {
    let mut args = args.iter();
    let mut set = true;
    let mut changes = Vec::new();

    for c in modes.chars() {
        let change = match c {
            '+' => {
                set = true;
                continue;
            }
            '-' => {
                set = false;
                continue;
            }
            'O' | 'o' | 'v' => {
                let flag = match c {
                    'O' => MemberFlag::Creator,
                    'o' => MemberFlag::Operator,
                    _ => MemberFlag::Voice,
                };
                match args.next() {
                    Some(nick) => ModeChange::Member {
                        flag,
                        set,
                        nick: nick.clone(),
                    },
                    None => {
                        warn!("Mode {}{} without a nickname", if set { '+' } else { '-' }, c);
                        continue;
                    }
                }
            }
            'a' | 'i' | 'm' | 'n' | 'q' | 'p' | 's' | 'r' | 't' => ModeChange::Flag { flag: c, set },
            'k' => {
                let key = args.next().cloned();
                if set {
                    match key {
                        Some(key) => ModeChange::Key(Some(key)),
                        None => {
                            warn!("Mode +k without a key");
                            continue;
                        }
                    }
                } else {
                    ModeChange::Key(None)
                }
            }
            'l' => {
                if set {
                    match args.next().map(|l| l.parse::<i64>()) {
                        Some(Ok(limit)) => ModeChange::Limit(limit),
                        Some(Err(_)) | None => {
                            warn!("Mode +l without a usable limit");
                            continue;
                        }
                    }
                } else {
                    ModeChange::Limit(-1)
                }
            }
            'b' | 'e' | 'I' => ModeChange::List {
                flag: c,
                set,
                mask: args.next().cloned(),
            },
            other => ModeChange::Unknown(other),
        };
        changes.push(change);
    }

    changes
}

fn apply_flag(modes: &mut ChannelModes, flag: char, set: bool) {
    match flag {
        'a' => modes.anonymous = set,
        'i' => modes.invite_only = set,
        'm' | 'q' => modes.moderated = set,
        'n' => modes.no_external = set,
        'p' => modes.private = set,
        's' => modes.secret = set,
        'r' => modes.reop = set,
        't' => modes.topic_lock = set,
        _ => {}
    }
}

/// MODE: `p0` target, `p1` mode string, arguments after that
pub fn handle_mode(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let target = request.param(0);
    if !is_channel_name(target) {
        debug!("Ignoring user mode change for {}", target);
        return Ok(());
    }
    let Some(channel) = gateway.directory.find_channel(request.link, target) else {
        debug!("Mode change for unknown channel {}", target);
        return Ok(());
    };

    let args = request.message.params.get(2..).unwrap_or(&[]);
    let changes = parse_mode_changes(request.param(1), args);
    apply_mode_changes(gateway, request, channel, changes)
}

fn apply_mode_changes(
    gateway: &mut Gateway,
    request: &Request,
    channel: ChannelId,
    changes: Vec<ModeChange>,
) -> Result<()> {
    let bitlbee = gateway.link_dialect(request.link)? == Dialect::Bitlbee;

    for change in changes {
        match change {
            ModeChange::Member { flag, set, nick } => {
                let Some(user) = gateway.directory.find_user_by_nick(&nick) else {
                    warn!("Mode change on {} for unknown user {}", request.param(0), nick);
                    continue;
                };
                let Some(member) = gateway.directory.member_mut(channel, user) else {
                    warn!("Mode change on {} for {} who is not on it", request.param(0), nick);
                    continue;
                };
                match flag {
                    MemberFlag::Creator => member.creator = set,
                    MemberFlag::Operator => member.operator = set,
                    MemberFlag::Voice => member.voice = set,
                }

                // the multiplexer voices present buddies and devoices away ones
                if flag == MemberFlag::Voice && bitlbee {
                    if set {
                        identity::change_away(gateway, user, None);
                    } else {
                        gateway.send(request.link, format!("WHOIS {}", nick));
                    }
                }
            }
            ModeChange::Flag { flag, set } => {
                if let Some(ch) = gateway.directory.channel_mut(channel) {
                    apply_flag(&mut ch.modes, flag, set);
                }
            }
            ModeChange::Key(key) => {
                if let Some(ch) = gateway.directory.channel_mut(channel) {
                    ch.key = key;
                }
            }
            ModeChange::Limit(limit) => {
                if let Some(ch) = gateway.directory.channel_mut(channel) {
                    ch.limit = limit;
                }
            }
            ModeChange::List { flag, set, mask } => {
                debug!(
                    "Not tracking {}{} {} on {}",
                    if set { '+' } else { '-' },
                    flag,
                    mask.unwrap_or_default(),
                    request.param(0)
                );
            }
            ModeChange::Unknown(flag) => {
                debug!("Unknown channel mode flag {} on {}", flag, request.param(0));
            }
        }
    }
    Ok(())
}
