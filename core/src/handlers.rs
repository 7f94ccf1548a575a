//! Handlers for channel and user traffic
//!
//! Each handler receives the gateway and one [`Request`]. A handler that
//! fails with a link-fatal error gets its link torn down by the caller;
//! anything else is logged and the next line is processed.

use tracing::{debug, error, warn};

use crate::directory::{ChannelId, UserId};
use crate::dispatch::Request;
use crate::gateway::Gateway;
use crate::identity::{free_nick, is_nick_okay, request_rename};
use crate::link::{Dialect, LinkState};
use crate::message::is_channel_name;
use crate::numeric::NumericReply;
use crate::relay::SYNTHETIC_MARKER;
use crate::{bot, Result};

/// Strip membership prefixes from a names-list entry
fn bare_nick(entry: &str) -> &str {
    entry.trim_start_matches(['@', '+', '%'])
}

fn find_or_create_channel(gateway: &mut Gateway, request: &Request, name: &str) -> Option<ChannelId> {
    match gateway.directory.find_channel(request.link, name) {
        Some(channel) => Some(channel),
        None => {
            debug!("Learned about channel {}", name);
            gateway.directory.create_channel(request.link, name, None)
        }
    }
}

fn is_member(gateway: &Gateway, channel: ChannelId, user: UserId) -> bool {
    gateway
        .directory
        .channel(channel)
        .map(|ch| ch.has_member(user))
        .unwrap_or(false)
}

/// Deliver `text` from `from` to the user `to` on its own link
pub fn private_message(gateway: &mut Gateway, from: &str, to: UserId, text: &str) -> Result<()> {
    let Some(target) = gateway.directory.user(to) else {
        return Ok(());
    };
    let link = target.link;
    let line = match gateway.link_dialect(link)? {
        Dialect::Rfc1459 | Dialect::Ts => format!(":{} PRIVMSG {} :{}", from, target.nick, text),
        dialect @ Dialect::P10 => {
            gateway.unsupported_output(link, dialect, "private message");
            return Ok(());
        }
        Dialect::User | Dialect::Bitlbee => format!("PRIVMSG {} :[{}] {}", target.nick, from, text),
    };
    gateway.send(link, line);
    Ok(())
}

/// PRIVMSG: `p0` target, `p1` text
pub fn handle_privmsg(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let link = request.link;
    let dialect = gateway.link_dialect(link)?;
    let source = request.source();
    let target = request.param(0);
    let mut text = request.param(1);

    if dialect == Dialect::Bitlbee {
        if source.eq_ignore_ascii_case("root") {
            return bot::handle_root_message(gateway, request);
        }
        if text.starts_with('!') {
            return bot::handle_command(gateway, request);
        }
        if request.user.is_none() {
            gateway.send(
                link,
                format!(
                    "PRIVMSG {} :{}You are currently not active, use !add first, also see !help",
                    source, SYNTHETIC_MARKER
                ),
            );
            return Ok(());
        }
        if !is_nick_okay(source) {
            let placeholder = free_nick(&gateway.directory)?;
            request_rename(gateway, link, source, &placeholder);
            return Ok(());
        }
    }

    let Some(user) = request.user else {
        warn!("Message from unknown {}!{}@{}, asking who that is", source, request.message.ident(), request.message.host());
        gateway.send(link, format!("WHOIS {}", source));
        return Ok(());
    };
    if let Some(u) = gateway.directory.user_mut(user) {
        u.last_activity = Gateway::now();
    }

    let to_channel = is_channel_name(target);

    // "nick: text" on a user-like link addresses one person: privately when
    // sent to us, with the prefix cut off when said in a channel
    if dialect.is_user_like() {
        if let Some((nick, rest)) = text.split_once(": ") {
            if !nick.contains(' ') {
                let Some(to) = gateway.directory.find_user_by_nick(nick) else {
                    gateway.send(link, format!("PRIVMSG {} :No such nick/channel {}", source, nick));
                    return Ok(());
                };
                if !to_channel {
                    debug!("Private message from {} to {}", source, nick);
                    return private_message(gateway, source, to, rest);
                }
                text = rest;
            }
        }
    }

    if !to_channel && dialect.is_server() {
        let Some(to) = gateway.directory.find_user_by_nick(target) else {
            let local = gateway.local_name(link);
            gateway.send(
                link,
                NumericReply::ErrNoSuchNick.line(&local, source, &format!("{} :No such nick/channel", target)),
            );
            return Ok(());
        };
        return private_message(gateway, source, to, text);
    }

    // on user-like links anything not sent to a channel goes to the default one
    let relay = !to_channel;
    let channel = if relay {
        gateway.directory.link(link).and_then(|l| l.default_channel)
    } else {
        gateway.directory.find_channel(link, target)
    };
    let Some(channel) = channel else {
        if relay {
            debug!("No default channel on {}", link);
            return Ok(());
        }
        debug!("Message for unknown channel {}", target);
        match dialect {
            Dialect::Rfc1459 | Dialect::Ts => {
                let local = gateway.local_name(link);
                gateway.send(
                    link,
                    NumericReply::ErrNoSuchChannel.line(&local, source, &format!("{} :No such nick/channel", target)),
                );
            }
            Dialect::P10 => dialect.ensure_supported("channel message")?,
            Dialect::User | Dialect::Bitlbee => {
                gateway.send(link, format!("PRIVMSG {} :No such nick/channel {}", source, target));
            }
        }
        return Ok(());
    };

    let Some(partner) = gateway.directory.channel(channel).and_then(|ch| ch.partner()) else {
        debug!("{} is not linked anywhere", target);
        return Ok(());
    };
    if !is_member(gateway, partner, user) {
        match dialect {
            Dialect::Rfc1459 | Dialect::Ts => {
                let local = gateway.local_name(link);
                gateway.send(
                    link,
                    NumericReply::ErrNotOnChannel.line(&local, source, &format!("{} :You're not on that channel", target)),
                );
            }
            Dialect::P10 => dialect.ensure_supported("channel message")?,
            Dialect::User | Dialect::Bitlbee => {
                gateway.send(link, format!("PRIVMSG {} :You should join the channel first", source));
            }
        }
        return Ok(());
    }

    if text.is_empty() {
        text = " ";
    }
    if relay && dialect == Dialect::Bitlbee {
        gateway.channel_message(channel, Some(user), text)?;
    }
    gateway.channel_message(partner, Some(user), text)
}

/// JOIN: `p0` comma separated channels
pub fn handle_join(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let link = request.link;
    let dialect = gateway.link_dialect(link)?;

    let Some(user) = request.user else {
        if dialect == Dialect::Bitlbee && request.source().eq_ignore_ascii_case("root") {
            return Ok(());
        }
        debug!("{} joined {} before we knew them, asking who that is", request.source(), request.param(0));
        gateway.send(link, format!("WHOIS {}", request.source()));
        return Ok(());
    };

    let self_user = gateway.directory.link(link).and_then(|l| l.self_user);
    if dialect == Dialect::Bitlbee && self_user == Some(user) && request.param(0).eq_ignore_ascii_case("#bitlbee") {
        match gateway.directory.link(link).and_then(|l| l.identify_password.clone()) {
            Some(password) => gateway.send(link, format!("PRIVMSG #bitlbee :identify {}", password)),
            None => warn!("No identify password configured for {}", link),
        }
        return Ok(());
    }

    for name in request.param(0).split(',').filter(|n| !n.is_empty()) {
        let Some(channel) = find_or_create_channel(gateway, request, name) else {
            continue;
        };
        if is_member(gateway, channel, user) {
            continue;
        }
        gateway.channel_add_user(channel, user)?;
    }
    Ok(())
}

/// PART: `p0` comma separated channels, `p1` reason
pub fn handle_part(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let Some(user) = request.user else {
        debug!("Part from unknown user {} on {}", request.source(), request.param(0));
        return Ok(());
    };

    let reason = match request.param(1) {
        "" => "Leaving...",
        reason => reason,
    };
    for name in request.param(0).split(',') {
        if let Some(channel) = gateway.directory.find_channel(request.link, name) {
            gateway.channel_del_user(channel, user, reason, true)?;
        }
    }
    Ok(())
}

/// QUIT: `p0` reason
pub fn handle_quit(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let Some(user) = request.user else {
        debug!("Quit from unknown user {}: {}", request.source(), request.param(0));
        return Ok(());
    };
    let reason = match request.param(0) {
        "" => "Server quit",
        reason => reason,
    };
    gateway.user_destroy(user, reason)
}

/// KICK: `p0` channel, `p1` victim, `p2` reason
pub fn handle_kick(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let Some(channel) = gateway.directory.find_channel(request.link, request.param(0)) else {
        debug!("{} kicked from unknown channel {}", request.param(1), request.param(0));
        return Ok(());
    };
    let Some(victim) = gateway.directory.find_user_by_nick(request.param(1)) else {
        debug!("Unknown user {} kicked from {}", request.param(1), request.param(0));
        return Ok(());
    };

    let reason = format!("Kicked by {}: {}", request.source(), request.param(2));
    gateway.channel_del_user(channel, victim, &reason, false)?;

    let Some(u) = gateway.directory.user(victim) else {
        return Ok(());
    };
    let (home, nick) = (u.link, u.nick.clone());
    if gateway.link_dialect(home)? == Dialect::Bitlbee {
        let local = gateway.local_name(home);
        gateway.send(
            home,
            format!(
                ":{} PRIVMSG {} :{}You have been kicked from {} by {} ({})",
                local,
                nick,
                SYNTHETIC_MARKER,
                request.param(0),
                request.source(),
                request.param(2)
            ),
        );
    }
    Ok(())
}

/// TOPIC: `p0` channel, then either `p1` topic or the burst form
/// `p1` setter, `p2` timestamp, `p3` topic
pub fn handle_topic(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let Some(channel) = gateway.directory.find_channel(request.link, request.param(0)) else {
        debug!("Topic for unknown channel {}", request.param(0));
        return Ok(());
    };

    let (topic, who, when) = if request.param_count() >= 4 {
        (
            request.param(3),
            request.param(1),
            request.param(2).parse().unwrap_or_else(|_| Gateway::now()),
        )
    } else {
        (request.param(1), request.source(), Gateway::now())
    };

    let Some(ch) = gateway.directory.channel_mut(channel) else {
        return Ok(());
    };
    ch.topic = Some(topic.to_string());
    ch.topic_who = Some(who.to_string());
    ch.topic_when = when;
    let Some(partner) = ch.partner() else {
        return Ok(());
    };

    if let Some(user) = request.user {
        if !is_member(gateway, partner, user) {
            debug!("{} is not on the partner of {}, topic not forwarded", request.source(), request.param(0));
            return Ok(());
        }
    }
    let notice = format!("{}{} set the topic to: {}", SYNTHETIC_MARKER, request.source(), topic);
    gateway.channel_message(partner, request.user, &notice)
}

/// 332: `p0` me, `p1` channel, `p2` topic
pub fn handle_topic_reply(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let Some(channel) = gateway.directory.find_channel(request.link, request.param(1)) else {
        debug!("Topic for unknown channel {}", request.param(1));
        return Ok(());
    };
    if let Some(ch) = gateway.directory.channel_mut(channel) {
        ch.topic = Some(request.param(2).to_string());
        ch.topic_who = Some(request.param(0).to_string());
    }
    Ok(())
}

/// SJOIN: `p0`/`p1` timestamps, `p2` channel, `p3` modes, members in `p4`
/// or, when that is empty, `p5`
pub fn handle_sjoin(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let name = request.param(2);
    let Some(channel) = find_or_create_channel(gateway, request, name) else {
        return Ok(());
    };
    let members = match request.param(4) {
        "" => request.param(5),
        list => list,
    };

    for entry in members.split_whitespace() {
        let nick = bare_nick(entry);
        match gateway.directory.find_user_by_nick(nick) {
            Some(user) => {
                if !is_member(gateway, channel, user) {
                    gateway.channel_add_user(channel, user)?;
                }
            }
            None => error!("Unknown user {} joining {}", nick, name),
        }
    }
    Ok(())
}

/// 353: `p0` me, `p1` channel type, `p2` channel, `p3` names
pub fn handle_names_reply(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let link = request.link;
    let dialect = gateway.link_dialect(link)?;
    let Some(channel) = find_or_create_channel(gateway, request, request.param(2)) else {
        return Ok(());
    };

    for entry in request.param(3).split_whitespace() {
        let nick = bare_nick(entry);
        match gateway.directory.find_user_by_nick(nick) {
            Some(user) => {
                let home = gateway.directory.user(user).map(|u| u.link);
                if home != Some(link) {
                    debug!("{} is listed on {} but belongs elsewhere", nick, request.param(2));
                    continue;
                }
                if !is_member(gateway, channel, user) {
                    gateway.channel_add_user(channel, user)?;
                }
            }
            None => {
                if dialect == Dialect::Bitlbee && nick.eq_ignore_ascii_case("root") {
                    continue;
                }
                debug!("Asking who {} on {} is", nick, request.param(2));
                gateway.send(link, format!("WHOIS {}", nick));
            }
        }
    }
    Ok(())
}

/// 001: registration accepted on a user-like link
pub fn handle_welcome(gateway: &mut Gateway, request: &Request) -> Result<()> {
    gateway.link_connected(request.link)
}

/// SERVER: `p0` name, `p1` hops, `p2` description
pub fn handle_server(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let link = request.link;
    let connected = gateway
        .directory
        .link(link)
        .map(|l| l.state == LinkState::Connected)
        .unwrap_or(true);
    let result = if connected { Ok(()) } else { gateway.link_connected(link) };

    // servers further away are announced with a source; only the peer names itself
    if request.message.prefix.is_none() {
        if let Some(l) = gateway.directory.link_mut(link) {
            l.identity = request.param(0).to_string();
            l.remote_description = Some(request.param(2).to_string());
        }
    }
    result
}

/// KILL: `p0` victim, `p1` reason
pub fn handle_kill(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let Some(victim) = gateway.directory.find_user_by_nick(request.param(0)) else {
        debug!("{} was killed on {} but is not known", request.param(0), request.link);
        return Ok(());
    };

    let reason = format!("Killed by {} :{}", request.source(), request.param(1));
    let home = gateway.directory.user(victim).map(|u| u.link);
    if home == Some(request.link) {
        gateway.user_destroy(victim, &reason)
    } else {
        gateway.server_leave(request.link, victim, &reason, true)
    }
}

/// PING with a source; bare PING lines are answered before parsing
pub fn handle_ping(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let local = gateway.local_name(request.link);
    gateway.send(request.link, format!(":{} PONG {} :{}", local, local, request.param(0)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_nick() {
        assert_eq!(bare_nick("@bob"), "bob");
        assert_eq!(bare_nick("@+carol"), "carol");
        assert_eq!(bare_nick("%dave"), "dave");
        assert_eq!(bare_nick("erin"), "erin");
    }
}
