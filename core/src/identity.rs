//! Identity reconciliation
//!
//! Users on user-like links are only learned through WHOIS replies, so
//! records are created on first sight and filled in as replies arrive. Nick
//! collisions are settled with KILL on server links and with a rename
//! request to the multiplexer's control channel elsewhere.

use tracing::{debug, error, warn};

use crate::directory::{Directory, LinkId, User, UserId};
use crate::dispatch::Request;
use crate::gateway::Gateway;
use crate::link::Dialect;
use crate::{bot, Error, Result};

/// Highest placeholder number tried by [`free_nick`]
pub const MAX_PLACEHOLDER: u32 = 9999;

/// Nicknames start with an ASCII letter and are at most nine characters
pub fn is_nick_okay(nick: &str) -> bool {
    nick.chars().next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false) && nick.len() < 10
}

/// First unused `Ta<n>` nickname
pub fn free_nick(directory: &Directory) -> Result<String> {
    (0..MAX_PLACEHOLDER)
        .map(|i| format!("Ta{}", i))
        .find(|nick| directory.find_user_by_nick(nick).is_none())
        .ok_or(Error::NickExhausted)
}

/// Ask the multiplexer on `link` to rename `nick`
pub fn request_rename(gateway: &mut Gateway, link: LinkId, nick: &str, new_nick: &str) {
    gateway.send(link, format!("PRIVMSG #bitlbee :rename {} {}", nick, new_nick));
}

/// Set or clear the away message. Returns whether anything changed.
pub fn change_away(gateway: &mut Gateway, user: UserId, reason: Option<&str>) -> bool {
    let Some(u) = gateway.directory.user_mut(user) else {
        return false;
    };

    let unchanged = match (&u.away, reason) {
        (Some(current), Some(reason)) => current.eq_ignore_ascii_case(reason),
        (None, None) => true,
        _ => false,
    };
    if unchanged {
        return false;
    }

    u.away = reason.map(str::to_string);
    match &u.away {
        Some(away) => debug!("{} is away: {}", u.nick, away),
        None => debug!("{} is back", u.nick),
    }
    true
}

/// AWAY: `p0` reason, absent or empty when back
pub fn handle_away(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let Some(user) = request.user else {
        debug!("Away from unknown user {}", request.source());
        return Ok(());
    };
    let reason = Some(request.param(0)).filter(|r| !r.is_empty());
    change_away(gateway, user, reason);
    Ok(())
}

/// NICK: introduction from a server with nine or more parameters
/// (`nick hops ts modes ident host server servicestamp :realname`),
/// otherwise a nickname change of the source
pub fn handle_nick(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let link = request.link;
    let dialect = gateway.link_dialect(link)?;
    let nick = request.param(0);

    if dialect == Dialect::Bitlbee && nick.eq_ignore_ascii_case("root") {
        debug!("Ignoring the multiplexer's control account");
        return Ok(());
    }

    if request.param_count() >= 9 {
        return introduce_from_server(gateway, request);
    }

    if let Some(holder) = gateway.directory.find_user_by_nick(nick) {
        if request.user == Some(holder) {
            return gateway.user_change_nick(holder, nick);
        }

        warn!("{} wants nickname {} which is already in use", request.source(), nick);
        match dialect {
            Dialect::Rfc1459 | Dialect::Ts => {
                let local = gateway.local_name(link);
                gateway.send(
                    link,
                    format!(":{} KILL {} :That nickname is reserved, pick another one (NC)", local, nick),
                );
                if let Some(user) = request.user {
                    gateway.user_destroy(user, "Collision")?;
                }
            }
            Dialect::P10 => dialect.ensure_supported("nick collision")?,
            Dialect::Bitlbee => {
                let placeholder = free_nick(&gateway.directory)?;
                request_rename(gateway, link, nick, &placeholder);
            }
            Dialect::User => {}
        }
        return Ok(());
    }

    match request.user {
        Some(user) => gateway.user_change_nick(user, nick),
        None => {
            warn!("Unknown user {} is now {}, asking who that is", request.source(), nick);
            gateway.send(link, format!("WHOIS {}", nick));
            Ok(())
        }
    }
}

fn introduce_from_server(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let link = request.link;
    let nick = request.param(0);

    if let Some(existing) = gateway.directory.find_user_by_nick(nick) {
        error!("Nickname collision for {}", nick);
        let local = gateway.local_name(link);
        gateway.send(
            link,
            format!(":{} KILL {} :That nickname is reserved, pick another one (SJ)", local, nick),
        );
        let config = gateway.directory.user(existing).map(|u| u.config).unwrap_or(true);
        if !config {
            gateway.user_destroy(existing, "Nickname collision")?;
        }
        return Ok(());
    }

    let mut user = User::new(nick, link, false, Gateway::now());
    user.ident = request.param(4).to_string();
    user.host = request.param(5).to_string();
    user.realname = request.param(8).to_string();
    let user = gateway.directory.create_user(user);
    gateway.user_introduce(user)
}

/// 311: `p0` me, `p1` nick, `p2` ident, `p3` host, `p4` server, `p5` realname
pub fn handle_whois_user(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let link = request.link;
    let dialect = gateway.link_dialect(link)?;
    if !dialect.is_user_like() {
        debug!("Ignoring 311 on a server link");
        return Ok(());
    }

    let nick = request.param(1);
    if let Some(user) = gateway.directory.find_user_by_nick(nick) {
        let Some(u) = gateway.directory.user_mut(user) else {
            return Ok(());
        };
        if u.link != link {
            error!("Nickname collision for {}", nick);
            if dialect == Dialect::Bitlbee {
                let placeholder = free_nick(&gateway.directory)?;
                request_rename(gateway, link, nick, &placeholder);
            }
            return Ok(());
        }
        if u.config {
            return Ok(());
        }
        u.ident = request.param(2).to_string();
        u.host = request.param(3).to_string();
        u.realname = request.param(5).to_string();
        return gateway.user_introduce(user);
    }

    let mut u = User::new(nick, link, false, Gateway::now());
    u.ident = request.param(2).to_string();
    u.host = request.param(3).to_string();
    u.realname = request.param(5).to_string();
    let user = gateway.directory.create_user(u);
    gateway.user_introduce(user)?;

    // the multiplexer never sends 319, its buddies all sit in #bitlbee
    if dialect == Dialect::Bitlbee {
        let Some(channel) = gateway.directory.find_channel(link, "#bitlbee") else {
            warn!("No #bitlbee channel known on {}", link);
            return Ok(());
        };
        if !gateway.directory.channel(channel).map(|ch| ch.has_member(user)).unwrap_or(true) {
            gateway.channel_add_user(channel, user)?;
            bot::welcome(gateway, link, nick);
        }
    }
    Ok(())
}

/// 319: `p0` me, `p1` nick, `p2` space separated channels
pub fn handle_whois_channels(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let link = request.link;
    if !gateway.link_dialect(link)?.is_user_like() {
        debug!("Ignoring 319 on a server link");
        return Ok(());
    }

    let Some(user) = gateway.directory.find_user_by_nick(request.param(1)) else {
        warn!("319 for unknown user {}", request.param(1));
        return Ok(());
    };

    for name in request.param(2).split_whitespace() {
        let name = name.trim_start_matches(['@', '+', '%']);
        let Some(channel) = gateway.directory.find_channel(link, name) else {
            debug!("319 lists unknown channel {}", name);
            continue;
        };
        if gateway.directory.channel(channel).map(|ch| ch.has_member(user)).unwrap_or(true) {
            continue;
        }
        gateway.channel_add_user(channel, user)?;
    }
    Ok(())
}

/// 301: `p0` me, `p1` nick, `p2` away reason
pub fn handle_whois_away(gateway: &mut Gateway, request: &Request) -> Result<()> {
    if !gateway.link_dialect(request.link)?.is_user_like() {
        debug!("Ignoring 301 on a server link");
        return Ok(());
    }
    match gateway.directory.find_user_by_nick(request.param(1)) {
        Some(user) => {
            change_away(gateway, user, Some(request.param(2)));
        }
        None => debug!("301 for unknown user {}", request.param(1)),
    }
    Ok(())
}

/// 432: `p0` me, `p1` the rejected nickname
pub fn handle_bad_nick(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let nick = request.param(1);
    let Some(user) = gateway.directory.find_user_by_nick(nick) else {
        debug!("{} has a bad nickname but is not known", nick);
        return Ok(());
    };
    let Some(home) = gateway.directory.user(user).map(|u| u.link) else {
        return Ok(());
    };
    if gateway.link_dialect(home)? != Dialect::Bitlbee {
        return Ok(());
    }

    let placeholder = free_nick(&gateway.directory)?;
    gateway.server_leave(request.link, user, "Bad nickname, changing it", false)?;
    request_rename(gateway, home, nick, &placeholder);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::link::Link;

    fn directory() -> (Directory, LinkId) {
        let mut dir = Directory::new();
        let link = dir.add_link(Link::new(&LinkConfig {
            tag: "bee".to_string(),
            dialect: Dialect::Bitlbee,
            hostname: "bee.example".to_string(),
            port: 6667,
            nickname: Some("Relay".to_string()),
            local_name: "relay".to_string(),
            password: None,
            identity: "bee".to_string(),
            description: "test".to_string(),
            identify_password: None,
            default_channel: None,
            autoconnect: true,
        }));
        (dir, link)
    }

    #[test]
    fn test_nick_validity() {
        assert!(is_nick_okay("alice"));
        assert!(is_nick_okay("Ta9999"));
        assert!(!is_nick_okay("9lives"));
        assert!(!is_nick_okay("_under"));
        assert!(!is_nick_okay("abcdefghij"));
        assert!(!is_nick_okay(""));
    }

    #[test]
    fn test_free_nick_skips_taken() {
        let (mut dir, link) = directory();
        assert_eq!(free_nick(&dir).unwrap(), "Ta0");
        dir.create_user(User::new("ta0", link, false, 0));
        dir.create_user(User::new("Ta1", link, false, 0));
        assert_eq!(free_nick(&dir).unwrap(), "Ta2");
    }
}
