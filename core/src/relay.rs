//! Channel bridge and relay engine
//!
//! Introduction and leave primitives for links and channels, channel
//! message fan-out and the cross-link bridge. Everything here translates a
//! directory change into the lines the affected link's dialect expects:
//! protocol lines for server dialects, `### ` informational chat lines for
//! user-like dialects.

use tracing::{debug, info, warn};

use crate::directory::{ChannelId, LinkId, UserId};
use crate::gateway::Gateway;
use crate::link::Dialect;
use crate::{Error, Result};

/// Marker that starts every line the gateway synthesises on user-like links
pub const SYNTHETIC_MARKER: &str = "### ";

/// Keep the first error, log the ones that follow it
pub(crate) fn merge(result: &mut Result<()>, next: Result<()>) {
    if let Err(e) = next {
        if result.is_ok() {
            *result = Err(e);
        } else {
            warn!("Further relay failure: {}", e);
        }
    }
}

fn or_default<'a>(reason: &'a str, default: &'a str) -> &'a str {
    if reason.is_empty() {
        default
    } else {
        reason
    }
}

impl Gateway {
    // ---- links ----

    /// Tell the peer of `link` that `user` exists
    pub fn server_introduce(&mut self, link: LinkId, user: UserId) -> Result<()> {
        let now = Self::now();
        let (Some(l), Some(u)) = (self.directory.link(link), self.directory.user(user)) else {
            return Ok(());
        };

        let connected = l.is_connected();
        let dialect = l.dialect;
        let own = u.link == link || u.config;
        let line = format!(
            "NICK {} 1 {} +i {} {} {} 0 :{}",
            u.nick, now, u.ident, u.host, l.local_name, u.realname
        );

        let Some(registration) = self.directory.ensure_server_user(link, user) else {
            return Ok(());
        };
        if registration.introduced || !connected {
            return Ok(());
        }
        registration.introduced = true;

        if own {
            return Ok(());
        }
        match dialect {
            Dialect::Rfc1459 | Dialect::Ts => self.send(link, line),
            Dialect::P10 => self.unsupported_output(link, dialect, "user introduction"),
            Dialect::User | Dialect::Bitlbee => {}
        }
        Ok(())
    }

    /// Remove `user` from `link` and from every channel of that link.
    ///
    /// With `kill` the peer already dropped the user, so no quit is sent.
    pub fn server_leave(&mut self, link: LinkId, user: UserId, reason: &str, kill: bool) -> Result<()> {
        let Some(registration) = self.directory.server_user(link, user).copied() else {
            debug!("{} is not registered on {}", user, link);
            return Ok(());
        };
        let (Some(l), Some(u)) = (self.directory.link(link), self.directory.user(user)) else {
            return Ok(());
        };

        let reason = or_default(reason, "Leaving");
        let dialect = l.dialect;
        let default_channel = l.default_channel;
        let visible = registration.introduced && !u.config && !(dialect.is_server() && u.link == link);
        let quit_line = format!(":{} QUIT :{}", u.nick, reason);
        let notice = format!("{}{} ({}) quit ({})", SYNTHETIC_MARKER, u.nick, u.mask(), reason);
        let channels: Vec<ChannelId> = u
            .channels()
            .iter()
            .copied()
            .filter(|&c| self.directory.channel(c).map(|ch| ch.link) == Some(link))
            .collect();

        let mut result = Ok(());
        if visible {
            match dialect {
                Dialect::Rfc1459 | Dialect::Ts => {
                    if !kill {
                        self.send(link, quit_line);
                    }
                }
                Dialect::P10 => self.unsupported_output(link, dialect, "quit"),
                Dialect::User | Dialect::Bitlbee => {
                    if let Some(channel) = default_channel {
                        merge(&mut result, self.channel_message(channel, Some(user), &notice));
                    }
                }
            }
        }

        for channel in channels {
            merge(&mut result, self.channel_del_user(channel, user, reason, !kill));
        }
        self.directory.remove_server_user(link, user);
        result
    }

    // ---- channels ----

    /// Make `user` a member of `channel` and tell the channel's link about it
    pub fn channel_introduce(&mut self, channel: ChannelId, user: UserId) -> Result<()> {
        let now = Self::now();
        let (Some(ch), Some(u)) = (self.directory.channel(channel), self.directory.user(user)) else {
            return Ok(());
        };
        if u.config {
            debug!("Not introducing gateway user {} to {}", u.nick, ch.name);
            return Ok(());
        }
        let link = ch.link;
        let Some(l) = self.directory.link(link) else {
            return Ok(());
        };

        let dialect = l.dialect;
        let connected = l.is_connected();
        let own = u.link == link;
        let sjoin = format!(":{} SJOIN {} {} {} + :{}", l.local_name, now, now, ch.name, u.nick);
        let notice = format!("{}{} ({}) joined the channel", SYNTHETIC_MARKER, u.nick, u.mask());

        match ch.member(user).map(|m| m.introduced) {
            Some(true) => return Ok(()),
            Some(false) => {}
            None => {
                self.directory.add_member(channel, user);
            }
        }
        if !connected {
            return Ok(());
        }
        if let Some(member) = self.directory.member_mut(channel, user) {
            member.introduced = true;
        }

        if own && dialect.is_server() {
            return Ok(());
        }
        match dialect {
            Dialect::Rfc1459 | Dialect::Ts => {
                self.send(link, sjoin);
                Ok(())
            }
            Dialect::P10 => {
                self.unsupported_output(link, dialect, "channel join");
                Ok(())
            }
            Dialect::User | Dialect::Bitlbee => self.channel_message(channel, Some(user), &notice),
        }
    }

    /// Remove `user` from `channel`, telling the link when `notify` is set
    pub fn channel_leave(&mut self, channel: ChannelId, user: UserId, reason: &str, notify: bool) -> Result<()> {
        let (Some(ch), Some(u)) = (self.directory.channel(channel), self.directory.user(user)) else {
            return Ok(());
        };
        let Some(member) = ch.member(user) else {
            return Ok(());
        };
        let Some(l) = self.directory.link(ch.link) else {
            return Ok(());
        };

        let link = ch.link;
        let dialect = l.dialect;
        let reason = or_default(reason, "Leaving");
        let visible =
            member.introduced && notify && !u.config && !(dialect.is_server() && u.link == link);
        let part_line = format!(":{} PART {} :{}", u.nick, ch.name, reason);
        let notice = format!(
            "{}{} ({}) parted the channel ({})",
            SYNTHETIC_MARKER,
            u.nick,
            u.mask(),
            reason
        );

        let mut result = Ok(());
        if visible {
            match dialect {
                Dialect::Rfc1459 | Dialect::Ts => self.send(link, part_line),
                Dialect::P10 => self.unsupported_output(link, dialect, "channel part"),
                Dialect::User | Dialect::Bitlbee => {
                    merge(&mut result, self.channel_message(channel, Some(user), &notice))
                }
            }
        }

        self.directory.remove_member(channel, user);
        result
    }

    /// Add `user` to `channel` and to its partner
    pub fn channel_add_user(&mut self, channel: ChannelId, user: UserId) -> Result<()> {
        let mut result = self.channel_introduce(channel, user);
        if let Some(partner) = self.directory.channel(channel).and_then(|ch| ch.partner()) {
            merge(&mut result, self.channel_introduce(partner, user));
        }
        result
    }

    /// Remove `user` from `channel` and from its partner
    pub fn channel_del_user(&mut self, channel: ChannelId, user: UserId, reason: &str, notify: bool) -> Result<()> {
        let partner = self.directory.channel(channel).and_then(|ch| ch.partner());
        let mut result = self.channel_leave(channel, user, reason, notify);
        if let Some(partner) = partner {
            merge(&mut result, self.channel_leave(partner, user, reason, true));
        }
        result
    }

    /// Say `text` in `channel`, as `from` when given
    pub fn channel_message(&mut self, channel: ChannelId, from: Option<UserId>, text: &str) -> Result<()> {
        let Some(ch) = self.directory.channel(channel) else {
            return Ok(());
        };
        let link = ch.link;
        let dialect = self.link_dialect(link)?;
        let sender = from.and_then(|id| self.directory.user(id));
        let prefix = match sender {
            Some(u) if !text.starts_with(SYNTHETIC_MARKER) => format!("{}: ", u.nick),
            _ => String::new(),
        };

        match dialect {
            Dialect::Rfc1459 | Dialect::Ts => {
                let Some(u) = sender else {
                    debug!("No source to speak in {} with", ch.name);
                    return Ok(());
                };
                let line = format!(":{} PRIVMSG {} :{}", u.nick, ch.name, text);
                self.send(link, line);
            }
            Dialect::P10 => self.unsupported_output(link, dialect, "channel message"),
            Dialect::User => {
                let line = format!("PRIVMSG {} :{}{}", ch.name, prefix, text);
                self.send(link, line);
            }
            Dialect::Bitlbee => {
                let targets: Vec<String> = ch
                    .members()
                    .iter()
                    .filter(|m| m.introduced && Some(m.user) != from)
                    .filter_map(|m| self.directory.user(m.user))
                    .filter(|u| u.link == link && !u.config)
                    .map(|u| u.nick.clone())
                    .collect();
                for target in targets {
                    self.send(link, format!("PRIVMSG {} :{}{}", target, prefix, text));
                }
            }
        }
        Ok(())
    }

    /// Partner two channels and introduce each side's members to the other.
    ///
    /// Channels on a dialect that cannot relay are refused.
    pub fn bridge_channels(&mut self, a: ChannelId, b: ChannelId) -> Result<()> {
        for channel in [a, b] {
            if let Some(ch) = self.directory.channel(channel) {
                self.link_dialect(ch.link)?.ensure_supported("channel link")?;
            }
        }
        if !self.directory.set_partner(a, b) {
            return Err(Error::Generic(format!("Cannot link {} with {}", a, b)));
        }

        let mut result = Ok(());
        let members_a = self.directory.channel(a).map(|ch| ch.member_ids()).unwrap_or_default();
        let members_b = self.directory.channel(b).map(|ch| ch.member_ids()).unwrap_or_default();
        for user in members_a {
            merge(&mut result, self.channel_introduce(b, user));
        }
        for user in members_b {
            merge(&mut result, self.channel_introduce(a, user));
        }
        result
    }

    // ---- users ----

    /// Announce `user` on every link
    pub fn user_introduce(&mut self, user: UserId) -> Result<()> {
        let Some(u) = self.directory.user(user) else {
            return Ok(());
        };
        if !u.is_complete() {
            debug!("Not introducing {} until ident, host and realname are known", u.nick);
            return Ok(());
        }

        let mut result = Ok(());
        for link in self.directory.link_ids() {
            merge(&mut result, self.server_introduce(link, user));
        }
        result
    }

    /// Part `user` from its channels, quit it everywhere and forget it
    pub fn user_destroy(&mut self, user: UserId, reason: &str) -> Result<()> {
        let Some(u) = self.directory.user(user) else {
            return Ok(());
        };
        debug!("Destroying user {}: {}", u.nick, reason);

        let mut result = Ok(());
        for channel in u.channels().to_vec() {
            merge(&mut result, self.channel_del_user(channel, user, reason, true));
        }
        for link in self.directory.link_ids() {
            merge(&mut result, self.server_leave(link, user, reason, false));
        }
        self.directory.destroy_user(user);
        result
    }

    /// Rename `user` and announce it on every link but its own
    pub fn user_change_nick(&mut self, user: UserId, nick: &str) -> Result<()> {
        let Some(u) = self.directory.user_mut(user) else {
            return Ok(());
        };
        let old = std::mem::replace(&mut u.nick, nick.to_string());
        let home = u.link;
        info!("{} is now known as {}", old, nick);

        let mut result = Ok(());
        for link in self.directory.link_ids() {
            if link == home {
                continue;
            }
            merge(&mut result, self.server_user_change_nick(link, user, &old));
        }
        result
    }

    /// Tell `link` that `user`, formerly `old`, changed nickname
    pub fn server_user_change_nick(&mut self, link: LinkId, user: UserId, old: &str) -> Result<()> {
        if self.directory.server_user(link, user).is_none() {
            debug!("{} was not known on {} yet, introducing", old, link);
            return self.server_introduce(link, user);
        }
        let Some(registration) = self.directory.server_user(link, user).copied() else {
            return Ok(());
        };
        let (Some(l), Some(u)) = (self.directory.link(link), self.directory.user(user)) else {
            return Ok(());
        };
        if u.config {
            return Ok(());
        }

        let dialect = l.dialect;
        let nick_line = format!(":{} NICK {}", old, u.nick);
        let notice = format!("{}{} changed nick to {}", SYNTHETIC_MARKER, old, u.nick);
        let channels: Vec<ChannelId> = u
            .channels()
            .iter()
            .copied()
            .filter(|&c| self.directory.channel(c).map(|ch| ch.link) == Some(link))
            .collect();

        match dialect {
            Dialect::Rfc1459 | Dialect::Ts => {
                if registration.introduced && u.link != link {
                    self.send(link, nick_line);
                }
                Ok(())
            }
            Dialect::P10 => {
                if registration.introduced {
                    self.unsupported_output(link, dialect, "nick change");
                }
                Ok(())
            }
            Dialect::User | Dialect::Bitlbee => {
                let mut result = Ok(());
                for channel in channels {
                    merge(&mut result, self.channel_message(channel, Some(user), &notice));
                }
                result
            }
        }
    }

    // ---- link lifecycle ----

    /// The peer accepted us: announce every user and channel membership
    pub fn link_connected(&mut self, link: LinkId) -> Result<()> {
        let Some(l) = self.directory.link_mut(link) else {
            return Ok(());
        };
        if l.is_connected() {
            return Ok(());
        }
        l.state = crate::link::LinkState::Connected;
        let dialect = l.dialect;
        info!("[{}] is now connected", l.tag);

        let mut result = Ok(());
        for user in self.directory.user_ids() {
            merge(&mut result, self.server_introduce(link, user));
        }

        let channels = self.directory.link_channels(link);
        if dialect == Dialect::User {
            let joins: Vec<String> = channels
                .iter()
                .filter_map(|&c| self.directory.channel(c))
                .map(|ch| format!("JOIN {}", ch.name))
                .collect();
            for line in joins {
                self.send(link, line);
            }
        }

        for channel in channels {
            let Some(ch) = self.directory.channel(channel) else {
                continue;
            };
            let mut members = ch.member_ids();
            if let Some(partner) = ch.partner().and_then(|p| self.directory.channel(p)) {
                members.extend(partner.member_ids().into_iter().filter(|u| !ch.has_member(*u)));
            }
            for user in members {
                merge(&mut result, self.channel_introduce(channel, user));
            }
        }
        result
    }

    /// Forget what the peer of a dropped link was told
    pub fn flush_link(&mut self, link: LinkId) -> Result<()> {
        let mut result = Ok(());

        for user in self.directory.server_user_ids(link) {
            let Some(u) = self.directory.user(user) else {
                continue;
            };
            if u.config {
                if let Some(registration) = self.directory.ensure_server_user(link, user) {
                    registration.introduced = false;
                }
            } else if u.link == link {
                merge(&mut result, self.user_destroy(user, "Flushing..."));
            } else {
                self.directory.remove_server_user(link, user);
            }
        }

        let stragglers: Vec<UserId> = self
            .directory
            .users()
            .filter(|(_, u)| u.link == link && !u.config)
            .map(|(id, _)| id)
            .collect();
        for user in stragglers {
            merge(&mut result, self.user_destroy(user, "Flushing..."));
        }

        for channel in self.directory.link_channels(link) {
            let members = self.directory.channel(channel).map(|ch| ch.member_ids()).unwrap_or_default();
            for user in members {
                if let Some(member) = self.directory.member_mut(channel, user) {
                    member.introduced = false;
                }
            }
        }
        result
    }
}
