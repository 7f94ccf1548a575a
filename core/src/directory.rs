//! Directory of links, users and channels
//!
//! Entities live in generational arenas and refer to each other through
//! copyable handles. A handle to a destroyed entity simply stops resolving,
//! so stale handles held by a caller are harmless. Every mutation that
//! touches two sides of a relation (user and channel membership, channel
//! partners) goes through one function here that updates both.

use std::fmt;
use std::marker::PhantomData;

use crate::link::{Link, ServerUser};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Handle {
    index: u32,
    generation: u32,
}

/// Conversion between typed ids and raw arena handles
trait ArenaKey: Copy {
    fn from_handle(handle: Handle) -> Self;
    fn handle(self) -> Handle;
}

macro_rules! arena_key {
    ($name:ident, $label:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(Handle);

        impl ArenaKey for $name {
            fn from_handle(handle: Handle) -> Self {
                $name(handle)
            }

            fn handle(self) -> Handle {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}.{}", $label, self.0.index, self.0.generation)
            }
        }
    };
}

arena_key!(LinkId, "link");
arena_key!(UserId, "user");
arena_key!(ChannelId, "channel");

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

#[derive(Debug)]
struct Arena<K, T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    _key: PhantomData<K>,
}

impl<K: ArenaKey, T> Arena<K, T> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            _key: PhantomData,
        }
    }

    fn insert(&mut self, value: T) -> K {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.value = Some(value);
                K::from_handle(Handle {
                    index,
                    generation: slot.generation,
                })
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    value: Some(value),
                });
                K::from_handle(Handle {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                })
            }
        }
    }

    fn get(&self, key: K) -> Option<&T> {
        let handle = key.handle();
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    fn get_mut(&mut self, key: K) -> Option<&mut T> {
        let handle = key.handle();
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    fn remove(&mut self, key: K) -> Option<T> {
        let handle = key.handle();
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        Some(value)
    }

    fn iter(&self) -> impl Iterator<Item = (K, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    K::from_handle(Handle {
                        index: index as u32,
                        generation: slot.generation,
                    }),
                    value,
                )
            })
        })
    }

    fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(|slot| slot.value.as_mut())
    }

    fn keys(&self) -> Vec<K> {
        self.iter().map(|(key, _)| key).collect()
    }

    fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.value.is_some()).count()
    }
}

/// A global identity
#[derive(Debug, Clone)]
pub struct User {
    pub nick: String,
    pub ident: String,
    pub host: String,
    pub realname: String,
    pub away: Option<String>,
    /// Link on which this identity is authoritative
    pub link: LinkId,
    /// The gateway's own presence on `link`; never relayed
    pub config: bool,
    /// Unix time of the last message sent by this user
    pub last_activity: i64,
    channels: Vec<ChannelId>,
}

impl User {
    pub fn new(nick: &str, link: LinkId, config: bool, now: i64) -> Self {
        Self {
            nick: nick.to_string(),
            ident: String::new(),
            host: String::new(),
            realname: String::new(),
            away: None,
            link,
            config,
            last_activity: now,
            channels: Vec::new(),
        }
    }

    /// Channels this user is a member of
    pub fn channels(&self) -> &[ChannelId] {
        &self.channels
    }

    /// `ident@host`
    pub fn mask(&self) -> String {
        format!("{}@{}", self.ident, self.host)
    }

    /// Ident, host and realname are all known
    pub fn is_complete(&self) -> bool {
        !self.ident.is_empty() && !self.host.is_empty() && !self.realname.is_empty()
    }
}

/// Per-channel mode flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelModes {
    pub anonymous: bool,
    pub invite_only: bool,
    pub moderated: bool,
    pub no_external: bool,
    pub private: bool,
    pub secret: bool,
    pub reop: bool,
    pub topic_lock: bool,
}

/// A user's membership of one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelUser {
    pub user: UserId,
    /// The channel's peer has been told about this member
    pub introduced: bool,
    pub creator: bool,
    pub operator: bool,
    pub voice: bool,
}

impl ChannelUser {
    fn new(user: UserId) -> Self {
        Self {
            user,
            introduced: false,
            creator: false,
            operator: false,
            voice: false,
        }
    }

    /// `@` / `+` prefix as shown in WHOIS channel lists
    pub fn status_prefix(&self) -> &'static str {
        match (self.operator, self.voice) {
            (true, true) => "@+",
            (true, false) => "@",
            (false, true) => "+",
            (false, false) => "",
        }
    }
}

/// One named channel on one link
#[derive(Debug, Clone)]
pub struct Channel {
    pub name: String,
    pub tag: Option<String>,
    pub link: LinkId,
    pub topic: Option<String>,
    pub topic_who: Option<String>,
    pub topic_when: i64,
    pub key: Option<String>,
    pub modes: ChannelModes,
    /// Member limit, -1 when unlimited
    pub limit: i64,
    members: Vec<ChannelUser>,
    partner: Option<ChannelId>,
}

impl Channel {
    fn new(name: &str, tag: Option<&str>, link: LinkId) -> Self {
        Self {
            name: name.to_string(),
            tag: tag.map(str::to_string),
            link,
            topic: None,
            topic_who: None,
            topic_when: 0,
            key: None,
            modes: ChannelModes::default(),
            limit: -1,
            members: Vec::new(),
            partner: None,
        }
    }

    pub fn members(&self) -> &[ChannelUser] {
        &self.members
    }

    pub fn member(&self, user: UserId) -> Option<&ChannelUser> {
        self.members.iter().find(|m| m.user == user)
    }

    pub fn has_member(&self, user: UserId) -> bool {
        self.member(user).is_some()
    }

    pub fn member_ids(&self) -> Vec<UserId> {
        self.members.iter().map(|m| m.user).collect()
    }

    /// The bridged channel, if any
    pub fn partner(&self) -> Option<ChannelId> {
        self.partner
    }
}

/// In-memory registry of everything the gateway knows about
#[derive(Debug)]
pub struct Directory {
    links: Arena<LinkId, Link>,
    users: Arena<UserId, User>,
    channels: Arena<ChannelId, Channel>,
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

impl Directory {
    pub fn new() -> Self {
        Self {
            links: Arena::new(),
            users: Arena::new(),
            channels: Arena::new(),
        }
    }

    // ---- links ----

    pub fn add_link(&mut self, link: Link) -> LinkId {
        self.links.insert(link)
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(id)
    }

    pub fn link_mut(&mut self, id: LinkId) -> Option<&mut Link> {
        self.links.get_mut(id)
    }

    pub fn links(&self) -> impl Iterator<Item = (LinkId, &Link)> {
        self.links.iter()
    }

    pub fn link_ids(&self) -> Vec<LinkId> {
        self.links.keys()
    }

    pub fn find_link_by_tag(&self, tag: &str) -> Option<LinkId> {
        self.links
            .iter()
            .find(|(_, link)| link.tag.eq_ignore_ascii_case(tag))
            .map(|(id, _)| id)
    }

    /// Drop a link together with its channels and the users it is
    /// authoritative for. Partner channels elsewhere are only unlinked.
    pub fn remove_link(&mut self, id: LinkId) -> Option<Link> {
        self.links.get(id)?;

        for channel in self.link_channels(id) {
            self.destroy_channel(channel);
        }
        let owned: Vec<UserId> = self
            .users
            .iter()
            .filter(|(_, user)| user.link == id)
            .map(|(uid, _)| uid)
            .collect();
        for user in owned {
            self.destroy_user(user);
        }

        self.links.remove(id)
    }

    /// Channels owned by `link`
    pub fn link_channels(&self, link: LinkId) -> Vec<ChannelId> {
        self.links
            .get(link)
            .map(|l| l.channels.clone())
            .unwrap_or_default()
    }

    // ---- link registrations ----

    pub fn server_user(&self, link: LinkId, user: UserId) -> Option<&ServerUser> {
        self.links.get(link)?.users.iter().find(|su| su.user == user)
    }

    /// Registration of `user` on `link`, created when missing
    pub fn ensure_server_user(&mut self, link: LinkId, user: UserId) -> Option<&mut ServerUser> {
        self.users.get(user)?;
        let link = self.links.get_mut(link)?;
        let pos = match link.users.iter().position(|su| su.user == user) {
            Some(pos) => pos,
            None => {
                link.users.push(ServerUser {
                    user,
                    introduced: false,
                });
                link.users.len() - 1
            }
        };
        link.users.get_mut(pos)
    }

    pub fn remove_server_user(&mut self, link: LinkId, user: UserId) -> Option<ServerUser> {
        let link = self.links.get_mut(link)?;
        let pos = link.users.iter().position(|su| su.user == user)?;
        Some(link.users.remove(pos))
    }

    /// Users registered on `link`
    pub fn server_user_ids(&self, link: LinkId) -> Vec<UserId> {
        self.links
            .get(link)
            .map(|l| l.users.iter().map(|su| su.user).collect())
            .unwrap_or_default()
    }

    // ---- users ----

    pub fn create_user(&mut self, user: User) -> UserId {
        self.users.insert(user)
    }

    pub fn user(&self, id: UserId) -> Option<&User> {
        self.users.get(id)
    }

    pub fn user_mut(&mut self, id: UserId) -> Option<&mut User> {
        self.users.get_mut(id)
    }

    pub fn users(&self) -> impl Iterator<Item = (UserId, &User)> {
        self.users.iter()
    }

    pub fn user_ids(&self) -> Vec<UserId> {
        self.users.keys()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Case-insensitive nickname lookup
    pub fn find_user_by_nick(&self, nick: &str) -> Option<UserId> {
        if nick.is_empty() {
            return None;
        }
        self.users
            .iter()
            .find(|(_, user)| user.nick.eq_ignore_ascii_case(nick))
            .map(|(id, _)| id)
    }

    /// Remove a user from every channel and link registration, then forget it
    pub fn destroy_user(&mut self, id: UserId) -> Option<User> {
        let channels = self.users.get(id)?.channels.clone();
        for channel in channels {
            self.remove_member(channel, id);
        }
        for link in self.links.values_mut() {
            link.users.retain(|su| su.user != id);
            if link.self_user == Some(id) {
                link.self_user = None;
            }
        }
        self.users.remove(id)
    }

    // ---- channels ----

    pub fn create_channel(&mut self, link: LinkId, name: &str, tag: Option<&str>) -> Option<ChannelId> {
        self.links.get(link)?;
        let id = self.channels.insert(Channel::new(name, tag, link));
        if let Some(link) = self.links.get_mut(link) {
            link.channels.push(id);
        }
        Some(id)
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(id)
    }

    pub fn channel_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.channels.get_mut(id)
    }

    pub fn channels(&self) -> impl Iterator<Item = (ChannelId, &Channel)> {
        self.channels.iter()
    }

    /// Case-insensitive channel lookup within one link
    pub fn find_channel(&self, link: LinkId, name: &str) -> Option<ChannelId> {
        let link = self.links.get(link)?;
        link.channels.iter().copied().find(|&id| {
            self.channels
                .get(id)
                .map(|ch| ch.name.eq_ignore_ascii_case(name))
                .unwrap_or(false)
        })
    }

    pub fn find_channel_by_tag(&self, tag: &str) -> Option<ChannelId> {
        self.channels
            .iter()
            .find(|(_, ch)| {
                ch.tag
                    .as_deref()
                    .map(|t| t.eq_ignore_ascii_case(tag))
                    .unwrap_or(false)
            })
            .map(|(id, _)| id)
    }

    /// Unlink, empty and forget a channel
    pub fn destroy_channel(&mut self, id: ChannelId) -> Option<Channel> {
        self.channels.get(id)?;
        self.clear_partner(id);
        for user in self.channels.get(id).map(Channel::member_ids).unwrap_or_default() {
            self.remove_member(id, user);
        }
        for link in self.links.values_mut() {
            link.channels.retain(|&c| c != id);
            if link.default_channel == Some(id) {
                link.default_channel = None;
            }
        }
        self.channels.remove(id)
    }

    // ---- membership ----

    /// Add `user` to `channel` on both sides. False when already a member
    /// or when either side does not exist.
    pub fn add_member(&mut self, channel: ChannelId, user: UserId) -> bool {
        if self.users.get(user).is_none() {
            return false;
        }
        let Some(ch) = self.channels.get_mut(channel) else {
            return false;
        };
        if ch.has_member(user) {
            return false;
        }
        ch.members.push(ChannelUser::new(user));
        if let Some(u) = self.users.get_mut(user) {
            u.channels.push(channel);
        }
        true
    }

    /// Remove `user` from `channel` on both sides
    pub fn remove_member(&mut self, channel: ChannelId, user: UserId) -> Option<ChannelUser> {
        if let Some(u) = self.users.get_mut(user) {
            u.channels.retain(|&c| c != channel);
        }
        let ch = self.channels.get_mut(channel)?;
        let pos = ch.members.iter().position(|m| m.user == user)?;
        Some(ch.members.remove(pos))
    }

    pub fn member_mut(&mut self, channel: ChannelId, user: UserId) -> Option<&mut ChannelUser> {
        self.channels
            .get_mut(channel)?
            .members
            .iter_mut()
            .find(|m| m.user == user)
    }

    // ---- partners ----

    /// Bridge two channels. Any earlier partner of either is unlinked first.
    pub fn set_partner(&mut self, a: ChannelId, b: ChannelId) -> bool {
        if a == b || self.channels.get(a).is_none() || self.channels.get(b).is_none() {
            return false;
        }
        self.clear_partner(a);
        self.clear_partner(b);
        if let Some(ch) = self.channels.get_mut(a) {
            ch.partner = Some(b);
        }
        if let Some(ch) = self.channels.get_mut(b) {
            ch.partner = Some(a);
        }
        true
    }

    /// Break the bridge of `channel` on both sides
    pub fn clear_partner(&mut self, channel: ChannelId) {
        let partner = self.channels.get_mut(channel).and_then(|ch| ch.partner.take());
        if let Some(partner) = partner {
            if let Some(other) = self.channels.get_mut(partner) {
                if other.partner == Some(channel) {
                    other.partner = None;
                }
            }
        }
    }

    /// Membership mirrors and partner symmetry hold for every entity
    pub fn is_consistent(&self) -> bool {
        let members_mirrored = self.channels.iter().all(|(cid, ch)| {
            ch.members.iter().all(|m| {
                self.users
                    .get(m.user)
                    .map(|u| u.channels.contains(&cid))
                    .unwrap_or(false)
            })
        });
        let channels_mirrored = self.users.iter().all(|(uid, u)| {
            u.channels.iter().all(|&cid| {
                self.channels
                    .get(cid)
                    .map(|ch| ch.has_member(uid))
                    .unwrap_or(false)
            })
        });
        let partners_symmetric = self.channels.iter().all(|(cid, ch)| match ch.partner {
            Some(p) => self.channels.get(p).map(|o| o.partner == Some(cid)).unwrap_or(false),
            None => true,
        });
        members_mirrored && channels_mirrored && partners_symmetric
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::link::Dialect;

    fn link(tag: &str, dialect: Dialect) -> Link {
        Link::new(&LinkConfig {
            tag: tag.to_string(),
            dialect,
            hostname: format!("{}.example", tag),
            port: 6667,
            nickname: Some("Relay".to_string()),
            local_name: format!("relay.{}", tag),
            password: None,
            identity: tag.to_string(),
            description: "test".to_string(),
            identify_password: None,
            default_channel: None,
            autoconnect: true,
        })
    }

    #[test]
    fn test_stale_handle_does_not_resolve() {
        let mut dir = Directory::new();
        let l = dir.add_link(link("one", Dialect::Rfc1459));
        let alice = dir.create_user(User::new("alice", l, false, 0));
        dir.destroy_user(alice);
        let bob = dir.create_user(User::new("bob", l, false, 0));
        assert!(dir.user(alice).is_none());
        assert_eq!(dir.user(bob).unwrap().nick, "bob");
        assert_ne!(alice, bob);
    }

    #[test]
    fn test_membership_mirror() {
        let mut dir = Directory::new();
        let l = dir.add_link(link("one", Dialect::Rfc1459));
        let ch = dir.create_channel(l, "#rust", Some("rust")).unwrap();
        let alice = dir.create_user(User::new("alice", l, false, 0));

        assert!(dir.add_member(ch, alice));
        assert!(!dir.add_member(ch, alice));
        assert!(dir.channel(ch).unwrap().has_member(alice));
        assert_eq!(dir.user(alice).unwrap().channels(), &[ch]);
        assert!(dir.is_consistent());

        dir.remove_member(ch, alice);
        assert!(!dir.channel(ch).unwrap().has_member(alice));
        assert!(dir.user(alice).unwrap().channels().is_empty());
        assert!(dir.remove_member(ch, alice).is_none());
        assert!(dir.is_consistent());
    }

    #[test]
    fn test_nick_lookup_case_insensitive() {
        let mut dir = Directory::new();
        let l = dir.add_link(link("one", Dialect::Rfc1459));
        let alice = dir.create_user(User::new("Alice", l, false, 0));
        assert_eq!(dir.find_user_by_nick("aLiCe"), Some(alice));
        assert_eq!(dir.find_user_by_nick("bob"), None);
        assert_eq!(dir.find_user_by_nick(""), None);
    }

    #[test]
    fn test_partner_cleared_on_destroy() {
        let mut dir = Directory::new();
        let l1 = dir.add_link(link("one", Dialect::Rfc1459));
        let l2 = dir.add_link(link("two", Dialect::User));
        let a = dir.create_channel(l1, "#a", Some("a")).unwrap();
        let b = dir.create_channel(l2, "#b", Some("b")).unwrap();

        assert!(dir.set_partner(a, b));
        assert_eq!(dir.channel(b).unwrap().partner(), Some(a));
        dir.destroy_channel(a);
        assert_eq!(dir.channel(b).unwrap().partner(), None);
        assert!(dir.destroy_channel(a).is_none());
        assert!(dir.find_channel(l1, "#a").is_none());
        assert!(dir.is_consistent());
    }

    #[test]
    fn test_relinking_unlinks_previous_partner() {
        let mut dir = Directory::new();
        let l = dir.add_link(link("one", Dialect::Rfc1459));
        let a = dir.create_channel(l, "#a", None).unwrap();
        let b = dir.create_channel(l, "#b", None).unwrap();
        let c = dir.create_channel(l, "#c", None).unwrap();

        dir.set_partner(a, b);
        dir.set_partner(a, c);
        assert_eq!(dir.channel(b).unwrap().partner(), None);
        assert_eq!(dir.channel(c).unwrap().partner(), Some(a));
        assert!(!dir.set_partner(a, a));
        assert!(dir.is_consistent());
    }

    #[test]
    fn test_destroy_user_is_idempotent() {
        let mut dir = Directory::new();
        let l = dir.add_link(link("one", Dialect::Rfc1459));
        let ch = dir.create_channel(l, "#a", None).unwrap();
        let alice = dir.create_user(User::new("alice", l, false, 0));
        dir.add_member(ch, alice);
        dir.ensure_server_user(l, alice);

        assert!(dir.destroy_user(alice).is_some());
        assert!(dir.destroy_user(alice).is_none());
        assert!(dir.channel(ch).unwrap().members().is_empty());
        assert!(dir.server_user(l, alice).is_none());
    }

    #[test]
    fn test_remove_link_cascades() {
        let mut dir = Directory::new();
        let l1 = dir.add_link(link("one", Dialect::Rfc1459));
        let l2 = dir.add_link(link("two", Dialect::Ts));
        let a = dir.create_channel(l1, "#a", Some("a")).unwrap();
        let b = dir.create_channel(l2, "#b", Some("b")).unwrap();
        dir.set_partner(a, b);

        let local = dir.create_user(User::new("local", l1, false, 0));
        let remote = dir.create_user(User::new("remote", l2, false, 0));
        dir.add_member(a, local);
        dir.add_member(b, local);
        dir.add_member(a, remote);
        dir.ensure_server_user(l1, remote);

        dir.remove_link(l1).unwrap();
        assert!(dir.user(local).is_none());
        assert!(dir.user(remote).is_some());
        assert!(dir.channel(a).is_none());
        assert_eq!(dir.channel(b).unwrap().partner(), None);
        assert!(!dir.channel(b).unwrap().has_member(local));
        assert!(dir.user(remote).unwrap().channels().is_empty());
        assert!(dir.find_link_by_tag("one").is_none());
        assert!(dir.is_consistent());
    }
}
