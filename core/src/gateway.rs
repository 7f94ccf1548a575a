//! The gateway: owner of the directory and entry point for every event
//!
//! All state changes happen through a `&mut Gateway`, one event at a time.
//! The runtime feeds it connection results and received lines; everything
//! else (introductions, relays, replies) follows from those calls.

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::{Config, GatewayConfig, LinkConfig};
use crate::directory::{ChannelId, Directory, LinkId, User, UserId};
use crate::dispatch::{Dispatcher, Request, Route};
use crate::link::{Dialect, Link, LinkState, Outbound};
use crate::message::Message;
use crate::{Error, Result};

/// A connect attempt the runtime should carry out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub link: LinkId,
    pub session: u64,
    pub hostname: String,
    pub port: u16,
}

/// Relay gateway state
pub struct Gateway {
    pub(crate) directory: Directory,
    pub(crate) settings: GatewayConfig,
    started: i64,
    dispatcher: Dispatcher,
    /// Links whose dialect failed mid-event, torn down once the event is done
    unsupported: Vec<(LinkId, String)>,
}

impl Gateway {
    /// Create an empty gateway
    pub fn new(settings: GatewayConfig) -> Result<Self> {
        let dispatcher = Dispatcher::new();
        dispatcher.verify()?;

        Ok(Self {
            directory: Directory::new(),
            settings,
            started: Self::now(),
            dispatcher,
            unsupported: Vec::new(),
        })
    }

    /// Create a gateway with the links, channels and bridges from `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut gateway = Self::new(config.gateway.clone())?;

        for link in &config.links {
            gateway.add_link(link)?;
        }
        for channel in &config.channels {
            gateway.add_channel(&channel.link, &channel.name, Some(&channel.tag))?;
        }
        for link in &config.links {
            if let Some(default) = &link.default_channel {
                gateway.set_link_option(&link.tag, "default_channel", default)?;
            }
        }
        for pair in &config.channel_links {
            gateway.link_channels(&pair.a, &pair.b)?;
        }

        info!(
            "Gateway {} configured with {} links",
            gateway.settings.service_name,
            config.links.len()
        );
        Ok(gateway)
    }

    /// Current unix time
    pub fn now() -> i64 {
        Utc::now().timestamp()
    }

    /// Unix time the gateway was created
    pub fn started(&self) -> i64 {
        self.started
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn directory_mut(&mut self) -> &mut Directory {
        &mut self.directory
    }

    pub fn settings(&self) -> &GatewayConfig {
        &self.settings
    }

    // ---- administrative interface ----

    pub fn find_link_by_tag(&self, tag: &str) -> Option<LinkId> {
        self.directory.find_link_by_tag(tag)
    }

    pub fn find_channel_by_tag(&self, tag: &str) -> Option<ChannelId> {
        self.directory.find_channel_by_tag(tag)
    }

    /// Register a new link
    pub fn add_link(&mut self, config: &LinkConfig) -> Result<LinkId> {
        if self.directory.find_link_by_tag(&config.tag).is_some() {
            return Err(Error::Config(format!("Link {} already exists", config.tag)));
        }
        let id = self.directory.add_link(Link::new(config));
        debug!("Added {} link {} ({}:{})", config.dialect, config.tag, config.hostname, config.port);
        Ok(id)
    }

    /// Disconnect a link and forget it with everything it owns
    pub fn remove_link(&mut self, tag: &str) -> Result<()> {
        let link = self
            .directory
            .find_link_by_tag(tag)
            .ok_or_else(|| Error::NotFound(format!("link {}", tag)))?;

        self.disconnect(link, "Link removed");

        let owned: Vec<UserId> = self
            .directory
            .users()
            .filter(|(_, user)| user.link == link)
            .map(|(id, _)| id)
            .collect();
        for user in owned {
            if let Err(e) = self.user_destroy(user, "Link removed") {
                warn!("Cleaning up user of removed link {}: {}", tag, e);
            }
        }

        self.directory.remove_link(link);
        info!("Removed link {}", tag);
        Ok(())
    }

    /// Register a channel on the link tagged `link_tag`
    pub fn add_channel(&mut self, link_tag: &str, name: &str, tag: Option<&str>) -> Result<ChannelId> {
        let link = self
            .directory
            .find_link_by_tag(link_tag)
            .ok_or_else(|| Error::NotFound(format!("link {}", link_tag)))?;

        if let Some(tag) = tag {
            if self.directory.find_channel_by_tag(tag).is_some() {
                return Err(Error::Config(format!("Channel tag {} already in use", tag)));
            }
        }
        if let Some(existing) = self.directory.find_channel(link, name) {
            if let (Some(tag), Some(channel)) = (tag, self.directory.channel_mut(existing)) {
                channel.tag = Some(tag.to_string());
            }
            return Ok(existing);
        }

        self.directory
            .create_channel(link, name, tag)
            .ok_or_else(|| Error::NotFound(format!("link {}", link_tag)))
    }

    /// Bridge the channels tagged `a` and `b`
    pub fn link_channels(&mut self, a: &str, b: &str) -> Result<()> {
        let first = self
            .directory
            .find_channel_by_tag(a)
            .ok_or_else(|| Error::NotFound(format!("channel {}", a)))?;
        let second = self
            .directory
            .find_channel_by_tag(b)
            .ok_or_else(|| Error::NotFound(format!("channel {}", b)))?;

        self.bridge_channels(first, second)?;
        info!("Linked channel {} with {}", a, b);
        Ok(())
    }

    /// Change a per-link setting
    pub fn set_link_option(&mut self, link_tag: &str, option: &str, value: &str) -> Result<()> {
        let link = self
            .directory
            .find_link_by_tag(link_tag)
            .ok_or_else(|| Error::NotFound(format!("link {}", link_tag)))?;

        match option {
            "identify_password" => {
                if let Some(l) = self.directory.link_mut(link) {
                    l.identify_password = Some(value.to_string());
                }
            }
            "default_channel" => {
                let dialect = self.link_dialect(link)?;
                if !dialect.is_user_like() {
                    return Err(Error::Config(
                        "Default channels are only used on user and bitlbee links".to_string(),
                    ));
                }
                let channel = self
                    .directory
                    .find_channel_by_tag(value)
                    .filter(|&c| self.directory.channel(c).map(|ch| ch.link) == Some(link))
                    .ok_or_else(|| Error::NotFound(format!("channel {} on link {}", value, link_tag)))?;
                if let Some(l) = self.directory.link_mut(link) {
                    l.default_channel = Some(channel);
                }
            }
            "autoconnect" => {
                let enabled = matches!(value, "true" | "on" | "yes" | "1");
                if let Some(l) = self.directory.link_mut(link) {
                    l.autoconnect = enabled;
                }
            }
            other => {
                return Err(Error::Config(format!("Unknown link option '{}'", other)));
            }
        }
        Ok(())
    }

    /// Start connecting the link tagged `tag`, honouring the back-off
    pub fn connect_link(&mut self, tag: &str, now: i64) -> Result<ConnectRequest> {
        let link = self
            .directory
            .find_link_by_tag(tag)
            .ok_or_else(|| Error::NotFound(format!("link {}", tag)))?;
        self.begin_connect(link, now)
    }

    /// Drop the connection of the link tagged `tag`
    pub fn disconnect_link(&mut self, tag: &str) -> Result<()> {
        let link = self
            .directory
            .find_link_by_tag(tag)
            .ok_or_else(|| Error::NotFound(format!("link {}", tag)))?;
        self.disconnect(link, "Disconnected by request");
        Ok(())
    }

    // ---- link state machine ----

    /// Connect attempts that are due at `now`
    pub fn due_connects(&mut self, now: i64) -> Vec<ConnectRequest> {
        let due: Vec<LinkId> = self
            .directory
            .links()
            .filter(|(_, link)| link.autoconnect && link.may_connect(now))
            .map(|(id, _)| id)
            .collect();

        due.into_iter()
            .filter_map(|link| match self.begin_connect(link, now) {
                Ok(request) => Some(request),
                Err(e) => {
                    error!("Cannot connect {}: {}", link, e);
                    None
                }
            })
            .collect()
    }

    /// Move a disconnected link to connecting
    pub fn begin_connect(&mut self, link: LinkId, now: i64) -> Result<ConnectRequest> {
        let l = self
            .directory
            .link_mut(link)
            .ok_or_else(|| Error::NotFound(link.to_string()))?;

        if !l.may_connect(now) {
            return Err(Error::Generic(format!(
                "{} is {} or was tried {} seconds ago",
                l.tag,
                l.state,
                now - l.last_connect
            )));
        }

        l.last_connect = now;
        l.dialect.ensure_supported("connect")?;
        l.session += 1;
        l.state = LinkState::Connecting;
        debug!("[{}] connecting to {}:{}", l.tag, l.hostname, l.port);

        Ok(ConnectRequest {
            link,
            session: l.session,
            hostname: l.hostname.clone(),
            port: l.port,
        })
    }

    /// The socket for `session` could not be opened
    pub fn connect_failed(&mut self, link: LinkId, session: u64, reason: &str) {
        if let Some(l) = self.directory.link_mut(link) {
            if l.session == session && l.state == LinkState::Connecting {
                l.state = LinkState::Disconnected;
                warn!("[{}] connect to {}:{} failed: {}", l.tag, l.hostname, l.port, reason);
            }
        }
    }

    /// The socket is open: greet the peer and wait for its acceptance
    pub fn link_established(&mut self, link: LinkId, outbound: Outbound) -> Result<()> {
        let now = Self::now();
        let l = self
            .directory
            .link_mut(link)
            .ok_or_else(|| Error::NotFound(link.to_string()))?;

        if outbound.session() != l.session || l.state != LinkState::Connecting {
            outbound.close();
            return Err(Error::LinkClosed(format!("stale connection for {}", l.tag)));
        }

        let greeting = match l.handshake() {
            Ok(lines) => lines,
            Err(e) => {
                outbound.close();
                l.state = LinkState::Disconnected;
                return Err(e);
            }
        };

        l.attach(outbound);
        for line in greeting {
            l.send(line);
        }
        l.state = LinkState::Authenticating;
        info!("[{}] connected to {}:{}, authenticating", l.tag, l.hostname, l.port);

        if l.dialect.is_user_like() {
            let nick = l.nick().to_string();
            let (ident, host, realname) = (l.local_name.clone(), l.hostname.clone(), l.description.clone());
            let self_user = l.self_user;
            let user = match self_user {
                Some(user) => user,
                None => {
                    if let Some(holder) = self.directory.find_user_by_nick(&nick) {
                        warn!("Nickname {} of link {} is already taken by {}", nick, link, holder);
                        return Ok(());
                    }
                    let user = self.directory.create_user(User::new(&nick, link, true, now));
                    if let Some(l) = self.directory.link_mut(link) {
                        l.self_user = Some(user);
                    }
                    user
                }
            };
            if let Some(u) = self.directory.user_mut(user) {
                u.ident = ident;
                u.host = host;
                u.realname = realname;
            }
            let introduced = self.user_introduce(user);
            self.drop_unsupported_links();
            introduced?;
        }

        Ok(())
    }

    /// Process one line received on `link` during `session`
    pub fn handle_line(&mut self, link: LinkId, session: u64, line: &str) {
        let Some(l) = self.directory.link_mut(link) else {
            return;
        };
        if l.session != session || !l.has_connection() {
            debug!("[{}] ignoring line from stale connection", l.tag);
            return;
        }
        l.record_received(line.len());
        debug!("[{}] << {}", l.tag, line);

        if line == "PING" || line.starts_with("PING ") {
            l.send(format!("PONG{}", &line[4..]));
            return;
        }

        let message = match Message::parse(line) {
            Ok(message) => message,
            Err(e) => {
                warn!("[{}] {}", l.tag, e);
                return;
            }
        };

        let tag = l.tag.clone();
        let user = message
            .prefix
            .as_ref()
            .and_then(|p| self.directory.find_user_by_nick(&p.name));
        let request = Request { link, message, user };

        match self.dispatcher.route(&request.message.command) {
            Some(Route::Handle(handler)) => {
                if let Err(e) = handler(self, &request) {
                    if e.is_link_fatal() {
                        error!("[{}] {} failed: {}", tag, request.message.command, e);
                        self.disconnect(link, &e.to_string());
                    } else {
                        warn!("[{}] {} failed: {}", tag, request.message.command, e);
                    }
                }
            }
            Some(Route::Ignore) => {}
            Some(Route::Disconnect) => {
                let reason = format!("{} {}", request.message.command, request.message.param(0));
                self.disconnect(link, reason.trim_end());
            }
            None => {
                debug!("[{}] ignoring unknown command '{}'", tag, request.message.command);
            }
        }
        self.drop_unsupported_links();
    }

    /// The connection of `session` ended on the peer's side
    pub fn link_closed(&mut self, link: LinkId, session: u64, reason: &str) {
        let current = self
            .directory
            .link(link)
            .map(|l| l.session == session && l.has_connection())
            .unwrap_or(false);
        if current {
            self.disconnect(link, reason);
        }
    }

    /// Tear a link down: drop its connection and flush what it owned
    pub fn disconnect(&mut self, link: LinkId, reason: &str) {
        let now = Self::now();
        let Some(l) = self.directory.link_mut(link) else {
            return;
        };
        if l.state == LinkState::Disconnected && !l.has_connection() {
            return;
        }

        l.detach();
        l.state = LinkState::Disconnected;
        l.last_connect = now;
        info!("[{}] disconnected: {}", l.tag, reason);

        if let Err(e) = self.flush_link(link) {
            warn!("Flushing {}: {}", link, e);
        }
        self.drop_unsupported_links();
    }

    /// Remember that `link` was handed output its dialect cannot express
    pub(crate) fn unsupported_output(&mut self, link: LinkId, dialect: Dialect, operation: &'static str) {
        if let Err(e) = dialect.ensure_supported(operation) {
            error!("[{}] {}", link, e);
            self.unsupported.push((link, e.to_string()));
        }
    }

    fn drop_unsupported_links(&mut self) {
        while let Some((link, reason)) = self.unsupported.pop() {
            self.disconnect(link, &reason);
        }
    }

    /// Disconnect every link
    pub fn shutdown(&mut self) {
        for link in self.directory.link_ids() {
            self.disconnect(link, "Shutting down");
        }
    }

    // ---- helpers shared by the handlers ----

    pub(crate) fn link_dialect(&self, link: LinkId) -> Result<Dialect> {
        self.directory
            .link(link)
            .map(|l| l.dialect)
            .ok_or_else(|| Error::NotFound(link.to_string()))
    }

    /// Name the gateway uses on `link`, the source of numeric replies
    pub(crate) fn local_name(&self, link: LinkId) -> String {
        self.directory
            .link(link)
            .map(|l| l.local_name.clone())
            .unwrap_or_default()
    }

    pub(crate) fn send(&mut self, link: LinkId, line: String) {
        if let Some(l) = self.directory.link_mut(link) {
            l.send(line);
        }
    }
}
