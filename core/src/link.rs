//! Links to remote networks
//!
//! A [`Link`] carries the connection settings for one network, its handshake
//! state, traffic counters and the registrations of users on it. Output goes
//! through an [`Outbound`] handle to the link's writer task; while no
//! connection is attached, lines sent to the link are dropped.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::LinkConfig;
use crate::directory::{ChannelId, UserId};
use crate::{Error, Result};

/// Seconds to wait after a connect attempt or disconnect before trying again
pub const RECONNECT_COOLDOWN: i64 = 15;

/// Protocol variant spoken on a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Classic server-to-server linking
    Rfc1459,
    /// Timestamped server-to-server linking
    Ts,
    /// Binary-token server linking, recognised but not spoken
    P10,
    /// A plain client connection
    User,
    /// A chat-bot multiplexer seen as a client connection
    Bitlbee,
}

impl Dialect {
    /// Server-to-server dialects, where peers learn about users from us
    pub fn is_server(self) -> bool {
        matches!(self, Dialect::Rfc1459 | Dialect::Ts | Dialect::P10)
    }

    /// Dialects where the gateway is a single participant
    pub fn is_user_like(self) -> bool {
        matches!(self, Dialect::User | Dialect::Bitlbee)
    }

    /// Fails for dialects that have no translation for `operation`
    pub fn ensure_supported(self, operation: &'static str) -> Result<()> {
        match self {
            Dialect::P10 => Err(Error::Unsupported {
                dialect: self,
                operation,
            }),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Dialect::Rfc1459 => "rfc1459",
            Dialect::Ts => "ts",
            Dialect::P10 => "p10",
            Dialect::User => "user",
            Dialect::Bitlbee => "bitlbee",
        };
        write!(f, "{}", s)
    }
}

/// Handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    /// Socket being opened
    Connecting,
    /// Greeting sent, waiting for the peer to accept us
    Authenticating,
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Authenticating => "authenticating",
            LinkState::Connected => "connected",
        };
        write!(f, "{}", s)
    }
}

/// Traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub sent_msgs: u64,
    pub sent_bytes: u64,
    pub recv_msgs: u64,
    pub recv_bytes: u64,
}

/// A user's registration on a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerUser {
    pub user: UserId,
    /// The link's peer has been told this user exists
    pub introduced: bool,
}

/// Handle to the writer task of one connection
#[derive(Debug, Clone)]
pub struct Outbound {
    sender: mpsc::UnboundedSender<String>,
    session: u64,
    shutdown: CancellationToken,
}

impl Outbound {
    pub fn new(sender: mpsc::UnboundedSender<String>, session: u64, shutdown: CancellationToken) -> Self {
        Self {
            sender,
            session,
            shutdown,
        }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Stop the reader and writer of this connection
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

/// One remote network
#[derive(Debug)]
pub struct Link {
    pub tag: String,
    pub dialect: Dialect,
    pub hostname: String,
    pub port: u16,
    pub nickname: Option<String>,
    /// Name the gateway uses for itself on this link
    pub local_name: String,
    pub password: Option<String>,
    /// Label of the remote side, replaced by what the peer announces
    pub identity: String,
    /// Description sent during the handshake
    pub description: String,
    /// Description the peer announced for itself
    pub remote_description: Option<String>,
    pub identify_password: Option<String>,
    pub default_channel: Option<ChannelId>,
    pub autoconnect: bool,
    pub state: LinkState,
    pub stats: LinkStats,
    /// Unix time of the last connect attempt or disconnect
    pub last_connect: i64,
    /// The gateway's own user on user-like links
    pub self_user: Option<UserId>,
    /// Connection counter, bumped on every attempt
    pub session: u64,
    pub(crate) users: Vec<ServerUser>,
    pub(crate) channels: Vec<ChannelId>,
    outbound: Option<Outbound>,
}

impl Link {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            tag: config.tag.clone(),
            dialect: config.dialect,
            hostname: config.hostname.clone(),
            port: config.port,
            nickname: config.nickname.clone(),
            local_name: config.local_name.clone(),
            password: config.password.clone(),
            identity: config.identity.clone(),
            description: config.description.clone(),
            remote_description: None,
            identify_password: config.identify_password.clone(),
            default_channel: None,
            autoconnect: config.autoconnect,
            state: LinkState::Disconnected,
            stats: LinkStats::default(),
            last_connect: 0,
            self_user: None,
            session: 0,
            users: Vec::new(),
            channels: Vec::new(),
            outbound: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// A new connect attempt is allowed at `now`
    pub fn may_connect(&self, now: i64) -> bool {
        self.state == LinkState::Disconnected && now >= self.last_connect + RECONNECT_COOLDOWN
    }

    /// Nickname used on user-like links
    pub fn nick(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.local_name)
    }

    /// Lines that open the conversation with the peer
    pub fn handshake(&self) -> Result<Vec<String>> {
        self.dialect.ensure_supported("handshake")?;

        let mut lines = Vec::new();
        if let Some(password) = &self.password {
            let trailer = if self.dialect == Dialect::Ts { " :TS" } else { "" };
            lines.push(format!("PASS {}{}", password, trailer));
        }

        if self.dialect.is_user_like() {
            lines.push(format!("USER {} . . :{}", self.local_name, self.description));
            lines.push(format!("NICK {}", self.nick()));
        } else {
            lines.push(format!("SERVER {} 1 :{}", self.local_name, self.description));
            if self.dialect == Dialect::Ts {
                lines.push("CAPAB TS3".to_string());
            }
        }

        Ok(lines)
    }

    /// Attach the writer of a fresh connection
    pub fn attach(&mut self, outbound: Outbound) {
        self.outbound = Some(outbound);
    }

    /// Detach and stop the current connection, if any
    pub fn detach(&mut self) -> Option<Outbound> {
        let outbound = self.outbound.take();
        if let Some(outbound) = &outbound {
            outbound.close();
        }
        outbound
    }

    pub fn has_connection(&self) -> bool {
        self.outbound.is_some()
    }

    /// Queue one line for the peer. Dropped silently without a connection.
    pub fn send(&mut self, line: String) {
        let Some(outbound) = &self.outbound else {
            debug!("[{}] not connected, dropping: {}", self.tag, line);
            return;
        };

        let bytes = line.len() as u64 + 2;
        debug!("[{}] >> {}", self.tag, line);
        match outbound.sender.send(line) {
            Ok(()) => {
                self.stats.sent_msgs += 1;
                self.stats.sent_bytes += bytes;
            }
            Err(_) => debug!("[{}] writer has gone away", self.tag),
        }
    }

    /// Count one received line
    pub fn record_received(&mut self, bytes: usize) {
        self.stats.recv_msgs += 1;
        self.stats.recv_bytes += bytes as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dialect: Dialect, password: Option<&str>) -> LinkConfig {
        LinkConfig {
            tag: "net".to_string(),
            dialect,
            hostname: "irc.example.net".to_string(),
            port: 6667,
            nickname: Some("Relay".to_string()),
            local_name: "relay.example.org".to_string(),
            password: password.map(str::to_string),
            identity: "irc.example.net".to_string(),
            description: "Relay gateway".to_string(),
            identify_password: None,
            default_channel: None,
            autoconnect: true,
        }
    }

    #[test]
    fn test_backoff() {
        let mut link = Link::new(&config(Dialect::Rfc1459, None));
        assert!(link.may_connect(1_000));
        link.last_connect = 1_000;
        assert!(!link.may_connect(1_014));
        assert!(link.may_connect(1_015));
        link.state = LinkState::Connected;
        assert!(!link.may_connect(5_000));
    }

    #[test]
    fn test_server_handshake() {
        let link = Link::new(&config(Dialect::Ts, Some("secret")));
        assert_eq!(
            link.handshake().unwrap(),
            vec![
                "PASS secret :TS",
                "SERVER relay.example.org 1 :Relay gateway",
                "CAPAB TS3",
            ]
        );
    }

    #[test]
    fn test_user_handshake() {
        let link = Link::new(&config(Dialect::User, None));
        assert_eq!(
            link.handshake().unwrap(),
            vec!["USER relay.example.org . . :Relay gateway", "NICK Relay"]
        );
    }

    #[test]
    fn test_p10_handshake_unsupported() {
        let link = Link::new(&config(Dialect::P10, None));
        assert!(matches!(
            link.handshake(),
            Err(Error::Unsupported { dialect: Dialect::P10, .. })
        ));
    }

    #[test]
    fn test_send_counts_and_drops() {
        let mut link = Link::new(&config(Dialect::Rfc1459, None));
        link.send("PING :x".to_string());
        assert_eq!(link.stats.sent_msgs, 0);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        link.attach(Outbound::new(tx, 1, token.clone()));
        link.send("PING :x".to_string());
        assert_eq!(rx.try_recv().unwrap(), "PING :x");
        assert_eq!(link.stats.sent_msgs, 1);
        assert_eq!(link.stats.sent_bytes, 9);

        link.detach();
        assert!(token.is_cancelled());
        assert!(!link.has_connection());
    }
}
