//! Shared setup for the gateway integration tests

#![allow(dead_code)]

use rustrelay_core::*;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub fn link_config(tag: &str, dialect: Dialect, local_name: &str) -> LinkConfig {
    LinkConfig {
        tag: tag.to_string(),
        dialect,
        hostname: format!("{}.example", tag),
        port: 6667,
        nickname: if dialect.is_user_like() { Some("Relay".to_string()) } else { None },
        local_name: local_name.to_string(),
        password: Some("secret".to_string()),
        identity: format!("{}.example", tag),
        description: "Test network".to_string(),
        identify_password: Some("hunter2".to_string()),
        default_channel: None,
        autoconnect: false,
    }
}

/// Attach a capturing writer and mark the link connected
pub fn attach(gateway: &mut Gateway, link: LinkId) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let l = gateway.directory_mut().link_mut(link).unwrap();
    let session = l.session;
    l.attach(Outbound::new(tx, session, CancellationToken::new()));
    l.state = LinkState::Connected;
    rx
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(line) = rx.try_recv() {
        lines.push(line);
    }
    lines
}

/// Feed one raw line to the gateway as if read from `link`
pub fn feed(gateway: &mut Gateway, link: LinkId, line: &str) {
    let session = gateway.directory().link(link).unwrap().session;
    gateway.handle_line(link, session, line);
}

/// An RFC 1459 server link `irc` with `#a` bridged to `#b` on a plain
/// client link `chat`
pub struct Bridge {
    pub gateway: Gateway,
    pub irc: LinkId,
    pub chat: LinkId,
    pub a: ChannelId,
    pub b: ChannelId,
    pub irc_out: mpsc::UnboundedReceiver<String>,
    pub chat_out: mpsc::UnboundedReceiver<String>,
}

impl Bridge {
    pub fn new() -> Self {
        let mut gateway = Gateway::new(GatewayConfig::default()).unwrap();
        let irc = gateway.add_link(&link_config("irc", Dialect::Rfc1459, "irc.local")).unwrap();
        let chat = gateway.add_link(&link_config("chat", Dialect::User, "relay")).unwrap();
        let a = gateway.add_channel("irc", "#a", Some("irc-a")).unwrap();
        let b = gateway.add_channel("chat", "#b", Some("chat-b")).unwrap();
        gateway.link_channels("irc-a", "chat-b").unwrap();

        let irc_out = attach(&mut gateway, irc);
        let chat_out = attach(&mut gateway, chat);

        Self {
            gateway,
            irc,
            chat,
            a,
            b,
            irc_out,
            chat_out,
        }
    }

    /// Introduce `alice` from the server side and put her on `#a`
    pub fn alice_joins(&mut self) -> UserId {
        feed(&mut self.gateway, self.irc, ":irc.peer NICK alice 1 100 +i alice host irc.peer 0 :Alice A");
        feed(&mut self.gateway, self.irc, ":irc.peer SJOIN 100 100 #a + :@alice");
        self.gateway.directory().find_user_by_nick("alice").unwrap()
    }

    /// Learn about `bob` from the client side and put him on `#b`
    pub fn bob_joins(&mut self) -> UserId {
        feed(&mut self.gateway, self.chat, ":chat.server 311 Relay bob bob chat.host * :Bob B");
        feed(&mut self.gateway, self.chat, ":chat.server 319 Relay bob :@#b");
        self.gateway.directory().find_user_by_nick("bob").unwrap()
    }
}
