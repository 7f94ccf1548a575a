//! Integration tests for relaying between a server link and a client link

mod common;

use common::{attach, drain, feed, link_config, Bridge};
use rustrelay_core::*;

#[test]
fn test_server_join_announced_on_client_link() {
    let mut bridge = Bridge::new();
    let alice = bridge.alice_joins();

    assert_eq!(
        drain(&mut bridge.chat_out),
        vec!["PRIVMSG #b :### alice (alice@host) joined the channel"]
    );
    assert!(drain(&mut bridge.irc_out).is_empty());

    let dir = bridge.gateway.directory();
    assert!(dir.channel(bridge.a).unwrap().has_member(alice));
    assert!(dir.channel(bridge.b).unwrap().has_member(alice));
    assert!(dir.is_consistent());
}

#[test]
fn test_channel_message_relayed_with_nick_prefix() {
    let mut bridge = Bridge::new();
    bridge.alice_joins();
    drain(&mut bridge.chat_out);

    feed(&mut bridge.gateway, bridge.irc, ":alice PRIVMSG #a :hello");
    assert_eq!(drain(&mut bridge.chat_out), vec!["PRIVMSG #b :alice: hello"]);
}

#[test]
fn test_client_user_introduced_to_server() {
    let mut bridge = Bridge::new();

    feed(&mut bridge.gateway, bridge.chat, ":bob!bob@chat.host PRIVMSG #b :hi");
    assert_eq!(drain(&mut bridge.chat_out), vec!["WHOIS bob"]);

    let bob = bridge.bob_joins();
    let irc = drain(&mut bridge.irc_out);
    assert_eq!(irc.len(), 2);
    assert!(irc[0].starts_with("NICK bob 1 "));
    assert!(irc[0].ends_with(" +i bob chat.host irc.local 0 :Bob B"));
    assert!(irc[1].starts_with(":irc.local SJOIN "));
    assert!(irc[1].ends_with(" #a + :bob"));
    assert_eq!(
        drain(&mut bridge.chat_out),
        vec!["PRIVMSG #b :### bob (bob@chat.host) joined the channel"]
    );

    feed(&mut bridge.gateway, bridge.chat, ":bob!bob@chat.host PRIVMSG #b :hi there");
    assert_eq!(drain(&mut bridge.irc_out), vec![":bob PRIVMSG #a :hi there"]);
    assert!(bridge.gateway.directory().channel(bridge.a).unwrap().has_member(bob));
}

#[test]
fn test_repeated_introduction_is_silent() {
    let mut bridge = Bridge::new();
    let bob = bridge.bob_joins();
    drain(&mut bridge.irc_out);
    drain(&mut bridge.chat_out);

    bridge.gateway.user_introduce(bob).unwrap();
    bridge.gateway.channel_add_user(bridge.b, bob).unwrap();

    assert!(drain(&mut bridge.irc_out).is_empty());
    assert!(drain(&mut bridge.chat_out).is_empty());
}

#[test]
fn test_private_addressing_from_client_link() {
    let mut bridge = Bridge::new();
    bridge.alice_joins();
    bridge.bob_joins();
    drain(&mut bridge.irc_out);
    drain(&mut bridge.chat_out);

    feed(&mut bridge.gateway, bridge.chat, ":bob!bob@chat.host PRIVMSG Relay :alice: psst");
    assert_eq!(drain(&mut bridge.irc_out), vec![":bob PRIVMSG alice :psst"]);

    feed(&mut bridge.gateway, bridge.chat, ":bob!bob@chat.host PRIVMSG #b :alice: see the channel");
    assert_eq!(drain(&mut bridge.irc_out), vec![":bob PRIVMSG #a :see the channel"]);

    feed(&mut bridge.gateway, bridge.chat, ":bob!bob@chat.host PRIVMSG #b :zed: anyone?");
    assert_eq!(drain(&mut bridge.chat_out), vec!["PRIVMSG bob :No such nick/channel zed"]);
}

#[test]
fn test_quit_leaves_both_sides_of_bridge() {
    let mut bridge = Bridge::new();
    bridge.alice_joins();
    drain(&mut bridge.chat_out);

    feed(&mut bridge.gateway, bridge.irc, ":alice QUIT :bye");

    assert_eq!(
        drain(&mut bridge.chat_out),
        vec!["PRIVMSG #b :### alice (alice@host) parted the channel (bye)"]
    );
    let dir = bridge.gateway.directory();
    assert!(dir.find_user_by_nick("alice").is_none());
    assert!(dir.channel(bridge.a).unwrap().members().is_empty());
    assert!(dir.channel(bridge.b).unwrap().members().is_empty());
    assert!(dir.is_consistent());
}

#[test]
fn test_server_introduction_collision_kills() {
    let mut bridge = Bridge::new();
    bridge.alice_joins();
    drain(&mut bridge.chat_out);

    feed(&mut bridge.gateway, bridge.irc, ":irc.peer NICK alice 1 200 +i other host2 irc.peer 0 :Other");

    assert_eq!(
        drain(&mut bridge.irc_out),
        vec![":irc.local KILL alice :That nickname is reserved, pick another one (SJ)"]
    );
    assert!(bridge.gateway.directory().find_user_by_nick("alice").is_none());
    assert!(bridge.gateway.directory().is_consistent());
}

#[test]
fn test_nick_change_collision_kills_changer() {
    let mut bridge = Bridge::new();
    bridge.alice_joins();
    let bob = bridge.bob_joins();
    drain(&mut bridge.irc_out);

    feed(&mut bridge.gateway, bridge.irc, ":alice NICK bob");

    let irc = drain(&mut bridge.irc_out);
    assert_eq!(irc[0], ":irc.local KILL bob :That nickname is reserved, pick another one (NC)");
    assert!(bridge.gateway.directory().find_user_by_nick("alice").is_none());
    assert_eq!(bridge.gateway.directory().find_user_by_nick("bob"), Some(bob));
}

#[test]
fn test_nick_change_announced_on_client_link() {
    let mut bridge = Bridge::new();
    bridge.alice_joins();
    drain(&mut bridge.chat_out);

    feed(&mut bridge.gateway, bridge.irc, ":alice NICK alicia");

    assert_eq!(drain(&mut bridge.chat_out), vec!["PRIVMSG #b :### alice changed nick to alicia"]);
    assert!(bridge.gateway.directory().find_user_by_nick("alicia").is_some());
}

#[test]
fn test_disconnect_flushes_owned_users() {
    let mut bridge = Bridge::new();
    bridge.alice_joins();
    let bob = bridge.bob_joins();
    drain(&mut bridge.chat_out);

    bridge.gateway.disconnect(bridge.irc, "test");

    assert_eq!(
        drain(&mut bridge.chat_out),
        vec!["PRIVMSG #b :### alice (alice@host) parted the channel (Flushing...)"]
    );
    let dir = bridge.gateway.directory();
    assert_eq!(dir.link(bridge.irc).unwrap().state, LinkState::Disconnected);
    assert!(dir.find_user_by_nick("alice").is_none());
    let member = dir.channel(bridge.a).unwrap().member(bob).unwrap();
    assert!(!member.introduced);
    assert!(dir.server_user(bridge.irc, bob).is_none());
    assert!(dir.is_consistent());
}

#[test]
fn test_ping_answered() {
    let mut bridge = Bridge::new();

    feed(&mut bridge.gateway, bridge.irc, "PINGPONG :not a ping");
    feed(&mut bridge.gateway, bridge.irc, "PING :irc.peer");
    feed(&mut bridge.gateway, bridge.irc, ":irc.peer PING irc.peer");

    assert_eq!(
        drain(&mut bridge.irc_out),
        vec!["PONG :irc.peer", ":irc.local PONG irc.local :irc.peer"]
    );
}

#[test]
fn test_error_disconnects_link() {
    let mut bridge = Bridge::new();

    feed(&mut bridge.gateway, bridge.irc, "ERROR :Closing Link");

    let link = bridge.gateway.directory().link(bridge.irc).unwrap();
    assert_eq!(link.state, LinkState::Disconnected);
    assert!(!link.has_connection());
}

#[test]
fn test_whois_and_stats_replies() {
    let mut bridge = Bridge::new();
    bridge.alice_joins();
    drain(&mut bridge.irc_out);

    feed(&mut bridge.gateway, bridge.irc, ":irc.peer WHOIS alice");
    let whois = drain(&mut bridge.irc_out);
    assert_eq!(whois[0], ":irc.local 311 irc.peer alice alice host * :Alice A");
    assert!(whois.contains(&":irc.local 319 irc.peer alice :#a".to_string()));
    assert_eq!(whois.last().unwrap(), ":irc.local 318 irc.peer alice :End of WHOIS list");

    feed(&mut bridge.gateway, bridge.irc, ":irc.peer WHOIS nobody");
    assert_eq!(
        drain(&mut bridge.irc_out),
        vec![":irc.local 401 irc.peer nobody :No such nick/channel"]
    );

    feed(&mut bridge.gateway, bridge.irc, ":irc.peer STATS u");
    let stats = drain(&mut bridge.irc_out);
    assert!(stats[0].starts_with(":irc.local 242 irc.peer :Server Up 0 days"));
    assert_eq!(stats[1], ":irc.local 219 irc.peer u :End of STATS report");
}

#[test]
fn test_topic_forwarded_to_partner() {
    let mut bridge = Bridge::new();
    bridge.alice_joins();
    drain(&mut bridge.chat_out);

    feed(&mut bridge.gateway, bridge.irc, ":alice TOPIC #a :Release day");

    assert_eq!(
        drain(&mut bridge.chat_out),
        vec!["PRIVMSG #b :### alice set the topic to: Release day"]
    );
    let channel = bridge.gateway.directory().channel(bridge.a).unwrap();
    assert_eq!(channel.topic.as_deref(), Some("Release day"));
    assert_eq!(channel.topic_who.as_deref(), Some("alice"));
}

#[test]
fn test_link_connected_joins_client_channels() {
    let mut gateway = Gateway::new(GatewayConfig::default()).unwrap();
    let chat = gateway
        .add_link(&link_config("chat", Dialect::User, "relay"))
        .unwrap();
    gateway.add_channel("chat", "#b", Some("chat-b")).unwrap();
    let mut out = attach(&mut gateway, chat);
    gateway.directory_mut().link_mut(chat).unwrap().state = LinkState::Authenticating;

    feed(&mut gateway, chat, ":chat.server 001 Relay :Welcome");

    assert_eq!(drain(&mut out), vec!["JOIN #b"]);
    assert!(gateway.directory().link(chat).unwrap().is_connected());
}

#[test]
fn test_admin_api_lookups() {
    let mut bridge = Bridge::new();

    assert_eq!(bridge.gateway.find_link_by_tag("chat"), Some(bridge.chat));
    assert_eq!(bridge.gateway.find_channel_by_tag("irc-a"), Some(bridge.a));
    assert!(bridge.gateway.set_link_option("chat", "default_channel", "chat-b").is_ok());
    assert!(bridge.gateway.set_link_option("irc", "default_channel", "irc-a").is_err());
    assert!(bridge.gateway.set_link_option("chat", "colour", "blue").is_err());
    assert!(bridge.gateway.connect_link("nowhere", 0).is_err());

    bridge.gateway.disconnect_link("chat").unwrap();
    assert!(!bridge.gateway.directory().link(bridge.chat).unwrap().has_connection());
}

/// Add a connected p10 link `ten` with channel `#c` to the bridge
fn add_p10(bridge: &mut Bridge) -> (LinkId, ChannelId) {
    let ten = bridge
        .gateway
        .add_link(&link_config("ten", Dialect::P10, "p10.local"))
        .unwrap();
    let c = bridge.gateway.add_channel("ten", "#c", Some("ten-c")).unwrap();
    attach(&mut bridge.gateway, ten);
    (ten, c)
}

#[test]
fn test_p10_channel_cannot_be_linked() {
    let mut bridge = Bridge::new();
    let (_, c) = add_p10(&mut bridge);
    let d = bridge.gateway.add_channel("irc", "#d", Some("irc-d")).unwrap();
    bridge.alice_joins();

    let result = bridge.gateway.link_channels("irc-d", "ten-c");
    assert!(matches!(result, Err(Error::Unsupported { dialect: Dialect::P10, .. })));
    assert_eq!(bridge.gateway.directory().channel(c).unwrap().partner(), None);
    assert_eq!(bridge.gateway.directory().channel(d).unwrap().partner(), None);

    feed(&mut bridge.gateway, bridge.irc, ":alice PRIVMSG #a :hello");
    assert_eq!(drain(&mut bridge.chat_out).last().unwrap(), "PRIVMSG #b :alice: hello");
    assert!(bridge.gateway.directory().link(bridge.irc).unwrap().is_connected());
}

#[test]
fn test_unsupported_output_drops_only_that_link() {
    let mut bridge = Bridge::new();
    let (ten, _) = add_p10(&mut bridge);

    let alice = bridge.alice_joins();

    let dir = bridge.gateway.directory();
    let p10 = dir.link(ten).unwrap();
    assert_eq!(p10.state, LinkState::Disconnected);
    assert!(!p10.has_connection());
    assert!(dir.link(bridge.irc).unwrap().is_connected());
    assert!(dir.link(bridge.chat).unwrap().is_connected());
    assert!(dir.channel(bridge.b).unwrap().has_member(alice));
    assert_eq!(
        drain(&mut bridge.chat_out),
        vec!["PRIVMSG #b :### alice (alice@host) joined the channel"]
    );
    assert!(dir.is_consistent());
}

#[test]
fn test_unsupported_input_drops_receiving_link() {
    let mut bridge = Bridge::new();
    bridge.alice_joins();
    let ten = bridge
        .gateway
        .add_link(&link_config("ten", Dialect::P10, "p10.local"))
        .unwrap();
    let mut ten_out = attach(&mut bridge.gateway, ten);

    feed(&mut bridge.gateway, ten, ":stranger NICK alice");

    assert!(drain(&mut ten_out).is_empty());
    let dir = bridge.gateway.directory();
    assert_eq!(dir.link(ten).unwrap().state, LinkState::Disconnected);
    assert!(!dir.link(ten).unwrap().has_connection());
    assert!(dir.link(bridge.irc).unwrap().is_connected());
    assert!(dir.find_user_by_nick("alice").is_some());
}
