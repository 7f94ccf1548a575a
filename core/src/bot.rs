//! Command bot for multiplexer links
//!
//! People reaching the gateway through a bot multiplexer cannot send IRC
//! commands, so the gateway answers `!commands` in private chat and reacts
//! to the announcements of the multiplexer's control account.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::directory::{LinkId, UserId};
use crate::dispatch::Request;
use crate::gateway::Gateway;
use crate::identity::is_nick_okay;
use crate::info::{admin_lines, format_time, format_uptime, info_lines, link_stats_rows, read_motd, version_string};
use crate::relay::SYNTHETIC_MARKER;
use crate::Result;

const BANNER: &str = "#########################################";
const ACCOUNT_SLOTS: u32 = 4;

lazy_static! {
    static ref FRIENDLY_NAME: Regex =
        Regex::new(r"^User `([^']+)' changed friendly name to `(.*)'$").expect("valid friendly name pattern");
    static ref ADD_REQUEST: Regex =
        Regex::new(r"^The user (\S+) \(.*\) wants to add you").expect("valid add request pattern");
}

fn tell(gateway: &mut Gateway, link: LinkId, nick: &str, text: &str) {
    gateway.send(link, format!("PRIVMSG {} :{}", nick, text));
}

fn notify(gateway: &mut Gateway, link: LinkId, nick: &str, text: &str) {
    tell(gateway, link, nick, &marked(text));
}

fn marked(text: &str) -> String {
    format!("{}{}", SYNTHETIC_MARKER, text)
}

fn tell_all<I, S>(gateway: &mut Gateway, link: LinkId, nick: &str, lines: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for line in lines {
        tell(gateway, link, nick, line.as_ref());
    }
}

/// Greet someone who just appeared on a multiplexer link
pub fn welcome(gateway: &mut Gateway, link: LinkId, nick: &str) {
    let lines = [
        BANNER.to_string(),
        format!("{}Welcome to {}, {}", SYNTHETIC_MARKER, gateway.settings.service_name, nick),
        format!(
            "{}{} : {}",
            SYNTHETIC_MARKER, gateway.settings.service_name, gateway.settings.service_description
        ),
        marked("See !help for more information"),
        marked("and !motd for the message of the day."),
        BANNER.to_string(),
    ];
    tell_all(gateway, link, nick, lines);
}

/// PRIVMSG from the multiplexer's control account
pub fn handle_root_message(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let link = request.link;
    let text = request.param(1);

    if let Some(caps) = FRIENDLY_NAME.captures(text) {
        let nick = &caps[1];
        let realname = &caps[2];
        let Some(user) = gateway.directory.find_user_by_nick(nick) else {
            warn!("Friendly name change for unknown user {} on {}", nick, link);
            return Ok(());
        };
        match gateway.directory.user_mut(user) {
            Some(u) if u.link == link => {
                debug!("{} is now known as '{}'", u.nick, realname);
                u.realname = realname.to_string();
            }
            Some(u) => warn!("Friendly name change for {} who belongs to {}, not {}", nick, u.link, link),
            None => {}
        }
        return Ok(());
    }

    if let Some(caps) = ADD_REQUEST.captures(text) {
        if gateway.settings.bitlbee_auto_add {
            info!("Accepting buddy request from {}", &caps[1]);
            gateway.send(link, format!("PRIVMSG #bitlbee :add 0 {}", &caps[1]));
        }
    }

    if text.eq_ignore_ascii_case("You can use the yes/no commands to answer this question.") {
        gateway.send(link, "PRIVMSG #bitlbee :yes".to_string());
        return Ok(());
    }

    if text.eq_ignore_ascii_case("MSN - Error: Error reported by MSN server: Internal server error/Account banned") {
        warn!("Multiplexer account dropped on {}, switching accounts back on", link);
        for slot in 0..ACCOUNT_SLOTS {
            gateway.send(link, format!("PRIVMSG #bitlbee :account on {}", slot));
        }
    }
    Ok(())
}

/// A `!command` sent in private to the gateway
pub fn handle_command(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let link = request.link;
    let source = request.source();
    let text = request.param(1);
    let (command, argument) = match text.split_once(' ') {
        Some((command, argument)) => (command, argument.trim()),
        None => (text, ""),
    };
    debug!("Bot command '{}' from {}", text, source);

    match command.to_ascii_lowercase().as_str() {
        "!help" => help(gateway, link, source),
        "!add" => {
            for slot in 0..ACCOUNT_SLOTS {
                gateway.send(
                    link,
                    format!(
                        "PRIVMSG #bitlbee :add {} {}@{}",
                        slot,
                        request.message.ident(),
                        request.message.host()
                    ),
                );
            }
            let local = gateway.local_name(link);
            gateway.send(
                link,
                format!(
                    ":{} PRIVMSG {} :{}Account addition completed, you might have to approve it in your client, use !remove to remove again",
                    local, source, SYNTHETIC_MARKER
                ),
            );
        }
        "!remove" => {
            notify(gateway, link, source, "Account removal completed, use !add to add again");
            gateway.send(link, format!("PRIVMSG #bitlbee :remove {}", source));
        }
        "!admin" => {
            let [location1, location2, email] = admin_lines(&gateway.settings);
            let lines = [
                BANNER.to_string(),
                format!("{}{}'s Administrative info", SYNTHETIC_MARKER, gateway.settings.service_name),
                format!("{}{}", SYNTHETIC_MARKER, location1),
                format!("{}{}", SYNTHETIC_MARKER, location2),
                format!("{}{}", SYNTHETIC_MARKER, email),
                BANNER.to_string(),
            ];
            tell_all(gateway, link, source, lines);
        }
        "!stats" => {
            let mut lines = vec![
                BANNER.to_string(),
                marked("<server> <sendq> <sentmsg> <sentKB> <recvmsg> <recvKB> <connecttime>"),
            ];
            lines.extend(
                link_stats_rows(gateway, Gateway::now())
                    .into_iter()
                    .map(|row| format!("{}{}", SYNTHETIC_MARKER, row)),
            );
            lines.push(BANNER.to_string());
            tell_all(gateway, link, source, lines);
        }
        "!uptime" => {
            let uptime = format_uptime(Gateway::now() - gateway.started());
            tell_all(
                gateway,
                link,
                source,
                [BANNER.to_string(), format!("{}Server Up {}", SYNTHETIC_MARKER, uptime), BANNER.to_string()],
            );
        }
        "!motd" => motd(gateway, link, source),
        "!info" => {
            let mut lines = info_lines(&gateway.settings);
            lines.push("End of INFO list".to_string());
            tell_all(gateway, link, source, lines);
        }
        "!version" => {
            let line = format!(" {} {}", version_string(), gateway.settings.service_description);
            tell(gateway, link, source, &line);
        }
        "!join" | "!part" | "!names" | "!topic" => {
            conversation(gateway, request, &command.to_ascii_lowercase())?;
        }
        "!whoami" => {
            let realname = request
                .user
                .and_then(|user| gateway.directory.user(user))
                .map(|u| u.realname.clone())
                .unwrap_or_default();
            let line = format!(
                "{}You are {} ({}@{}) - {}",
                SYNTHETIC_MARKER,
                source,
                request.message.ident(),
                request.message.host(),
                realname
            );
            tell(gateway, link, source, &line);
        }
        "!whois" if !argument.is_empty() => whois(gateway, link, source, argument),
        "!nick" if !argument.is_empty() => {
            if gateway.directory.find_user_by_nick(argument).is_some() {
                notify(gateway, link, source, "Someone else is already using that nick");
            } else if !is_nick_okay(argument) {
                notify(gateway, link, source, "Nicknames must start with an alphabetical character");
            } else {
                let line = format!("{}Changing your name from {} to {}", SYNTHETIC_MARKER, source, argument);
                tell(gateway, link, source, &line);
                gateway.send(link, format!("PRIVMSG #bitlbee :rename {} {}", source, argument));
            }
        }
        _ => notify(gateway, link, source, "Unknown command, see !help"),
    }
    Ok(())
}

fn help(gateway: &mut Gateway, link: LinkId, source: &str) {
    let lines = [
        BANNER.to_string(),
        format!("{}{} ({}) Commands:", SYNTHETIC_MARKER, gateway.settings.service_name, version_string()),
        marked("!nick <nick>   - Change nickname"),
        marked("!add           - Add yourself to this gateway, required if you want messages"),
        marked("!remove        - Remove yourself from the gateway, you won't get any messages anymore at all"),
        "###".to_string(),
        marked("!names         - See who is on the channel"),
        marked("!topic         - See the current channel topic"),
        marked("!whoami        - Who am I?"),
        marked("!whois <nick>  - Query for information about a user"),
        marked("!join          - Join the channel and see what people type"),
        marked("!part          - Part the channel until you log out, makes you completely invisible"),
        "###".to_string(),
        marked("!help          - This help"),
        marked("!admin         - Display Administrative information"),
        marked("!motd          - Display the Message Of The Day"),
        format!("{}!info          - Display {} information", SYNTHETIC_MARKER, gateway.settings.service_name),
        format!("{}!version       - Display {} version information", SYNTHETIC_MARKER, gateway.settings.service_name),
        format!("{}!uptime        - Display {} uptime", SYNTHETIC_MARKER, gateway.settings.service_name),
        format!("{}!stats         - Display {} statistics", SYNTHETIC_MARKER, gateway.settings.service_name),
        BANNER.to_string(),
    ];
    tell_all(gateway, link, source, lines);
}

fn motd(gateway: &mut Gateway, link: LinkId, source: &str) {
    let lines = match read_motd(&gateway.settings) {
        Ok(motd) => {
            let local = gateway.local_name(link);
            let mut lines = vec![format!("{}{} Message of the day", SYNTHETIC_MARKER, local)];
            lines.extend(motd.iter().map(|text| format!("{}{}", SYNTHETIC_MARKER, text)));
            lines.push(marked("End of MOTD command"));
            lines
        }
        Err(e) => {
            debug!("No MOTD available: {}", e);
            vec![marked("MOTD File is missing")]
        }
    };
    tell_all(gateway, link, source, lines);
}

/// `!join`, `!part`, `!names` and `!topic` act on the link's default channel
fn conversation(gateway: &mut Gateway, request: &Request, command: &str) -> Result<()> {
    let link = request.link;
    let source = request.source();
    let Some(user) = request.user else {
        notify(gateway, link, source, "Please use !add first");
        return Ok(());
    };
    let Some(channel) = gateway.directory.link(link).and_then(|l| l.default_channel) else {
        notify(gateway, link, source, "No default channel is configured");
        return Ok(());
    };
    let member = gateway
        .directory
        .channel(channel)
        .map(|ch| ch.has_member(user))
        .unwrap_or(false);

    match command {
        "!join" => {
            if member {
                notify(gateway, link, source, "You are already in the conversation");
                return Ok(());
            }
            notify(gateway, link, source, "You have joined the conversation");
            gateway.channel_add_user(channel, user)
        }
        "!part" => {
            if !member {
                notify(gateway, link, source, "You are not in the conversation");
                return Ok(());
            }
            notify(gateway, link, source, "You have parted the conversation");
            gateway.channel_del_user(channel, user, "Parting the conversation", true)
        }
        "!topic" => {
            if !member {
                notify(gateway, link, source, "If you want to see who is there, join first ;)");
                return Ok(());
            }
            let Some(ch) = gateway.directory.channel(channel) else {
                return Ok(());
            };
            let lines = match &ch.topic {
                Some(topic) => vec![
                    format!("{}Topic: \"{}\"", SYNTHETIC_MARKER, topic),
                    format!(
                        "{}Set by {} at {} GMT",
                        SYNTHETIC_MARKER,
                        ch.topic_who.as_deref().unwrap_or(""),
                        format_time(ch.topic_when)
                    ),
                ],
                None => vec![marked("No Channel Topic has been set")],
            };
            tell_all(gateway, link, source, lines);
            Ok(())
        }
        _ => {
            if !member {
                notify(gateway, link, source, "If you want to see who is there, join first ;)");
                return Ok(());
            }
            let Some(ch) = gateway.directory.channel(channel) else {
                return Ok(());
            };
            let mut lines = vec!["###############################".to_string(), marked("Channel members:")];
            lines.extend(
                ch.members()
                    .iter()
                    .filter(|m| m.introduced)
                    .filter_map(|m| gateway.directory.user(m.user))
                    .map(|u| format!("{}{} ({}) - {}", SYNTHETIC_MARKER, u.nick, u.mask(), u.realname)),
            );
            lines.push("################".to_string());
            tell_all(gateway, link, source, lines);
            Ok(())
        }
    }
}

fn whois(gateway: &mut Gateway, link: LinkId, source: &str, nick: &str) {
    let Some(user) = gateway.directory.find_user_by_nick(nick) else {
        let local = gateway.local_name(link);
        gateway.send(link, format!(":{} PRIVMSG {} :{}No such user '{}'", local, source, SYNTHETIC_MARKER, nick));
        return;
    };
    let lines = whois_lines(gateway, user);
    tell_all(gateway, link, source, lines);
}

fn whois_lines(gateway: &Gateway, user: UserId) -> Vec<String> {
    let Some(u) = gateway.directory.user(user) else {
        return Vec::new();
    };

    let mut lines = vec![
        "###############################".to_string(),
        format!("{}Whois Information for {}", SYNTHETIC_MARKER, u.nick),
        format!("{}Realname    : {}", SYNTHETIC_MARKER, u.realname),
        format!("{}Identity    : {}", SYNTHETIC_MARKER, u.mask()),
    ];
    for &channel in u.channels() {
        let Some(ch) = gateway.directory.channel(channel) else {
            continue;
        };
        let Some(member) = ch.member(user) else {
            warn!("{} is not really on {}", u.mask(), ch.name);
            continue;
        };
        let identity = gateway.directory.link(ch.link).map(|l| l.identity.as_str()).unwrap_or("");
        lines.push(format!(
            "{}Channel     : {}{} @ {}",
            SYNTHETIC_MARKER,
            member.status_prefix(),
            ch.name,
            identity
        ));
    }
    if let Some(home) = gateway.directory.link(u.link) {
        lines.push(format!("{}Server      : {} [{}]", SYNTHETIC_MARKER, home.identity, home.description));
    }
    if let Some(away) = &u.away {
        lines.push(format!("{}Away Reason : {}", SYNTHETIC_MARKER, away));
    }
    let idle = Gateway::now() - u.last_activity;
    lines.push(format!("{}Idle time   : {} second{}", SYNTHETIC_MARKER, idle, if idle == 1 { "" } else { "s" }));
    lines.push("#################".to_string());
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_friendly_name_pattern() {
        let caps = FRIENDLY_NAME
            .captures("User `jeroen' changed friendly name to `Jeroen M'")
            .unwrap();
        assert_eq!(&caps[1], "jeroen");
        assert_eq!(&caps[2], "Jeroen M");
    }

    #[test]
    fn test_add_request_pattern() {
        let text = "The user fuzzel@unfix.org (fuzzel@unfix.org) wants to add you to his/her buddy list. Do you want to allow this?";
        let caps = ADD_REQUEST.captures(text).unwrap();
        assert_eq!(&caps[1], "fuzzel@unfix.org");
        assert!(ADD_REQUEST.captures("The user is away").is_none());
    }
}
