//! Informational queries: WHOIS, VERSION, INFO, ADMIN, MOTD, TIME, STATS
//!
//! The formatting helpers are shared with the bot, which answers the same
//! questions as chat lines on multiplexer links.

use std::fs;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::dispatch::Request;
use crate::gateway::Gateway;
use crate::numeric::NumericReply;
use crate::{Error, Result, VERSION};

const NOT_CONFIGURED: &str = "Not configured";
const RULE: &str = "==--------------------------------==";

/// Version token reported to peers
pub fn version_string() -> String {
    format!("rustrelay-{}", VERSION)
}

/// `D days H:MM:SS`
pub fn format_uptime(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let days = seconds / 86_400;
    let hours = seconds % 86_400 / 3_600;
    let minutes = seconds % 3_600 / 60;
    format!("{} days {}:{:02}:{:02}", days, hours, minutes, seconds % 60)
}

/// Unix time rendered as `YYYY-MM-DD HH:MM:SS` in UTC
pub fn format_time(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .unwrap_or_default()
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// One row per link: identity, send queue, sent messages, sent KiB,
/// received messages, received KiB, seconds since the last connect
pub fn link_stats_rows(gateway: &Gateway, now: i64) -> Vec<String> {
    gateway
        .directory
        .links()
        .map(|(_, l)| {
            format!(
                "{} 0 {} {} {} {} {}",
                l.identity,
                l.stats.sent_msgs,
                l.stats.sent_bytes / 1024,
                l.stats.recv_msgs,
                l.stats.recv_bytes / 1024,
                now - l.last_connect
            )
        })
        .collect()
}

/// Location and contact lines, in ADMIN order
pub fn admin_lines(settings: &GatewayConfig) -> [String; 3] {
    let or_default = |value: &Option<String>| value.clone().unwrap_or_else(|| NOT_CONFIGURED.to_string());
    [
        or_default(&settings.admin_location1),
        or_default(&settings.admin_location2),
        or_default(&settings.admin_email),
    ]
}

/// Lines of the message of the day, read fresh from disk
pub fn read_motd(settings: &GatewayConfig) -> Result<Vec<String>> {
    let path = settings
        .motd_file
        .as_ref()
        .ok_or_else(|| Error::NotFound("MOTD file".to_string()))?;
    let content = fs::read_to_string(path)?;
    Ok(content.lines().map(str::to_string).collect())
}

/// Banner shown for INFO
pub fn info_lines(settings: &GatewayConfig) -> Vec<String> {
    vec![
        RULE.to_string(),
        format!("            {}", settings.service_name),
        String::new(),
        format!("        {}", settings.service_description),
        String::new(),
        "        Linkers of the channels".to_string(),
        RULE.to_string(),
        format!("        {}", version_string()),
        RULE.to_string(),
    ]
}

/// WHOIS: `p0` nick, or `p0` server and `p1` nick
pub fn handle_whois(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let link = request.link;
    let local = gateway.local_name(link);
    let source = request.source();
    let nick = if request.param_count() == 2 {
        request.param(1)
    } else {
        request.param(0)
    };

    let Some(user) = gateway.directory.find_user_by_nick(nick) else {
        warn!("Unknown user {} during whois from {}", nick, source);
        gateway.send(
            link,
            NumericReply::ErrNoSuchNick.line(&local, source, &format!("{} :No such nick/channel", nick)),
        );
        return Ok(());
    };
    let Some(u) = gateway.directory.user(user) else {
        return Ok(());
    };

    let mut lines = vec![NumericReply::RplWhoisUser.line(
        &local,
        source,
        &format!("{} {} {} * :{}", u.nick, u.ident, u.host, u.realname),
    )];
    for &channel in u.channels() {
        let Some(ch) = gateway.directory.channel(channel) else {
            continue;
        };
        if ch.link != link {
            continue;
        }
        match ch.member(user) {
            Some(member) => lines.push(NumericReply::RplWhoisChannels.line(
                &local,
                source,
                &format!("{} :{}{}", u.nick, member.status_prefix(), ch.name),
            )),
            None => warn!("{} is not really on {}", u.mask(), ch.name),
        }
    }
    if let Some(home) = gateway.directory.link(u.link) {
        lines.push(NumericReply::RplWhoisServer.line(
            &local,
            source,
            &format!("{} {} :{}", u.nick, home.identity, home.description),
        ));
    }
    if let Some(away) = &u.away {
        lines.push(NumericReply::RplAway.line(&local, source, &format!("{} :{}", u.nick, away)));
    }
    let idle = Gateway::now() - u.last_activity;
    lines.push(NumericReply::RplWhoisIdle.line(
        &local,
        source,
        &format!("{} {} :second{} idle", u.nick, idle, if idle == 1 { "" } else { "s" }),
    ));
    lines.push(NumericReply::RplEndOfWhois.line(&local, source, &format!("{} :End of WHOIS list", u.nick)));

    for line in lines {
        gateway.send(link, line);
    }
    Ok(())
}

pub fn handle_version(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let local = gateway.local_name(request.link);
    let line = NumericReply::RplVersion.line(
        &local,
        request.source(),
        &format!("{} :{}", version_string(), gateway.settings.service_description),
    );
    gateway.send(request.link, line);
    Ok(())
}

pub fn handle_info(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let local = gateway.local_name(request.link);
    let source = request.source();
    let mut lines: Vec<String> = info_lines(&gateway.settings)
        .iter()
        .map(|text| NumericReply::RplInfo.line(&local, source, &format!(":{}", text)))
        .collect();
    lines.push(NumericReply::RplEndOfInfo.line(&local, source, ":End of INFO list"));

    for line in lines {
        gateway.send(request.link, line);
    }
    Ok(())
}

pub fn handle_admin(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let local = gateway.local_name(request.link);
    let source = request.source();
    let [location1, location2, email] = admin_lines(&gateway.settings);
    let lines = [
        NumericReply::RplAdminMe.line(&local, source, &format!("{} :Administrative info", local)),
        NumericReply::RplAdminLoc1.line(&local, source, &format!(":{}", location1)),
        NumericReply::RplAdminLoc2.line(&local, source, &format!(":{}", location2)),
        NumericReply::RplAdminEmail.line(&local, source, &format!(":{}", email)),
    ];

    for line in lines {
        gateway.send(request.link, line);
    }
    Ok(())
}

pub fn handle_motd(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let local = gateway.local_name(request.link);
    let source = request.source();

    let lines = match read_motd(&gateway.settings) {
        Ok(motd) => {
            let mut lines = vec![NumericReply::RplMotdStart.line(
                &local,
                source,
                &format!(":- {} Message of the day - ", local),
            )];
            lines.extend(
                motd.iter()
                    .map(|text| NumericReply::RplMotd.line(&local, source, &format!(":{}", text))),
            );
            lines.push(NumericReply::RplEndOfMotd.line(&local, source, ":End of MOTD command"));
            lines
        }
        Err(e) => {
            debug!("No MOTD available: {}", e);
            vec![NumericReply::ErrNoMotd.line(&local, source, ":MOTD File is missing")]
        }
    };

    for line in lines {
        gateway.send(request.link, line);
    }
    Ok(())
}

pub fn handle_time(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let local = gateway.local_name(request.link);
    let line = NumericReply::RplTime.line(
        &local,
        request.source(),
        &format!(":{}", format_time(Gateway::now())),
    );
    gateway.send(request.link, line);
    Ok(())
}

/// STATS: `p0` query letter, `l` for links and `u` for uptime
pub fn handle_stats(gateway: &mut Gateway, request: &Request) -> Result<()> {
    let now = Gateway::now();
    let local = gateway.local_name(request.link);
    let source = request.source();
    let query = request.param(0);

    let mut lines = Vec::new();
    match query {
        "l" => lines.extend(
            link_stats_rows(gateway, now)
                .iter()
                .map(|row| NumericReply::RplStatsLinkInfo.line(&local, source, row)),
        ),
        "u" => lines.push(NumericReply::RplStatsUptime.line(
            &local,
            source,
            &format!(":Server Up {}", format_uptime(now - gateway.started())),
        )),
        _ => {}
    }
    lines.push(NumericReply::RplEndOfStats.line(&local, source, &format!("{} :End of STATS report", query)));

    for line in lines {
        gateway.send(request.link, line);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(0), "0 days 0:00:00");
        assert_eq!(format_uptime(93_784), "1 days 2:03:04");
        assert_eq!(format_uptime(-5), "0 days 0:00:00");
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0), "1970-01-01 00:00:00");
        assert_eq!(format_time(1_000_000_000), "2001-09-09 01:46:40");
    }

    #[test]
    fn test_admin_lines_defaults() {
        let mut settings = GatewayConfig::default();
        settings.admin_email = Some("ops@example.org".to_string());
        let [location1, location2, email] = admin_lines(&settings);
        assert_eq!(location1, NOT_CONFIGURED);
        assert_eq!(location2, NOT_CONFIGURED);
        assert_eq!(email, "ops@example.org");
    }

    #[test]
    fn test_read_motd() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Welcome").unwrap();
        writeln!(file, "Be nice").unwrap();

        let mut settings = GatewayConfig::default();
        assert!(read_motd(&settings).is_err());
        settings.motd_file = Some(file.path().to_path_buf());
        assert_eq!(read_motd(&settings).unwrap(), vec!["Welcome", "Be nice"]);
    }
}
