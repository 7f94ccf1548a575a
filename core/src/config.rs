//! Configuration management

use crate::link::Dialect;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identity and administrative information
    pub gateway: GatewayConfig,
    /// Networks to connect to
    #[serde(default)]
    pub links: Vec<LinkConfig>,
    /// Channels known up front
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    /// Channel pairs bridged at startup
    #[serde(default)]
    pub channel_links: Vec<ChannelLinkConfig>,
}

/// Gateway-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Name shown in banners and bot replies
    pub service_name: String,
    pub service_description: String,
    /// Message of the day, read on every MOTD request
    pub motd_file: Option<PathBuf>,
    pub admin_location1: Option<String>,
    pub admin_location2: Option<String>,
    pub admin_email: Option<String>,
    /// Accept buddy requests on bot-multiplexer links automatically
    pub bitlbee_auto_add: bool,
    /// `true` logs at debug, `false` at most at info, unset leaves the
    /// command line level alone
    pub verbose: Option<bool>,
}

/// One remote network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Short unique name used to address the link
    pub tag: String,
    pub dialect: Dialect,
    pub hostname: String,
    pub port: u16,
    /// Nickname used on user-like links
    #[serde(default)]
    pub nickname: Option<String>,
    /// Name the gateway presents itself as on this link
    pub local_name: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Label for the remote side, shown in STATS and WHOIS
    pub identity: String,
    /// Description sent during the handshake
    pub description: String,
    /// Password for the multiplexer's `identify` command
    #[serde(default)]
    pub identify_password: Option<String>,
    /// Tag of the channel that receives messages not addressed to a channel
    #[serde(default)]
    pub default_channel: Option<String>,
    #[serde(default = "default_autoconnect")]
    pub autoconnect: bool,
}

/// A channel on one link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Tag of the owning link
    pub link: String,
    pub name: String,
    pub tag: String,
}

/// Two channel tags to bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelLinkConfig {
    pub a: String,
    pub b: String,
}

fn default_autoconnect() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            links: vec![
                LinkConfig {
                    tag: "ircnet".to_string(),
                    dialect: Dialect::Rfc1459,
                    hostname: "irc.example.net".to_string(),
                    port: 6667,
                    nickname: None,
                    local_name: "relay.example.org".to_string(),
                    password: Some("linkpass".to_string()),
                    identity: "irc.example.net".to_string(),
                    description: "Relay gateway".to_string(),
                    identify_password: None,
                    default_channel: None,
                    autoconnect: true,
                },
                LinkConfig {
                    tag: "chat".to_string(),
                    dialect: Dialect::User,
                    hostname: "chat.example.com".to_string(),
                    port: 6667,
                    nickname: Some("Relay".to_string()),
                    local_name: "relay".to_string(),
                    password: None,
                    identity: "chat.example.com".to_string(),
                    description: "Relay gateway".to_string(),
                    identify_password: None,
                    default_channel: Some("chat-lobby".to_string()),
                    autoconnect: true,
                },
            ],
            channels: vec![
                ChannelConfig {
                    link: "ircnet".to_string(),
                    name: "#lobby".to_string(),
                    tag: "ircnet-lobby".to_string(),
                },
                ChannelConfig {
                    link: "chat".to_string(),
                    name: "#lobby".to_string(),
                    tag: "chat-lobby".to_string(),
                },
            ],
            channel_links: vec![ChannelLinkConfig {
                a: "ircnet-lobby".to_string(),
                b: "chat-lobby".to_string(),
            }],
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            service_name: "rustrelay".to_string(),
            service_description: "Linking channels across networks".to_string(),
            motd_file: None,
            admin_location1: None,
            admin_location2: None,
            admin_email: None,
            bitlbee_auto_add: false,
            verbose: None,
        }
    }
}

impl GatewayConfig {
    /// The log level to use when `requested` was asked for on the command line
    pub fn log_level<'a>(&self, requested: &'a str) -> &'a str {
        match self.verbose {
            Some(true) => "debug",
            Some(false) if matches!(requested.to_lowercase().as_str(), "trace" | "debug") => "info",
            _ => requested,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.gateway.service_name.is_empty() {
            return Err(Error::Config("Service name cannot be empty".to_string()));
        }

        if self.links.len() < 2 {
            return Err(Error::Config(
                "At least two links are needed to relay anything".to_string(),
            ));
        }

        self.validate_links()?;
        self.validate_channels()?;
        self.validate_channel_links()?;

        Ok(())
    }

    fn validate_links(&self) -> Result<()> {
        let mut seen_tags = HashSet::new();

        for link in &self.links {
            if link.tag.is_empty() {
                return Err(Error::Config("Link tag cannot be empty".to_string()));
            }
            if !seen_tags.insert(link.tag.to_lowercase()) {
                return Err(Error::Config(format!("Duplicate link tag: {}", link.tag)));
            }
            if link.hostname.is_empty() {
                return Err(Error::Config(format!("Link {} hostname cannot be empty", link.tag)));
            }
            if link.port == 0 {
                return Err(Error::Config(format!("Link {} port cannot be 0", link.tag)));
            }
            if link.local_name.is_empty() {
                return Err(Error::Config(format!("Link {} local_name cannot be empty", link.tag)));
            }

            if link.dialect.is_user_like() {
                match &link.nickname {
                    Some(nick) if crate::identity::is_nick_okay(nick) => {}
                    Some(nick) => {
                        return Err(Error::Config(format!(
                            "Link {} nickname '{}' is not a valid nickname",
                            link.tag, nick
                        )))
                    }
                    None => {
                        return Err(Error::Config(format!(
                            "Link {} needs a nickname for {} links",
                            link.tag, link.dialect
                        )))
                    }
                }
            } else if link.default_channel.is_some() {
                return Err(Error::Config(format!(
                    "Link {}: default channels are only used on user and bitlbee links",
                    link.tag
                )));
            }

            if link.dialect == Dialect::P10 {
                tracing::warn!("Link {} uses the p10 dialect, which cannot be connected", link.tag);
            }
        }

        Ok(())
    }

    fn validate_channels(&self) -> Result<()> {
        let mut seen_tags = HashSet::new();

        for channel in &self.channels {
            if !crate::message::is_channel_name(&channel.name) {
                return Err(Error::Config(format!("Invalid channel name: {}", channel.name)));
            }
            if !seen_tags.insert(channel.tag.to_lowercase()) {
                return Err(Error::Config(format!("Duplicate channel tag: {}", channel.tag)));
            }
            if !self.links.iter().any(|l| l.tag.eq_ignore_ascii_case(&channel.link)) {
                return Err(Error::Config(format!(
                    "Channel {} references unknown link {}",
                    channel.tag, channel.link
                )));
            }
        }

        for link in &self.links {
            if let Some(default) = &link.default_channel {
                let owned = self
                    .channels
                    .iter()
                    .any(|c| c.tag.eq_ignore_ascii_case(default) && c.link.eq_ignore_ascii_case(&link.tag));
                if !owned {
                    return Err(Error::Config(format!(
                        "Default channel {} of link {} is not a channel on that link",
                        default, link.tag
                    )));
                }
            }
        }

        Ok(())
    }

    fn validate_channel_links(&self) -> Result<()> {
        let mut partnered = HashSet::new();

        for pair in &self.channel_links {
            for tag in [&pair.a, &pair.b] {
                if !self.channels.iter().any(|c| c.tag.eq_ignore_ascii_case(tag)) {
                    return Err(Error::Config(format!("Channel link references unknown channel {}", tag)));
                }
                if !partnered.insert(tag.to_lowercase()) {
                    return Err(Error::Config(format!("Channel {} is linked more than once", tag)));
                }
            }
            if pair.a.eq_ignore_ascii_case(&pair.b) {
                return Err(Error::Config(format!("Channel {} cannot be linked to itself", pair.a)));
            }
            for tag in [&pair.a, &pair.b] {
                if self.channel_dialect(tag) == Some(Dialect::P10) {
                    return Err(Error::Config(format!(
                        "Channel {} is on a p10 link and cannot be linked",
                        tag
                    )));
                }
            }
        }

        Ok(())
    }

    fn channel_dialect(&self, tag: &str) -> Option<Dialect> {
        let channel = self.channels.iter().find(|c| c.tag.eq_ignore_ascii_case(tag))?;
        self.links
            .iter()
            .find(|l| l.tag.eq_ignore_ascii_case(&channel.link))
            .map(|l| l.dialect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_single_link_rejected() {
        let mut config = Config::default();
        config.links.truncate(1);
        config.channels.truncate(1);
        config.channel_links.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_link_tag_rejected() {
        let mut config = Config::default();
        config.links[1].tag = "IRCNET".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_default_channel_on_server_link_rejected() {
        let mut config = Config::default();
        config.links[0].default_channel = Some("ircnet-lobby".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_user_link_needs_nickname() {
        let mut config = Config::default();
        config.links[1].nickname = None;
        assert!(config.validate().is_err());
        config.links[1].nickname = Some("9lives".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_channel_linked_twice_rejected() {
        let mut config = Config::default();
        config.channel_links.push(ChannelLinkConfig {
            a: "chat-lobby".to_string(),
            b: "ircnet-lobby".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_p10_channel_link_rejected() {
        let mut config = Config::default();
        config.links[0].dialect = Dialect::P10;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("p10"));
    }

    #[test]
    fn test_verbose_log_level() {
        let mut settings = GatewayConfig::default();
        assert_eq!(settings.log_level("trace"), "trace");

        settings.verbose = Some(true);
        assert_eq!(settings.log_level("warn"), "debug");

        settings.verbose = Some(false);
        assert_eq!(settings.log_level("debug"), "info");
        assert_eq!(settings.log_level("warn"), "warn");
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        let config = Config::default();
        config.to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.links.len(), 2);
        assert_eq!(loaded.links[1].dialect, Dialect::User);
        assert_eq!(loaded.channel_links[0].b, "chat-lobby");
        loaded.validate().unwrap();
    }

    #[test]
    fn test_minimal_toml() {
        let config: Config = toml::from_str(
            r#"
            [gateway]
            service_name = "bridge"

            [[links]]
            tag = "a"
            dialect = "ts"
            hostname = "a.example"
            port = 6667
            local_name = "bridge.a"
            identity = "a.example"
            description = "bridge"

            [[links]]
            tag = "b"
            dialect = "bitlbee"
            hostname = "b.example"
            port = 6667
            nickname = "bridge"
            local_name = "bridge"
            identity = "b.example"
            description = "bridge"
            autoconnect = false
            "#,
        )
        .unwrap();

        assert_eq!(config.gateway.service_name, "bridge");
        assert!(!config.gateway.bitlbee_auto_add);
        assert_eq!(config.links[0].dialect, Dialect::Ts);
        assert!(config.links[0].autoconnect);
        assert!(!config.links[1].autoconnect);
        config.validate().unwrap();
    }
}
